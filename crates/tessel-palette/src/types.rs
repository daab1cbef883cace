use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::error::ConfigError;

/// Position of an entry in the chunk palette. Block records refer to entries by this index.
pub type PaletteIndex = u32;

/// Block identity: a namespaced name plus its state properties.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct BlockKey {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl BlockKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Name without the `namespace:` prefix.
    pub fn short_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    /// Parses `name` or `name[k=v,k2=v2]`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let s = s.trim();
        let bad = || ConfigError::BadBlockKey(s.to_string());
        let (name, props) = match s.find('[') {
            Some(open) => {
                let rest = s[open + 1..].strip_suffix(']').ok_or_else(bad)?;
                (&s[..open], Some(rest))
            }
            None => (s, None),
        };
        if name.is_empty() {
            return Err(bad());
        }
        let mut key = BlockKey::new(name);
        if let Some(props) = props {
            for pair in props.split(',').filter(|p| !p.trim().is_empty()) {
                let (k, v) = pair.split_once('=').ok_or_else(bad)?;
                key.properties
                    .insert(k.trim().to_string(), v.trim().to_string());
            }
        }
        Ok(key)
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.properties.is_empty() {
            f.write_str("[")?;
            for (i, (k, v)) in self.properties.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{k}={v}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// Visual category. Output buffers are emitted in declaration order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Solid,
    Water,
    Transparent,
    Emissive,
    Redstone,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Solid,
        Category::Water,
        Category::Transparent,
        Category::Emissive,
        Category::Redstone,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Solid => "solid",
            Category::Water => "water",
            Category::Transparent => "transparent",
            Category::Emissive => "emissive",
            Category::Redstone => "redstone",
        }
    }

    /// Categories whose blocks can never hide a neighbour's face.
    #[inline]
    pub fn is_see_through(self) -> bool {
        matches!(self, Category::Water | Category::Transparent)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let key = BlockKey::parse("minecraft:oak_slab[type=top, waterlogged=false]").unwrap();
        assert_eq!(key.name, "minecraft:oak_slab");
        assert_eq!(key.property("type"), Some("top"));
        assert_eq!(key.short_name(), "oak_slab");
        assert_eq!(
            key.to_string(),
            "minecraft:oak_slab[type=top,waterlogged=false]"
        );
    }

    #[test]
    fn parse_rejects_unclosed_properties() {
        assert!(BlockKey::parse("stone[axis=y").is_err());
        assert!(BlockKey::parse("[axis=y]").is_err());
        assert!(BlockKey::parse("stone[axis]").is_err());
    }

    #[test]
    fn categories_are_ordered_for_output() {
        let mut cats = vec![Category::Redstone, Category::Solid, Category::Emissive];
        cats.sort();
        assert_eq!(
            cats,
            vec![Category::Solid, Category::Emissive, Category::Redstone]
        );
    }
}
