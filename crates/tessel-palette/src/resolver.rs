use crate::error::ResolveError;
use crate::geometry::UnitGeometry;
use crate::material::{MaterialDesc, RenderMode};
use crate::types::{BlockKey, Category};

/// One geometry/material pair of a resolved block.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPart {
    pub geometry: UnitGeometry,
    pub material: MaterialDesc,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedBlock {
    pub parts: Vec<ResolvedPart>,
    /// Explicit category; derived from the key and materials when `None`.
    pub category: Option<Category>,
    /// Coarse "this is a full opaque cube" hint, consulted only when no part carries
    /// positions to measure.
    pub full_cube_hint: bool,
}

impl ResolvedBlock {
    pub fn single(geometry: UnitGeometry, material: MaterialDesc) -> Self {
        Self {
            parts: vec![ResolvedPart { geometry, material }],
            category: None,
            full_cube_hint: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            parts: Vec::new(),
            category: None,
            full_cube_hint: false,
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn has_measurable_geometry(&self) -> bool {
        self.parts.iter().any(|p| !p.geometry.positions.is_empty())
    }

    /// Category for this block: the explicit one, else a guess from the name and materials.
    pub fn category_for(&self, key: &BlockKey) -> Category {
        if let Some(c) = self.category {
            return c;
        }
        let name = key.short_name();
        if name.contains("water") {
            return Category::Water;
        }
        if name.contains("redstone") || name.contains("repeater") || name.contains("comparator")
        {
            return Category::Redstone;
        }
        let modes = || self.parts.iter().map(|p| p.material.mode);
        if modes().any(|m| m == RenderMode::Emissive) {
            Category::Emissive
        } else if modes().any(|m| matches!(m, RenderMode::Translucent | RenderMode::Cutout)) {
            Category::Transparent
        } else {
            Category::Solid
        }
    }
}

/// Turns a block identity into unit-space geometry and materials.
///
/// Called from the precompute pool, so implementations must be thread safe.
pub trait GeometryResolver: Send + Sync {
    fn resolve(&self, key: &BlockKey) -> Result<ResolvedBlock, ResolveError>;
}

impl<F> GeometryResolver for F
where
    F: Fn(&BlockKey) -> Result<ResolvedBlock, ResolveError> + Send + Sync,
{
    fn resolve(&self, key: &BlockKey) -> Result<ResolvedBlock, ResolveError> {
        self(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_guess_prefers_name_then_materials() {
        let glass = ResolvedBlock::single(
            UnitGeometry::cube(),
            MaterialDesc {
                mode: RenderMode::Translucent,
                ..MaterialDesc::default()
            },
        );
        assert_eq!(
            glass.category_for(&BlockKey::new("minecraft:glass")),
            Category::Transparent
        );
        assert_eq!(
            glass.category_for(&BlockKey::new("minecraft:water")),
            Category::Water
        );
        let lamp = ResolvedBlock::single(
            UnitGeometry::cube(),
            MaterialDesc {
                mode: RenderMode::Emissive,
                ..MaterialDesc::default()
            },
        );
        assert_eq!(
            lamp.category_for(&BlockKey::new("minecraft:glowstone")),
            Category::Emissive
        );
        assert_eq!(
            lamp.clone()
                .with_category(Category::Solid)
                .category_for(&BlockKey::new("x")),
            Category::Solid
        );
    }

    #[test]
    fn closures_are_resolvers() {
        let r = |k: &BlockKey| -> Result<ResolvedBlock, ResolveError> {
            Err(ResolveError::UnknownBlock(k.to_string()))
        };
        let res: &dyn GeometryResolver = &r;
        assert!(res.resolve(&BlockKey::new("a")).is_err());
    }
}
