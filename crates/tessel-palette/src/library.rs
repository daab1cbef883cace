use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tessel_geom::{Axis, Face, FaceMask, Vec3};

use crate::error::{ConfigError, ResolveError};
use crate::geometry::UnitGeometry;
use crate::material::MaterialDesc;
use crate::resolver::{GeometryResolver, ResolvedBlock, ResolvedPart};
use crate::types::{BlockKey, Category};

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    #[default]
    Cube,
    Slab,
    Carpet,
    Cross,
    Air,
    Box {
        min: [f32; 3],
        max: [f32; 3],
    },
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FaceMaterials {
    pub top: Option<String>,
    pub bottom: Option<String>,
    pub side: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ModelDef {
    #[serde(default)]
    pub shape: Shape,
    pub material: Option<String>,
    #[serde(default)]
    pub faces: FaceMaterials,
    pub category: Option<Category>,
}

#[derive(Debug, Default, Deserialize)]
struct LibraryConfig {
    #[serde(default)]
    materials: BTreeMap<String, MaterialDesc>,
    #[serde(default)]
    models: BTreeMap<String, ModelDef>,
}

/// Table-driven resolver: named materials plus block models keyed by short block name.
///
/// Block properties adjust the model: `type` picks the slab half, `facing` turns the model
/// about Y, and `axis` lays cubes on their side.
#[derive(Debug, Default)]
pub struct ModelLibrary {
    materials: BTreeMap<String, MaterialDesc>,
    models: BTreeMap<String, ModelDef>,
}

impl ModelLibrary {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let cfg: LibraryConfig = toml::from_str(toml_str)?;
        Ok(Self {
            materials: cfg.materials,
            models: cfg.models,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    fn model_for(&self, key: &BlockKey) -> Option<(&str, &ModelDef)> {
        self.models
            .get_key_value(key.name.as_str())
            .or_else(|| self.models.get_key_value(key.short_name()))
            .map(|(k, v)| (k.as_str(), v))
    }

    fn material(&self, model: &str, name: &str) -> Result<MaterialDesc, ResolveError> {
        self.materials
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownMaterial {
                model: model.to_string(),
                material: name.to_string(),
            })
    }

    fn face_material_name<'a>(model: &'a ModelDef, face: Face) -> Option<&'a str> {
        let specific = match face {
            Face::Up => model.faces.top.as_deref(),
            Face::Down => model.faces.bottom.as_deref(),
            _ => model.faces.side.as_deref(),
        };
        specific.or(model.material.as_deref())
    }
}

fn shape_bounds(shape: Shape, key: &BlockKey) -> Option<(Vec3, Vec3)> {
    match shape {
        Shape::Cube => Some((Vec3::ZERO, Vec3::ONE)),
        Shape::Slab => match key.property("type") {
            Some("top") => Some((Vec3::new(0.0, 0.5, 0.0), Vec3::ONE)),
            Some("double") => Some((Vec3::ZERO, Vec3::ONE)),
            _ => Some((Vec3::ZERO, Vec3::new(1.0, 0.5, 1.0))),
        },
        Shape::Carpet => Some((Vec3::ZERO, Vec3::new(1.0, 1.0 / 16.0, 1.0))),
        Shape::Box { min, max } => Some((
            Vec3::new(min[0], min[1], min[2]),
            Vec3::new(max[0], max[1], max[2]),
        )),
        Shape::Cross | Shape::Air => None,
    }
}

fn orient(geometry: UnitGeometry, key: &BlockKey) -> UnitGeometry {
    let geometry = match key.property("axis") {
        Some("x") => geometry.rotated(Axis::Z, 1),
        Some("z") => geometry.rotated(Axis::X, 1),
        _ => geometry,
    };
    match key.property("facing") {
        Some("east") => geometry.rotated(Axis::Y, 1),
        Some("south") => geometry.rotated(Axis::Y, 2),
        Some("west") => geometry.rotated(Axis::Y, 3),
        _ => geometry,
    }
}

impl GeometryResolver for ModelLibrary {
    fn resolve(&self, key: &BlockKey) -> Result<ResolvedBlock, ResolveError> {
        let (model_name, model) = self
            .model_for(key)
            .ok_or_else(|| ResolveError::UnknownBlock(key.to_string()))?;

        let mut parts: Vec<(String, UnitGeometry)> = Vec::new();
        match model.shape {
            Shape::Air => {}
            Shape::Cross => {
                let name = model
                    .material
                    .as_deref()
                    .ok_or_else(|| ResolveError::Malformed {
                        block: key.to_string(),
                        reason: "cross model needs a material".into(),
                    })?;
                parts.push((name.to_string(), UnitGeometry::cross()));
            }
            shape => {
                let (min, max) = shape_bounds(shape, key).ok_or_else(|| ResolveError::Malformed {
                    block: key.to_string(),
                    reason: "shape has no bounds".into(),
                })?;
                for face in Face::ALL {
                    let name = Self::face_material_name(model, face).ok_or_else(|| {
                        ResolveError::Malformed {
                            block: key.to_string(),
                            reason: format!("no material for face {face:?}"),
                        }
                    })?;
                    let quad = UnitGeometry::cuboid(min, max, FaceMask(face.bit()));
                    match parts.iter_mut().find(|(n, _)| n == name) {
                        Some((_, g)) => g.append(&quad),
                        None => parts.push((name.to_string(), quad)),
                    }
                }
            }
        }

        let parts = parts
            .into_iter()
            .map(|(name, geometry)| {
                Ok(ResolvedPart {
                    geometry: orient(geometry, key),
                    material: self.material(model_name, &name)?,
                })
            })
            .collect::<Result<Vec<_>, ResolveError>>()?;

        Ok(ResolvedBlock {
            parts,
            category: model.category,
            full_cube_hint: matches!(model.shape, Shape::Cube),
        })
    }
}

/// Palette listing loaded from TOML: `blocks = ["minecraft:stone", "oak_slab[type=top]"]`.
#[derive(Debug, Default, Deserialize)]
pub struct PaletteFile {
    pub blocks: Vec<String>,
}

impl PaletteFile {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    pub fn keys(&self) -> Result<Vec<BlockKey>, ConfigError> {
        self.blocks.iter().map(|s| BlockKey::parse(s)).collect()
    }
}
