use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use hashbrown::HashMap;
use serde::Deserialize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Opaque,
    Cutout,
    Translucent,
    Emissive,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CullSide {
    #[default]
    Front,
    Back,
    Double,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Sampler settings applied to every material handed out by the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureFiltering {
    pub mipmaps: bool,
    pub mag: FilterMode,
    pub min: FilterMode,
}

impl TextureFiltering {
    /// Crisp magnification for pixel-art textures. Alpha-tested and blended modes skip mipmaps
    /// so their edges do not dissolve at distance.
    pub fn for_mode(mode: RenderMode) -> Self {
        match mode {
            RenderMode::Opaque | RenderMode::Emissive => TextureFiltering {
                mipmaps: true,
                mag: FilterMode::Nearest,
                min: FilterMode::Linear,
            },
            RenderMode::Cutout | RenderMode::Translucent => TextureFiltering {
                mipmaps: false,
                mag: FilterMode::Nearest,
                min: FilterMode::Nearest,
            },
        }
    }
}

/// Rendering parameters as produced by a geometry resolver.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct MaterialDesc {
    pub mode: RenderMode,
    pub color: [u8; 4],
    pub opacity: f32,
    pub side: CullSide,
    pub texture: Option<String>,
    pub alpha_cutoff: f32,
    pub metalness: f32,
    pub roughness: f32,
    pub emissive: [u8; 3],
    pub emissive_intensity: f32,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            mode: RenderMode::Opaque,
            color: [255, 255, 255, 255],
            opacity: 1.0,
            side: CullSide::Front,
            texture: None,
            alpha_cutoff: 0.5,
            metalness: 0.0,
            roughness: 1.0,
            emissive: [0, 0, 0],
            emissive_intensity: 0.0,
        }
    }
}

impl MaterialDesc {
    /// Magenta double-sided material used for the placeholder of unresolvable blocks.
    pub fn placeholder() -> Self {
        Self {
            color: [255, 0, 255, 255],
            side: CullSide::Double,
            ..Self::default()
        }
    }

    /// True when nothing behind a surface with this material can be seen.
    pub fn is_opaque(&self) -> bool {
        matches!(self.mode, RenderMode::Opaque | RenderMode::Emissive)
            && self.opacity >= 1.0
            && self.color[3] == 255
    }

    pub fn signature(&self) -> MaterialSignature {
        let extras = match self.mode {
            RenderMode::Opaque => ModeExtras::Pbr {
                metalness: milli(self.metalness),
                roughness: milli(self.roughness),
            },
            RenderMode::Cutout => ModeExtras::Cutout {
                alpha_cutoff: milli(self.alpha_cutoff),
            },
            RenderMode::Translucent => ModeExtras::None,
            RenderMode::Emissive => ModeExtras::Emissive {
                color: self.emissive,
                intensity: milli(self.emissive_intensity),
            },
        };
        MaterialSignature {
            mode: self.mode,
            color: self.color,
            opacity: milli(self.opacity),
            side: self.side,
            texture: self.texture.clone(),
            extras,
        }
    }
}

#[inline]
fn milli(v: f32) -> u32 {
    (v.clamp(0.0, 4_000_000.0) * 1000.0).round() as u32
}

/// Parameters that only matter for one render mode; they never split materials of other modes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModeExtras {
    None,
    Pbr { metalness: u32, roughness: u32 },
    Cutout { alpha_cutoff: u32 },
    Emissive { color: [u8; 3], intensity: u32 },
}

/// Canonical, hashable identity of a material: mode, color, opacity, culling side, texture
/// and the mode-specific parameters, floats quantized to thousandths.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MaterialSignature {
    pub mode: RenderMode,
    pub color: [u8; 4],
    pub opacity: u32,
    pub side: CullSide,
    pub texture: Option<String>,
    pub extras: ModeExtras,
}

/// One deduplicated material shared by every palette entry whose signature matches.
#[derive(Debug)]
pub struct SharedMaterial {
    pub id: u32,
    pub signature: MaterialSignature,
    pub desc: MaterialDesc,
    pub filtering: TextureFiltering,
    disposed: AtomicBool,
}

impl SharedMaterial {
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

struct Slot {
    material: Arc<SharedMaterial>,
    refs: usize,
}

#[derive(Default)]
struct RegistryInner {
    by_signature: HashMap<MaterialSignature, Slot>,
    next_id: u32,
    disposed: u64,
}

/// Reference-counted material deduplication.
///
/// `acquire` returns the existing material for a signature (incrementing its count) or
/// clones the descriptor into a new one with the registry's filtering policy applied.
/// `release` disposes the material exactly once, when its count reaches zero.
#[derive(Default)]
pub struct MaterialRegistry {
    inner: Mutex<RegistryInner>,
}

impl MaterialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, desc: &MaterialDesc) -> Arc<SharedMaterial> {
        let signature = desc.signature();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = inner.by_signature.get_mut(&signature) {
            slot.refs += 1;
            return Arc::clone(&slot.material);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let material = Arc::new(SharedMaterial {
            id,
            signature: signature.clone(),
            desc: desc.clone(),
            filtering: TextureFiltering::for_mode(desc.mode),
            disposed: AtomicBool::new(false),
        });
        inner.by_signature.insert(
            signature,
            Slot {
                material: Arc::clone(&material),
                refs: 1,
            },
        );
        material
    }

    /// Drops one reference. Returns true if this call disposed the material.
    /// Releasing a material the registry no longer tracks is a no-op.
    pub fn release(&self, material: &SharedMaterial) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = inner.by_signature.get_mut(&material.signature) else {
            return false;
        };
        if slot.material.id != material.id {
            return false;
        }
        slot.refs -= 1;
        if slot.refs > 0 {
            return false;
        }
        if let Some(slot) = inner.by_signature.remove(&material.signature) {
            slot.material.disposed.store(true, Ordering::Release);
            inner.disposed += 1;
            log::debug!(target: "events", "material {} disposed", slot.material.id);
        }
        true
    }

    pub fn ref_count(&self, signature: &MaterialSignature) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.by_signature.get(signature).map_or(0, |s| s.refs)
    }

    /// Number of live (not yet disposed) materials.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.by_signature.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn disposed_count(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.disposed
    }
}
