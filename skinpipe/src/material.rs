use crate::PackageMaterial;

/// Legacy material flag bits carried through packaged materials.
pub mod legacy_flags {
    pub const USE_OPACITY: u32 = 0x01;
    pub const ALPHA_TEST: u32 = 0x02;
    pub const ADDITIVE: u32 = 0x04;
    pub const TWO_SIDED: u32 = 0x08;
    pub const HIDE: u32 = 0x10;
}

/// `alpha_mode` value that enables alpha-tested rendering.
pub const ALPHA_MODE_MASK: u32 = 1;
const ALPHA_MASK_CUTOFF: f32 = 0.5;

/// Shading parameters handed to the renderer for one packaged material.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct PbrMaterialParams {
    pub metallic: f32,
    pub roughness: f32,
    pub alpha_mode: u32,
    pub alpha_cutoff: f32,
    pub legacy_flags: u32,
}

impl Default for PbrMaterialParams {
    fn default() -> Self {
        Self {
            metallic: 0.0,
            roughness: 1.0,
            alpha_mode: 0,
            alpha_cutoff: 0.0,
            legacy_flags: 0,
        }
    }
}

impl PbrMaterialParams {
    pub fn from_material(material: &PackageMaterial) -> Self {
        Self {
            metallic: material.metallic,
            roughness: material.roughness,
            alpha_mode: material.alpha_mode,
            alpha_cutoff: if material.alpha_mode == ALPHA_MODE_MASK {
                ALPHA_MASK_CUTOFF
            } else {
                0.0
            },
            legacy_flags: material.legacy_flags,
        }
    }

    pub fn two_sided(&self) -> bool {
        self.legacy_flags & legacy_flags::TWO_SIDED != 0
    }

    pub fn additive(&self) -> bool {
        self.legacy_flags & legacy_flags::ADDITIVE != 0
    }

    pub fn hidden(&self) -> bool {
        self.legacy_flags & legacy_flags::HIDE != 0
    }
}
