//! Policy maxima applied while parsing untrusted model data.

/// Upper bounds for every count field read from a model file.
///
/// A count above its bound fails the parse before anything is allocated for it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct ParseLimits {
    pub legacy_materials: usize,
    pub legacy_meshes: usize,
    pub legacy_vertices: usize,
    pub legacy_weights: usize,
    pub legacy_indices: usize,
    pub legacy_points: usize,
    pub legacy_faces: usize,
    pub legacy_physique: usize,
    pub legacy_anim_bones: usize,
    pub legacy_anim_keys: usize,
    pub legacy_frames: usize,

    pub package_vertices: usize,
    pub package_indices: usize,
    pub package_submeshes: usize,
    pub package_bones: usize,
    pub package_clips: usize,
    pub package_channels: usize,
    pub package_keys: usize,
    pub package_materials: usize,
    pub string_len: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            legacy_materials: 4096,
            legacy_meshes: 4096,
            legacy_vertices: 200_000,
            legacy_weights: 2_000_000,
            legacy_indices: 2_000_000,
            legacy_points: 300_000,
            legacy_faces: 2_000_000,
            legacy_physique: 300_000,
            legacy_anim_bones: 2048,
            legacy_anim_keys: 100_000,
            legacy_frames: 4096,

            package_vertices: 262_144,
            package_indices: 1_048_576,
            package_submeshes: 4096,
            package_bones: 1024,
            package_clips: 1024,
            package_channels: 1024,
            package_keys: 100_000,
            package_materials: 4096,
            string_len: 4096,
        }
    }
}
