use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec2, Vec3};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::BindConventionReport;

// ---------------------------------------------------------------------------
// Legacy exporter family
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LegacyMaterial {
    pub id: i32,
    /// Texture path; bare file names are already joined to the model directory.
    pub diffuse_texture: String,
    pub opacity_texture: String,
    pub two_sided: bool,
    pub additive: bool,
    pub alpha_test: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct LegacyFace {
    pub point_index: [i32; 3],
    pub uv: [Vec2; 3],
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct LegacyFaceNormal {
    pub normals: [Vec3; 3],
}

/// Up to four `(bone, weight, offset)` influences for one point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Physique {
    pub bone_names: [String; 4],
    /// Bone ids as stored on disk; remapped into the owning model's skeleton on load.
    pub bone_ids: [i32; 4],
    pub weights: [f32; 4],
    /// Point position in the influencing bone's space.
    pub offsets: [Vec3; 4],
    pub count: i32,
}

impl Physique {
    pub fn influence_count(&self) -> usize {
        self.count.clamp(0, 4) as usize
    }
}

/// A mesh fragment from the 5007 per-node layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LegacyNodeRecord {
    pub name: String,
    pub parent: String,
    pub local: Mat4,
    pub material_id: i32,
    pub points: Vec<Vec3>,
    pub faces: Vec<LegacyFace>,
    pub face_normals: Vec<LegacyFaceNormal>,
    pub physique: Vec<Physique>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerNodeFile {
    pub materials: Vec<LegacyMaterial>,
    pub nodes: Vec<LegacyNodeRecord>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct WeightedVertexRecord {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeightRecord {
    pub bone_name: String,
    pub weight: f32,
    /// Index relative to the owning mesh's vertex list.
    pub vertex: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeightedMeshRecord {
    pub name: String,
    pub parent: String,
    pub local: Mat4,
    pub vertices: Vec<WeightedVertexRecord>,
    pub weights: Vec<WeightRecord>,
    /// Relative to the mesh's own vertex list.
    pub indices: Vec<u16>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeightedMeshFile {
    pub version: u32,
    pub materials: Vec<LegacyMaterial>,
    pub meshes: Vec<WeightedMeshRecord>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LegacyFile {
    PerNode(PerNodeFile),
    Weighted(WeightedMeshFile),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LegacyFrame {
    pub position: Vec3,
    pub rotation: Quat,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LegacyBoneTrack {
    pub name: String,
    pub base: Mat4,
    /// Exactly one sample per animation frame.
    pub frames: Vec<LegacyFrame>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LegacyAnimation {
    pub version: u32,
    pub frame_count: usize,
    /// Playback wraps at this time, measured in frames.
    pub max_time: f32,
    pub tracks: Vec<LegacyBoneTrack>,
    pub track_index: HashMap<String, usize>,
}

impl LegacyAnimation {
    pub fn track(&self, bone_name: &str) -> Option<&LegacyBoneTrack> {
        self.track_index
            .get(bone_name)
            .and_then(|&i| self.tracks.get(i))
    }
}

// ---------------------------------------------------------------------------
// Packaged family
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PackageVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub joints: [u16; 4],
    pub weights: [f32; 4],
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Submesh {
    pub material: u32,
    pub node: u32,
    pub index_start: u32,
    pub index_count: u32,
    /// Identity for version 1 meshes.
    pub node_transform: Mat4,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshChunk {
    pub version: u32,
    pub vertices: Vec<PackageVertex>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<Submesh>,
    pub has_skin: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PackageBone {
    pub name: String,
    /// `-1` or any out-of-range value marks a root.
    pub parent: i32,
    /// Local-to-parent bind transform after convention correction.
    pub bind: Mat4,
    pub inverse_bind: Mat4,
}

impl PackageBone {
    pub fn parent_index(&self, bone_count: usize) -> Option<usize> {
        usize::try_from(self.parent)
            .ok()
            .filter(|&p| p < bone_count)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkeletonChunk {
    pub bones: Vec<PackageBone>,
    pub conventions: BindConventionReport,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PositionKey {
    pub time: f32,
    pub value: Vec3,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RotationKey {
    pub time: f32,
    pub value: Quat,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Channel {
    pub bone: i32,
    pub positions: Vec<PositionKey>,
    pub rotations: Vec<RotationKey>,
}

impl Channel {
    pub fn is_animated(&self) -> bool {
        !self.positions.is_empty() || !self.rotations.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Clip {
    pub name: String,
    pub channels: Vec<Channel>,
}

impl Clip {
    /// Largest key time over every channel.
    pub fn duration(&self) -> f32 {
        self.channels.iter().fold(0.0f32, |acc, ch| {
            let p = ch.positions.last().map_or(0.0, |k| k.time);
            let r = ch.rotations.last().map_or(0.0, |k| k.time);
            acc.max(p).max(r)
        })
    }

    pub fn channel_for_bone(&self, bone: usize) -> Option<&Channel> {
        self.channels
            .iter()
            .find(|ch| usize::try_from(ch.bone).ok() == Some(bone))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PackageMaterial {
    pub legacy_flags: u32,
    pub alpha_mode: u32,
    pub metallic: f32,
    pub roughness: f32,
    pub base_color_texture: String,
    pub normal_texture: String,
    pub orm_texture: String,
    pub emissive_texture: String,
    pub opacity_texture: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct AttachmentSocket {
    pub name: String,
    pub node_index: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelPackage {
    pub model_id: String,
    pub source_glb: Option<String>,
    pub base_dir: Option<PathBuf>,

    pub vertices: Vec<PackageVertex>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<Submesh>,

    pub bones: Vec<PackageBone>,
    pub conventions: BindConventionReport,
    pub clips: Vec<Clip>,
    pub materials: Vec<PackageMaterial>,
    pub sockets: Vec<AttachmentSocket>,
}

impl ModelPackage {
    pub fn clip(&self, name: &str) -> Option<(usize, &Clip)> {
        self.clips.iter().enumerate().find(|(_, c)| c.name == name)
    }

    pub fn socket(&self, name: &str) -> Option<&AttachmentSocket> {
        self.sockets.iter().find(|s| s.name == name)
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

// ---------------------------------------------------------------------------
// Renderer-facing output
// ---------------------------------------------------------------------------

/// CPU-posed vertex handed to the renderer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SkinVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: u32,
    pub uv: [f32; 2],
    pub weights: [f32; 4],
    /// Bone indices of `weights`, saturated at 255. Positions are already
    /// posed, so these only describe the blend.
    pub joints: [u8; 4],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct MeshSubset {
    pub material_id: i32,
    pub index_start: u32,
    pub index_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergedGeometry {
    pub vertices: Vec<SkinVertex>,
    pub indices: Vec<u16>,
    pub subsets: Vec<MeshSubset>,
}

impl MergedGeometry {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}
