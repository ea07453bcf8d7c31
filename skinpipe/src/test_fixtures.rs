#![allow(dead_code)]

//! In-memory writers for every supported file layout.

use crate::legacy::{EXPORTER_SIGNATURE, PER_NODE_VERSION};
use crate::package::{ANIM_TAG, MATERIALS_TAG, MESH_TAG, SKELETON_TAG};
use crate::{Clip, PackageBone, PackageMaterial, PackageVertex, Physique, Submesh};
use glam::{Mat4, Quat, Vec2, Vec3};

pub(crate) fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn push_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn push_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn push_vec2(out: &mut Vec<u8>, v: Vec2) {
    push_f32(out, v.x);
    push_f32(out, v.y);
}

pub(crate) fn push_vec3(out: &mut Vec<u8>, v: Vec3) {
    push_f32(out, v.x);
    push_f32(out, v.y);
    push_f32(out, v.z);
}

pub(crate) fn push_quat(out: &mut Vec<u8>, q: Quat) {
    push_f32(out, q.x);
    push_f32(out, q.y);
    push_f32(out, q.z);
    push_f32(out, q.w);
}

/// Writes the on-disk row-vector layout of a column-vector matrix.
pub(crate) fn push_mat4(out: &mut Vec<u8>, m: &Mat4) {
    for v in m.to_cols_array() {
        push_f32(out, v);
    }
}

pub(crate) fn push_fixed_str(out: &mut Vec<u8>, s: &str, width: usize) {
    let mut field = vec![0u8; width];
    let bytes = s.as_bytes();
    let len = bytes.len().min(width - 1);
    field[..len].copy_from_slice(&bytes[..len]);
    out.extend_from_slice(&field);
}

pub(crate) fn push_len_string(out: &mut Vec<u8>, s: &str) {
    push_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

// ---------------------------------------------------------------------------
// Legacy per-node layout
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub(crate) struct NodeSpec {
    pub name: String,
    pub parent: String,
    pub local: Mat4,
    pub material_id: i32,
    pub points: Vec<Vec3>,
    /// Point indices and per-corner uv.
    pub faces: Vec<([i32; 3], [Vec2; 3])>,
    /// Per-corner normals, parallel to `faces`.
    pub normals: Vec<[Vec3; 3]>,
    pub physique: Vec<Physique>,
}

impl NodeSpec {
    /// Geometry-less node that only contributes a bone.
    pub fn bone(name: &str, parent: &str, local: Mat4) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.to_string(),
            local,
            ..Self::default()
        }
    }

    /// One triangle offset along x, rigidly bound to the node's own bone.
    pub fn triangle(name: &str, parent: &str, material_id: i32, x: f32) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.to_string(),
            local: Mat4::IDENTITY,
            material_id,
            points: vec![
                Vec3::new(x, 0.0, 0.0),
                Vec3::new(x + 1.0, 0.0, 0.0),
                Vec3::new(x, 1.0, 0.0),
            ],
            faces: vec![([0, 1, 2], [Vec2::ZERO, Vec2::X, Vec2::Y])],
            normals: vec![[Vec3::Z; 3]],
            physique: Vec::new(),
        }
    }

    /// Two triangles sharing an edge.
    pub fn quad(name: &str, parent: &str, material_id: i32) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.to_string(),
            local: Mat4::IDENTITY,
            material_id,
            points: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            faces: vec![
                ([0, 1, 2], [Vec2::ZERO, Vec2::X, Vec2::ONE]),
                ([0, 2, 3], [Vec2::ZERO, Vec2::ONE, Vec2::Y]),
            ],
            normals: vec![[Vec3::Z; 3], [Vec3::Z; 3]],
            physique: Vec::new(),
        }
    }
}

pub(crate) fn physique_one(bone_name: &str, bone_id: i32, weight: f32, offset: Vec3) -> Physique {
    let mut p = Physique {
        count: 1,
        ..Physique::default()
    };
    p.bone_names[0] = bone_name.to_string();
    p.bone_ids[0] = bone_id;
    p.weights[0] = weight;
    p.offsets[0] = offset;
    p
}

fn push_physique(out: &mut Vec<u8>, p: &Physique) {
    for name in &p.bone_names {
        push_fixed_str(out, name, 40);
    }
    for &w in &p.weights {
        push_f32(out, w);
    }
    for &id in &p.bone_ids {
        push_i32(out, id);
    }
    push_i32(out, p.count);
    for &o in &p.offsets {
        push_vec3(out, o);
    }
}

/// `materials` are `(id, diffuse name)` pairs.
pub(crate) fn per_node_file(materials: &[(i32, &str)], nodes: &[NodeSpec]) -> Vec<u8> {
    let mut out = Vec::new();
    push_u32(&mut out, EXPORTER_SIGNATURE);
    push_u32(&mut out, PER_NODE_VERSION);
    push_u32(&mut out, materials.len() as u32);
    push_u32(&mut out, nodes.len() as u32);

    for &(id, name) in materials {
        push_i32(&mut out, id);
        push_i32(&mut out, 0);
        for _ in 0..12 {
            push_f32(&mut out, 1.0);
        }
        push_f32(&mut out, 0.0);
        push_i32(&mut out, 0);
        push_fixed_str(&mut out, name, 256);
        push_fixed_str(&mut out, "", 256);
        push_i32(&mut out, 1);
        push_i32(&mut out, 0);
        push_i32(&mut out, 0);
    }

    for node in nodes {
        push_fixed_str(&mut out, &node.name, 40);
        push_fixed_str(&mut out, &node.parent, 40);
        push_mat4(&mut out, &node.local);
        push_vec3(&mut out, Vec3::ONE);
        push_vec3(&mut out, Vec3::Z);
        push_f32(&mut out, 0.0);
        push_vec3(&mut out, Vec3::Z);
        push_f32(&mut out, 0.0);
        push_mat4(&mut out, &Mat4::IDENTITY);

        push_i32(&mut out, node.points.len() as i32);
        for &p in &node.points {
            push_vec3(&mut out, p);
        }

        push_i32(&mut out, node.faces.len() as i32);
        for (indices, uv) in &node.faces {
            for &i in indices {
                push_i32(&mut out, i);
            }
            for t in uv {
                push_vec3(&mut out, t.extend(0.0));
            }
            push_i32(&mut out, node.material_id);
            push_i32(&mut out, 0);
        }
        for normals in &node.normals {
            push_vec3(&mut out, Vec3::Z);
            for &n in normals {
                push_vec3(&mut out, n);
            }
        }

        push_i32(&mut out, 2);
        push_vec3(&mut out, Vec3::ONE);
        push_vec3(&mut out, Vec3::ONE);

        push_i32(&mut out, node.material_id);

        push_i32(&mut out, node.physique.len() as i32);
        for p in &node.physique {
            push_physique(&mut out, p);
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Legacy weighted mesh
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub(crate) struct MeshSpec {
    pub name: String,
    pub parent: String,
    pub local: Mat4,
    /// Position, normal, uv.
    pub vertices: Vec<(Vec3, Vec3, Vec2)>,
    /// Bone name, weight, vertex index within this mesh.
    pub weights: Vec<(String, f32, u32)>,
    pub indices: Vec<u16>,
}

pub(crate) fn weighted_file(version: u32, materials: &[&str], meshes: &[MeshSpec]) -> Vec<u8> {
    let mut out = Vec::new();
    push_u32(&mut out, EXPORTER_SIGNATURE);
    push_u32(&mut out, version);
    push_i32(&mut out, materials.len() as i32);
    push_i32(&mut out, meshes.len() as i32);

    for name in materials {
        out.extend_from_slice(&[0u8; 72]);
        push_fixed_str(&mut out, name, 40);
        out.extend_from_slice(&[0u8; 88]);
    }

    for mesh in meshes {
        push_fixed_str(&mut out, &mesh.name, 40);
        push_fixed_str(&mut out, &mesh.parent, 40);
        push_mat4(&mut out, &mesh.local);
        push_i32(&mut out, mesh.vertices.len() as i32);
        push_i32(&mut out, mesh.weights.len() as i32);
        push_i32(&mut out, mesh.indices.len() as i32);
        for &(p, n, uv) in &mesh.vertices {
            push_vec3(&mut out, p);
            push_vec3(&mut out, n);
            push_vec2(&mut out, uv);
        }
        for (bone, w, v) in &mesh.weights {
            push_fixed_str(&mut out, bone, 40);
            push_f32(&mut out, *w);
            push_u32(&mut out, *v);
        }
        for &i in &mesh.indices {
            push_u16(&mut out, i);
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Legacy animation
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub(crate) struct AnimBoneSpec {
    pub name: String,
    pub positions: Vec<(Vec3, i32)>,
    pub rotations: Vec<(Quat, i32)>,
    pub visibility: usize,
}

pub(crate) fn legacy_animation(version: u32, max_frame: i32, bones: &[AnimBoneSpec]) -> Vec<u8> {
    let mut out = Vec::new();
    push_u32(&mut out, EXPORTER_SIGNATURE);
    push_u32(&mut out, version);
    push_i32(&mut out, max_frame);
    push_i32(&mut out, bones.len() as i32);
    push_i32(&mut out, 0);

    for bone in bones {
        push_fixed_str(&mut out, &bone.name, 40);
        push_mat4(&mut out, &Mat4::IDENTITY);
        push_i32(&mut out, bone.positions.len() as i32);
        for &(p, frame) in &bone.positions {
            push_vec3(&mut out, p);
            push_i32(&mut out, frame);
        }
        push_i32(&mut out, bone.rotations.len() as i32);
        for &(q, frame) in &bone.rotations {
            push_quat(&mut out, q);
            push_i32(&mut out, frame);
        }
        if version > 0x12 {
            push_u32(&mut out, bone.visibility as u32);
            for frame in 0..bone.visibility {
                push_f32(&mut out, 1.0);
                push_i32(&mut out, frame as i32);
            }
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Packaged chunks
// ---------------------------------------------------------------------------

pub(crate) fn mesh_chunk(
    version: u32,
    vertices: &[PackageVertex],
    indices: &[u32],
    submeshes: &[Submesh],
    has_skin: bool,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MESH_TAG);
    push_u32(&mut out, version);
    push_u32(&mut out, vertices.len() as u32);
    push_u32(&mut out, indices.len() as u32);
    push_u32(&mut out, submeshes.len() as u32);
    push_u32(&mut out, has_skin as u32);
    for v in vertices {
        for &x in v.position.iter().chain(&v.normal).chain(&v.uv) {
            push_f32(&mut out, x);
        }
        for &j in &v.joints {
            push_u16(&mut out, j);
        }
        for &w in &v.weights {
            push_f32(&mut out, w);
        }
    }
    for &i in indices {
        push_u32(&mut out, i);
    }
    for s in submeshes {
        push_u32(&mut out, s.material);
        push_u32(&mut out, s.node);
        push_u32(&mut out, s.index_start);
        push_u32(&mut out, s.index_count);
        if version >= 2 {
            push_mat4(&mut out, &s.node_transform);
        }
    }
    out
}

pub(crate) fn skeleton_chunk(bones: &[PackageBone]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&SKELETON_TAG);
    push_u32(&mut out, 1);
    push_u32(&mut out, bones.len() as u32);
    for b in bones {
        push_i32(&mut out, b.parent);
        push_len_string(&mut out, &b.name);
        push_mat4(&mut out, &b.bind);
        push_mat4(&mut out, &b.inverse_bind);
    }
    out
}

pub(crate) fn anim_chunk(clips: &[Clip]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&ANIM_TAG);
    push_u32(&mut out, 1);
    push_u32(&mut out, clips.len() as u32);
    for clip in clips {
        push_len_string(&mut out, &clip.name);
        push_u32(&mut out, clip.channels.len() as u32);
        for ch in &clip.channels {
            push_i32(&mut out, ch.bone);
            push_u32(&mut out, ch.positions.len() as u32);
            for k in &ch.positions {
                push_f32(&mut out, k.time);
                push_vec3(&mut out, k.value);
            }
            push_u32(&mut out, ch.rotations.len() as u32);
            for k in &ch.rotations {
                push_f32(&mut out, k.time);
                push_quat(&mut out, k.value);
            }
        }
    }
    out
}

pub(crate) fn materials_chunk(materials: &[PackageMaterial]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MATERIALS_TAG);
    push_u32(&mut out, 1);
    push_u32(&mut out, materials.len() as u32);
    for m in materials {
        push_u32(&mut out, m.legacy_flags);
        push_u32(&mut out, m.alpha_mode);
        push_f32(&mut out, m.metallic);
        push_f32(&mut out, m.roughness);
        for s in [
            &m.base_color_texture,
            &m.normal_texture,
            &m.orm_texture,
            &m.emissive_texture,
            &m.opacity_texture,
        ] {
            push_len_string(&mut out, s);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Packaged models built directly in memory
// ---------------------------------------------------------------------------

/// Bone whose inverse bind is the inverse of `global`.
pub(crate) fn package_bone(name: &str, parent: i32, local: Mat4, global: Mat4) -> PackageBone {
    PackageBone {
        name: name.to_string(),
        parent,
        bind: local,
        inverse_bind: global.inverse(),
    }
}

pub(crate) fn skinned_vertex(position: Vec3, joint: u16) -> PackageVertex {
    PackageVertex {
        position: position.to_array(),
        normal: [0.0, 0.0, 1.0],
        uv: [0.0, 0.0],
        joints: [joint, 0, 0, 0],
        weights: [1.0, 0.0, 0.0, 0.0],
    }
}
