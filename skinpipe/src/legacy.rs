//! Parsers for the legacy exporter family: the generic weighted mesh, the
//! 5007 per-node layout used for equip parts, and the legacy animation file.
//!
//! The parsers are IO-free; texture names are resolved against an optional
//! model directory passed in by the caller.

use crate::binary::BinaryInput;
use crate::runtime::{sample_position, sample_rotation};
use crate::{
    Error, LegacyAnimation, LegacyBoneTrack, LegacyFace, LegacyFaceNormal, LegacyFile,
    LegacyFrame, LegacyMaterial, LegacyNodeRecord, ParseLimits, PerNodeFile, Physique,
    PositionKey, RotationKey, WeightRecord, WeightedMeshFile, WeightedMeshRecord,
    WeightedVertexRecord,
};
use std::collections::HashMap;
use std::path::Path;

/// Signature shared by every legacy exporter file.
pub const EXPORTER_SIGNATURE: u32 = 0x0107_F060;

/// Version of the per-node layout used by equip part libraries.
pub const PER_NODE_VERSION: u32 = 0x5007;

/// Animation files above this version carry visibility keys.
const ANIM_VISIBILITY_VERSION: u32 = 0x12;

const NAME_WIDTH: usize = 40;
const PATH_WIDTH: usize = 256;

const PER_NODE_MATERIAL_SIZE: usize = 588;
const WEIGHTED_MATERIAL_SIZE: usize = 200;
const WEIGHTED_MATERIAL_NAME_OFFSET: usize = 72;

// uvw (3x3 f32), mtrl id, smoothing group
const FACE_TAIL_SIZE: usize = 36 + 8;
const FACE_SIZE: usize = 12 + FACE_TAIL_SIZE;
const FACE_NORMAL_SIZE: usize = 12 + 36;
const PHYSIQUE_SIZE: usize = 4 * NAME_WIDTH + 16 + 16 + 4 + 48;

#[derive(Copy, Clone, Debug)]
struct LegacyHeader {
    version: u32,
    first: i32,
    second: i32,
}

fn read_header(input: &mut BinaryInput<'_>) -> Result<LegacyHeader, Error> {
    input.section("legacy header");
    let signature = input.read_u32()?;
    if signature != EXPORTER_SIGNATURE {
        return Err(Error::BadMagic {
            chunk: "legacy model".to_string(),
        });
    }
    Ok(LegacyHeader {
        version: input.read_u32()?,
        first: input.read_i32()?,
        second: input.read_i32()?,
    })
}

fn checked_count(value: i32, what: &str, min: usize, max: usize) -> Result<usize, Error> {
    if value < min as i32 || value as i64 > max as i64 {
        return Err(Error::CountOutOfRange {
            what: what.to_string(),
            count: value as i64,
            max,
        });
    }
    Ok(value as usize)
}

fn resolve_texture_path(name: String, model_dir: Option<&Path>) -> String {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return name;
    }
    match model_dir {
        Some(dir) if !dir.as_os_str().is_empty() => format!("{}/{}", dir.display(), name),
        _ => name,
    }
}

/// Parses either legacy sub-format, dispatching on the header version.
pub fn parse_legacy_model(
    bytes: &[u8],
    model_dir: Option<&Path>,
    limits: &ParseLimits,
) -> Result<LegacyFile, Error> {
    let mut input = BinaryInput::new(bytes);
    let header = read_header(&mut input)?;
    if header.version == PER_NODE_VERSION {
        read_per_node_body(&mut input, header, model_dir, limits).map(LegacyFile::PerNode)
    } else {
        read_weighted_body(&mut input, header, model_dir, limits).map(LegacyFile::Weighted)
    }
}

/// Parses a 5007 per-node file; any other version is rejected.
pub fn parse_per_node(
    bytes: &[u8],
    model_dir: Option<&Path>,
    limits: &ParseLimits,
) -> Result<PerNodeFile, Error> {
    let mut input = BinaryInput::new(bytes);
    let header = read_header(&mut input)?;
    if header.version != PER_NODE_VERSION {
        return Err(Error::UnsupportedVersion {
            chunk: "legacy part library".to_string(),
            version: header.version,
        });
    }
    read_per_node_body(&mut input, header, model_dir, limits)
}

fn read_per_node_body(
    input: &mut BinaryInput<'_>,
    header: LegacyHeader,
    model_dir: Option<&Path>,
    limits: &ParseLimits,
) -> Result<PerNodeFile, Error> {
    // The count fields are unsigned in this layout.
    let material_count = header.first as u32 as usize;
    let node_count = header.second as u32 as usize;
    if node_count == 0 || node_count > limits.legacy_meshes {
        return Err(Error::CountOutOfRange {
            what: "legacy node".to_string(),
            count: node_count as i64,
            max: limits.legacy_meshes,
        });
    }
    if material_count > limits.legacy_materials {
        return Err(Error::CountOutOfRange {
            what: "legacy material".to_string(),
            count: material_count as i64,
            max: limits.legacy_materials,
        });
    }

    input.section("legacy materials");
    input.require(material_count, PER_NODE_MATERIAL_SIZE)?;
    let mut materials = Vec::with_capacity(material_count);
    for _ in 0..material_count {
        let id = input.read_i32()?;
        let _sub_id = input.read_i32()?;
        // ambient, diffuse, specular (rgba each), power, sub material count
        input.skip(48 + 4 + 4)?;
        let diffuse = input.read_fixed_str(PATH_WIDTH)?;
        let opacity = input.read_fixed_str(PATH_WIDTH)?;
        let two_sided = input.read_i32()? != 0;
        let additive = input.read_i32()? != 0;
        let alpha_test = input.read_i32()? != 0;
        materials.push(LegacyMaterial {
            id,
            diffuse_texture: resolve_texture_path(diffuse, model_dir),
            opacity_texture: opacity,
            two_sided,
            additive,
            alpha_test,
        });
    }

    let mut nodes = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        nodes.push(read_node(input, limits)?);
    }

    Ok(PerNodeFile { materials, nodes })
}

fn read_node(input: &mut BinaryInput<'_>, limits: &ParseLimits) -> Result<LegacyNodeRecord, Error> {
    input.section("legacy node header");
    let name = input.read_fixed_str(NAME_WIDTH)?;
    let parent = input.read_fixed_str(NAME_WIDTH)?;
    let local = input.read_mat4()?;
    // ap scale, rotation axis + angle, scale axis + angle, etc matrix
    input.skip(12 + 12 + 4 + 12 + 4 + 64)?;

    input.section("legacy node points");
    let point_count = input.read_count_i32("legacy point", limits.legacy_points)?;
    input.require(point_count, 12)?;
    let mut points = Vec::with_capacity(point_count);
    for _ in 0..point_count {
        points.push(input.read_vec3()?);
    }

    input.section("legacy node faces");
    let face_count = input.read_count_i32("legacy face", limits.legacy_faces)?;
    input.require(face_count, FACE_SIZE + FACE_NORMAL_SIZE)?;
    let mut faces = Vec::with_capacity(face_count);
    for _ in 0..face_count {
        let point_index = [input.read_i32()?, input.read_i32()?, input.read_i32()?];
        let uvw = [input.read_vec3()?, input.read_vec3()?, input.read_vec3()?];
        let _material_id = input.read_i32()?;
        let _smoothing_group = input.read_i32()?;
        faces.push(LegacyFace {
            point_index,
            uv: uvw.map(|t| t.truncate()),
        });
    }
    let mut face_normals = Vec::with_capacity(face_count);
    for _ in 0..face_count {
        let _face_normal = input.read_vec3()?;
        face_normals.push(LegacyFaceNormal {
            normals: [input.read_vec3()?, input.read_vec3()?, input.read_vec3()?],
        });
    }

    input.section("legacy node point colors");
    let color_count = input.read_count_i32("legacy point color", limits.legacy_points)?;
    input.require(color_count, 12)?;
    input.skip(color_count * 12)?;

    input.section("legacy node material");
    let material_id = input.read_i32()?;

    input.section("legacy node physique");
    let physique_count = input.read_count_i32("legacy physique", limits.legacy_physique)?;
    input.require(physique_count, PHYSIQUE_SIZE)?;
    let mut physique = Vec::with_capacity(physique_count);
    for _ in 0..physique_count {
        let mut p = Physique::default();
        for name in &mut p.bone_names {
            *name = input.read_fixed_str(NAME_WIDTH)?;
        }
        for w in &mut p.weights {
            *w = input.read_f32()?;
        }
        for id in &mut p.bone_ids {
            *id = input.read_i32()?;
        }
        p.count = input.read_i32()?;
        for offset in &mut p.offsets {
            *offset = input.read_vec3()?;
        }
        physique.push(p);
    }

    Ok(LegacyNodeRecord {
        name,
        parent,
        local,
        material_id,
        points,
        faces,
        face_normals,
        physique,
    })
}

fn read_weighted_body(
    input: &mut BinaryInput<'_>,
    header: LegacyHeader,
    model_dir: Option<&Path>,
    limits: &ParseLimits,
) -> Result<WeightedMeshFile, Error> {
    let material_count = checked_count(header.first, "legacy material", 0, limits.legacy_materials)?;
    let mesh_count = checked_count(header.second, "legacy mesh", 0, limits.legacy_meshes)?;

    input.section("legacy materials");
    input.require(material_count, WEIGHTED_MATERIAL_SIZE)?;
    let mut materials = Vec::with_capacity(material_count);
    for i in 0..material_count {
        let offset = input.offset();
        input.skip(WEIGHTED_MATERIAL_NAME_OFFSET)?;
        let name = input.read_fixed_str(NAME_WIDTH)?;
        let consumed = input.offset() - offset;
        input.skip(WEIGHTED_MATERIAL_SIZE - consumed)?;
        materials.push(LegacyMaterial {
            id: i as i32,
            diffuse_texture: resolve_texture_path(name, model_dir),
            ..LegacyMaterial::default()
        });
    }

    let mut meshes = Vec::with_capacity(mesh_count);
    for _ in 0..mesh_count {
        input.section("legacy mesh header");
        let name = input.read_fixed_str(NAME_WIDTH)?;
        let parent = input.read_fixed_str(NAME_WIDTH)?;
        let local = input.read_mat4()?;
        let vertex_count = input.read_count_i32("legacy vertex", limits.legacy_vertices)?;
        let weight_count = input.read_count_i32("legacy weight", limits.legacy_weights)?;
        let index_count = input.read_count_i32("legacy index", limits.legacy_indices)?;

        input.section("legacy mesh vertices");
        input.require(vertex_count, 32)?;
        let mut vertices = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            vertices.push(WeightedVertexRecord {
                position: input.read_vec3()?,
                normal: input.read_vec3()?,
                uv: input.read_vec2()?,
            });
        }

        input.section("legacy mesh weights");
        input.require(weight_count, NAME_WIDTH + 8)?;
        let mut weights = Vec::with_capacity(weight_count);
        for _ in 0..weight_count {
            weights.push(WeightRecord {
                bone_name: input.read_fixed_str(NAME_WIDTH)?,
                weight: input.read_f32()?,
                vertex: input.read_u32()?,
            });
        }

        input.section("legacy mesh indices");
        input.require(index_count, 2)?;
        let mut indices = Vec::with_capacity(index_count);
        for _ in 0..index_count {
            let index = input.read_u16()?;
            if index as usize >= vertex_count {
                return Err(Error::IndexOutOfRange {
                    what: format!("legacy mesh '{name}' vertex"),
                    index: index as u64,
                    len: vertex_count,
                });
            }
            indices.push(index);
        }

        meshes.push(WeightedMeshRecord {
            name,
            parent,
            local,
            vertices,
            weights,
            indices,
        });
    }

    Ok(WeightedMeshFile {
        version: header.version,
        materials,
        meshes,
    })
}

/// Parses a legacy animation and bakes its sparse keys to one sample per frame.
pub fn parse_legacy_animation(bytes: &[u8], limits: &ParseLimits) -> Result<LegacyAnimation, Error> {
    let mut input = BinaryInput::new(bytes);
    input.section("legacy animation header");
    let signature = input.read_u32()?;
    if signature != EXPORTER_SIGNATURE {
        return Err(Error::BadMagic {
            chunk: "legacy animation".to_string(),
        });
    }
    let version = input.read_u32()?;
    let max_frame = input.read_i32()?;
    let bone_count = input.read_count_i32("legacy animation bone", limits.legacy_anim_bones)?;
    let _anim_type = input.read_i32()?;

    let frame_count = (max_frame.saturating_add(1) as i64).clamp(1, limits.legacy_frames.max(1) as i64)
        as usize;

    let mut tracks = Vec::with_capacity(bone_count);
    let mut track_index = HashMap::with_capacity(bone_count);
    for _ in 0..bone_count {
        input.section("legacy animation bone");
        let name = input.read_fixed_str(NAME_WIDTH)?;
        let base = input.read_mat4()?;

        input.section("legacy animation position keys");
        let pos_count = input.read_count_i32("legacy position key", limits.legacy_anim_keys)?;
        input.require(pos_count, 16)?;
        let mut positions = Vec::with_capacity(pos_count);
        for _ in 0..pos_count {
            let value = input.read_vec3()?;
            let frame = input.read_i32()?;
            positions.push(PositionKey {
                time: frame as f32,
                value,
            });
        }

        input.section("legacy animation rotation keys");
        let rot_count = input.read_count_i32("legacy rotation key", limits.legacy_anim_keys)?;
        input.require(rot_count, 20)?;
        let mut rotations = Vec::with_capacity(rot_count);
        for _ in 0..rot_count {
            let value = input.read_quat()?;
            let frame = input.read_i32()?;
            rotations.push(RotationKey {
                time: frame as f32,
                value,
            });
        }

        if version > ANIM_VISIBILITY_VERSION {
            input.section("legacy animation visibility keys");
            let vis_count = input.read_count_u32("legacy visibility key", limits.legacy_anim_keys)?;
            input.require(vis_count, 8)?;
            input.skip(vis_count * 8)?;
        }

        let frames = (0..frame_count)
            .map(|f| {
                let t = f as f32;
                LegacyFrame {
                    position: sample_position(&positions, t, glam::Vec3::ZERO),
                    rotation: sample_rotation(&rotations, t, glam::Quat::IDENTITY),
                }
            })
            .collect();

        track_index.insert(name.clone(), tracks.len());
        tracks.push(LegacyBoneTrack { name, base, frames });
    }

    if tracks.is_empty() {
        return Err(Error::invalid("legacy animation has no bone tracks"));
    }

    Ok(LegacyAnimation {
        version,
        frame_count,
        max_time: frame_count as f32,
        tracks,
        track_index,
    })
}
