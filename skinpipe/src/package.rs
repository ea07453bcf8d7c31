//! Parsers for the packaged model format.
//!
//! A package is a directory holding four independently versioned chunks
//! (`mesh.bin`, `skeleton.bin`, `anim.bin`, `materials.bin`), an optional
//! `attachments.json` socket list and a `model.json` manifest that may rename
//! any of them. Chunk parsers take byte slices; only [`load_package_dir`] and
//! [`PackageLocator`] touch the filesystem.

use crate::binary::BinaryInput;
use crate::hierarchy::resolve_bind_conventions;
use crate::{
    AttachmentSocket, Channel, Clip, Error, MeshChunk, ModelPackage, PackageBone,
    PackageMaterial, PackageVertex, ParseLimits, PositionKey, RotationKey, SkeletonChunk,
    Submesh,
};
use glam::Mat4;
use std::path::{Path, PathBuf};

pub const MESH_TAG: [u8; 8] = *b"RS3MSH1\0";
pub const SKELETON_TAG: [u8; 8] = *b"RS3SKN1\0";
pub const ANIM_TAG: [u8; 8] = *b"RS3ANI1\0";
pub const MATERIALS_TAG: [u8; 8] = *b"RS3MAT1\0";

pub const MESH_VERSIONS: [u32; 2] = [1, 2];
pub const SKELETON_VERSION: u32 = 1;
pub const ANIM_VERSION: u32 = 1;
pub const MATERIALS_VERSION: u32 = 1;

const VERTEX_SIZE: usize = 12 + 12 + 8 + 8 + 16;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageLoadOptions {
    pub limits: ParseLimits,
}

fn read_chunk_header(
    input: &mut BinaryInput<'_>,
    tag: [u8; 8],
    chunk: &str,
    accept: impl Fn(u32) -> bool,
) -> Result<u32, Error> {
    input.section("chunk header");
    if input.read_tag()? != tag {
        return Err(Error::BadMagic {
            chunk: chunk.to_string(),
        });
    }
    let version = input.read_u32()?;
    if !accept(version) {
        return Err(Error::UnsupportedVersion {
            chunk: chunk.to_string(),
            version,
        });
    }
    Ok(version)
}

pub fn parse_mesh_chunk(bytes: &[u8], limits: &ParseLimits) -> Result<MeshChunk, Error> {
    let mut input = BinaryInput::new(bytes);
    let version = read_chunk_header(&mut input, MESH_TAG, "mesh.bin", |v| {
        MESH_VERSIONS.contains(&v)
    })?;
    let vertex_count = input.read_count_u32("mesh.bin vertex", limits.package_vertices)?;
    let index_count = input.read_count_u32("mesh.bin index", limits.package_indices)?;
    let submesh_count = input.read_count_u32("mesh.bin submesh", limits.package_submeshes)?;
    let has_skin = input.read_u32()? != 0;

    input.section("mesh.bin vertices");
    input.require(vertex_count, VERTEX_SIZE)?;
    let mut vertices = Vec::with_capacity(vertex_count);
    for _ in 0..vertex_count {
        let position = input.read_vec3()?;
        let normal = input.read_vec3()?;
        let uv = input.read_vec2()?;
        let joints = [
            input.read_u16()?,
            input.read_u16()?,
            input.read_u16()?,
            input.read_u16()?,
        ];
        let weights = [
            input.read_f32()?,
            input.read_f32()?,
            input.read_f32()?,
            input.read_f32()?,
        ];
        vertices.push(PackageVertex {
            position: position.to_array(),
            normal: normal.to_array(),
            uv: uv.to_array(),
            joints,
            weights,
        });
    }

    input.section("mesh.bin indices");
    input.require(index_count, 4)?;
    let mut indices = Vec::with_capacity(index_count);
    for _ in 0..index_count {
        let index = input.read_u32()?;
        if index as usize >= vertex_count {
            return Err(Error::IndexOutOfRange {
                what: "mesh.bin vertex".to_string(),
                index: index as u64,
                len: vertex_count,
            });
        }
        indices.push(index);
    }

    input.section("mesh.bin submeshes");
    let mut submeshes = Vec::with_capacity(submesh_count);
    for _ in 0..submesh_count {
        let material = input.read_u32()?;
        let node = input.read_u32()?;
        let index_start = input.read_u32()?;
        let index_count = input.read_u32()?;
        let node_transform = if version >= 2 {
            input.read_mat4()?
        } else {
            Mat4::IDENTITY
        };
        let end = index_start as u64 + index_count as u64;
        if end > indices.len() as u64 {
            return Err(Error::IndexOutOfRange {
                what: "mesh.bin submesh range end".to_string(),
                index: end,
                len: indices.len(),
            });
        }
        submeshes.push(Submesh {
            material,
            node,
            index_start,
            index_count,
            node_transform,
        });
    }

    Ok(MeshChunk {
        version,
        vertices,
        indices,
        submeshes,
        has_skin,
    })
}

/// Parses the bone list and runs the bind-convention heuristic on it.
pub fn parse_skeleton_chunk(bytes: &[u8], limits: &ParseLimits) -> Result<SkeletonChunk, Error> {
    let mut input = BinaryInput::new(bytes);
    read_chunk_header(&mut input, SKELETON_TAG, "skeleton.bin", |v| {
        v == SKELETON_VERSION
    })?;
    let bone_count = input.read_count_u32("skeleton.bin bone", limits.package_bones)?;

    let mut bones = Vec::with_capacity(bone_count);
    for _ in 0..bone_count {
        input.section("skeleton.bin bone");
        let parent = input.read_i32()?;
        let name = input.read_len_string(limits.string_len)?;
        input.section("skeleton.bin bind matrix");
        let bind = input.read_mat4()?;
        input.section("skeleton.bin inverse bind matrix");
        let inverse_bind = input.read_mat4()?;
        bones.push(PackageBone {
            name,
            parent,
            bind,
            inverse_bind,
        });
    }

    let conventions = resolve_bind_conventions(&mut bones);
    Ok(SkeletonChunk { bones, conventions })
}

pub fn parse_anim_chunk(bytes: &[u8], limits: &ParseLimits) -> Result<Vec<Clip>, Error> {
    let mut input = BinaryInput::new(bytes);
    read_chunk_header(&mut input, ANIM_TAG, "anim.bin", |v| v == ANIM_VERSION)?;
    let clip_count = input.read_count_u32("anim.bin clip", limits.package_clips)?;

    let mut clips = Vec::with_capacity(clip_count);
    for _ in 0..clip_count {
        input.section("anim.bin clip header");
        let name = input.read_len_string(limits.string_len)?;
        let channel_count = input.read_count_u32("anim.bin channel", limits.package_channels)?;

        let mut channels = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            input.section("anim.bin channel header");
            let bone = input.read_i32()?;

            input.section("anim.bin position keys");
            let pos_count = input.read_count_u32("anim.bin position key", limits.package_keys)?;
            input.require(pos_count, 16)?;
            let mut positions = Vec::with_capacity(pos_count);
            for _ in 0..pos_count {
                positions.push(PositionKey {
                    time: input.read_f32()?,
                    value: input.read_vec3()?,
                });
            }

            input.section("anim.bin rotation keys");
            let rot_count = input.read_count_u32("anim.bin rotation key", limits.package_keys)?;
            input.require(rot_count, 20)?;
            let mut rotations = Vec::with_capacity(rot_count);
            for _ in 0..rot_count {
                rotations.push(RotationKey {
                    time: input.read_f32()?,
                    value: input.read_quat()?,
                });
            }

            channels.push(Channel {
                bone,
                positions,
                rotations,
            });
        }

        clips.push(Clip { name, channels });
    }

    Ok(clips)
}

pub fn parse_materials_chunk(
    bytes: &[u8],
    limits: &ParseLimits,
) -> Result<Vec<PackageMaterial>, Error> {
    let mut input = BinaryInput::new(bytes);
    read_chunk_header(&mut input, MATERIALS_TAG, "materials.bin", |v| {
        v == MATERIALS_VERSION
    })?;
    let count = input.read_count_u32("materials.bin material", limits.package_materials)?;

    input.section("materials.bin materials");
    let mut materials = Vec::with_capacity(count);
    for _ in 0..count {
        materials.push(PackageMaterial {
            legacy_flags: input.read_u32()?,
            alpha_mode: input.read_u32()?,
            metallic: input.read_f32()?,
            roughness: input.read_f32()?,
            base_color_texture: input.read_len_string(limits.string_len)?,
            normal_texture: input.read_len_string(limits.string_len)?,
            orm_texture: input.read_len_string(limits.string_len)?,
            emissive_texture: input.read_len_string(limits.string_len)?,
            opacity_texture: input.read_len_string(limits.string_len)?,
        });
    }

    Ok(materials)
}

/// Forward-only matcher over loosely formatted JSON text.
struct TextScan<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> TextScan<'a> {
    fn at(text: &'a str, pos: usize) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos,
        }
    }

    fn skip_ws(&mut self) {
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
    }

    fn eat(&mut self, lit: &str) -> Option<()> {
        self.skip_ws();
        let lit = lit.as_bytes();
        if self.bytes.get(self.pos..self.pos + lit.len()) == Some(lit) {
            self.pos += lit.len();
            Some(())
        } else {
            None
        }
    }

    /// `"..."` without escape handling, like the files it reads.
    fn quoted(&mut self) -> Option<String> {
        self.eat("\"")?;
        let start = self.pos;
        let len = self.bytes[start..].iter().position(|&b| b == b'"')?;
        self.pos = start + len + 1;
        Some(String::from_utf8_lossy(&self.bytes[start..start + len]).into_owned())
    }

    fn integer(&mut self) -> Option<i32> {
        self.skip_ws();
        let start = self.pos;
        if self.bytes.get(self.pos) == Some(&b'-') {
            self.pos += 1;
        }
        let digits = self.pos;
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        if self.pos == digits {
            return None;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()?
            .parse()
            .ok()
    }
}

fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}

/// Finds the first `"key": "value"` pair anywhere in `text`.
pub fn extract_json_string(text: &str, key: &str) -> Option<String> {
    let text = strip_bom(text);
    let needle = format!("\"{key}\"");
    text.match_indices(&needle).find_map(|(at, _)| {
        let mut scan = TextScan::at(text, at + needle.len());
        scan.eat(":")?;
        scan.quoted()
    })
}

/// Collects every `{"name": "...", "nodeIndex": N` object in order.
///
/// Objects with a different key order or an empty name are ignored.
pub fn scan_attachments(text: &str) -> Vec<AttachmentSocket> {
    let text = strip_bom(text);
    text.match_indices('{')
        .filter_map(|(at, _)| {
            let mut scan = TextScan::at(text, at + 1);
            scan.eat("\"name\"")?;
            scan.eat(":")?;
            let name = scan.quoted()?;
            if name.is_empty() {
                return None;
            }
            scan.eat(",")?;
            scan.eat("\"nodeIndex\"")?;
            scan.eat(":")?;
            let node_index = scan.integer()?;
            Some(AttachmentSocket { name, node_index })
        })
        .collect()
}

/// File names of a package's parts, as overridden by `model.json`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct PackageManifest {
    pub mesh: String,
    pub skeleton: String,
    pub animation: String,
    pub materials: String,
    pub attachments: String,
    pub source_glb: Option<String>,
}

impl Default for PackageManifest {
    fn default() -> Self {
        Self {
            mesh: "mesh.bin".to_string(),
            skeleton: "skeleton.bin".to_string(),
            animation: "anim.bin".to_string(),
            materials: "materials.bin".to_string(),
            attachments: "attachments.json".to_string(),
            source_glb: None,
        }
    }
}

impl PackageManifest {
    pub fn from_text(text: &str) -> Self {
        let mut out = Self::default();
        let fields: [(&str, &mut String); 5] = [
            ("mesh", &mut out.mesh),
            ("skeleton", &mut out.skeleton),
            ("animation", &mut out.animation),
            ("materials", &mut out.materials),
            ("attachments", &mut out.attachments),
        ];
        for (key, slot) in fields {
            if let Some(value) = extract_json_string(text, key) {
                *slot = value;
            }
        }
        out.source_glb = extract_json_string(text, "sourceGlb");
        out
    }
}

/// Checks every vertex joint against the skeleton.
pub fn validate_joints(vertices: &[PackageVertex], bone_count: usize) -> Result<(), Error> {
    if bone_count == 0 {
        return Ok(());
    }
    for v in vertices {
        if let Some(&joint) = v.joints.iter().find(|&&j| j as usize >= bone_count) {
            return Err(Error::IndexOutOfRange {
                what: "mesh.bin joint".to_string(),
                index: joint as u64,
                len: bone_count,
            });
        }
    }
    Ok(())
}

/// Parses all four chunks from memory into one package.
pub fn parse_package(
    model_id: &str,
    mesh: &[u8],
    skeleton: &[u8],
    anim: &[u8],
    materials: &[u8],
    attachments: Option<&str>,
    options: &PackageLoadOptions,
) -> Result<ModelPackage, Error> {
    let limits = &options.limits;
    let mesh = parse_mesh_chunk(mesh, limits)?;
    let skeleton = parse_skeleton_chunk(skeleton, limits)?;
    let clips = parse_anim_chunk(anim, limits)?;
    let materials = parse_materials_chunk(materials, limits)?;
    validate_joints(&mesh.vertices, skeleton.bones.len())?;

    Ok(ModelPackage {
        model_id: model_id.to_string(),
        source_glb: None,
        base_dir: None,
        vertices: mesh.vertices,
        indices: mesh.indices,
        submeshes: mesh.submeshes,
        bones: skeleton.bones,
        conventions: skeleton.conventions,
        clips,
        materials,
        sockets: attachments.map(scan_attachments).unwrap_or_default(),
    })
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, Error> {
    std::fs::read(path).map_err(|e| Error::io(path, e))
}

/// Loads a package directory. `model.json` is optional; a missing
/// attachments file yields no sockets.
pub fn load_package_dir(
    dir: &Path,
    model_id: &str,
    options: &PackageLoadOptions,
) -> Result<ModelPackage, Error> {
    let manifest = match std::fs::read(dir.join("model.json")) {
        Ok(bytes) => PackageManifest::from_text(&String::from_utf8_lossy(&bytes)),
        Err(_) => PackageManifest::default(),
    };

    let mesh = read_bytes(&dir.join(&manifest.mesh))?;
    let skeleton = read_bytes(&dir.join(&manifest.skeleton))?;
    let anim = read_bytes(&dir.join(&manifest.animation))?;
    let materials = read_bytes(&dir.join(&manifest.materials))?;

    let attachments_path = dir.join(&manifest.attachments);
    let attachments = if attachments_path.is_file() {
        Some(String::from_utf8_lossy(&read_bytes(&attachments_path)?).into_owned())
    } else {
        None
    };

    let mut package = parse_package(
        model_id,
        &mesh,
        &skeleton,
        &anim,
        &materials,
        attachments.as_deref(),
        options,
    )?;
    package.source_glb = manifest.source_glb;
    package.base_dir = Some(dir.to_path_buf());

    log::info!(
        "loaded package '{}': {} vertices, {} indices, {} bones, {} clips, {} materials, {} sockets",
        model_id,
        package.vertices.len(),
        package.indices.len(),
        package.bones.len(),
        package.clips.len(),
        package.materials.len(),
        package.sockets.len()
    );

    Ok(package)
}

/// Resolves model ids to package directories under an ordered list of roots.
#[derive(Clone, Debug, Default)]
pub struct PackageLocator {
    roots: Vec<PathBuf>,
}

impl PackageLocator {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    pub fn push_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// First root whose `<root>/<model_id>` directory holds a `model.json`.
    pub fn resolve(&self, model_id: &str) -> Result<PathBuf, Error> {
        self.roots
            .iter()
            .map(|root| root.join(model_id))
            .find(|dir| dir.is_dir() && dir.join("model.json").is_file())
            .ok_or_else(|| Error::PackageNotFound {
                model_id: model_id.to_string(),
            })
    }

    pub fn load(&self, model_id: &str, options: &PackageLoadOptions) -> Result<ModelPackage, Error> {
        let dir = self.resolve(model_id)?;
        load_package_dir(&dir, model_id, options)
    }
}
