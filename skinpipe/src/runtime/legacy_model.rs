use crate::equip::{EquipCategory, EquipSelection, classify, node_visible};
use crate::hierarchy::{BoneNameIndex, CompositionOrder, compose_globals, resolve_parents_by_name};
use crate::legacy::parse_legacy_model;
use crate::runtime::sampler::{slerp_normalized, wrap_time};
use crate::runtime::skinning::{
    Influence, ReducedWeights, SkinnedOutput, SkinningEvaluator, WarnOnce, WeightPolicy,
    reduce_influences, sort_influences,
};
use crate::{
    Error, LegacyAnimation, LegacyFace, LegacyFaceNormal, LegacyFile, MergedGeometry, MeshSubset,
    ParseLimits, PerNodeFile, Physique, SkinVertex, WeightedMeshFile,
};
use glam::{Mat4, Vec2, Vec3};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Legacy animation frames advance at this rate.
pub const LEGACY_FRAMES_PER_SECOND: f32 = 30.0;

/// Merged geometry uses 16-bit indices.
pub const LEGACY_VERTEX_BUDGET: usize = 65_535;

const ROOT_BONE_NAMES: [&str; 2] = ["Bip01", "Bip01 Pelvis"];
const WHITE: u32 = 0xFFFF_FFFF;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LegacyLoadOptions {
    pub weight_policy: WeightPolicy,
    pub limits: ParseLimits,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub enum LegacyModelKind {
    Weighted,
    PerNode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LegacyBone {
    pub name: String,
    pub parent: Option<usize>,
    pub local: Mat4,
    pub bind_global: Mat4,
    pub inverse_bind: Mat4,
}

/// A mesh fragment of a per-node model with bone references resolved into
/// the model's skeleton.
#[derive(Clone, Debug)]
struct PartNode {
    name: String,
    material_id: i32,
    bone: Option<usize>,
    force_visible: bool,
    points: Vec<Vec3>,
    faces: Vec<LegacyFace>,
    face_normals: Vec<LegacyFaceNormal>,
    /// `bone_ids` hold skeleton indices, `-1` when unresolved.
    physique: Vec<Physique>,
}

#[derive(Clone, Debug)]
struct WeightedVertex {
    position: Vec3,
    normal: Vec3,
    uv: Vec2,
    skin: ReducedWeights,
}

#[derive(Clone, Debug, Default)]
struct WeightedGeometry {
    vertices: Vec<WeightedVertex>,
    indices: Vec<u16>,
    subsets: Vec<MeshSubset>,
}

/// Legacy-format character: skeleton, swappable part nodes, frame-based
/// animation and CPU skinning into one merged vertex stream.
#[derive(Debug)]
pub struct LegacyModel {
    options: LegacyLoadOptions,
    kind: Option<LegacyModelKind>,

    bones: Vec<LegacyBone>,
    bone_index: BoneNameIndex,
    root_bone: Option<usize>,
    texture_names: Vec<String>,

    nodes: Vec<PartNode>,
    weighted: WeightedGeometry,
    selection: EquipSelection,

    animation: Option<LegacyAnimation>,
    time: f32,
    frozen: bool,
    bind_pose_only: bool,
    globals: Vec<Mat4>,

    geometry: MergedGeometry,
    warnings: WarnOnce,
}

impl Default for LegacyModel {
    fn default() -> Self {
        Self::new(LegacyLoadOptions::default())
    }
}

/// Swaps the legacy source axes into the runtime basis.
pub fn convert_basis(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.z, v.y)
}

fn texture_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

impl LegacyModel {
    pub fn new(options: LegacyLoadOptions) -> Self {
        Self {
            options,
            kind: None,
            bones: Vec::new(),
            bone_index: BoneNameIndex::default(),
            root_bone: None,
            texture_names: Vec::new(),
            nodes: Vec::new(),
            weighted: WeightedGeometry::default(),
            selection: EquipSelection::default(),
            animation: None,
            time: 0.0,
            frozen: false,
            bind_pose_only: false,
            globals: Vec::new(),
            geometry: MergedGeometry::default(),
            warnings: WarnOnce::default(),
        }
    }

    pub fn options(&self) -> &LegacyLoadOptions {
        &self.options
    }

    pub fn is_loaded(&self) -> bool {
        self.kind.is_some()
    }

    pub fn kind(&self) -> Option<LegacyModelKind> {
        self.kind
    }

    pub fn bones(&self) -> &[LegacyBone] {
        &self.bones
    }

    pub fn root_bone(&self) -> Option<usize> {
        self.root_bone
    }

    /// Diffuse texture per material id; empty where a slot has no texture.
    pub fn texture_names(&self) -> &[String] {
        &self.texture_names
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    pub fn selection(&self) -> &EquipSelection {
        &self.selection
    }

    pub fn merged_geometry(&self) -> &MergedGeometry {
        &self.geometry
    }

    pub fn animation(&self) -> Option<&LegacyAnimation> {
        self.animation.as_ref()
    }

    /// Playback position in frames.
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub fn bind_pose_only(&self) -> bool {
        self.bind_pose_only
    }

    pub fn set_bind_pose_only(&mut self, bind_pose_only: bool) {
        self.bind_pose_only = bind_pose_only;
    }

    /// Animated global transform of a bone, by exact name.
    pub fn bone_matrix(&self, name: &str) -> Option<Mat4> {
        self.bone_index
            .exact(name)
            .and_then(|i| self.globals.get(i).copied())
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    pub fn load_base_model(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            self.unload();
            Error::io(path, e)
        })?;
        self.load_base_model_bytes(&bytes, texture_dir(path))
    }

    /// Replaces the whole model. On failure the model is left unloaded.
    pub fn load_base_model_bytes(
        &mut self,
        bytes: &[u8],
        model_dir: Option<&Path>,
    ) -> Result<(), Error> {
        let result = parse_legacy_model(bytes, model_dir, &self.options.limits).and_then(|file| {
            let mut next = Self::new(self.options);
            match file {
                LegacyFile::PerNode(file) => next.init_per_node(file)?,
                LegacyFile::Weighted(file) => next.init_weighted(file)?,
            }
            Ok(next)
        });

        match result {
            Ok(next) => {
                *self = next;
                log::info!(
                    "loaded legacy model ({:?}): {} bones, {} nodes, {} vertices, {} indices",
                    self.kind,
                    self.bones.len(),
                    self.nodes.len(),
                    self.geometry.vertices.len(),
                    self.geometry.indices.len()
                );
                Ok(())
            }
            Err(err) => {
                self.unload();
                Err(err)
            }
        }
    }

    fn unload(&mut self) {
        *self = Self::new(self.options);
    }

    fn set_skeleton(&mut self, names: Vec<String>, parents: Vec<String>, locals: Vec<Mat4>) {
        let parent_ids = resolve_parents_by_name(&names, &parents);
        let globals = compose_globals(&parent_ids, &locals, CompositionOrder::LocalFirst);

        self.bone_index = BoneNameIndex::new(names.iter().map(String::as_str));
        self.bones = names
            .into_iter()
            .zip(parent_ids)
            .zip(locals.into_iter().zip(globals.iter().copied()))
            .map(|((name, parent), (local, bind_global))| LegacyBone {
                name,
                parent,
                local,
                bind_global,
                inverse_bind: bind_global.inverse(),
            })
            .collect();
        self.globals = globals;
        self.root_bone = ROOT_BONE_NAMES
            .iter()
            .find_map(|name| self.bone_index.exact(name))
            .or_else(|| self.bones.iter().position(|b| b.parent.is_none()));
    }

    fn init_per_node(&mut self, file: PerNodeFile) -> Result<(), Error> {
        let PerNodeFile { materials, nodes } = file;
        self.kind = Some(LegacyModelKind::PerNode);
        self.add_textures(&materials, 0);

        let names = nodes.iter().map(|n| n.name.clone()).collect();
        let parents = nodes.iter().map(|n| n.parent.clone()).collect();
        let locals = nodes.iter().map(|n| n.local).collect();
        self.set_skeleton(names, parents, locals);

        for node in nodes {
            let bone = self
                .bone_index
                .find(&node.name)
                .or_else(|| self.bone_index.find(&node.parent));
            let physique = self.resolve_physique(node.physique, true);
            self.nodes.push(PartNode {
                name: node.name,
                material_id: node.material_id.max(0),
                bone,
                force_visible: false,
                points: node.points,
                faces: node.faces,
                face_normals: node.face_normals,
                physique,
            });
        }

        self.fill_default_selection();
        self.rebuild()
    }

    fn init_weighted(&mut self, file: WeightedMeshFile) -> Result<(), Error> {
        let WeightedMeshFile {
            materials, meshes, ..
        } = file;
        self.kind = Some(LegacyModelKind::Weighted);
        self.texture_names = materials.into_iter().map(|m| m.diffuse_texture).collect();

        let names = meshes.iter().map(|m| m.name.clone()).collect();
        let parents = meshes.iter().map(|m| m.parent.clone()).collect();
        let locals = meshes.iter().map(|m| m.local).collect();
        self.set_skeleton(names, parents, locals);

        let total: usize = meshes.iter().map(|m| m.vertices.len()).sum();
        if total > LEGACY_VERTEX_BUDGET {
            return Err(Error::VertexBudgetExceeded {
                limit: LEGACY_VERTEX_BUDGET,
            });
        }

        let mut influences: Vec<Vec<Influence>> = vec![Vec::new(); total];
        let mut owner = Vec::with_capacity(total);
        let mut geometry = WeightedGeometry::default();
        let mut unresolved = 0usize;

        for (mesh_index, mesh) in meshes.iter().enumerate() {
            let start = geometry.vertices.len();
            let index_start = geometry.indices.len();

            for v in &mesh.vertices {
                geometry.vertices.push(WeightedVertex {
                    position: v.position,
                    normal: v.normal,
                    uv: v.uv,
                    skin: ReducedWeights::one_hot(mesh_index),
                });
                owner.push(mesh_index);
            }

            for w in &mesh.weights {
                let vertex = start + w.vertex as usize;
                if w.vertex as usize >= mesh.vertices.len() {
                    continue;
                }
                match self.bone_index.exact(&w.bone_name) {
                    Some(bone) => influences[vertex].push(Influence {
                        bone,
                        weight: w.weight,
                    }),
                    None => unresolved += 1,
                }
            }

            // The total vertex count is within the budget, so offsets fit.
            if mesh.indices.is_empty() {
                continue;
            }
            geometry
                .indices
                .extend(mesh.indices.iter().map(|&i| (i as usize + start) as u16));
            geometry.subsets.push(MeshSubset {
                material_id: 0,
                index_start: index_start as u32,
                index_count: mesh.indices.len() as u32,
            });
        }

        for ((vertex, infl), &mesh_bone) in geometry
            .vertices
            .iter_mut()
            .zip(influences.iter_mut())
            .zip(owner.iter())
        {
            sort_influences(infl);
            vertex.skin = reduce_influences(infl, self.options.weight_policy, mesh_bone);
        }

        if unresolved > 0 {
            self.warnings.warn("unresolved-weight-bone", || {
                format!("{unresolved} vertex weights reference unknown bones")
            });
        }
        if self.bones.len() > usize::from(u8::MAX) + 1 {
            let bones = self.bones.len();
            self.warnings.warn("wide-joint-index", || {
                format!("{bones} bones exceed 8-bit vertex joints; higher indices report as 255")
            });
        }

        self.weighted = geometry;
        self.rebuild()
    }

    fn add_textures(&mut self, materials: &[crate::LegacyMaterial], base: usize) {
        for m in materials {
            if m.diffuse_texture.is_empty() || m.id < 0 {
                continue;
            }
            let slot = base + m.id as usize;
            if slot >= self.texture_names.len() {
                self.texture_names.resize(slot + 1, String::new());
            }
            if self.texture_names[slot].is_empty() {
                self.texture_names[slot] = m.diffuse_texture.clone();
            }
        }
    }

    fn resolve_physique(&mut self, mut physique: Vec<Physique>, keep_stored_ids: bool) -> Vec<Physique> {
        let bone_count = self.bones.len();
        let mut unresolved = 0usize;
        for p in &mut physique {
            for k in 0..p.influence_count() {
                let resolved = self.bone_index.find(&p.bone_names[k]).or_else(|| {
                    usize::try_from(p.bone_ids[k])
                        .ok()
                        .filter(|&id| keep_stored_ids && id < bone_count)
                });
                p.bone_ids[k] = match resolved {
                    Some(id) => id as i32,
                    None => {
                        unresolved += 1;
                        -1
                    }
                };
            }
        }
        if unresolved > 0 {
            self.warnings.warn("unresolved-physique-bone", || {
                format!("{unresolved} physique influences reference unknown bones")
            });
        }
        physique
    }

    /// Selects the first node of every category that has no selection yet.
    fn fill_default_selection(&mut self) {
        for node in &self.nodes {
            if let Some(category) = classify(&node.name) {
                if self.selection.get(category).is_none() {
                    self.selection.set(category, node.name.clone());
                }
            }
        }
    }

    pub fn append_part_library(&mut self, path: impl AsRef<Path>, force_visible: bool) -> bool {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(bytes) => self.append_part_library_bytes(&bytes, texture_dir(path), force_visible),
            Err(err) => {
                log::warn!("failed to read part library {}: {err}", path.display());
                false
            }
        }
    }

    /// Adds the nodes of a per-node library whose names are new. Returns
    /// `true` when at least one node was added and the rebuild succeeded;
    /// otherwise the model is unchanged.
    pub fn append_part_library_bytes(
        &mut self,
        bytes: &[u8],
        model_dir: Option<&Path>,
        force_visible: bool,
    ) -> bool {
        if self.kind != Some(LegacyModelKind::PerNode) {
            return false;
        }
        let file = match crate::legacy::parse_per_node(bytes, model_dir, &self.options.limits) {
            Ok(file) => file,
            Err(err) => {
                log::warn!("failed to parse part library: {err}");
                return false;
            }
        };

        let saved_textures = self.texture_names.clone();
        let saved_selection = self.selection.clone();
        let saved_node_count = self.nodes.len();

        let base = self.texture_names.len();
        self.add_textures(&file.materials, base);

        let mut existing: HashSet<String> = self
            .nodes
            .iter()
            .map(|n| n.name.to_ascii_lowercase())
            .collect();

        for node in file.nodes {
            if !existing.insert(node.name.to_ascii_lowercase()) {
                continue;
            }
            let bone = self
                .bone_index
                .find(&node.name)
                .or_else(|| self.bone_index.find(&node.parent));
            let physique = self.resolve_physique(node.physique, false);
            self.nodes.push(PartNode {
                name: node.name,
                material_id: (base as i32).saturating_add(node.material_id).max(0),
                bone,
                force_visible,
                points: node.points,
                faces: node.faces,
                face_normals: node.face_normals,
                physique,
            });
        }

        let appended = self.nodes.len() - saved_node_count;
        if appended == 0 {
            self.texture_names = saved_textures;
            return false;
        }

        self.fill_default_selection();
        if self.rebuild().is_err() {
            self.nodes.truncate(saved_node_count);
            self.texture_names = saved_textures;
            self.selection = saved_selection;
            return false;
        }

        log::info!("appended {appended} part nodes");
        true
    }

    // -----------------------------------------------------------------------
    // Equip selection
    // -----------------------------------------------------------------------

    /// Node names of one category, sorted case-insensitively.
    pub fn candidates(&self, category: EquipCategory) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .nodes
            .iter()
            .filter(|n| classify(&n.name) == Some(category))
            .map(|n| n.name.as_str())
            .collect();
        names.sort_by_key(|n| n.to_ascii_lowercase());
        names
    }

    /// Selects `node_name` for the category named by `tag`. Fails without
    /// side effects for unknown tags, unknown nodes and category mismatches.
    pub fn set_part(&mut self, tag: &str, node_name: &str) -> bool {
        let Ok(category) = tag.parse::<EquipCategory>() else {
            return false;
        };
        self.set_part_in(category, node_name)
    }

    pub fn set_part_in(&mut self, category: EquipCategory, node_name: &str) -> bool {
        if self.kind != Some(LegacyModelKind::PerNode) || node_name.is_empty() {
            return false;
        }
        let Some(name) = self
            .nodes
            .iter()
            .find(|n| classify(&n.name) == Some(category) && n.name.eq_ignore_ascii_case(node_name))
            .map(|n| n.name.clone())
        else {
            return false;
        };
        self.commit_selection(category, name)
    }

    /// Selects by position in [`Self::candidates`], wrapping any index.
    pub fn set_part_by_index(&mut self, tag: &str, index: i32) -> bool {
        let Ok(category) = tag.parse::<EquipCategory>() else {
            return false;
        };
        if self.kind != Some(LegacyModelKind::PerNode) {
            return false;
        }
        let candidates = self.candidates(category);
        if candidates.is_empty() {
            return false;
        }
        let wrapped = (index as i64).rem_euclid(candidates.len() as i64) as usize;
        let name = candidates[wrapped].to_string();
        self.commit_selection(category, name)
    }

    fn commit_selection(&mut self, category: EquipCategory, name: String) -> bool {
        let saved = self.selection.clone();
        self.selection.set(category, name);
        if self.rebuild().is_err() {
            self.selection = saved;
            return false;
        }
        true
    }

    /// Clears every category selection; only base geometry stays visible.
    pub fn reset_selection(&mut self) {
        if self.kind.is_none() {
            return;
        }
        let saved = std::mem::take(&mut self.selection);
        if self.rebuild().is_err() {
            self.selection = saved;
        }
    }

    // -----------------------------------------------------------------------
    // Animation
    // -----------------------------------------------------------------------

    pub fn load_animation(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(bytes) => self.load_animation_bytes(&bytes),
            Err(err) => {
                self.fall_back_to_bind_pose();
                Err(Error::io(path, err))
            }
        }
    }

    /// Swaps the active clip. A clip that fails to load leaves the model in
    /// bind pose.
    pub fn load_animation_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if self.kind.is_none() {
            return Err(Error::NotLoaded);
        }
        match crate::legacy::parse_legacy_animation(bytes, &self.options.limits) {
            Ok(animation) => {
                log::info!(
                    "loaded legacy animation: {} frames, {} tracks",
                    animation.frame_count,
                    animation.tracks.len()
                );
                self.animation = Some(animation);
                self.time = 0.0;
                self.bind_pose_only = false;
                self.pose();
                self.rebuild()
            }
            Err(err) => {
                self.fall_back_to_bind_pose();
                Err(err)
            }
        }
    }

    fn fall_back_to_bind_pose(&mut self) {
        self.animation = None;
        self.time = 0.0;
        self.bind_pose_only = true;
        if self.kind.is_some() {
            self.pose();
            // failures are already reported once by rebuild
            let _ = self.rebuild();
        }
    }

    fn max_time(&self) -> f32 {
        self.animation.as_ref().map_or(1.0, |a| a.max_time)
    }

    fn advance_time(&mut self, frames: f32) {
        self.time = wrap_time(self.time + frames, self.max_time());
    }

    /// Advances playback by `delta_seconds` unless frozen, then re-poses and
    /// rebuilds the merged geometry.
    pub fn update(&mut self, delta_seconds: f32) -> Result<(), Error> {
        self.advance(delta_seconds);
        self.pose();
        self.rebuild()
    }

    /// Moves playback by whole or fractional frames, ignoring the freeze flag.
    pub fn step(&mut self, frames: f32) -> Result<(), Error> {
        self.advance_time(frames);
        self.pose();
        self.rebuild()
    }

    fn animated_local(&self, index: usize) -> Mat4 {
        let bone = &self.bones[index];
        if self.bind_pose_only {
            return bone.local;
        }
        let Some(track) = self.animation.as_ref().and_then(|a| a.track(&bone.name)) else {
            return bone.local;
        };
        let n = track.frames.len();
        if n == 0 {
            return bone.local;
        }
        let t = self.time.max(0.0);
        let f0 = t.floor() as usize % n;
        let f1 = (f0 + 1) % n;
        let alpha = t - t.floor();
        let (a, b) = (track.frames[f0], track.frames[f1]);
        Mat4::from_rotation_translation(
            slerp_normalized(a.rotation, b.rotation, alpha),
            a.position.lerp(b.position, alpha),
        )
    }

    fn pose(&mut self) {
        let parents: Vec<Option<usize>> = self.bones.iter().map(|b| b.parent).collect();
        let locals: Vec<Mat4> = (0..self.bones.len()).map(|i| self.animated_local(i)).collect();
        self.globals = compose_globals(&parents, &locals, CompositionOrder::LocalFirst);
    }

    // -----------------------------------------------------------------------
    // CPU skinning
    // -----------------------------------------------------------------------

    fn rebuild(&mut self) -> Result<(), Error> {
        let built = match self.kind {
            None => return Err(Error::NotLoaded),
            Some(LegacyModelKind::PerNode) => self.build_per_node(),
            Some(LegacyModelKind::Weighted) => Ok(self.build_weighted()),
        };
        match built {
            Ok(geometry) => {
                self.geometry = geometry;
                Ok(())
            }
            Err(err) => {
                self.warnings
                    .warn("rebuild-failed", || format!("merged geometry rebuild failed: {err}"));
                Err(err)
            }
        }
    }

    fn root_offset(&self) -> Vec3 {
        self.root_bone
            .and_then(|r| self.globals.get(r))
            .map_or(Vec3::ZERO, |m| convert_basis(m.w_axis.truncate()))
    }

    fn bone_global(&self, id: i32) -> Option<&Mat4> {
        usize::try_from(id).ok().and_then(|i| self.globals.get(i))
    }

    fn has_valid_physique(&self, node: &PartNode) -> bool {
        node.physique.len() == node.points.len()
            && node.physique.iter().any(|p| {
                (0..p.influence_count()).any(|k| {
                    self.bone_global(p.bone_ids[k]).is_some()
                        && p.weights[k].is_finite()
                        && p.weights[k] > 0.0
                })
            })
    }

    fn skin_point(&self, node: &PartNode, point: usize, node_mat: &Mat4) -> Vec3 {
        let src = node.points[point];
        if node.physique.len() != node.points.len() {
            return node_mat.transform_point3(src);
        }
        let p = &node.physique[point];
        let mut accum = Vec3::ZERO;
        let mut total = 0.0f32;
        for k in 0..p.influence_count() {
            let w = p.weights[k];
            let Some(bone) = self.bone_global(p.bone_ids[k]) else {
                continue;
            };
            if !w.is_finite() || w <= 0.0 || !p.offsets[k].is_finite() {
                continue;
            }
            accum += bone.transform_point3(p.offsets[k]) * w;
            total += w;
        }
        if total > 1e-6 {
            accum / total
        } else {
            node_mat.transform_point3(src)
        }
    }

    fn build_per_node(&self) -> Result<MergedGeometry, Error> {
        let mut out = MergedGeometry::default();
        let has_equip = self.nodes.iter().any(|n| classify(&n.name).is_some());
        let root = self.root_offset();

        for node in &self.nodes {
            if !node_visible(&node.name, node.force_visible, &self.selection, has_equip) {
                continue;
            }
            let node_mat = node
                .bone
                .or(self.root_bone)
                .and_then(|b| self.globals.get(b))
                .copied();
            if node.bone.is_none() && node_mat.is_none() && !self.has_valid_physique(node) {
                continue;
            }
            let node_mat = node_mat.unwrap_or(Mat4::IDENTITY);

            let index_start = out.indices.len();
            let mut dedup: HashMap<(usize, [u32; 3], [u32; 2]), u16> = HashMap::new();

            for (face, normals) in node.faces.iter().zip(&node.face_normals) {
                for c in 0..3 {
                    let Some(point) = usize::try_from(face.point_index[c])
                        .ok()
                        .filter(|&p| p < node.points.len())
                    else {
                        continue;
                    };
                    let normal = normals.normals[c];
                    let uv = face.uv[c];
                    let key = (
                        point,
                        normal.to_array().map(f32::to_bits),
                        uv.to_array().map(f32::to_bits),
                    );
                    if let Some(&index) = dedup.get(&key) {
                        out.indices.push(index);
                        continue;
                    }

                    if out.vertices.len() >= LEGACY_VERTEX_BUDGET {
                        return Err(Error::VertexBudgetExceeded {
                            limit: LEGACY_VERTEX_BUDGET,
                        });
                    }
                    let position = convert_basis(self.skin_point(node, point, &node_mat)) - root;
                    let normal = convert_basis(node_mat.transform_vector3(normal).normalize_or_zero());
                    let index = out.vertices.len() as u16;
                    out.vertices.push(SkinVertex {
                        position: position.to_array(),
                        normal: normal.to_array(),
                        color: WHITE,
                        uv: uv.to_array(),
                        weights: [1.0, 0.0, 0.0, 0.0],
                        joints: [0; 4],
                    });
                    out.indices.push(index);
                    dedup.insert(key, index);
                }
            }

            let index_count = out.indices.len() - index_start;
            if index_count > 0 {
                out.subsets.push(MeshSubset {
                    material_id: node.material_id,
                    index_start: index_start as u32,
                    index_count: index_count as u32,
                });
            }
        }

        Ok(out)
    }

    fn build_weighted(&self) -> MergedGeometry {
        let palette: Vec<Mat4> = self
            .globals
            .iter()
            .zip(&self.bones)
            .map(|(g, b)| *g * b.inverse_bind)
            .collect();
        let root = self.root_offset();

        let vertices = self
            .weighted
            .vertices
            .iter()
            .map(|v| {
                let mut position = Vec3::ZERO;
                let mut normal = Vec3::ZERO;
                for (&bone, &w) in v.skin.bones.iter().zip(&v.skin.weights) {
                    if w <= 0.0 {
                        continue;
                    }
                    let Some(skin) = palette.get(bone) else {
                        continue;
                    };
                    position += skin.transform_point3(v.position) * w;
                    normal += skin.transform_vector3(v.normal) * w;
                }
                SkinVertex {
                    position: (convert_basis(position) - root).to_array(),
                    normal: convert_basis(normal.normalize_or_zero()).to_array(),
                    color: WHITE,
                    uv: v.uv.to_array(),
                    weights: v.skin.weights,
                    joints: v.skin.bones.map(|b| u8::try_from(b).unwrap_or(u8::MAX)),
                }
            })
            .collect();

        MergedGeometry {
            vertices,
            indices: self.weighted.indices.clone(),
            subsets: self.weighted.subsets.clone(),
        }
    }
}

impl SkinningEvaluator for LegacyModel {
    fn advance(&mut self, delta_seconds: f32) {
        if !self.frozen {
            self.advance_time(delta_seconds * LEGACY_FRAMES_PER_SECOND);
        }
    }

    fn evaluate(&mut self) -> Result<SkinnedOutput<'_>, Error> {
        self.pose();
        self.rebuild()?;
        Ok(SkinnedOutput::Vertices(&self.geometry))
    }
}
