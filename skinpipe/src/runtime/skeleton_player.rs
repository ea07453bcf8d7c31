use crate::hierarchy::{CompositionOrder, compose_globals, select_composition_order};
use crate::runtime::sampler::{
    clamp_time, decompose_bind, normalize_or_identity, sample_position, sample_rotation, wrap_time,
};
use crate::runtime::skinning::{SkinnedOutput, SkinningEvaluator, WarnOnce, validate_palette};
use crate::{Clip, Error, ModelPackage};
use glam::Mat4;
use std::sync::Arc;

/// Plays packaged clips and produces the per-bone skin palette for GPU
/// skinning.
///
/// The composition order is resolved lazily from the package's bones on the
/// first palette build and forgotten whenever the package changes.
#[derive(Debug)]
pub struct SkeletonPlayer {
    package: Option<Arc<ModelPackage>>,
    clip: Option<usize>,
    time: f32,
    duration: f32,
    looping: bool,
    order: Option<CompositionOrder>,
    palette: Vec<Mat4>,
    warnings: WarnOnce,
}

impl Default for SkeletonPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SkeletonPlayer {
    pub fn new() -> Self {
        Self {
            package: None,
            clip: None,
            time: 0.0,
            duration: 0.0,
            looping: true,
            order: None,
            palette: Vec::new(),
            warnings: WarnOnce::default(),
        }
    }

    pub fn with_package(package: Arc<ModelPackage>) -> Self {
        let mut out = Self::new();
        out.set_package(Some(package));
        out
    }

    /// Replaces the package and resets clip, time and cached order.
    pub fn set_package(&mut self, package: Option<Arc<ModelPackage>>) {
        let looping = self.looping;
        *self = Self::new();
        self.looping = looping;
        self.package = package;
    }

    pub fn package(&self) -> Option<&ModelPackage> {
        self.package.as_deref()
    }

    /// Starts `name` from time zero.
    pub fn set_clip(&mut self, name: &str) -> Result<(), Error> {
        let package = self.package.as_ref().ok_or(Error::NotLoaded)?;
        let (index, clip) = package.clip(name).ok_or_else(|| Error::UnknownClip {
            name: name.to_string(),
        })?;
        self.duration = clip.duration();
        self.clip = Some(index);
        self.time = 0.0;
        Ok(())
    }

    pub fn clear_clip(&mut self) {
        self.clip = None;
        self.time = 0.0;
        self.duration = 0.0;
    }

    pub fn current_clip(&self) -> Option<&Clip> {
        let package = self.package.as_deref()?;
        package.clips.get(self.clip?)
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
        if !looping {
            self.time = clamp_time(self.time, self.duration);
        }
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn set_time(&mut self, time: f32) {
        self.time = time;
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn update(&mut self, delta_seconds: f32) {
        if delta_seconds <= 0.0 || self.current_clip().is_none() {
            return;
        }
        self.time += delta_seconds;
        self.time = if self.looping {
            if self.duration > 0.0 {
                wrap_time(self.time, self.duration)
            } else {
                self.time
            }
        } else {
            clamp_time(self.time, self.duration)
        };
    }

    /// Time at which keys are evaluated.
    pub fn sample_time(&self) -> f32 {
        if self.looping {
            wrap_time(self.time, self.duration)
        } else {
            clamp_time(self.time, self.duration)
        }
    }

    /// Order used to compose globals; resolved on first use.
    pub fn composition_order(&mut self) -> CompositionOrder {
        if let Some(order) = self.order {
            return order;
        }
        let order = self
            .package
            .as_deref()
            .map_or(CompositionOrder::LocalFirst, |p| select_composition_order(&p.bones));
        log::info!("skeleton player composition order: {order:?}");
        self.order = Some(order);
        order
    }

    fn sample_locals(&mut self, package: &ModelPackage, clip: Option<&Clip>) -> Vec<Mat4> {
        let time = self.sample_time();
        let mut decompose_fallbacks = 0usize;

        let locals = package
            .bones
            .iter()
            .enumerate()
            .map(|(i, bone)| {
                let Some(channel) = clip
                    .and_then(|c| c.channel_for_bone(i))
                    .filter(|ch| ch.is_animated())
                else {
                    return bone.bind;
                };
                let bind = decompose_bind(&bone.bind);
                if bind.fallback {
                    decompose_fallbacks += 1;
                }
                let position = sample_position(&channel.positions, time, bind.translation);
                let rotation = normalize_or_identity(sample_rotation(
                    &channel.rotations,
                    time,
                    bind.rotation,
                ));
                Mat4::from_scale_rotation_translation(bind.scale, rotation, position)
            })
            .collect();

        if decompose_fallbacks > 0 {
            self.warnings.warn("bind-decompose", || {
                format!("bind decompose fallback used for {decompose_fallbacks} bones")
            });
        }
        locals
    }

    fn compute_palette(&mut self, package: &ModelPackage, clip: Option<&Clip>) -> Vec<Mat4> {
        let order = self.composition_order();
        let locals = self.sample_locals(package, clip);
        let n = package.bones.len();
        let parents: Vec<Option<usize>> = package.bones.iter().map(|b| b.parent_index(n)).collect();
        compose_globals(&parents, &locals, order)
            .iter()
            .zip(&package.bones)
            .map(|(global, bone)| *global * bone.inverse_bind)
            .collect()
    }

    /// Skin matrices (`global * inverse_bind`) for the current time.
    ///
    /// Every matrix is validated; when any bone fails the whole palette is
    /// rejected and the previous one is kept.
    pub fn build_skin_matrices(&mut self) -> Result<&[Mat4], Error> {
        let package = self.package.clone().ok_or(Error::NotLoaded)?;
        let clip = self.clip.and_then(|i| package.clips.get(i));
        let palette = self.compute_palette(&package, clip);

        if let Err(err) = validate_palette(&palette) {
            self.warnings.warn("invalid-skin-palette", || {
                format!("invalid skin matrices, falling back to bind pose: {err}")
            });
            return Err(err);
        }
        self.palette = palette;
        Ok(&self.palette)
    }

    /// Palette of the unanimated skeleton.
    pub fn bind_pose_palette(&mut self) -> Result<Vec<Mat4>, Error> {
        let package = self.package.clone().ok_or(Error::NotLoaded)?;
        Ok(self.compute_palette(&package, None))
    }

    /// Animated palette, or the bind-pose palette when it fails validation,
    /// or identity when even the bind pose is implausible.
    pub fn palette_or_bind_pose(&mut self) -> &[Mat4] {
        if self.build_skin_matrices().is_ok() {
            return &self.palette;
        }
        let bone_count = self.package.as_ref().map_or(0, |p| p.bones.len());
        self.palette = match self.bind_pose_palette() {
            Ok(bind) if validate_palette(&bind).is_ok() => bind,
            _ => vec![Mat4::IDENTITY; bone_count],
        };
        &self.palette
    }

    /// Last palette that passed validation.
    pub fn palette(&self) -> &[Mat4] {
        &self.palette
    }
}

impl SkinningEvaluator for SkeletonPlayer {
    fn advance(&mut self, delta_seconds: f32) {
        self.update(delta_seconds);
    }

    fn evaluate(&mut self) -> Result<SkinnedOutput<'_>, Error> {
        self.build_skin_matrices().map(SkinnedOutput::Palette)
    }
}
