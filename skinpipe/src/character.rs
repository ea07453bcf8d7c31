//! Compositor-facing entry points over either model format.

use crate::package::{PackageLoadOptions, PackageLocator};
use crate::runtime::{LegacyLoadOptions, LegacyModel, SkeletonPlayer, SkinningEvaluator};
use crate::{Error, MergedGeometry, ModelPackage};
use glam::Mat4;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Somewhere packaged models can be loaded from by id.
pub trait PackageSource {
    fn load_package(&self, model_id: &str) -> Result<ModelPackage, Error>;
}

impl PackageSource for PackageLocator {
    fn load_package(&self, model_id: &str) -> Result<ModelPackage, Error> {
        self.load(model_id, &PackageLoadOptions::default())
    }
}

impl PackageSource for HashMap<String, ModelPackage> {
    fn load_package(&self, model_id: &str) -> Result<ModelPackage, Error> {
        self.get(model_id)
            .cloned()
            .ok_or_else(|| Error::PackageNotFound {
                model_id: model_id.to_string(),
            })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CharacterRequest {
    pub base_model_id: String,
    pub part_model_ids: Vec<String>,
    pub weapon_model_ids: Vec<String>,
    /// Started after assembly when non-empty; an unknown clip is logged and
    /// leaves the character in bind pose.
    pub initial_clip: String,
}

/// A packaged character: base package first, then parts and weapons in
/// request order. Animation is driven from the base package's skeleton.
#[derive(Debug)]
pub struct CharacterVisual {
    pub packages: Vec<Arc<ModelPackage>>,
    pub animation: SkeletonPlayer,
}

impl CharacterVisual {
    pub fn base(&self) -> Option<&ModelPackage> {
        self.packages.first().map(Arc::as_ref)
    }
}

/// Builds packaged characters from a [`PackageSource`].
#[derive(Clone, Debug, Default)]
pub struct CharacterAssembler<S> {
    source: S,
}

impl<S: PackageSource> CharacterAssembler<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn load(&self, model_id: &str) -> Result<Arc<ModelPackage>, Error> {
        self.source
            .load_package(model_id)
            .map(Arc::new)
            .map_err(|err| match err {
                Error::PackageNotFound { .. } => err,
                other => Error::invalid(format!("failed to load package '{model_id}': {other}")),
            })
    }

    /// Loads every requested package; empty part and weapon ids are skipped.
    /// Any failing package fails the whole build.
    pub fn build(&self, request: &CharacterRequest) -> Result<CharacterVisual, Error> {
        if request.base_model_id.is_empty() {
            return Err(Error::invalid("character request has no base model id"));
        }

        let mut packages = vec![self.load(&request.base_model_id)?];
        for id in request
            .part_model_ids
            .iter()
            .chain(&request.weapon_model_ids)
            .filter(|id| !id.is_empty())
        {
            packages.push(self.load(id)?);
        }

        let mut animation = SkeletonPlayer::with_package(Arc::clone(&packages[0]));
        if !request.initial_clip.is_empty() {
            if let Err(err) = animation.set_clip(&request.initial_clip) {
                log::warn!("initial clip not started: {err}");
            }
        }

        log::info!(
            "assembled character '{}' from {} packages",
            request.base_model_id,
            packages.len()
        );
        Ok(CharacterVisual {
            packages,
            animation,
        })
    }
}

/// One loaded character, skinned on the CPU (legacy) or through a bone
/// palette (packaged).
#[derive(Debug)]
pub enum Character {
    Legacy(LegacyModel),
    Packaged(CharacterVisual),
}

impl Character {
    pub fn load_legacy(path: impl AsRef<Path>, options: LegacyLoadOptions) -> Result<Self, Error> {
        let mut model = LegacyModel::new(options);
        model.load_base_model(path)?;
        Ok(Self::Legacy(model))
    }

    pub fn load_legacy_bytes(
        bytes: &[u8],
        model_dir: Option<&Path>,
        options: LegacyLoadOptions,
    ) -> Result<Self, Error> {
        let mut model = LegacyModel::new(options);
        model.load_base_model_bytes(bytes, model_dir)?;
        Ok(Self::Legacy(model))
    }

    pub fn append_part_library(&mut self, path: impl AsRef<Path>, force_visible: bool) -> bool {
        match self {
            Self::Legacy(model) => model.append_part_library(path, force_visible),
            Self::Packaged(_) => false,
        }
    }

    pub fn append_part_library_bytes(
        &mut self,
        bytes: &[u8],
        model_dir: Option<&Path>,
        force_visible: bool,
    ) -> bool {
        match self {
            Self::Legacy(model) => model.append_part_library_bytes(bytes, model_dir, force_visible),
            Self::Packaged(_) => false,
        }
    }

    pub fn set_part(&mut self, tag: &str, node_name: &str) -> bool {
        match self {
            Self::Legacy(model) => model.set_part(tag, node_name),
            Self::Packaged(_) => false,
        }
    }

    pub fn set_part_by_index(&mut self, tag: &str, index: i32) -> bool {
        match self {
            Self::Legacy(model) => model.set_part_by_index(tag, index),
            Self::Packaged(_) => false,
        }
    }

    pub fn reset_selection(&mut self) {
        if let Self::Legacy(model) = self {
            model.reset_selection();
        }
    }

    pub fn update(&mut self, delta_seconds: f32) -> Result<(), Error> {
        match self {
            Self::Legacy(model) => model.update(delta_seconds),
            Self::Packaged(visual) => {
                visual.animation.update(delta_seconds);
                Ok(())
            }
        }
    }

    pub fn merged_geometry(&self) -> Option<&MergedGeometry> {
        match self {
            Self::Legacy(model) => Some(model.merged_geometry()),
            Self::Packaged(_) => None,
        }
    }

    /// Bone palette of a packaged character; legacy characters are posed on
    /// the CPU and have none.
    pub fn build_skin_matrices(&mut self) -> Result<&[Mat4], Error> {
        match self {
            Self::Legacy(_) => Err(Error::invalid(
                "legacy characters are skinned on the CPU and carry no bone palette",
            )),
            Self::Packaged(visual) => visual.animation.build_skin_matrices(),
        }
    }

    pub fn evaluator(&mut self) -> &mut dyn SkinningEvaluator {
        match self {
            Self::Legacy(model) => model,
            Self::Packaged(visual) => &mut visual.animation,
        }
    }
}
