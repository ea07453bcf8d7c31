//! Skeletal model and animation pipeline for legacy exporter files and
//! packaged four-chunk models.
//!
//! The crate is renderer-agnostic: it produces merged vertex/index streams
//! (CPU-skinned legacy models) or per-bone skin palettes (packaged models)
//! for an external renderer to upload.

#![forbid(unsafe_code)]

mod binary;
mod character;
mod error;
mod limits;
mod material;
mod model;
mod runtime;

pub mod equip;
pub mod hierarchy;
pub mod legacy;
pub mod package;

pub use character::*;
pub use error::*;
pub use limits::*;
pub use material::*;
pub use model::*;
pub use runtime::*;

pub use equip::{EquipCategory, EquipSelection};
pub use hierarchy::{BindConventionReport, CompositionOrder};
pub use package::{PackageLoadOptions, PackageLocator, load_package_dir};

#[cfg(test)]
mod test_fixtures;

#[cfg(test)]
mod legacy_tests;
