mod legacy_model;
mod sampler;
mod skeleton_player;
mod skinning;

pub use legacy_model::*;
pub use sampler::*;
pub use skeleton_player::*;
pub use skinning::*;
