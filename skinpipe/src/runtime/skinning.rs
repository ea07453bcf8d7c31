use crate::{Error, MergedGeometry};
use glam::Mat4;
use std::collections::HashSet;

/// Largest absolute component a skin matrix may carry.
pub const SKIN_MAX_COMPONENT: f32 = 1000.0;
/// Largest translation length a skin matrix may carry.
pub const SKIN_MAX_TRANSLATION: f32 = 500.0;

/// How per-vertex influences of the generic weighted mesh are reduced to four.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub enum WeightPolicy {
    /// The four heaviest influences, renormalized.
    #[default]
    Top4,
    /// One-hot for a single influence; otherwise two capped weights plus a
    /// synthesized remainder on the third bone.
    TripleCompat,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Influence {
    pub bone: usize,
    pub weight: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ReducedWeights {
    pub bones: [usize; 4],
    pub weights: [f32; 4],
}

impl ReducedWeights {
    pub fn one_hot(bone: usize) -> Self {
        Self {
            bones: [bone; 4],
            weights: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Drops non-finite weights and sorts the rest heaviest first. Zero and
/// negative records stay: they still count towards the triple-weight split.
/// Equal weights keep their input order.
pub fn sort_influences(influences: &mut Vec<Influence>) {
    influences.retain(|i| i.weight.is_finite());
    influences.sort_by(|a, b| b.weight.total_cmp(&a.weight));
}

/// Reduces sorted influences to four slots. Vertices with no influence are
/// bound one-hot to `fallback_bone`; a `Top4` list whose weights sum to zero
/// or less is bound one-hot to its first bone.
pub fn reduce_influences(
    sorted: &[Influence],
    policy: WeightPolicy,
    fallback_bone: usize,
) -> ReducedWeights {
    match sorted {
        [] => ReducedWeights::one_hot(fallback_bone),
        [only] if policy == WeightPolicy::TripleCompat => ReducedWeights::one_hot(only.bone),
        _ => match policy {
            WeightPolicy::Top4 => reduce_top4(sorted),
            WeightPolicy::TripleCompat => reduce_triple(sorted),
        },
    }
}

fn reduce_top4(sorted: &[Influence]) -> ReducedWeights {
    let mut out = ReducedWeights {
        bones: [sorted[0].bone; 4],
        weights: [0.0; 4],
    };
    let mut total = 0.0;
    for (slot, infl) in sorted.iter().take(4).enumerate() {
        out.bones[slot] = infl.bone;
        out.weights[slot] = infl.weight;
        total += infl.weight;
    }
    if total > 0.0 {
        for w in &mut out.weights {
            *w /= total;
        }
        out
    } else {
        ReducedWeights::one_hot(sorted[0].bone)
    }
}

// Arithmetic is kept exactly as existing assets expect it.
fn reduce_triple(sorted: &[Influence]) -> ReducedWeights {
    let b0 = sorted[0].bone;
    let b1 = sorted[1].bone;
    let b2 = sorted.get(2).map_or(b1, |i| i.bone);

    let mut w1 = sorted[0].weight.clamp(0.0, 1.0);
    let mut w2 = sorted[1].weight.clamp(0.0, 1.0);
    let pair = w1 + w2;
    if pair > 1.0 {
        let inv = 1.0 / pair;
        w1 *= inv;
        w2 *= inv;
    }

    let mut w3 = (1.0 - (w1 + w2)).clamp(0.0, 1.0);
    let mut total = w1 + w2 + w3;
    if total <= 1e-6 {
        w1 = 1.0;
        w2 = 0.0;
        w3 = 0.0;
        total = 1.0;
    }

    let inv = 1.0 / total;
    ReducedWeights {
        bones: [b0, b1, b2, b0],
        weights: [w1 * inv, w2 * inv, w3 * inv, 0.0],
    }
}

/// Checks one skin matrix against the plausibility bounds.
pub fn validate_skin_matrix(bone: usize, m: &Mat4) -> Result<(), Error> {
    let values = m.to_cols_array();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidSkinMatrix {
            bone,
            max_abs: f32::INFINITY,
            max_translation: f32::INFINITY,
        });
    }
    let max_abs = values.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    let max_translation = m.w_axis.truncate().length();
    if max_abs > SKIN_MAX_COMPONENT || max_translation > SKIN_MAX_TRANSLATION {
        return Err(Error::InvalidSkinMatrix {
            bone,
            max_abs,
            max_translation,
        });
    }
    Ok(())
}

/// Validates every matrix; the first failing bone is reported.
pub fn validate_palette(palette: &[Mat4]) -> Result<(), Error> {
    palette
        .iter()
        .enumerate()
        .try_for_each(|(i, m)| validate_skin_matrix(i, m))
}

/// Result of one evaluation: posed vertices (CPU path) or a bone palette
/// for a vertex shader (GPU path).
#[derive(Copy, Clone, Debug)]
pub enum SkinnedOutput<'a> {
    Vertices(&'a MergedGeometry),
    Palette(&'a [Mat4]),
}

impl SkinnedOutput<'_> {
    pub fn geometry(&self) -> Option<&MergedGeometry> {
        match self {
            Self::Vertices(g) => Some(g),
            Self::Palette(_) => None,
        }
    }

    pub fn palette(&self) -> Option<&[Mat4]> {
        match self {
            Self::Vertices(_) => None,
            Self::Palette(p) => Some(p),
        }
    }
}

/// Common surface of the CPU and GPU skinning paths.
///
/// `evaluate` poses the bind data at the current time. On failure the
/// previously produced output stays available.
pub trait SkinningEvaluator {
    fn advance(&mut self, delta_seconds: f32);
    fn evaluate(&mut self) -> Result<SkinnedOutput<'_>, Error>;
}

/// Latch that lets each warning class through once. Owners start a fresh
/// latch on reload.
#[derive(Clone, Debug, Default)]
pub(crate) struct WarnOnce {
    fired: HashSet<&'static str>,
}

impl WarnOnce {
    pub(crate) fn warn(&mut self, class: &'static str, message: impl FnOnce() -> String) {
        if self.fired.insert(class) {
            log::warn!("{}", message());
        }
    }
}
