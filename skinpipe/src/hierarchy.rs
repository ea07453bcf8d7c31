//! Bone hierarchy resolution.
//!
//! Parents come either from names (legacy files) or from signed indices
//! (packaged skeletons). Global transforms are composed with a cycle-safe
//! walk: a bone reached again while its own chain is still being resolved is
//! treated as already global.
//!
//! Packaged skeletons do not say whether their bind matrices are row- or
//! column-major, or local or global. [`resolve_bind_conventions`] infers both
//! by scoring how close `global * inverse_bind` lands to identity under each
//! candidate interpretation.

use crate::PackageBone;
use glam::Mat4;
use std::collections::HashMap;

/// Column translation must dominate the row translation by this ratio before
/// a matrix is considered column-major.
pub const COLUMN_MAJOR_RATIO: f32 = 0.35;
const COLUMN_MAJOR_MIN_TRANSLATION: f32 = 1e-4;

/// Stored binds are treated as global when their identity error is below this
/// fraction of the best local interpretation.
pub const GLOBAL_BIND_RATIO: f32 = 0.25;

/// How a bone's local transform combines with its parent's global transform.
///
/// Names follow the on-disk row-vector convention: `LocalFirst` is
/// `local * parent` there, which is `parent * local` for glam's column vectors.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub enum CompositionOrder {
    #[default]
    LocalFirst,
    ParentFirst,
}

impl CompositionOrder {
    pub fn compose(self, parent_global: Mat4, local: Mat4) -> Mat4 {
        match self {
            Self::LocalFirst => parent_global * local,
            Self::ParentFirst => local * parent_global,
        }
    }
}

/// What the bind-convention heuristic measured and decided for one skeleton.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct BindConventionReport {
    /// Bones whose bind and inverse-bind matrices were transposed.
    pub transposed_bones: usize,
    pub local_first_error: f32,
    pub parent_first_error: f32,
    pub global_error: f32,
    /// Order to use at runtime, chosen after any global-to-local conversion.
    pub order: CompositionOrder,
    pub converted_global_to_local: bool,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Visit {
    Unvisited,
    Visiting,
    Done,
}

/// Composes every bone's global transform from its local transform.
///
/// `parents[i]` of `None`, or an index outside `locals`, makes bone `i` a root.
/// Parent cycles terminate: the bone that closes the cycle contributes its
/// local transform as if it were global.
pub fn compose_globals(
    parents: &[Option<usize>],
    locals: &[Mat4],
    order: CompositionOrder,
) -> Vec<Mat4> {
    let n = locals.len();
    let mut globals = locals.to_vec();
    let mut state = vec![Visit::Unvisited; n];
    let mut chain = Vec::new();

    for start in 0..n {
        if state[start] == Visit::Done {
            continue;
        }

        chain.clear();
        let mut base: Option<Mat4> = None;
        let mut cur = Some(start);
        while let Some(i) = cur {
            match state[i] {
                Visit::Done => {
                    base = Some(globals[i]);
                    break;
                }
                Visit::Visiting => {
                    base = Some(locals[i]);
                    break;
                }
                Visit::Unvisited => {
                    state[i] = Visit::Visiting;
                    chain.push(i);
                    cur = parents.get(i).copied().flatten().filter(|&p| p < n);
                }
            }
        }

        for &i in chain.iter().rev() {
            let global = match base {
                Some(parent) => order.compose(parent, locals[i]),
                None => locals[i],
            };
            globals[i] = global;
            state[i] = Visit::Done;
            base = Some(global);
        }
    }

    globals
}

/// Name lookup used for legacy parent and influence resolution.
///
/// Exact matches win; otherwise names are compared trimmed and lowercased.
/// When a name repeats, the first bone keeps it.
#[derive(Clone, Debug, Default)]
pub struct BoneNameIndex {
    exact: HashMap<String, usize>,
    normalized: HashMap<String, usize>,
}

pub fn normalize_bone_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl BoneNameIndex {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = Self::default();
        for (i, name) in names.into_iter().enumerate() {
            out.insert(name, i);
        }
        out
    }

    pub fn insert(&mut self, name: &str, index: usize) {
        if name.is_empty() {
            return;
        }
        self.exact.entry(name.to_string()).or_insert(index);
        self.normalized
            .entry(normalize_bone_name(name))
            .or_insert(index);
    }

    pub fn exact(&self, name: &str) -> Option<usize> {
        self.exact.get(name).copied()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        self.exact(name)
            .or_else(|| self.normalized.get(&normalize_bone_name(name)).copied())
    }
}

/// Resolves legacy parent names by exact match. Missing, empty or
/// self-referencing parents make the bone a root.
pub fn resolve_parents_by_name(names: &[String], parent_names: &[String]) -> Vec<Option<usize>> {
    let index = BoneNameIndex::new(names.iter().map(String::as_str));
    parent_names
        .iter()
        .enumerate()
        .map(|(i, parent)| index.exact(parent).filter(|&p| p != i))
        .collect()
}

/// `true` when the translation sits in the bottom row rather than the last
/// column, i.e. the matrix was stored transposed.
pub fn looks_column_major(m: &Mat4) -> bool {
    let row = m.w_axis.x.abs() + m.w_axis.y.abs() + m.w_axis.z.abs();
    let col = m.x_axis.w.abs() + m.y_axis.w.abs() + m.z_axis.w.abs();
    col > COLUMN_MAJOR_MIN_TRANSLATION && row <= col * COLUMN_MAJOR_RATIO
}

/// Sum of absolute deviations from identity over all 16 elements.
pub fn identity_deviation(m: &Mat4) -> f32 {
    let id = Mat4::IDENTITY.to_cols_array();
    m.to_cols_array()
        .iter()
        .zip(id.iter())
        .map(|(a, b)| (a - b).abs())
        .sum()
}

fn average_deviation(
    globals: &[Mat4],
    inverse_binds: &[Mat4],
    skin: impl Fn(Mat4, Mat4) -> Mat4,
) -> f32 {
    let n = globals.len().min(inverse_binds.len());
    if n == 0 {
        return 0.0;
    }
    let total: f32 = globals
        .iter()
        .zip(inverse_binds)
        .map(|(g, ib)| identity_deviation(&skin(*g, *ib)))
        .sum();
    let avg = total / n as f32;
    if avg.is_finite() { avg } else { f32::INFINITY }
}

/// Average identity deviation of `inverse_bind * global` per bone, the
/// on-disk "global x inverse bind" product. Scores bind storage at load.
/// Non-finite results score as infinitely bad.
pub fn skin_identity_error(globals: &[Mat4], inverse_binds: &[Mat4]) -> f32 {
    average_deviation(globals, inverse_binds, |g, ib| ib * g)
}

/// Average identity deviation of `global * inverse_bind` per bone, the
/// product the runtime palette uses. Scores composition order at playback.
pub fn order_identity_error(globals: &[Mat4], inverse_binds: &[Mat4]) -> f32 {
    average_deviation(globals, inverse_binds, |g, ib| g * ib)
}

fn parents_of(bones: &[PackageBone]) -> Vec<Option<usize>> {
    let n = bones.len();
    bones.iter().map(|b| b.parent_index(n)).collect()
}

fn order_errors(
    bones: &[PackageBone],
    parents: &[Option<usize>],
    error: fn(&[Mat4], &[Mat4]) -> f32,
) -> (f32, f32, f32) {
    let locals: Vec<Mat4> = bones.iter().map(|b| b.bind).collect();
    let inverse: Vec<Mat4> = bones.iter().map(|b| b.inverse_bind).collect();
    let lf = compose_globals(parents, &locals, CompositionOrder::LocalFirst);
    let pf = compose_globals(parents, &locals, CompositionOrder::ParentFirst);
    (
        error(&lf, &inverse),
        error(&pf, &inverse),
        error(&locals, &inverse),
    )
}

/// Picks the composition order with the lower [`order_identity_error`];
/// ties go to [`CompositionOrder::LocalFirst`].
pub fn select_composition_order(bones: &[PackageBone]) -> CompositionOrder {
    let parents = parents_of(bones);
    let (lf, pf, _) = order_errors(bones, &parents, order_identity_error);
    if pf < lf {
        CompositionOrder::ParentFirst
    } else {
        CompositionOrder::LocalFirst
    }
}

/// Detects and corrects the bind-matrix storage conventions of a packaged
/// skeleton in place.
///
/// 1. Bones whose bind or inverse-bind looks column-major get both transposed.
/// 2. The average skin identity error is measured for local-first,
///    parent-first and "already global" interpretations.
/// 3. When the global interpretation beats the better local one by the
///    [`GLOBAL_BIND_RATIO`] margin, binds are rewritten as local-to-parent
///    using the original globals.
///
/// The result depends only on the input matrices.
pub fn resolve_bind_conventions(bones: &mut [PackageBone]) -> BindConventionReport {
    let mut report = BindConventionReport::default();
    if bones.is_empty() {
        return report;
    }

    for bone in bones.iter_mut() {
        if looks_column_major(&bone.bind) || looks_column_major(&bone.inverse_bind) {
            bone.bind = bone.bind.transpose();
            bone.inverse_bind = bone.inverse_bind.transpose();
            report.transposed_bones += 1;
        }
    }

    let parents = parents_of(bones);
    let (lf, pf, global) = order_errors(bones, &parents, skin_identity_error);
    report.local_first_error = lf;
    report.parent_first_error = pf;
    report.global_error = global;

    let best_local = lf.min(pf);
    if global < GLOBAL_BIND_RATIO * best_local {
        let globals: Vec<Mat4> = bones.iter().map(|b| b.bind).collect();
        for (i, bone) in bones.iter_mut().enumerate() {
            let Some(p) = parents[i] else {
                continue;
            };
            let parent = globals[p];
            if parent.determinant().abs() <= f32::EPSILON {
                continue;
            }
            let local = parent.inverse() * globals[i];
            if local.is_finite() {
                bone.bind = local;
            }
        }
        report.converted_global_to_local = true;
    }

    report.order = select_composition_order(bones);

    log::info!(
        "bind conventions: {} bones, {} transposed, errors lf={:.4} pf={:.4} global={:.4}, order={:?}, global->local={}",
        bones.len(),
        report.transposed_bones,
        report.local_first_error,
        report.parent_first_error,
        report.global_error,
        report.order,
        report.converted_global_to_local
    );

    report
}
