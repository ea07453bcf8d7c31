use crate::{PositionKey, RotationKey};
use glam::{Mat4, Quat, Vec3};

/// Wraps `time` into `[0, duration)`; any non-positive duration yields `0`.
pub fn wrap_time(time: f32, duration: f32) -> f32 {
    if duration <= 0.0 || !time.is_finite() {
        return 0.0;
    }
    let t = time % duration;
    if t < 0.0 { t + duration } else { t }
}

/// Clamps `time` into `[0, duration]` for non-looping playback.
pub fn clamp_time(time: f32, duration: f32) -> f32 {
    if !time.is_finite() {
        return 0.0;
    }
    time.clamp(0.0, duration.max(0.0))
}

enum Bracket {
    Empty,
    Clamp(usize),
    Blend(usize, usize, f32),
}

/// Finds the key pair bracketing `time`; keys are assumed sorted by time.
fn bracket(len: usize, time_at: impl Fn(usize) -> f32, time: f32) -> Bracket {
    if len == 0 {
        return Bracket::Empty;
    }
    if len == 1 || time <= time_at(0) {
        return Bracket::Clamp(0);
    }
    if time >= time_at(len - 1) {
        return Bracket::Clamp(len - 1);
    }
    for i in 1..len {
        let (a, b) = (time_at(i - 1), time_at(i));
        if time <= b {
            let span = b - a;
            let alpha = if span > 0.0 { (time - a) / span } else { 0.0 };
            return Bracket::Blend(i - 1, i, alpha);
        }
    }
    Bracket::Clamp(len - 1)
}

pub fn sample_position(keys: &[PositionKey], time: f32, fallback: Vec3) -> Vec3 {
    match bracket(keys.len(), |i| keys[i].time, time) {
        Bracket::Empty => fallback,
        Bracket::Clamp(i) => keys[i].value,
        Bracket::Blend(a, b, t) => keys[a].value.lerp(keys[b].value, t),
    }
}

/// Slerps normalized bracketing keys along the shortest arc.
pub fn sample_rotation(keys: &[RotationKey], time: f32, fallback: Quat) -> Quat {
    match bracket(keys.len(), |i| keys[i].time, time) {
        Bracket::Empty => fallback,
        Bracket::Clamp(i) => keys[i].value,
        Bracket::Blend(a, b, t) => slerp_normalized(keys[a].value, keys[b].value, t),
    }
}

pub fn normalize_or_identity(q: Quat) -> Quat {
    let len = q.length();
    if len.is_finite() && len > 1e-8 {
        q / len
    } else {
        Quat::IDENTITY
    }
}

pub fn slerp_normalized(a: Quat, b: Quat, t: f32) -> Quat {
    normalize_or_identity(a).slerp(normalize_or_identity(b), t)
}

/// Scale, rotation and translation of a bind matrix.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BindDecomposition {
    pub scale: Vec3,
    pub rotation: Quat,
    pub translation: Vec3,
    /// Set when the matrix could not be decomposed and axes were used instead.
    pub fallback: bool,
}

/// Decomposes `m`; singular or non-finite matrices fall back to the
/// translation column, a rotation from the normalized axes and unit scale.
pub fn decompose_bind(m: &Mat4) -> BindDecomposition {
    if m.is_finite() && m.determinant().abs() > 1e-12 {
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        if scale.is_finite() && rotation.is_finite() && translation.is_finite() {
            return BindDecomposition {
                scale,
                rotation,
                translation,
                fallback: false,
            };
        }
    }

    let translation = m.w_axis.truncate();
    let axes = glam::Mat3::from_cols(
        m.x_axis.truncate().normalize_or_zero(),
        m.y_axis.truncate().normalize_or_zero(),
        m.z_axis.truncate().normalize_or_zero(),
    );
    let rotation = if axes.is_finite() && axes.determinant().abs() > 1e-6 {
        normalize_or_identity(Quat::from_mat3(&axes))
    } else {
        Quat::IDENTITY
    };
    BindDecomposition {
        scale: Vec3::ONE,
        rotation,
        translation: if translation.is_finite() {
            translation
        } else {
            Vec3::ZERO
        },
        fallback: true,
    }
}
