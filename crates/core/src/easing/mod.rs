//! Stateless interpolation curves shared by every animation.
//!
//! Each curve maps a progress fraction `x` in `[0, 1]` onto a value between
//! two endpoints. Endpoints may be scalars or RGB-like triples, anything that
//! implements [`Tween`].

use serde::{Deserialize, Serialize};

/// Endpoints closer than this are treated as identical.
pub const EPSILON: f32 = 1e-6;

/// Values that can be linearly blended.
pub trait Tween: Copy + PartialEq {
    /// Returns `self * (1 - x) + other * x`.
    fn blend(self, other: Self, x: f32) -> Self;

    /// Largest per-component absolute difference.
    fn distance(self, other: Self) -> f32;
}

impl Tween for f32 {
    fn blend(self, other: Self, x: f32) -> Self {
        self * (1.0 - x) + other * x
    }

    fn distance(self, other: Self) -> f32 {
        (self - other).abs()
    }
}

impl Tween for [f32; 3] {
    fn blend(self, other: Self, x: f32) -> Self {
        [
            self[0].blend(other[0], x),
            self[1].blend(other[1], x),
            self[2].blend(other[2], x),
        ]
    }

    fn distance(self, other: Self) -> f32 {
        self.iter()
            .zip(other.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }
}

/// Selectable interpolation curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    Linear,
    Smoothstep,
    /// Fast attack, slow release.
    #[default]
    Sqrt,
}

impl Easing {
    /// Evaluates the curve between `y0` and `y1` at progress `x`.
    ///
    /// # Panics
    ///
    /// Panics if `x` lies outside `[0, 1]`.
    pub fn apply<T: Tween>(self, y0: T, y1: T, x: f32) -> T {
        match self {
            Easing::Linear => lerp(y0, y1, x),
            Easing::Smoothstep => smoothstep(y0, y1, x),
            Easing::Sqrt => sqrt_ease(y0, y1, x),
        }
    }
}

fn check_progress(x: f32) {
    assert!(
        (0.0..=1.0).contains(&x),
        "interpolation progress {x} outside [0, 1]"
    );
}

/// Linear interpolation: `y0 * (1 - x) + y1 * x`.
///
/// # Panics
///
/// Panics if `x` lies outside `[0, 1]`.
pub fn lerp<T: Tween>(y0: T, y1: T, x: f32) -> T {
    check_progress(x);
    y0.blend(y1, x)
}

/// Hermite smoothstep between the endpoints. Degenerate endpoints return `y1`.
///
/// # Panics
///
/// Panics if `x` lies outside `[0, 1]`.
pub fn smoothstep<T: Tween>(y0: T, y1: T, x: f32) -> T {
    check_progress(x);
    if y0.distance(y1) < EPSILON {
        return y1;
    }
    let v = x * x * (3.0 - 2.0 * x);
    y0.blend(y1, v)
}

/// Linear interpolation over a square-root re-parameterised progress.
///
/// # Panics
///
/// Panics if `x` lies outside `[0, 1]`.
pub fn sqrt_ease<T: Tween>(y0: T, y1: T, x: f32) -> T {
    check_progress(x);
    lerp(y0, y1, x.sqrt())
}
