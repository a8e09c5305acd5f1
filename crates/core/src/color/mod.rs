//! Colour spaces, the note palette and multi-note compositing.
//!
//! Blending happens in CIE LCh(uv), a lightness/chroma/hue space in which
//! equal steps look roughly equally different. Hue is accumulated as a chroma
//! vector so that notes on opposite sides of the hue circle do not average to
//! an unrelated colour. Conversions are done by `palette`.

use palette::{FromColor, Hsv, Lchuv, LinSrgb, Luv, Srgb};
use serde::{Deserialize, Serialize};

use crate::note::PitchClass;

/// Display colour with channels nominally in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn clamped(self) -> Self {
        Self::new(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
        )
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.r * factor, self.g * factor, self.b * factor)
    }

    /// Bit-for-bit equality, used for output change detection.
    pub fn same_bits(self, other: Rgb) -> bool {
        self.r.to_bits() == other.r.to_bits()
            && self.g.to_bits() == other.g.to_bits()
            && self.b.to_bits() == other.b.to_bits()
    }

    /// Quantises the clamped colour to 8-bit channels.
    pub fn to_rgb8(self) -> [u8; 3] {
        let c = self.clamped();
        [c.r, c.g, c.b].map(|v| (v * 255.0).round() as u8)
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    /// `hue` in turns (`0..1`), saturation and value in `[0, 1]`.
    pub fn from_hsv(hue: f32, saturation: f32, value: f32) -> Self {
        let hsv: Hsv = Hsv::new(hue.rem_euclid(1.0) * 360.0, saturation, value);
        let srgb: Srgb = Srgb::from_color(hsv);
        Self::new(srgb.red, srgb.green, srgb.blue)
    }

    fn into_linear(self) -> LinSrgb {
        Srgb::new(self.r, self.g, self.b).into_linear()
    }

    fn from_linear(linear: LinSrgb) -> Self {
        let srgb: Srgb = Srgb::from_linear(linear);
        Self::new(srgb.red, srgb.green, srgb.blue)
    }
}

/// CIE LCh(uv) under D65: lightness `l` in `[0, 100]`, chroma `c`, hue `h`
/// in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lch {
    pub l: f32,
    pub c: f32,
    pub h: f32,
}

impl Lch {
    pub fn from_rgb(rgb: Rgb) -> Self {
        let lch: Lchuv = Lchuv::from_color(rgb.into_linear());
        Self {
            l: lch.l,
            c: lch.chroma,
            h: lch.hue.into_positive_degrees(),
        }
    }

    pub fn to_rgb(self) -> Rgb {
        Rgb::from_linear(LinSrgb::from_color(self.to_lchuv()))
    }

    fn to_lchuv(self) -> Lchuv {
        Lchuv::new(self.l, self.c, self.h)
    }

    /// Cartesian form: lightness plus the chroma vector `(u, v)`.
    fn to_luv(self) -> Luv {
        Luv::from_color(self.to_lchuv())
    }
}

/// Base colour of a pitch class: fully saturated hue spaced evenly around the
/// circle of fifths, A being red.
pub fn note_color(pitch: PitchClass) -> Rgb {
    let hue = pitch.fifths_index() as f32 / PitchClass::CIRCLE_OF_FIFTHS.len() as f32;
    Rgb::from_hsv(hue, 1.0, 1.0)
}

/// Blends `(base colour, brightness)` pairs into one display colour.
///
/// Each contribution is weighted by `brightness * l / total_l`, where
/// `total_l` sums the lightness of every layer passed in. An empty input is
/// black and a single layer at full brightness reproduces its base colour.
pub fn composite<I>(layers: I) -> Rgb
where
    I: IntoIterator<Item = (Lch, f32)>,
{
    let layers: Vec<(Lch, f32)> = layers.into_iter().collect();
    let total_l: f32 = layers.iter().map(|(lch, _)| lch.l).sum();
    if layers.is_empty() || total_l <= f32::EPSILON {
        return Rgb::BLACK;
    }

    let mut acc = [0.0_f32; 3];
    for (lch, brightness) in &layers {
        let weight = brightness.clamp(0.0, 1.0) * lch.l / total_l;
        let luv = lch.to_luv();
        acc[0] += weight * luv.l;
        acc[1] += weight * luv.u;
        acc[2] += weight * luv.v;
    }
    if acc[0] <= 0.0 {
        return Rgb::BLACK;
    }

    let luv: Luv = Luv::new(acc[0], acc[1], acc[2]);
    Rgb::from_linear(LinSrgb::from_color(luv)).clamped()
}

/// Perceptual correction for 8-bit LED channels.
pub const GAMMA_TABLE: [u8; 256] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, //
    1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2, 2, 3, 3, //
    3, 3, 3, 3, 3, 4, 4, 4, 4, 4, 5, 5, 5, 5, 6, 6, //
    6, 6, 7, 7, 7, 7, 8, 8, 8, 9, 9, 9, 10, 10, 10, 11, //
    11, 12, 12, 12, 13, 13, 14, 14, 14, 15, 15, 16, 16, 17, 17, 18, //
    18, 19, 19, 20, 20, 21, 21, 22, 23, 23, 24, 24, 25, 26, 26, 27, //
    28, 28, 29, 30, 30, 31, 32, 33, 33, 34, 35, 36, 36, 37, 38, 39, //
    40, 41, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51, 51, 52, 53, //
    55, 56, 57, 58, 59, 60, 61, 62, 63, 64, 65, 66, 68, 69, 70, 71, //
    72, 74, 75, 76, 77, 79, 80, 81, 83, 84, 85, 87, 88, 89, 91, 92, //
    94, 95, 97, 98, 100, 101, 103, 104, 106, 107, 109, 110, 112, 114, 115, 117, //
    119, 120, 122, 124, 125, 127, 129, 131, 132, 134, 136, 138, 140, 141, 143, 145, //
    147, 149, 151, 153, 155, 157, 159, 161, 163, 165, 167, 169, 171, 173, 175, 178, //
    180, 182, 184, 186, 188, 191, 193, 195, 198, 200, 202, 205, 207, 209, 212, 214, //
    216, 219, 221, 224, 226, 229, 231, 234, 237, 239, 242, 244, 247, 250, 252, 255, //
];

pub fn gamma(value: u8) -> u8 {
    GAMMA_TABLE[usize::from(value)]
}
