use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::unmixing::Vec3;

/// Channel-separable blend modes.
///
/// Each mode combines a source channel `s` (upper layer) with a destination
/// channel `d` (the composite below it). All modes are pure and NaN-free for
/// inputs in [0,1]; near-singular denominators in `ColorDodge`/`ColorBurn`
/// are epsilon-guarded. `LinearDodge` is additive and may exceed 1 unless
/// cropping is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    LinearDodge,
}

/// Guard threshold for the rational dodge/burn branches.
const BLEND_EPSILON: f64 = 1e-5;

impl BlendMode {
    /// All supported modes, in canonical order.
    pub const ALL: [BlendMode; 13] = [
        BlendMode::Normal,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Overlay,
        BlendMode::Darken,
        BlendMode::Lighten,
        BlendMode::ColorDodge,
        BlendMode::ColorBurn,
        BlendMode::HardLight,
        BlendMode::SoftLight,
        BlendMode::Difference,
        BlendMode::Exclusion,
        BlendMode::LinearDodge,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "ColorDodge",
            BlendMode::ColorBurn => "ColorBurn",
            BlendMode::HardLight => "HardLight",
            BlendMode::SoftLight => "SoftLight",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
            BlendMode::LinearDodge => "LinearDodge",
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BlendMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlendMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| Error::UnknownBlendMode(s.to_string()))
    }
}

/// Applies a blend mode to a single channel pair.
///
/// `crop` only affects `LinearDodge`, saturating `s + d` to 1.
pub fn blend(s: f64, d: f64, mode: BlendMode, crop: bool) -> f64 {
    match mode {
        BlendMode::Normal => s,
        BlendMode::Multiply => s * d,
        BlendMode::Screen => 1.0 - (1.0 - s) * (1.0 - d),
        BlendMode::Overlay => {
            if d <= 0.5 {
                2.0 * s * d
            } else {
                1.0 - 2.0 * (1.0 - s) * (1.0 - d)
            }
        }
        BlendMode::Darken => s.min(d),
        BlendMode::Lighten => s.max(d),
        BlendMode::ColorDodge => {
            if d < BLEND_EPSILON {
                0.0
            } else if 1.0 - s < BLEND_EPSILON {
                1.0
            } else {
                (d / (1.0 - s)).min(1.0)
            }
        }
        BlendMode::ColorBurn => {
            if 1.0 - d < BLEND_EPSILON {
                1.0
            } else if s < BLEND_EPSILON {
                0.0
            } else {
                1.0 - ((1.0 - d) / s).min(1.0)
            }
        }
        BlendMode::HardLight => {
            if s <= 0.5 {
                2.0 * s * d
            } else {
                1.0 - 2.0 * (1.0 - s) * (1.0 - d)
            }
        }
        BlendMode::SoftLight => {
            if s <= 0.5 {
                d - (1.0 - 2.0 * s) * d * (1.0 - d)
            } else {
                d + (2.0 * s - 1.0) * (soft_light_aux(d) - d)
            }
        }
        BlendMode::Difference => (s - d).abs(),
        BlendMode::Exclusion => s + d - 2.0 * s * d,
        BlendMode::LinearDodge => {
            if crop && s + d > 1.0 {
                1.0
            } else {
                s + d
            }
        }
    }
}

/// Partial derivative of `blend` with respect to the source channel.
pub fn blend_grad_s(s: f64, d: f64, mode: BlendMode, crop: bool) -> f64 {
    match mode {
        BlendMode::Normal => 1.0,
        BlendMode::Multiply => d,
        BlendMode::Screen => 1.0 - d,
        BlendMode::Overlay => {
            if d <= 0.5 {
                2.0 * d
            } else {
                2.0 * (1.0 - d)
            }
        }
        BlendMode::Darken => {
            if s < d {
                1.0
            } else {
                0.0
            }
        }
        BlendMode::Lighten => {
            if s < d {
                0.0
            } else {
                1.0
            }
        }
        BlendMode::ColorDodge => {
            if d < BLEND_EPSILON || 1.0 - s < BLEND_EPSILON || d / (1.0 - s) > 1.0 {
                0.0
            } else {
                d / ((1.0 - s) * (1.0 - s))
            }
        }
        BlendMode::ColorBurn => {
            if 1.0 - d < BLEND_EPSILON || s < BLEND_EPSILON || (1.0 - d) / s > 1.0 {
                0.0
            } else {
                (1.0 - d) / (s * s)
            }
        }
        BlendMode::HardLight => {
            if s <= 0.5 {
                2.0 * d
            } else {
                2.0 * (1.0 - d)
            }
        }
        BlendMode::SoftLight => {
            if s <= 0.5 {
                2.0 * d * (1.0 - d)
            } else {
                2.0 * (soft_light_aux(d) - d)
            }
        }
        BlendMode::Difference => {
            if s < d {
                -1.0
            } else {
                1.0
            }
        }
        BlendMode::Exclusion => 1.0 - 2.0 * d,
        BlendMode::LinearDodge => {
            if crop && s + d > 1.0 {
                0.0
            } else {
                1.0
            }
        }
    }
}

/// Partial derivative of `blend` with respect to the destination channel.
pub fn blend_grad_d(s: f64, d: f64, mode: BlendMode, crop: bool) -> f64 {
    match mode {
        BlendMode::Normal => 0.0,
        BlendMode::Multiply => s,
        BlendMode::Screen => 1.0 - s,
        BlendMode::Overlay => {
            if d <= 0.5 {
                2.0 * s
            } else {
                2.0 * (1.0 - s)
            }
        }
        BlendMode::Darken => {
            if s < d {
                0.0
            } else {
                1.0
            }
        }
        BlendMode::Lighten => {
            if s < d {
                1.0
            } else {
                0.0
            }
        }
        BlendMode::ColorDodge => {
            if d < BLEND_EPSILON || 1.0 - s < BLEND_EPSILON || d / (1.0 - s) > 1.0 {
                0.0
            } else {
                1.0 / (1.0 - s)
            }
        }
        BlendMode::ColorBurn => {
            if 1.0 - d < BLEND_EPSILON || s < BLEND_EPSILON || (1.0 - d) / s > 1.0 {
                0.0
            } else {
                1.0 / s
            }
        }
        BlendMode::HardLight => {
            if s <= 0.5 {
                2.0 * s
            } else {
                2.0 * (1.0 - s)
            }
        }
        BlendMode::SoftLight => {
            if s <= 0.5 {
                2.0 * s + 2.0 * d - 4.0 * s * d
            } else {
                1.0 + (2.0 * s - 1.0) * (soft_light_aux_grad(d) - 1.0)
            }
        }
        BlendMode::Difference => {
            if s < d {
                1.0
            } else {
                -1.0
            }
        }
        BlendMode::Exclusion => 1.0 - 2.0 * s,
        BlendMode::LinearDodge => {
            if crop && s + d > 1.0 {
                0.0
            } else {
                1.0
            }
        }
    }
}

/// Applies a blend mode channel-wise to two colors.
pub fn blend_vec3(s: &Vec3, d: &Vec3, mode: BlendMode, crop: bool) -> Vec3 {
    // Blend functions are channel-separable.
    Vec3::new(
        blend(s[0], d[0], mode, crop),
        blend(s[1], d[1], mode, crop),
        blend(s[2], d[2], mode, crop),
    )
}

// Piecewise helper from the SoftLight definition (W3C compositing spec).
fn soft_light_aux(d: f64) -> f64 {
    if d <= 0.25 {
        ((16.0 * d - 12.0) * d + 4.0) * d
    } else {
        d.sqrt()
    }
}

fn soft_light_aux_grad(d: f64) -> f64 {
    if d <= 0.25 {
        48.0 * d * d - 24.0 * d + 4.0
    } else {
        1.0 / (2.0 * d.sqrt())
    }
}
