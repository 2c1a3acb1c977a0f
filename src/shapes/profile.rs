//! Shape profile generation
//!
//! Maps a named shape family to a deterministic sequence of per-layer
//! magnitudes. The same generator produces layer widths (scaled by
//! `max_units`) and dropout profiles (scaled by the caller afterwards).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AutomlError;

/// Shape families for per-layer magnitude profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeFamily {
    /// Monotonic descent from the peak toward the end value
    Funnel,
    /// Plateau at the peak, then a funnel
    LongFunnel,
    /// Rise to a midpoint peak, then fall
    Diamond,
    /// Rise, plateau, fall
    Hexagon,
    /// Constant at the peak value
    Brick,
    /// Linear ascent to a single peak at the last position
    Triangle,
    /// Stepwise-constant descending treads
    Stairs,
}

impl ShapeFamily {
    /// All supported families, in the order the search space declares them.
    pub const ALL: [ShapeFamily; 7] = [
        ShapeFamily::Funnel,
        ShapeFamily::LongFunnel,
        ShapeFamily::Diamond,
        ShapeFamily::Hexagon,
        ShapeFamily::Brick,
        ShapeFamily::Triangle,
        ShapeFamily::Stairs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeFamily::Funnel => "funnel",
            ShapeFamily::LongFunnel => "long_funnel",
            ShapeFamily::Diamond => "diamond",
            ShapeFamily::Hexagon => "hexagon",
            ShapeFamily::Brick => "brick",
            ShapeFamily::Triangle => "triangle",
            ShapeFamily::Stairs => "stairs",
        }
    }
}

impl fmt::Display for ShapeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShapeFamily {
    type Err = AutomlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "funnel" => Ok(ShapeFamily::Funnel),
            "long_funnel" => Ok(ShapeFamily::LongFunnel),
            "diamond" => Ok(ShapeFamily::Diamond),
            "hexagon" => Ok(ShapeFamily::Hexagon),
            "brick" => Ok(ShapeFamily::Brick),
            "triangle" => Ok(ShapeFamily::Triangle),
            "stairs" => Ok(ShapeFamily::Stairs),
            other => Err(AutomlError::unsupported("shape", other)),
        }
    }
}

/// A single shape expansion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeSpec {
    pub family: ShapeFamily,
    /// Magnitude anchoring the start of ascending segments
    pub start_value: f64,
    /// Magnitude the descending segments head toward
    pub end_value: f64,
    /// Peak (and brick) magnitude
    pub scale: f64,
    pub num_points: usize,
}

impl ShapeSpec {
    pub fn new(
        family: ShapeFamily,
        start_value: f64,
        end_value: f64,
        scale: f64,
        num_points: usize,
    ) -> Self {
        Self {
            family,
            start_value,
            end_value,
            scale,
            num_points,
        }
    }

    /// Generate the magnitude sequence for this spec.
    pub fn magnitudes(&self) -> Vec<f64> {
        shaped_magnitudes(
            self.family,
            self.start_value,
            self.end_value,
            self.scale,
            self.num_points,
        )
    }
}

/// Generate `n` non-negative magnitudes following the named shape profile.
///
/// Deterministic and side-effect free: identical inputs always produce an
/// identical sequence. `n == 0` yields an empty sequence; `n == 1` yields
/// the single peak value.
pub fn shaped_magnitudes(
    family: ShapeFamily,
    start: f64,
    end: f64,
    scale: f64,
    n: usize,
) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![scale.max(0.0)];
    }

    let seq = match family {
        ShapeFamily::Brick => vec![scale; n],
        ShapeFamily::Funnel => ramp(scale, end, n),
        ShapeFamily::LongFunnel => {
            let plateau = n / 2;
            let mut out = vec![scale; plateau];
            out.extend(ramp(scale, end, n - plateau));
            out
        }
        ShapeFamily::Triangle => ramp(start, scale, n),
        ShapeFamily::Diamond => {
            // piecewise linear through (0, start), (mid, scale), (n-1, end)
            let mid = (n - 1) as f64 / 2.0;
            (0..n)
                .map(|i| {
                    let i = i as f64;
                    if i <= mid {
                        start + (scale - start) * i / mid
                    } else {
                        scale + (end - scale) * (i - mid) / ((n - 1) as f64 - mid)
                    }
                })
                .collect()
        }
        ShapeFamily::Hexagon => {
            let rise = (n / 3).max(1);
            let fall = (n / 3).max(1);
            let plateau = n.saturating_sub(rise + fall);
            let mut out = ramp(start, scale, rise);
            out.extend(std::iter::repeat(scale).take(plateau));
            out.extend(ramp(scale, end, fall));
            out.truncate(n);
            out
        }
        ShapeFamily::Stairs => {
            let levels = (n + 1) / 2;
            let drop = if levels > 1 {
                (scale - end) / levels as f64
            } else {
                0.0
            };
            let mut out = Vec::with_capacity(n);
            let mut level = scale;
            // an odd count gets one extra leading tread at the peak
            if n % 2 == 1 {
                out.push(level);
            }
            for _ in 0..n / 2 {
                out.push(level);
                out.push(level);
                level -= drop;
            }
            out
        }
    };

    seq.into_iter().map(|v| v.max(0.0)).collect()
}

/// `n` points linearly interpolated from `from` to `to`, endpoints inclusive.
fn ramp(from: f64, to: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![to],
        _ => (0..n)
            .map(|i| from + (to - from) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_exact_for_all_families() {
        for family in ShapeFamily::ALL {
            for n in [0usize, 1, 2, 3, 5, 8, 11] {
                let seq = shaped_magnitudes(family, 10.0, 2.0, 64.0, n);
                assert_eq!(seq.len(), n, "family {} n {}", family, n);
            }
        }
    }

    #[test]
    fn test_single_point_is_scale() {
        for family in ShapeFamily::ALL {
            let seq = shaped_magnitudes(family, 10.0, 2.0, 64.0, 1);
            assert_eq!(seq, vec![64.0]);
        }
    }

    #[test]
    fn test_empty_sequence() {
        assert!(shaped_magnitudes(ShapeFamily::Funnel, 10.0, 2.0, 64.0, 0).is_empty());
    }

    #[test]
    fn test_brick_constant() {
        let seq = shaped_magnitudes(ShapeFamily::Brick, 7.0, 3.0, 64.0, 6);
        assert!(seq.iter().all(|&v| v == 64.0));
    }

    #[test]
    fn test_funnel_descends_from_scale_to_end() {
        let seq = shaped_magnitudes(ShapeFamily::Funnel, 10.0, 2.0, 64.0, 5);
        assert_eq!(seq[0], 64.0);
        assert_eq!(seq[4], 2.0);
        for w in seq.windows(2) {
            assert!(w[1] <= w[0], "funnel must be non-increasing: {:?}", seq);
        }
    }

    #[test]
    fn test_long_funnel_plateau_then_descent() {
        let seq = shaped_magnitudes(ShapeFamily::LongFunnel, 10.0, 2.0, 64.0, 8);
        assert!(seq[..4].iter().all(|&v| v == 64.0));
        assert_eq!(*seq.last().unwrap(), 2.0);
        for w in seq.windows(2) {
            assert!(w[1] <= w[0]);
        }
    }

    #[test]
    fn test_triangle_peaks_last() {
        let seq = shaped_magnitudes(ShapeFamily::Triangle, 10.0, 2.0, 64.0, 5);
        assert_eq!(seq[0], 10.0);
        assert_eq!(seq[4], 64.0);
        for w in seq.windows(2) {
            assert!(w[1] >= w[0]);
        }
    }

    #[test]
    fn test_diamond_peaks_at_midpoint() {
        let seq = shaped_magnitudes(ShapeFamily::Diamond, 10.0, 2.0, 64.0, 5);
        assert_eq!(seq[2], 64.0);
        assert!(seq[0] < seq[2] && seq[4] < seq[2]);
        assert!(seq.iter().all(|&v| v <= 64.0));
    }

    #[test]
    fn test_hexagon_rise_plateau_fall() {
        let seq = shaped_magnitudes(ShapeFamily::Hexagon, 10.0, 2.0, 64.0, 6);
        assert_eq!(seq.len(), 6);
        assert!(seq[2] == 64.0 && seq[3] == 64.0);
        assert!(seq[0] <= seq[2]);
        assert!(*seq.last().unwrap() <= 64.0);
    }

    #[test]
    fn test_stairs_descending_pairs() {
        let seq = shaped_magnitudes(ShapeFamily::Stairs, 10.0, 2.0, 64.0, 6);
        assert_eq!(seq[0], seq[1]);
        assert_eq!(seq[2], seq[3]);
        assert_eq!(seq[4], seq[5]);
        assert!(seq[2] < seq[0] && seq[4] < seq[2]);

        // odd counts get a leading tread at the peak
        let odd = shaped_magnitudes(ShapeFamily::Stairs, 10.0, 2.0, 64.0, 5);
        assert_eq!(odd[0], 64.0);
        assert_eq!(odd[1], odd[2]);
    }

    #[test]
    fn test_non_negative_output() {
        for family in ShapeFamily::ALL {
            let seq = shaped_magnitudes(family, 0.0, 0.0, 1000.0, 7);
            assert!(seq.iter().all(|&v| v >= 0.0), "family {}", family);
        }
    }

    #[test]
    fn test_deterministic() {
        for family in ShapeFamily::ALL {
            let a = shaped_magnitudes(family, 10.0, 2.0, 64.0, 9);
            let b = shaped_magnitudes(family, 10.0, 2.0, 64.0, 9);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_family_round_trip() {
        for family in ShapeFamily::ALL {
            assert_eq!(family.as_str().parse::<ShapeFamily>().unwrap(), family);
        }
        assert!("pyramid".parse::<ShapeFamily>().is_err());
    }
}
