//! Fill vector generation.
//!
//! Slicing treats the fill strategy as a black box behind [`Hatcher`]. The
//! bundled [`ScanlineHatcher`] fills with parallel scan lines.

use nalgebra::{Point2, Rotation2};

use crate::config::HatchConfig;
use crate::{Contour, Segment};

/// Per-layer input handed to a hatcher alongside the contours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HatchContext {
    /// 1-based layer index.
    pub layer_index: usize,
    /// Scan direction in degrees, counter-clockwise from +X.
    pub angle: f64,
}

/// Turns the closed boundary of a layer into fill vectors.
///
/// Returned segments must lie inside the boundary under the even-odd rule.
pub trait Hatcher: Send + Sync {
    fn hatch(&self, contours: &[Contour], context: &HatchContext) -> Vec<Segment>;
}

/// Parallel scan lines with alternating direction.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanlineHatcher {
    /// Distance between neighbouring scan lines (mm).
    pub hatch_distance: f64,
    /// Each vector is shortened by this much at both ends (mm).
    pub spot_compensation: f64,
    /// Vectors are cut at multiples of this length; 0 keeps them whole (mm).
    pub stripe_width: f64,
}

impl From<&HatchConfig> for ScanlineHatcher {
    fn from(config: &HatchConfig) -> Self {
        Self {
            hatch_distance: config.hatch_distance,
            spot_compensation: config.spot_compensation,
            stripe_width: config.stripe_width,
        }
    }
}

impl Default for ScanlineHatcher {
    fn default() -> Self {
        Self::from(&HatchConfig::default())
    }
}

impl Hatcher for ScanlineHatcher {
    fn hatch(&self, contours: &[Contour], context: &HatchContext) -> Vec<Segment> {
        if contours.is_empty() || self.hatch_distance <= 0.0 {
            return Vec::new();
        }

        // Work in a frame where scan lines run along X
        let to_scan = Rotation2::new(-context.angle.to_radians());
        let from_scan = to_scan.inverse();
        let rings: Vec<Vec<Point2<f64>>> = contours
            .iter()
            .map(|c| c.points.iter().map(|p| to_scan * p).collect())
            .collect();

        let (min_y, max_y) = rings
            .iter()
            .flatten()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.y), hi.max(p.y))
            });
        if min_y >= max_y {
            return Vec::new();
        }

        let d = self.hatch_distance;
        let first = (min_y / d).floor() as i64;
        let last = (max_y / d).ceil() as i64;

        let mut fill = Vec::new();
        let mut line_number = 0usize;
        for k in first..=last {
            let y = (k as f64 + 0.5) * d;
            if y <= min_y || y >= max_y {
                continue;
            }
            let mut pieces = Vec::new();
            for (x0, x1) in self.intervals(&rings, y) {
                self.split_stripes(x0, x1, &mut pieces);
            }
            if pieces.is_empty() {
                continue;
            }
            let reverse = line_number % 2 == 1;
            if reverse {
                pieces.reverse();
            }
            for (x0, x1) in pieces {
                let (a, b) = if reverse { (x1, x0) } else { (x0, x1) };
                fill.push(Segment::new(
                    from_scan * Point2::new(a, y),
                    from_scan * Point2::new(b, y),
                ));
            }
            line_number += 1;
        }
        fill
    }
}

impl ScanlineHatcher {
    /// Inside intervals of the horizontal line at `y`, shortened by the spot
    /// compensation.
    fn intervals(&self, rings: &[Vec<Point2<f64>>], y: f64) -> Vec<(f64, f64)> {
        let mut xs = Vec::new();
        for ring in rings {
            let n = ring.len();
            if n < 3 {
                continue;
            }
            for i in 0..n {
                let a = ring[i];
                let b = ring[(i + 1) % n];
                if (a.y > y) != (b.y > y) {
                    xs.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
                }
            }
        }
        xs.sort_by(f64::total_cmp);

        xs.chunks_exact(2)
            .filter_map(|pair| {
                let x0 = pair[0] + self.spot_compensation;
                let x1 = pair[1] - self.spot_compensation;
                (x1 > x0).then_some((x0, x1))
            })
            .collect()
    }

    fn split_stripes(&self, x0: f64, x1: f64, out: &mut Vec<(f64, f64)>) {
        if self.stripe_width <= 0.0 {
            out.push((x0, x1));
            return;
        }
        let w = self.stripe_width;
        let mut start = x0;
        let mut boundary = ((x0 / w).floor() + 1.0) * w;
        while boundary < x1 {
            if boundary > start {
                out.push((start, boundary));
            }
            start = boundary;
            boundary += w;
        }
        out.push((start, x1));
    }
}
