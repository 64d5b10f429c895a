//! Property-based tests for layer cleanup and machine records.
//!
//! Run with: cargo test -p slm-prep --test proptest_simplify

use std::path::Path;

use nalgebra::{Point2, Vector2};
use proptest::prelude::*;
use slm_prep::{LayerBounds, Segment, SimplifyParams, encode, parse_machine_record, simplify};

// =============================================================================
// Strategies
// =============================================================================

/// Segments between integer lattice points, so collinearity is exact.
fn arb_lattice_segment() -> impl Strategy<Value = Segment> {
    (0i32..12, 0i32..12, 0i32..12, 0i32..12)
        .prop_map(|(x1, y1, x2, y2)| Segment::from_coords(x1 as f64, y1 as f64, x2 as f64, y2 as f64))
}

fn arb_lattice_layer() -> impl Strategy<Value = Vec<Segment>> {
    prop::collection::vec(arb_lattice_segment(), 0..40)
}

/// Overlapping segments along one line at an arbitrary angle, shuffled and
/// in mixed directions. Returns the segments and the length of their union.
fn arb_collinear_run() -> impl Strategy<Value = (Vec<Segment>, f64)> {
    (
        0.0f64..std::f64::consts::TAU,
        -50.0f64..50.0,
        -50.0f64..50.0,
        prop::collection::vec((0.0f64..1.0, 1.0f64..1.5, any::<bool>(), any::<u32>()), 2..6),
    )
        .prop_map(|(angle, ox, oy, pieces)| {
            let origin = Point2::new(ox, oy);
            let dir = Vector2::new(angle.cos(), angle.sin());
            let mut reach = 0.0f64;
            let mut keyed: Vec<(u32, Segment)> = Vec::with_capacity(pieces.len());
            for (k, (frac, len, reversed, key)) in pieces.into_iter().enumerate() {
                // Each piece starts inside what is already covered
                let lo = if k == 0 { 0.0 } else { frac * (reach - 0.01) };
                let hi = lo + len;
                reach = reach.max(hi);
                let s = Segment::new(origin + dir * lo, origin + dir * hi);
                keyed.push((key, if reversed { s.reversed() } else { s }));
            }
            keyed.sort_by_key(|(key, _)| *key);
            (keyed.into_iter().map(|(_, s)| s).collect(), reach)
        })
}

/// Collinear runs at arbitrary angles, stray segments, and coordinate noise
/// slightly larger than the snap grid.
fn arb_noisy_layer() -> impl Strategy<Value = Vec<Segment>> {
    (
        prop::collection::vec(arb_collinear_run(), 0..4),
        prop::collection::vec(
            (-20.0f64..20.0, -20.0f64..20.0, -20.0f64..20.0, -20.0f64..20.0),
            0..10,
        ),
        prop::collection::vec(-1.5e-6f64..1.5e-6, 64),
    )
        .prop_map(|(runs, stray, noise)| {
            let mut layer: Vec<Segment> = runs.into_iter().flat_map(|(run, _)| run).collect();
            layer.extend(stray.into_iter().map(|(x1, y1, x2, y2)| Segment::from_coords(x1, y1, x2, y2)));
            for (k, s) in layer.iter_mut().enumerate() {
                let n = |i: usize| noise[(4 * k + i) % noise.len()];
                *s = Segment::from_coords(s.start.x + n(0), s.start.y + n(1), s.end.x + n(2), s.end.y + n(3));
            }
            layer
        })
}

fn arb_segment() -> impl Strategy<Value = Segment> {
    (
        -1000.0f64..1000.0,
        -1000.0f64..1000.0,
        -1000.0f64..1000.0,
        -1000.0f64..1000.0,
    )
        .prop_map(|(x1, y1, x2, y2)| Segment::from_coords(x1, y1, x2, y2))
}

// =============================================================================
// Cleanup properties
// =============================================================================

proptest! {
    #[test]
    fn simplify_is_idempotent(layer in arb_lattice_layer()) {
        let params = SimplifyParams::default();
        let once = simplify(&layer, &params);
        let twice = simplify(&once, &params);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn simplify_never_grows_and_drops_degenerate(layer in arb_lattice_layer()) {
        let out = simplify(&layer, &SimplifyParams::default());
        prop_assert!(out.len() <= layer.len());
        for s in &out {
            prop_assert!(s.length() > 0.0);
        }
        if layer.iter().all(|s| s.start == s.end) {
            prop_assert!(out.is_empty());
        }
    }

    #[test]
    fn simplify_is_idempotent_off_lattice(layer in arb_noisy_layer()) {
        let params = SimplifyParams::default();
        let once = simplify(&layer, &params);
        prop_assert!(once.len() <= layer.len());
        prop_assert_eq!(simplify(&once, &params), once);
    }

    #[test]
    fn overlapping_run_at_any_angle_becomes_one((run, reach) in arb_collinear_run()) {
        let out = simplify(&run, &SimplifyParams::default());
        prop_assert_eq!(out.len(), 1);
        prop_assert!((out[0].length() - reach).abs() < 1e-5);
    }

    #[test]
    fn simplify_keeps_extent(layer in arb_lattice_layer()) {
        let input: Vec<Segment> = layer.iter().copied().filter(|s| s.start != s.end).collect();
        let out = simplify(&layer, &SimplifyParams::default());
        let before = LayerBounds::of_segments(&input);
        let after = LayerBounds::of_segments(&out);
        prop_assert_eq!(before.is_empty(), after.is_empty());
        if !before.is_empty() {
            prop_assert!((before.min_x - after.min_x).abs() < 1e-9);
            prop_assert!((before.max_x - after.max_x).abs() < 1e-9);
            prop_assert!((before.min_y - after.min_y).abs() < 1e-9);
            prop_assert!((before.max_y - after.max_y).abs() < 1e-9);
        }
    }
}

// =============================================================================
// Machine record properties
// =============================================================================

proptest! {
    #[test]
    fn machine_record_round_trips_within_precision(
        segments in prop::collection::vec(arb_segment(), 0..30),
        precision in 1usize..=6,
    ) {
        let text = encode(&segments, precision);
        prop_assert_eq!(text.lines().count(), segments.len());

        let parsed = parse_machine_record(&text, Path::new("layer.txt")).unwrap();
        prop_assert_eq!(parsed.len(), segments.len());
        let tolerance = 10f64.powi(-(precision as i32));
        for (a, b) in segments.iter().zip(&parsed) {
            prop_assert!((a.start - b.start).abs().max() <= tolerance);
            prop_assert!((a.end - b.end).abs().max() <= tolerance);
        }
    }
}
