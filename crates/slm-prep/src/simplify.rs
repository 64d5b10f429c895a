//! Layer cleanup.
//!
//! Every line-like entity of a layer file is reduced to straight segments,
//! snapped to an `epsilon` grid, and segments lying on a common line are
//! merged wherever they overlap or touch. Merged segments keep the position
//! and direction of their earliest source segment, so output order follows
//! input order and running the cleanup twice changes nothing.

use std::path::Path;

use hashbrown::HashMap;
use nalgebra::{Point2, Vector2};
use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use crate::config::SimplifyConfig;
use crate::dxf::{DxfEntity, PolyVertex, read_layer_file, write_segments_file};
use crate::error::{BatchReport, LayerIssue, PrepError, PrepResult};
use crate::extrude::extrude_region;
use crate::layers::{LayerSet, LayerSetKind};
use crate::slice::chain_segments;
use crate::tracing_ext::{OperationTimer, log_layer_set_written};
use crate::{Contour, Mesh, Segment};

/// Width of the direction buckets used to find lines to merge with (radians).
const ANGLE_BUCKET: f64 = 1e-4;
/// Width of the offset buckets used to find lines to merge with (mm).
const OFFSET_BUCKET: f64 = 1e-2;
/// Widest direction search for a short segment, in buckets each way.
const MAX_ANGLE_WINDOW: i64 = 32;
/// Cap on the collinearity tolerance, in multiples of epsilon.
const MAX_SPREAD: f64 = 16.0;
/// Bulges below this are straight edges.
const STRAIGHT_BULGE: f64 = 1e-12;

/// Tolerances of the cleanup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplifyParams {
    /// Snap grid (mm). A segment lies on a line when it is within the
    /// snapping error of it, a small multiple of this.
    pub epsilon: f64,
    /// Largest chord height when turning curves into segments (mm).
    pub arc_tolerance: f64,
}

impl From<&SimplifyConfig> for SimplifyParams {
    fn from(config: &SimplifyConfig) -> Self {
        Self {
            epsilon: config.epsilon,
            arc_tolerance: config.arc_tolerance,
        }
    }
}

impl Default for SimplifyParams {
    fn default() -> Self {
        Self::from(&SimplifyConfig::default())
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Turn every entity into straight segments, linearizing curves.
pub fn extract_segments(entities: &[DxfEntity], arc_tolerance: f64) -> Vec<Segment> {
    let mut segments = Vec::new();
    for entity in entities {
        match entity {
            DxfEntity::Line { start, end } => segments.push(Segment::new(*start, *end)),
            DxfEntity::Polyline { vertices, closed } => {
                polyline_segments(vertices, *closed, arc_tolerance, &mut segments)
            }
            DxfEntity::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => {
                let mut sweep = (end_angle - start_angle).rem_euclid(360.0);
                if sweep == 0.0 {
                    sweep = 360.0;
                }
                let points = arc_points(
                    center,
                    *radius,
                    start_angle.to_radians(),
                    sweep.to_radians(),
                    arc_tolerance,
                );
                push_path(&points, &mut segments);
            }
            DxfEntity::Circle { center, radius } => {
                let points = arc_points(center, *radius, 0.0, std::f64::consts::TAU, arc_tolerance);
                push_path(&points, &mut segments);
            }
        }
    }
    segments
}

fn polyline_segments(vertices: &[PolyVertex], closed: bool, tolerance: f64, out: &mut Vec<Segment>) {
    let n = vertices.len();
    if n < 2 {
        return;
    }
    let mut edges: Vec<(usize, usize)> = (0..n - 1).map(|i| (i, i + 1)).collect();
    // A closed two-vertex polyline only has a distinct closing edge when it bulges
    if closed && (n > 2 || vertices[n - 1].bulge.abs() > STRAIGHT_BULGE) {
        edges.push((n - 1, 0));
    }

    for (i, j) in edges {
        let from = vertices[i].point;
        let to = vertices[j].point;
        let bulge = vertices[i].bulge;
        if bulge.abs() <= STRAIGHT_BULGE {
            out.push(Segment::new(from, to));
        } else {
            push_path(&bulge_points(from, to, bulge, tolerance), out);
        }
    }
}

fn push_path(points: &[Point2<f64>], out: &mut Vec<Segment>) {
    out.extend(points.windows(2).map(|w| Segment::new(w[0], w[1])));
}

/// Number of chords needed so that no chord strays more than `tolerance`
/// from an arc of the given radius and sweep.
fn chord_count(radius: f64, sweep: f64, tolerance: f64) -> usize {
    let step = 2.0 * (1.0 - tolerance / radius).clamp(-1.0, 1.0).acos();
    if step <= 0.0 {
        return 1;
    }
    (sweep.abs() / step).ceil().max(1.0) as usize
}

/// Points along a counter-clockwise (positive `sweep`) or clockwise arc.
fn arc_points(
    center: &Point2<f64>,
    radius: f64,
    start: f64,
    sweep: f64,
    tolerance: f64,
) -> Vec<Point2<f64>> {
    if radius <= 0.0 {
        return Vec::new();
    }
    let mut n = chord_count(radius, sweep, tolerance);
    if (sweep.abs() - std::f64::consts::TAU).abs() < 1e-12 {
        n = n.max(3);
    }
    (0..=n)
        .map(|k| {
            let a = start + sweep * k as f64 / n as f64;
            Point2::new(center.x + radius * a.cos(), center.y + radius * a.sin())
        })
        .collect()
}

/// Points along a bulged polyline edge, ending exactly at `to`.
fn bulge_points(from: Point2<f64>, to: Point2<f64>, bulge: f64, tolerance: f64) -> Vec<Point2<f64>> {
    let chord = to - from;
    let c = chord.norm();
    if c == 0.0 {
        return vec![from, to];
    }
    let theta = 4.0 * bulge.atan();
    let radius = c / (2.0 * (theta / 2.0).sin().abs());
    let left = Vector2::new(-chord.y, chord.x) / c;
    let mid = Point2::from((from.coords + to.coords) * 0.5);
    let center = mid + left * (c / 2.0) / (theta / 2.0).tan();
    let start = (from.y - center.y).atan2(from.x - center.x);

    let mut points = arc_points(&center, radius, start, theta, tolerance);
    if let Some(first) = points.first_mut() {
        *first = from;
    }
    if let Some(last) = points.last_mut() {
        *last = to;
    }
    points
}

// ============================================================================
// Reduction
// ============================================================================

/// A line that segments are merged onto, defined by its longest member.
struct Carrier {
    origin: Point2<f64>,
    dir: Vector2<f64>,
    length: f64,
    members: Vec<usize>,
}

impl Carrier {
    fn new(s: &Segment, member: usize) -> Self {
        let length = s.length();
        Self {
            origin: s.start,
            dir: s.direction() / length,
            length,
            members: vec![member],
        }
    }

    fn param(&self, p: &Point2<f64>) -> f64 {
        self.dir.dot(&(p - self.origin))
    }

    /// Whether `p` lies on the line within the snapping error of `p` and of
    /// the two points defining the line. That error grows linearly with the
    /// distance from the defining segment.
    fn holds(&self, p: &Point2<f64>, eps: f64) -> bool {
        let d = p - self.origin;
        let t = self.dir.dot(&d) / self.length;
        let spread = (1.0 + t.abs() + (t - 1.0).abs()).min(MAX_SPREAD);
        self.dir.perp(&d).abs() <= eps * spread
    }
}

/// Direction angle in [0, pi) and signed offset of the line through a segment.
fn line_key(s: &Segment) -> (f64, f64) {
    let d = s.direction();
    let mut angle = d.y.atan2(d.x);
    if angle < 0.0 {
        angle += std::f64::consts::PI;
    }
    if angle >= std::f64::consts::PI {
        angle -= std::f64::consts::PI;
    }
    (angle, normal_offset(angle, &s.start))
}

fn normal_offset(angle: f64, p: &Point2<f64>) -> f64 {
    -angle.sin() * p.x + angle.cos() * p.y
}

fn snap(value: f64, epsilon: f64) -> f64 {
    (value / epsilon).round() * epsilon
}

/// Carriers bucketed by direction and offset.
struct LineIndex {
    eps: f64,
    angle_buckets: i64,
    carriers: Vec<Carrier>,
    lookup: HashMap<(i64, i64), Vec<usize>>,
}

impl LineIndex {
    fn new(eps: f64) -> Self {
        Self {
            eps,
            angle_buckets: (std::f64::consts::PI / ANGLE_BUCKET).ceil() as i64,
            carriers: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Earliest carrier `s` lies on. Carriers are never shorter than `s`.
    fn find(&self, s: &Segment) -> Option<usize> {
        let (angle, _) = line_key(s);
        let a = (angle / ANGLE_BUCKET).floor() as i64;
        // Short segments have a loose direction, so search more buckets
        let spread = 2.0 * MAX_SPREAD * self.eps / s.length() / ANGLE_BUCKET;
        let window = spread.ceil().min(MAX_ANGLE_WINDOW as f64) as i64 + 1;

        let mut found: Option<usize> = None;
        for b in a - window..=a + window {
            // Crossing the 0/pi seam flips the line normal, and with it the offset
            let (bucket, sign) = if b < 0 {
                (b + self.angle_buckets, -1.0)
            } else if b >= self.angle_buckets {
                (b - self.angle_buckets, -1.0)
            } else {
                (b, 1.0)
            };
            let lo = sign * normal_offset(b as f64 * ANGLE_BUCKET, &s.start);
            let hi = sign * normal_offset((b + 1) as f64 * ANGLE_BUCKET, &s.start);
            let first = (lo.min(hi) / OFFSET_BUCKET).floor() as i64 - 1;
            let last = (lo.max(hi) / OFFSET_BUCKET).floor() as i64 + 1;

            for o in first..=last {
                let Some(ids) = self.lookup.get(&(bucket, o)) else {
                    continue;
                };
                for &cid in ids {
                    if found.is_some_and(|f| f <= cid) {
                        continue;
                    }
                    let carrier = &self.carriers[cid];
                    if carrier.holds(&s.start, self.eps) && carrier.holds(&s.end, self.eps) {
                        found = Some(cid);
                    }
                }
            }
        }
        found
    }

    fn insert(&mut self, s: &Segment, member: usize) {
        let (angle, offset) = line_key(s);
        let key = (
            (angle / ANGLE_BUCKET).floor() as i64,
            (offset / OFFSET_BUCKET).floor() as i64,
        );
        self.lookup.entry(key).or_default().push(self.carriers.len());
        self.carriers.push(Carrier::new(s, member));
    }
}

/// Reduce segments to the fewest that trace the same lines.
///
/// Merging repeats until a pass merges nothing, so the result is a fixed
/// point: simplifying it again returns it unchanged. Empty input gives
/// empty output.
pub fn simplify(segments: &[Segment], params: &SimplifyParams) -> Vec<Segment> {
    let eps = params.epsilon;
    let mut current: Vec<Segment> = segments
        .iter()
        .map(|s| {
            Segment::from_coords(
                snap(s.start.x, eps),
                snap(s.start.y, eps),
                snap(s.end.x, eps),
                snap(s.end.y, eps),
            )
        })
        .filter(|s| s.start != s.end)
        .collect();

    let mut passes = 0;
    loop {
        passes += 1;
        let next = merge_collinear(&current, eps);
        // A pass that merges nothing returns its input as is
        if next.len() == current.len() {
            trace!(passes, segments = next.len(), "Simplify reached a fixed point");
            return next;
        }
        current = next;
    }
}

/// One merging pass over snapped, non-degenerate segments.
fn merge_collinear(segments: &[Segment], eps: f64) -> Vec<Segment> {
    // Longest first, so each line is defined by its most precise segment
    let mut order: Vec<usize> = (0..segments.len()).collect();
    order.sort_by(|&i, &j| {
        segments[j]
            .length()
            .total_cmp(&segments[i].length())
            .then(i.cmp(&j))
    });

    let mut index = LineIndex::new(eps);
    for idx in order {
        let s = &segments[idx];
        match index.find(s) {
            Some(cid) => index.carriers[cid].members.push(idx),
            None => index.insert(s, idx),
        }
    }

    // (earliest member, segment) for every merged run
    let mut merged: Vec<(usize, Segment)> = Vec::new();
    for carrier in &index.carriers {
        let mut spans: Vec<Span> = carrier
            .members
            .iter()
            .map(|&m| {
                let s = &segments[m];
                let (ts, te) = (carrier.param(&s.start), carrier.param(&s.end));
                if ts <= te {
                    Span::new(m, ts, s.start, te, s.end, true)
                } else {
                    Span::new(m, te, s.end, ts, s.start, false)
                }
            })
            .collect();
        spans.sort_by(|a, b| a.lo.total_cmp(&b.lo).then(a.first.cmp(&b.first)));

        let mut current: Option<Span> = None;
        for span in spans {
            current = Some(match current {
                Some(mut run) if span.lo <= run.hi + eps => {
                    if span.hi > run.hi {
                        run.hi = span.hi;
                        run.hi_point = span.hi_point;
                    }
                    if span.first < run.first {
                        run.first = span.first;
                        run.forward = span.forward;
                    }
                    run
                }
                Some(run) => {
                    merged.push(run.into_segment());
                    span
                }
                None => span,
            });
        }
        if let Some(run) = current {
            merged.push(run.into_segment());
        }
    }

    merged.sort_by_key(|(first, _)| *first);
    merged.into_iter().map(|(_, s)| s).collect()
}

/// A segment or merged run as an interval along its carrier.
#[derive(Debug, Clone, Copy)]
struct Span {
    first: usize,
    lo: f64,
    lo_point: Point2<f64>,
    hi: f64,
    hi_point: Point2<f64>,
    /// Whether the earliest member runs from `lo` towards `hi`.
    forward: bool,
}

impl Span {
    fn new(
        first: usize,
        lo: f64,
        lo_point: Point2<f64>,
        hi: f64,
        hi_point: Point2<f64>,
        forward: bool,
    ) -> Self {
        Self {
            first,
            lo,
            lo_point,
            hi,
            hi_point,
            forward,
        }
    }

    fn into_segment(self) -> (usize, Segment) {
        let segment = if self.forward {
            Segment::new(self.lo_point, self.hi_point)
        } else {
            Segment::new(self.hi_point, self.lo_point)
        };
        (self.first, segment)
    }
}

/// Extract and reduce the geometry of one layer.
pub fn simplify_entities(entities: &[DxfEntity], params: &SimplifyParams) -> Vec<Segment> {
    simplify(&extract_segments(entities, params.arc_tolerance), params)
}

/// Clean one layer file into `output`, returning the reduced segments.
pub fn clean_layer_file(input: &Path, output: &Path, params: &SimplifyParams) -> PrepResult<Vec<Segment>> {
    let entities = read_layer_file(input)?;
    let segments = simplify_entities(&entities, params);
    write_segments_file(&segments, output)?;
    Ok(segments)
}

// ============================================================================
// Layer sets
// ============================================================================

/// Result of cleaning a whole layer set.
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub set: LayerSet,
    /// Cleaned segments with the plane height of their layer, in index order.
    /// Layers that failed to parse are absent.
    pub layers: Vec<(f64, Vec<Segment>)>,
    pub report: BatchReport,
}

/// Clean every layer of a raw set into a new clean set in `out_dir`.
///
/// A layer file that fails to parse is reported and skipped; the rest of the
/// batch still runs.
pub fn clean_layer_set(raw: &LayerSet, out_dir: &Path, config: &SimplifyConfig) -> PrepResult<CleanOutcome> {
    if raw.kind() != LayerSetKind::Raw {
        return Err(PrepError::StageMismatch {
            expected: LayerSetKind::Raw.to_string(),
            found: raw.kind().to_string(),
            dir: raw.dir.clone(),
        });
    }
    let _timer = OperationTimer::with_items("clean", raw.len());
    let params = SimplifyParams::from(config);
    let mut clean = LayerSet::create(
        out_dir,
        LayerSetKind::Clean,
        raw.model(),
        raw.manifest.layer_thickness,
    )?;

    let results: Vec<_> = raw
        .entries()
        .par_iter()
        .map(|entry| {
            let input = raw.path_of(entry);
            let output = clean.layer_path(entry.index, "dxf");
            (entry, clean_layer_file(&input, &output, &params))
        })
        .collect();

    let mut report = BatchReport::new();
    let mut layers = Vec::with_capacity(results.len());
    for (entry, result) in results {
        match result {
            Ok(segments) => {
                if segments.is_empty() {
                    report.push(LayerIssue::EmptyLayer {
                        index: entry.index,
                        z: entry.z,
                    });
                }
                debug!(index = entry.index, segments = segments.len(), "Cleaned layer");
                clean.record(entry.index, entry.z, "dxf");
                layers.push((entry.z, segments));
            }
            Err(PrepError::MalformedLayerFile { path, details, line }) => {
                let details = match line {
                    Some(l) => format!("line {}: {}", l, details),
                    None => details,
                };
                report.push(LayerIssue::MalformedLayer {
                    index: entry.index,
                    path,
                    details,
                });
            }
            Err(e) => return Err(e),
        }
    }

    clean.save_manifest()?;
    log_layer_set_written("clean", &clean.dir, clean.len());
    report.log_summary("clean");
    info!(
        layers = clean.len(),
        segments = layers.iter().map(|(_, s)| s.len()).sum::<usize>(),
        "Cleanup complete"
    );
    Ok(CleanOutcome {
        set: clean,
        layers,
        report,
    })
}

// ============================================================================
// Preview
// ============================================================================

/// Stack cleaned layers into a solid for visual inspection.
///
/// Closed loops of each layer are nested by even-odd containment and
/// extruded from `z - layer_thickness` to `z`. Open geometry such as fill
/// vectors is ignored.
pub fn build_preview(layers: &[(f64, Vec<Segment>)], layer_thickness: f64, epsilon: f64) -> Mesh {
    let _timer = OperationTimer::with_items("preview", layers.len());
    let pieces: Vec<Mesh> = layers
        .par_iter()
        .map(|(z, segments)| layer_solid(segments, z - layer_thickness, *z, epsilon))
        .collect();

    let mut mesh = Mesh::new();
    for piece in &pieces {
        mesh.append(piece);
    }
    mesh
}

fn layer_solid(segments: &[Segment], z0: f64, z1: f64, epsilon: f64) -> Mesh {
    let loops: Vec<Contour> = chain_segments(segments, epsilon)
        .closed
        .into_iter()
        .filter(|points| points.len() >= 3)
        .map(Contour::new)
        .collect();

    let depth: Vec<usize> = loops
        .iter()
        .enumerate()
        .map(|(i, ring)| {
            loops
                .iter()
                .enumerate()
                .filter(|&(j, other)| j != i && other.contains(&ring.points[0]))
                .count()
        })
        .collect();

    let mut mesh = Mesh::new();
    for (i, outer) in loops.iter().enumerate() {
        if depth[i] % 2 == 1 {
            continue;
        }
        let holes: Vec<Contour> = loops
            .iter()
            .enumerate()
            .filter(|&(j, hole)| depth[j] == depth[i] + 1 && outer.contains(&hole.points[0]))
            .map(|(_, hole)| hole.clone())
            .collect();
        match extrude_region(outer, &holes, z0, z1) {
            Some(solid) => mesh.append(&solid),
            None => warn!(z = z1, "Could not triangulate a preview region"),
        }
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params() -> SimplifyParams {
        SimplifyParams::default()
    }

    #[test]
    fn test_empty_input() {
        assert!(simplify(&[], &params()).is_empty());
    }

    #[test]
    fn test_collinear_touching_segments_merge() {
        let input = [
            Segment::from_coords(0.0, 0.0, 1.0, 0.0),
            Segment::from_coords(1.0, 0.0, 2.5, 0.0),
        ];
        let out = simplify(&input, &params());
        assert_eq!(out, vec![Segment::from_coords(0.0, 0.0, 2.5, 0.0)]);
    }

    #[test]
    fn test_reversed_duplicate_and_overlap() {
        let input = [
            Segment::from_coords(5.0, 5.0, 1.0, 1.0),
            Segment::from_coords(1.0, 1.0, 5.0, 5.0),
            Segment::from_coords(4.0, 4.0, 7.0, 7.0),
        ];
        let out = simplify(&input, &params());
        // Direction of the first source segment wins
        assert_eq!(out, vec![Segment::from_coords(7.0, 7.0, 1.0, 1.0)]);
    }

    #[test]
    fn test_gap_keeps_segments_apart_in_order() {
        let input = [
            Segment::from_coords(0.0, 1.0, 0.0, 2.0),
            Segment::from_coords(3.0, 3.0, 4.0, 3.0),
            Segment::from_coords(0.0, 0.0, 0.0, 0.5),
        ];
        let out = simplify(&input, &params());
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], input[0]);
        assert_eq!(out[2], input[2]);
    }

    #[test]
    fn test_parallel_lines_do_not_merge() {
        let input = [
            Segment::from_coords(0.0, 0.0, 1.0, 0.0),
            Segment::from_coords(0.0, 0.08, 1.0, 0.08),
        ];
        assert_eq!(simplify(&input, &params()).len(), 2);
    }

    #[test]
    fn test_zero_length_dropped() {
        let input = [Segment::from_coords(1.0, 1.0, 1.0 + 1e-9, 1.0)];
        assert!(simplify(&input, &params()).is_empty());
    }

    #[test]
    fn test_idempotent_on_square_with_split_edges() {
        let input = [
            Segment::from_coords(0.0, 0.0, 2.0, 0.0),
            Segment::from_coords(2.0, 0.0, 10.0, 0.0),
            Segment::from_coords(10.0, 0.0, 10.0, 10.0),
            Segment::from_coords(10.0, 10.0, 0.0, 10.0),
            Segment::from_coords(0.0, 10.0, 0.0, 0.0),
        ];
        let once = simplify(&input, &params());
        assert_eq!(once.len(), 4);
        assert_eq!(simplify(&once, &params()), once);
    }

    #[test]
    fn test_merge_across_angle_seam() {
        // Direction angles just below pi and exactly 0 describe the same line
        let params = SimplifyParams {
            epsilon: 1e-3,
            arc_tolerance: 0.01,
        };
        let input = [
            Segment::from_coords(0.0, 0.0, 20.0, -0.001),
            Segment::from_coords(20.0, -0.001, 30.0, -0.001),
        ];
        let out = simplify(&input, &params);
        assert_eq!(out.len(), 1);
        assert_relative_eq!(out[0].start, Point2::new(0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(out[0].end, Point2::new(30.0, -0.001), epsilon = 1e-12);
    }

    fn on_line(angle: f64, t0: f64, t1: f64) -> Segment {
        let origin = Point2::new(-3.7, 8.9);
        let dir = Vector2::new(angle.cos(), angle.sin());
        Segment::new(origin + dir * t0, origin + dir * t1)
    }

    #[test]
    fn test_overlapping_segments_at_odd_angle_merge_once() {
        let angle = 1.984_127;
        let input = [
            on_line(angle, 0.3, 7.6),
            on_line(angle, 1.2, -2.1),
            on_line(angle, 5.0, 9.4),
        ];
        let once = simplify(&input, &params());
        assert_eq!(once.len(), 1);
        let expected = on_line(angle, -2.1, 9.4);
        assert_relative_eq!(once[0].start, expected.start, epsilon = 1e-6);
        assert_relative_eq!(once[0].end, expected.end, epsilon = 1e-6);
        assert_eq!(simplify(&once, &params()), once);
    }

    #[test]
    fn test_short_segment_inside_long_one_merges() {
        let angle = 0.411_793;
        let input = [on_line(angle, 4.0, 4.001), on_line(angle, 0.0, 12.0)];
        let out = simplify(&input, &params());
        assert_eq!(out.len(), 1);
        assert_relative_eq!(out[0].length(), 12.0, epsilon = 1e-5);
        assert_eq!(simplify(&out, &params()), out);
    }

    #[test]
    fn test_opposite_directions_share_a_line() {
        let input = [
            Segment::from_coords(0.0, 0.0, 1.0, 0.0),
            Segment::from_coords(2.0, 0.0, 1.0, 0.0),
        ];
        assert_eq!(simplify(&input, &params()), vec![Segment::from_coords(0.0, 0.0, 2.0, 0.0)]);
    }

    #[test]
    fn test_arc_chord_height_is_bounded() {
        let tol = 0.01;
        let entities = [DxfEntity::Arc {
            center: Point2::new(0.0, 0.0),
            radius: 5.0,
            start_angle: 0.0,
            end_angle: 90.0,
        }];
        let segments = extract_segments(&entities, tol);
        assert!(segments.len() > 1);
        assert_relative_eq!(segments[0].start, Point2::new(5.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(segments.last().unwrap().end, Point2::new(0.0, 5.0), epsilon = 1e-12);
        for s in &segments {
            let mid = Point2::from((s.start.coords + s.end.coords) * 0.5);
            assert!(5.0 - mid.coords.norm() <= tol + 1e-12);
        }
    }

    #[test]
    fn test_circle_is_closed() {
        let entities = [DxfEntity::Circle {
            center: Point2::new(1.0, 1.0),
            radius: 0.5,
        }];
        let segments = extract_segments(&entities, 0.01);
        assert!(segments.len() >= 3);
        assert_relative_eq!(segments[0].start, segments.last().unwrap().end, epsilon = 1e-12);
    }

    #[test]
    fn test_bulged_polyline_is_semicircle() {
        // Bulge 1 is a half circle; from (0,0) to (2,0) counter-clockwise dips below
        let entities = [DxfEntity::Polyline {
            vertices: vec![
                PolyVertex {
                    point: Point2::new(0.0, 0.0),
                    bulge: 1.0,
                },
                PolyVertex {
                    point: Point2::new(2.0, 0.0),
                    bulge: 0.0,
                },
            ],
            closed: false,
        }];
        let segments = extract_segments(&entities, 0.001);
        assert!(segments.len() > 4);
        let lowest = segments.iter().map(|s| s.start.y).fold(f64::INFINITY, f64::min);
        assert_relative_eq!(lowest, -1.0, epsilon = 1e-3);
        assert_eq!(segments.last().unwrap().end, Point2::new(2.0, 0.0));
    }

    #[test]
    fn test_closed_polyline_gets_closing_edge() {
        let vertices: Vec<PolyVertex> = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]
            .iter()
            .map(|&(x, y)| PolyVertex {
                point: Point2::new(x, y),
                bulge: 0.0,
            })
            .collect();
        let closed = extract_segments(
            &[DxfEntity::Polyline {
                vertices: vertices.clone(),
                closed: true,
            }],
            0.01,
        );
        assert_eq!(closed.len(), 3);
        let open = extract_segments(
            &[DxfEntity::Polyline {
                vertices,
                closed: false,
            }],
            0.01,
        );
        assert_eq!(open.len(), 2);
    }

    #[test]
    fn test_preview_nests_holes() {
        let outer = [
            Segment::from_coords(0.0, 0.0, 4.0, 0.0),
            Segment::from_coords(4.0, 0.0, 4.0, 4.0),
            Segment::from_coords(4.0, 4.0, 0.0, 4.0),
            Segment::from_coords(0.0, 4.0, 0.0, 0.0),
        ];
        let hole = [
            Segment::from_coords(1.0, 1.0, 1.0, 3.0),
            Segment::from_coords(1.0, 3.0, 3.0, 3.0),
            Segment::from_coords(3.0, 3.0, 3.0, 1.0),
            Segment::from_coords(3.0, 1.0, 1.0, 1.0),
        ];
        let layer: Vec<Segment> = outer.iter().chain(hole.iter()).copied().collect();
        let layers = vec![(1.0, layer.clone()), (2.0, Vec::new()), (3.0, layer)];
        let mesh = build_preview(&layers, 1.0, 1e-6);
        assert_relative_eq!(mesh.signed_volume(), 2.0 * 12.0, epsilon = 1e-9);
        let (min, max) = mesh.bounds().unwrap();
        assert_relative_eq!(min.z, 0.0);
        assert_relative_eq!(max.z, 3.0);
    }
}
