//! Plane slicing.
//!
//! A mesh is cut by horizontal planes at `z_min + i * layer_thickness` for
//! `i = 1..=n`, where the last plane may overshoot a partial top layer and is
//! then sampled at `z_max`. Every triangle crossing a plane contributes one
//! segment, oriented with the solid on its left, and the segments are chained
//! into closed contours: outer boundaries counter-clockwise, holes clockwise.
//!
//! # Example
//!
//! ```rust,ignore
//! use slm_prep::{Mesh, slice::slice};
//!
//! let mesh = Mesh::load("part.stl")?;
//! for sliced in slice(&mesh, 0.03).layers() {
//!     println!("layer {} at z={:.3}: {} contours",
//!         sliced.layer.index, sliced.layer.z, sliced.layer.contours.len());
//! }
//! ```

use hashbrown::HashMap;
use nalgebra::{Point2, Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{HatchConfig, SliceConfig};
use crate::error::{BatchReport, LayerIssue};
use crate::hatch::{HatchContext, Hatcher};
use crate::tracing_ext::OperationTimer;
use crate::{Contour, LayerBounds, Mesh, Segment};

/// Planes whose count would round up because of floating-point noise are not added.
const PLANE_COUNT_SLACK: f64 = 1e-9;

/// One slice of the part.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// 1-based layer index.
    pub index: usize,
    /// Plane height.
    pub z: f64,
    /// Closed boundaries: outer rings counter-clockwise, holes clockwise.
    pub contours: Vec<Contour>,
    /// Fill vectors from the hatcher.
    pub fill: Vec<Segment>,
    /// Hatch angle used for `fill`, in degrees.
    pub hatch_angle: Option<f64>,
}

impl Layer {
    /// A layer without geometry.
    pub fn empty(index: usize, z: f64) -> Self {
        Self {
            index,
            z,
            contours: Vec::new(),
            fill: Vec::new(),
            hatch_angle: None,
        }
    }

    /// True when the layer has no contours and no fill.
    pub fn is_empty(&self) -> bool {
        self.contours.is_empty() && self.fill.is_empty()
    }

    /// Every straight piece of the layer: contour edges first, then fill.
    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        self.contours
            .iter()
            .flat_map(Contour::edges)
            .chain(self.fill.iter().copied())
    }

    /// XY bounds of the layer geometry.
    pub fn bounds(&self) -> LayerBounds {
        let mut bounds = LayerBounds::empty();
        for s in self.segments() {
            bounds.include_segment(&s);
        }
        bounds
    }
}

/// A layer together with the problems found while building it.
#[derive(Debug, Clone)]
pub struct SlicedLayer {
    pub layer: Layer,
    pub issues: Vec<LayerIssue>,
}

/// Every layer of a mesh plus the collected issues.
#[derive(Debug, Clone)]
pub struct SliceResult {
    /// Layers in index order.
    pub layers: Vec<Layer>,
    pub report: BatchReport,
}

/// Slices a mesh on demand.
///
/// Layers are produced lazily by [`PlaneSlicer::layers`]; calling it again
/// starts over from the first plane.
pub struct PlaneSlicer<'a> {
    mesh: &'a Mesh,
    z_min: f64,
    z_max: f64,
    layer_thickness: f64,
    chain_epsilon: f64,
    plane_count: usize,
    hatching: Option<(&'a dyn Hatcher, &'a HatchConfig)>,
}

/// Slice `mesh` with the given layer thickness and default chaining tolerance.
pub fn slice(mesh: &Mesh, layer_thickness: f64) -> PlaneSlicer<'_> {
    PlaneSlicer::new(
        mesh,
        &SliceConfig {
            layer_thickness,
            ..SliceConfig::default()
        },
    )
}

/// Slice every layer on the rayon pool, hatching when a hatcher is given.
pub fn slice_mesh<'a>(
    mesh: &'a Mesh,
    config: &SliceConfig,
    hatching: Option<(&'a dyn Hatcher, &'a HatchConfig)>,
) -> SliceResult {
    let mut slicer = PlaneSlicer::new(mesh, config);
    if let Some((hatcher, hatch)) = hatching {
        slicer = slicer.with_hatcher(hatcher, hatch);
    }
    slicer.slice_all()
}

impl<'a> PlaneSlicer<'a> {
    pub fn new(mesh: &'a Mesh, config: &SliceConfig) -> Self {
        let (z_min, z_max) = mesh
            .bounds()
            .map(|(min, max)| (min.z, max.z))
            .unwrap_or((0.0, 0.0));
        let height = z_max - z_min;
        let plane_count = if mesh.is_empty() || height <= 0.0 || config.layer_thickness <= 0.0 {
            0
        } else {
            (height / config.layer_thickness - PLANE_COUNT_SLACK).ceil().max(1.0) as usize
        };

        Self {
            mesh,
            z_min,
            z_max,
            layer_thickness: config.layer_thickness,
            chain_epsilon: config.chain_epsilon,
            plane_count,
            hatching: None,
        }
    }

    /// Hatch every layer with `hatcher`, using the angle schedule of `config`.
    pub fn with_hatcher(mut self, hatcher: &'a dyn Hatcher, config: &'a HatchConfig) -> Self {
        self.hatching = Some((hatcher, config));
        self
    }

    /// Number of planes.
    pub fn plane_count(&self) -> usize {
        self.plane_count
    }

    /// Nominal height of the plane with the given 1-based index.
    pub fn plane_height(&self, index: usize) -> f64 {
        self.z_min + index as f64 * self.layer_thickness
    }

    /// Lazily slice every plane in index order.
    pub fn layers(&self) -> impl Iterator<Item = SlicedLayer> + '_ {
        (1..=self.plane_count).map(move |index| self.slice_layer(index))
    }

    /// Slice all planes in parallel and collect the issues.
    pub fn slice_all(&self) -> SliceResult {
        let _timer = OperationTimer::with_items("slice", self.plane_count);

        let sliced: Vec<SlicedLayer> = (1..=self.plane_count)
            .into_par_iter()
            .map(|index| self.slice_layer(index))
            .collect();

        let mut report = BatchReport::new();
        let mut layers = Vec::with_capacity(sliced.len());
        for s in sliced {
            for issue in s.issues {
                report.push(issue);
            }
            layers.push(s.layer);
        }

        info!(
            layers = layers.len(),
            issues = report.issues.len(),
            "Slicing complete"
        );
        report.log_summary("slice");
        SliceResult { layers, report }
    }

    /// Slice a single plane.
    pub fn slice_layer(&self, index: usize) -> SlicedLayer {
        let z = self.plane_height(index);
        let sample_z = z.min(self.z_max);

        let segments = plane_segments(self.mesh, sample_z, self.chain_epsilon);
        let mut issues = Vec::new();

        if segments.is_empty() {
            debug!(index, z, "Empty layer");
            issues.push(LayerIssue::EmptyLayer { index, z });
            return SlicedLayer {
                layer: Layer::empty(index, z),
                issues,
            };
        }

        let chained = chain_segments(&segments, self.chain_epsilon);
        if chained.loose_endpoints > 0 {
            issues.push(LayerIssue::OpenContour {
                index,
                z,
                loose_endpoints: chained.loose_endpoints,
            });
        }

        let contours: Vec<Contour> = chained
            .closed
            .into_iter()
            .map(|points| Contour::new(remove_collinear(points)))
            .filter(|c| c.points.len() >= 3)
            .collect();

        let mut layer = Layer {
            index,
            z,
            contours,
            fill: Vec::new(),
            hatch_angle: None,
        };

        if let Some((hatcher, config)) = self.hatching {
            if config.enabled && !layer.contours.is_empty() {
                let angle = config.angle_for_layer(index);
                layer.fill = hatcher.hatch(
                    &layer.contours,
                    &HatchContext {
                        layer_index: index,
                        angle,
                    },
                );
                layer.hatch_angle = Some(angle);
            }
        }

        debug!(
            index,
            z,
            segments = segments.len(),
            contours = layer.contours.len(),
            fill = layer.fill.len(),
            "Sliced layer"
        );
        SlicedLayer { layer, issues }
    }
}

/// One oriented segment per triangle crossing the plane at `z`.
fn plane_segments(mesh: &Mesh, z: f64, min_length: f64) -> Vec<Segment> {
    let mut segments = Vec::new();
    for face in &mesh.faces {
        let above = face.map(|v| mesh.vertices[v as usize].position.z >= z);
        let count = above.iter().filter(|&&a| a).count();
        if count == 0 || count == 3 {
            continue;
        }

        // The vertex alone on its side connects to the two crossing edges
        let lone = (0..3)
            .find(|&k| above[k] == (count == 1))
            .unwrap_or(0);
        let a = face[lone];
        let b = face[(lone + 1) % 3];
        let c = face[(lone + 2) % 3];
        let p = edge_point(mesh, a, b, z);
        let q = edge_point(mesh, a, c, z);

        let seg = Segment::new(p, q);
        if seg.length() <= min_length {
            continue;
        }

        // Solid on the left: travel along z-hat x outward normal
        let v0 = mesh.vertices[face[0] as usize].position;
        let v1 = mesh.vertices[face[1] as usize].position;
        let v2 = mesh.vertices[face[2] as usize].position;
        let normal = (v1 - v0).cross(&(v2 - v0));
        let travel = Vector3::z().cross(&normal).xy();
        if seg.direction().dot(&travel) < 0.0 {
            segments.push(seg.reversed());
        } else {
            segments.push(seg);
        }
    }
    segments
}

/// Intersection of edge (a, b) with the plane, evaluated from the lower vertex
/// index so both faces sharing the edge get the same point.
fn edge_point(mesh: &Mesh, a: u32, b: u32, z: f64) -> Point2<f64> {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    let p: Point3<f64> = mesh.vertices[lo as usize].position;
    let q: Point3<f64> = mesh.vertices[hi as usize].position;
    let t = (z - p.z) / (q.z - p.z);
    Point2::new(p.x + t * (q.x - p.x), p.y + t * (q.y - p.y))
}

/// Chains built from one layer's segments.
#[derive(Debug, Default)]
pub(crate) struct Chains {
    /// Closed rings, without the repeated first point.
    pub(crate) closed: Vec<Vec<Point2<f64>>>,
    /// Endpoints left dangling by chains that could not close.
    pub(crate) loose_endpoints: usize,
}

/// Spatial hash of segment endpoints with cells of size epsilon.
struct EndpointIndex {
    cell: f64,
    map: HashMap<(i64, i64), Vec<usize>>,
}

impl EndpointIndex {
    fn new(cell: f64) -> Self {
        Self {
            cell,
            map: HashMap::new(),
        }
    }

    fn key(&self, p: &Point2<f64>) -> (i64, i64) {
        ((p.x / self.cell).floor() as i64, (p.y / self.cell).floor() as i64)
    }

    fn insert(&mut self, p: &Point2<f64>, id: usize) {
        let key = self.key(p);
        self.map.entry(key).or_default().push(id);
    }

    /// Candidate ids near `p`, from the 3x3 block of cells around it.
    fn near(&self, p: &Point2<f64>) -> impl Iterator<Item = usize> + '_ {
        let (kx, ky) = self.key(p);
        (-1..=1)
            .flat_map(move |dx| (-1..=1).map(move |dy| (kx + dx, ky + dy)))
            .filter_map(|key| self.map.get(&key))
            .flatten()
            .copied()
    }
}

/// Chain segments head to tail, accepting reversed segments as a fallback.
pub(crate) fn chain_segments(segments: &[Segment], epsilon: f64) -> Chains {
    let mut starts = EndpointIndex::new(epsilon);
    let mut ends = EndpointIndex::new(epsilon);
    for (id, s) in segments.iter().enumerate() {
        starts.insert(&s.start, id);
        ends.insert(&s.end, id);
    }

    let close = |a: &Point2<f64>, b: &Point2<f64>| (a - b).norm() <= epsilon;
    let mut used = vec![false; segments.len()];
    let mut chains = Chains::default();

    for seed in 0..segments.len() {
        if used[seed] {
            continue;
        }
        used[seed] = true;
        let mut points = vec![segments[seed].start, segments[seed].end];
        let mut closed = false;
        let mut flipped = false;

        loop {
            let Some(&tail) = points.last() else { break };
            if points.len() >= 4 && close(&tail, &points[0]) {
                points.pop();
                closed = true;
                break;
            }

            // Head to tail first, a reversed segment only as fallback
            let forward = starts
                .near(&tail)
                .find(|&id| !used[id] && close(&segments[id].start, &tail));
            if let Some(id) = forward {
                used[id] = true;
                points.push(segments[id].end);
                continue;
            }
            let backward = ends
                .near(&tail)
                .find(|&id| !used[id] && close(&segments[id].end, &tail));
            if let Some(id) = backward {
                used[id] = true;
                points.push(segments[id].start);
                continue;
            }

            // Dead end: try growing the other end once
            if flipped {
                break;
            }
            flipped = true;
            points.reverse();
        }

        if closed {
            if flipped {
                points.reverse();
            }
            chains.closed.push(points);
        } else {
            chains.loose_endpoints += 2;
        }
    }
    chains
}

/// Drop ring points that lie on the straight line through their neighbours.
pub(crate) fn remove_collinear(mut points: Vec<Point2<f64>>) -> Vec<Point2<f64>> {
    let mut changed = true;
    while changed && points.len() > 3 {
        changed = false;
        let n = points.len();
        for i in 0..n {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            let a = points[i] - prev;
            let b = next - points[i];
            let cross = a.perp(&b);
            if cross.abs() <= 1e-9 * a.norm() * b.norm() && a.dot(&b) > 0.0 {
                points.remove(i);
                changed = true;
                break;
            }
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hatch::ScanlineHatcher;
    use crate::types::test_meshes::cube;
    use approx::assert_relative_eq;

    #[test]
    fn test_cube_slices_into_five_squares() {
        let mesh = cube(10.0);
        let slicer = slice(&mesh, 2.0);
        assert_eq!(slicer.plane_count(), 5);

        let layers: Vec<SlicedLayer> = slicer.layers().collect();
        assert_eq!(layers.len(), 5);
        for (k, sliced) in layers.iter().enumerate() {
            let layer = &sliced.layer;
            assert_eq!(layer.index, k + 1);
            assert_relative_eq!(layer.z, 2.0 * (k + 1) as f64, epsilon = 1e-12);
            assert!(sliced.issues.is_empty(), "{:?}", sliced.issues);
            assert_eq!(layer.contours.len(), 1);
            let contour = &layer.contours[0];
            assert_eq!(contour.points.len(), 4);
            assert!(contour.is_outer());
            assert_relative_eq!(contour.area(), 100.0, epsilon = 1e-9);
            assert_relative_eq!(contour.perimeter(), 40.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_layers_are_restartable() {
        let mesh = cube(10.0);
        let slicer = slice(&mesh, 2.0);
        let first: Vec<f64> = slicer.layers().map(|s| s.layer.z).collect();
        let second: Vec<f64> = slicer.layers().map(|s| s.layer.z).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_partial_top_layer_is_sampled_at_top() {
        let mesh = cube(10.0);
        let slicer = slice(&mesh, 3.0);
        assert_eq!(slicer.plane_count(), 4);
        let last = slicer.slice_layer(4);
        assert_relative_eq!(last.layer.z, 12.0);
        assert_eq!(last.layer.contours.len(), 1);
        assert_relative_eq!(last.layer.contours[0].area(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_hole_winds_clockwise() {
        // A square tube: outer 10 mm, inner 4 mm hole
        let outer = Contour::new(vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ]);
        let hole = Contour::new(vec![
            Point2::new(3.0, 3.0),
            Point2::new(7.0, 3.0),
            Point2::new(7.0, 7.0),
            Point2::new(3.0, 7.0),
        ]);
        let mesh = crate::extrude::extrude_region(&outer, &[hole], 0.0, 5.0).unwrap();
        let sliced = slice(&mesh, 1.0).slice_layer(2);
        assert!(sliced.issues.is_empty());
        let layer = sliced.layer;
        assert_eq!(layer.contours.len(), 2);
        let outers: Vec<&Contour> = layer.contours.iter().filter(|c| c.is_outer()).collect();
        assert_eq!(outers.len(), 1);
        assert_relative_eq!(outers[0].area(), 100.0, epsilon = 1e-9);
        let holes: Vec<&Contour> = layer.contours.iter().filter(|c| !c.is_outer()).collect();
        assert_relative_eq!(holes[0].area(), 16.0, epsilon = 1e-9);
    }

    #[test]
    fn test_open_mesh_reports_open_contour() {
        let mut mesh = cube(10.0);
        // Remove one side triangle
        mesh.faces.remove(4);
        let config = SliceConfig {
            layer_thickness: 2.0,
            ..Default::default()
        };
        let result = slice_mesh(&mesh, &config, None);
        assert_eq!(result.layers.len(), 5);
        assert!(result.report.issues.iter().any(|i| matches!(
            i,
            LayerIssue::OpenContour { loose_endpoints: 2, .. }
        )));
    }

    #[test]
    fn test_parallel_slice_with_hatching() {
        let mesh = cube(10.0);
        let hatch = HatchConfig::default();
        let hatcher = ScanlineHatcher {
            hatch_distance: 1.0,
            ..ScanlineHatcher::from(&hatch)
        };
        let config = SliceConfig {
            layer_thickness: 2.0,
            ..Default::default()
        };
        let result = slice_mesh(&mesh, &config, Some((&hatcher as &dyn Hatcher, &hatch)));
        assert!(result.report.is_clean());
        for layer in &result.layers {
            assert!(!layer.fill.is_empty());
            let angle = layer.hatch_angle.unwrap();
            assert_relative_eq!(angle, hatch.angle_for_layer(layer.index));
            let bounds = layer.bounds();
            assert!(bounds.min_x >= -1e-9 && bounds.max_x <= 10.0 + 1e-9);
        }
        assert_relative_eq!(result.layers[0].hatch_angle.unwrap(), 76.7, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_mesh_has_no_planes() {
        let mesh = Mesh::new();
        assert_eq!(slice(&mesh, 1.0).plane_count(), 0);
    }

    #[test]
    fn test_remove_collinear() {
        let ring = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(4.0, 0.0),
            Point2::new(4.0, 4.0),
            Point2::new(0.0, 4.0),
        ];
        assert_eq!(remove_collinear(ring).len(), 4);
    }
}
