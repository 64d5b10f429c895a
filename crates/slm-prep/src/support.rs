//! Block support synthesis.
//!
//! Overhanging faces are rasterized onto a square XY grid. Every occupied
//! cell becomes a column running from the surface below (or the build plate)
//! up to just under the overhang. Neighbouring columns with matching heights
//! are merged into rectangular blocks, each block is inset so that no two
//! blocks share a face, and the blocks are unioned with the part one by one.
//!
//! # Example
//!
//! ```rust,ignore
//! use slm_prep::{Mesh, support::{generate_supports, SupportParams}};
//!
//! let part = Mesh::load("bracket.stl")?;
//! let result = generate_supports(&part, 55.0, &SupportParams::default())?;
//! println!("{} support blocks", result.blocks.len());
//! result.mesh.save("bracket_supported.stl")?;
//! ```

use hashbrown::HashMap;
use nalgebra::{Point2, Point3, Vector3};
use tracing::{debug, info};

use crate::boolean::{MeshUnion, ShellUnion};
use crate::config::SupportConfig;
use crate::error::{PrepError, PrepResult};
use crate::extrude::box_mesh;
use crate::raycast::{first_hit_below, point_inside};
use crate::tracing_ext::OperationTimer;
use crate::validate::ensure_sound;
use crate::{Mesh, Triangle};

/// Geometric settings of the support grid.
#[derive(Debug, Clone, PartialEq)]
pub struct SupportParams {
    /// Grid cell size (mm).
    pub grid_spacing: f64,
    /// Gap kept between a block and the part above and below it (mm).
    pub height_offset: f64,
    /// Inset on every side of a block footprint (mm).
    pub block_inset: f64,
    /// Shorter blocks are dropped (mm).
    pub min_block_height: f64,
    /// Smaller footprints are dropped (mm²).
    pub min_footprint_area: f64,
    /// Height agreement needed to merge neighbouring cells (mm).
    pub merge_tolerance: f64,
    /// Faces this close to the lowest point of the part rest on the plate (mm).
    pub plate_tolerance: f64,
}

impl From<&SupportConfig> for SupportParams {
    fn from(config: &SupportConfig) -> Self {
        Self {
            grid_spacing: config.grid_spacing,
            height_offset: config.height_offset,
            block_inset: config.block_inset,
            min_block_height: config.min_block_height,
            min_footprint_area: config.min_footprint_area,
            merge_tolerance: config.merge_tolerance,
            plate_tolerance: config.plate_tolerance,
        }
    }
}

impl Default for SupportParams {
    fn default() -> Self {
        Self::from(&SupportConfig::default())
    }
}

/// A face that needs support.
#[derive(Debug, Clone)]
pub struct OverhangFace {
    /// Face index in the source mesh.
    pub face: usize,
    pub triangle: Triangle,
    /// Outward unit normal.
    pub normal: Vector3<f64>,
    /// Angle between the normal and the downward build axis, in degrees.
    pub angle_from_down: f64,
}

/// An axis-aligned support prism.
#[derive(Debug, Clone, PartialEq)]
pub struct SupportBlock {
    pub min: Point2<f64>,
    pub max: Point2<f64>,
    pub base: f64,
    pub top: f64,
}

impl SupportBlock {
    /// Footprint area (mm²).
    pub fn area(&self) -> f64 {
        (self.max.x - self.min.x) * (self.max.y - self.min.y)
    }

    /// Vertical extent (mm).
    pub fn height(&self) -> f64 {
        self.top - self.base
    }

    /// The block as a closed mesh.
    pub fn to_mesh(&self) -> Mesh {
        box_mesh(
            Point3::new(self.min.x, self.min.y, self.base),
            Point3::new(self.max.x, self.max.y, self.top),
        )
    }
}

/// Outcome of support synthesis.
#[derive(Debug, Clone)]
pub struct SupportResult {
    /// The part unioned with every block.
    pub mesh: Mesh,
    /// Blocks in union order.
    pub blocks: Vec<SupportBlock>,
    /// Number of faces classified as overhanging.
    pub overhang_faces: usize,
}

/// Find faces that need support.
///
/// A face overhangs when its normal points downward (non-positive Z) and
/// leans less than `90° - overhang_angle_deg` away from straight down. Faces
/// resting on the build plate never overhang.
pub fn detect_overhangs(
    mesh: &Mesh,
    overhang_angle_deg: f64,
    plate_tolerance: f64,
) -> Vec<OverhangFace> {
    let Some((min, _)) = mesh.bounds() else {
        return Vec::new();
    };
    let limit = 90.0 - overhang_angle_deg;

    mesh.triangles()
        .enumerate()
        .filter_map(|(face, triangle)| {
            let normal = triangle.normal()?;
            if normal.z > 0.0 {
                return None;
            }
            let angle_from_down = (-normal.z).clamp(-1.0, 1.0).acos().to_degrees();
            if angle_from_down >= limit {
                return None;
            }
            let (_, top) = triangle.z_range();
            if top - min.z <= plate_tolerance {
                return None;
            }
            Some(OverhangFace {
                face,
                triangle,
                normal,
                angle_from_down,
            })
        })
        .collect()
}

/// Add block supports under every overhang using the bundled [`ShellUnion`].
pub fn generate_supports(
    mesh: &Mesh,
    overhang_angle_deg: f64,
    params: &SupportParams,
) -> PrepResult<SupportResult> {
    generate_supports_with(mesh, overhang_angle_deg, params, &ShellUnion::default())
}

/// Add block supports under every overhang, merging blocks through `union`.
///
/// A mesh without overhangs is returned unchanged. Otherwise the mesh must be
/// closed, consistently wound and outward facing.
pub fn generate_supports_with(
    mesh: &Mesh,
    overhang_angle_deg: f64,
    params: &SupportParams,
    union: &dyn MeshUnion,
) -> PrepResult<SupportResult> {
    let _timer = OperationTimer::with_items("generate_supports", mesh.face_count());

    let overhangs = detect_overhangs(mesh, overhang_angle_deg, params.plate_tolerance);
    if overhangs.is_empty() {
        info!("No overhanging faces, supports not needed");
        return Ok(SupportResult {
            mesh: mesh.clone(),
            blocks: Vec::new(),
            overhang_faces: 0,
        });
    }

    let report = ensure_sound(mesh)?;
    if report.signed_volume < 0.0 {
        return Err(PrepError::mesh_integrity(
            "mesh is inside-out; orient it outward before generating supports",
        ));
    }

    let blocks = plan_support_blocks(mesh, &overhangs, params);
    info!(
        overhang_faces = overhangs.len(),
        blocks = blocks.len(),
        "Planned support blocks"
    );

    let mut supported = mesh.clone();
    for (index, block) in blocks.iter().enumerate() {
        supported = union
            .union(&supported, &block.to_mesh())
            .map_err(|e| PrepError::union_failure(index, e.details))?;
    }

    Ok(SupportResult {
        mesh: supported,
        blocks,
        overhang_faces: overhangs.len(),
    })
}

/// One support column over a single grid cell.
#[derive(Debug, Clone, Copy)]
struct Column {
    i: i64,
    j: i64,
    top: f64,
    base: f64,
}

/// Columns merged along a grid row.
#[derive(Debug, Clone, Copy)]
struct Run {
    i0: i64,
    i1: i64,
    j: i64,
    top: f64,
    base: f64,
}

/// Lay out support blocks without touching the mesh.
pub fn plan_support_blocks(
    mesh: &Mesh,
    overhangs: &[OverhangFace],
    params: &SupportParams,
) -> Vec<SupportBlock> {
    let Some((mesh_min, _)) = mesh.bounds() else {
        return Vec::new();
    };
    let g = params.grid_spacing;
    let half_diagonal = g * std::f64::consts::FRAC_1_SQRT_2;

    // Candidate tops per cell
    let mut candidates: HashMap<(i64, i64), Vec<f64>> = HashMap::new();
    for overhang in overhangs {
        let tri = &overhang.triangle;
        let slope = overhang.normal.xy().norm() / overhang.normal.z.abs().max(1e-12);
        let drop = params.height_offset + slope * half_diagonal;

        let min_i = (tri.v0.x.min(tri.v1.x).min(tri.v2.x) / g).floor() as i64;
        let max_i = (tri.v0.x.max(tri.v1.x).max(tri.v2.x) / g).floor() as i64;
        let min_j = (tri.v0.y.min(tri.v1.y).min(tri.v2.y) / g).floor() as i64;
        let max_j = (tri.v0.y.max(tri.v1.y).max(tri.v2.y) / g).floor() as i64;

        let mut covered = false;
        for i in min_i..=max_i {
            for j in min_j..=max_j {
                let center = cell_center(i, j, g);
                if let Some(z) = height_above(tri, &center) {
                    candidates.entry((i, j)).or_default().push(z - drop);
                    covered = true;
                }
            }
        }
        if !covered {
            let c = tri.centroid();
            let key = ((c.x / g).floor() as i64, (c.y / g).floor() as i64);
            candidates.entry(key).or_default().push(c.z - drop);
        }
    }

    let mut columns = Vec::new();
    for ((i, j), mut tops) in candidates {
        tops.sort_by(|a, b| b.total_cmp(a));
        for top in cluster_levels(&tops, params.merge_tolerance) {
            if let Some(column) = build_column(mesh, mesh_min.z, i, j, top, params) {
                columns.push(column);
            }
        }
    }
    debug!(columns = columns.len(), "Support columns");

    let runs = merge_rows(columns, params.merge_tolerance);
    let rects = merge_runs(runs, params.merge_tolerance);

    let inset = params.block_inset;
    rects
        .into_iter()
        .map(|(run, j1)| SupportBlock {
            min: Point2::new(run.i0 as f64 * g + inset, run.j as f64 * g + inset),
            max: Point2::new((run.i1 + 1) as f64 * g - inset, (j1 + 1) as f64 * g - inset),
            base: run.base,
            top: run.top,
        })
        .filter(|block| block.area() >= params.min_footprint_area)
        .collect()
}

fn cell_center(i: i64, j: i64, g: f64) -> Point2<f64> {
    Point2::new((i as f64 + 0.5) * g, (j as f64 + 0.5) * g)
}

/// Z of the triangle's plane over `p`, when `p` lies inside its XY projection.
fn height_above(tri: &Triangle, p: &Point2<f64>) -> Option<f64> {
    let a = tri.v0.xy();
    let b = tri.v1.xy();
    let c = tri.v2.xy();
    let det = (b - a).perp(&(c - a));
    if det.abs() < 1e-12 {
        return None;
    }
    let ap = *p - a;
    let u = ap.perp(&(c - a)) / det;
    let v = (b - a).perp(&ap) / det;
    const EDGE: f64 = -1e-9;
    if u < EDGE || v < EDGE || u + v > 1.0 - EDGE {
        return None;
    }
    Some(tri.v0.z + u * (tri.v1.z - tri.v0.z) + v * (tri.v2.z - tri.v0.z))
}

/// Collapse sorted (descending) tops into levels; each level takes its lowest member.
fn cluster_levels(sorted_desc: &[f64], tolerance: f64) -> Vec<f64> {
    let mut levels: Vec<f64> = Vec::new();
    let mut cluster_start = f64::NAN;
    for &top in sorted_desc {
        match levels.last_mut() {
            Some(level) if cluster_start - top <= tolerance => *level = top,
            _ => {
                levels.push(top);
                cluster_start = top;
            }
        }
    }
    levels
}

fn build_column(
    mesh: &Mesh,
    plate_z: f64,
    i: i64,
    j: i64,
    top: f64,
    params: &SupportParams,
) -> Option<Column> {
    let g = params.grid_spacing;
    let x0 = i as f64 * g + params.block_inset;
    let x1 = (i + 1) as f64 * g - params.block_inset;
    let y0 = j as f64 * g + params.block_inset;
    let y1 = (j + 1) as f64 * g - params.block_inset;
    let center = cell_center(i, j, g);
    let samples = [
        Point3::new(center.x, center.y, top),
        Point3::new(x0, y0, top),
        Point3::new(x1, y0, top),
        Point3::new(x1, y1, top),
        Point3::new(x0, y1, top),
    ];

    if samples.iter().any(|p| point_inside(mesh, p)) {
        debug!(i, j, top, "Column top lies inside the part, skipped");
        return None;
    }

    let base = samples
        .iter()
        .filter_map(|p| first_hit_below(mesh, p))
        .reduce(f64::max)
        .map_or(plate_z, |hit| hit + params.height_offset);

    if top - base < params.min_block_height {
        return None;
    }
    Some(Column { i, j, top, base })
}

fn heights_match(top_a: f64, base_a: f64, top_b: f64, base_b: f64, tolerance: f64) -> bool {
    (top_a - top_b).abs() <= tolerance && (base_a - base_b).abs() <= tolerance
}

/// Merge columns into runs along increasing `i` within each grid row.
fn merge_rows(mut columns: Vec<Column>, tolerance: f64) -> Vec<Run> {
    columns.sort_by(|a, b| {
        (a.j, a.i)
            .cmp(&(b.j, b.i))
            .then(b.top.total_cmp(&a.top))
    });
    let mut by_cell: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (idx, column) in columns.iter().enumerate() {
        by_cell.entry((column.i, column.j)).or_default().push(idx);
    }

    let mut used = vec![false; columns.len()];
    let mut runs = Vec::new();
    for start in 0..columns.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let first = columns[start];
        let mut run = Run {
            i0: first.i,
            i1: first.i,
            j: first.j,
            top: first.top,
            base: first.base,
        };
        while let Some(next) = by_cell.get(&(run.i1 + 1, run.j)).and_then(|candidates| {
            candidates.iter().copied().find(|&c| {
                !used[c] && heights_match(first.top, first.base, columns[c].top, columns[c].base, tolerance)
            })
        }) {
            used[next] = true;
            run.i1 += 1;
            run.top = run.top.min(columns[next].top);
            run.base = run.base.max(columns[next].base);
        }
        runs.push(run);
    }
    runs
}

/// Stack runs with identical column spans along increasing `j`.
///
/// Returns each merged rectangle as its first run (carrying the merged
/// heights) and the last row it covers.
fn merge_runs(mut runs: Vec<Run>, tolerance: f64) -> Vec<(Run, i64)> {
    runs.sort_by(|a, b| (a.j, a.i0, a.i1).cmp(&(b.j, b.i0, b.i1)));
    let mut by_span: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
    for (idx, run) in runs.iter().enumerate() {
        by_span.entry((run.i0, run.i1, run.j)).or_default().push(idx);
    }

    let mut used = vec![false; runs.len()];
    let mut rects = Vec::new();
    for start in 0..runs.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let first = runs[start];
        let mut merged = first;
        let mut j1 = first.j;
        while let Some(next) = by_span.get(&(first.i0, first.i1, j1 + 1)).and_then(|candidates| {
            candidates.iter().copied().find(|&c| {
                !used[c] && heights_match(first.top, first.base, runs[c].top, runs[c].base, tolerance)
            })
        }) {
            used[next] = true;
            j1 += 1;
            merged.top = merged.top.min(runs[next].top);
            merged.base = merged.base.max(runs[next].base);
        }
        rects.push((merged, j1));
    }
    rects
}
