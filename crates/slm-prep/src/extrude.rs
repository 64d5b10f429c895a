//! Prism construction from 2D footprints.

use nalgebra::{Point2, Point3};
use tracing::warn;

use crate::{Contour, Mesh, Vertex};

/// Closed axis-aligned box with outward winding.
pub fn box_mesh(min: Point3<f64>, max: Point3<f64>) -> Mesh {
    let mut mesh = Mesh::with_capacity(8, 12);
    for &(x, y, z) in &[
        (min.x, min.y, min.z),
        (max.x, min.y, min.z),
        (max.x, max.y, min.z),
        (min.x, max.y, min.z),
        (min.x, min.y, max.z),
        (max.x, min.y, max.z),
        (max.x, max.y, max.z),
        (min.x, max.y, max.z),
    ] {
        mesh.vertices.push(Vertex::from_coords(x, y, z));
    }
    mesh.faces = vec![
        [0, 2, 1],
        [0, 3, 2],
        [4, 5, 6],
        [4, 6, 7],
        [0, 1, 5],
        [0, 5, 4],
        [3, 7, 6],
        [3, 6, 2],
        [0, 4, 7],
        [0, 7, 3],
        [1, 2, 6],
        [1, 6, 5],
    ];
    mesh
}

/// Extrude a region (outer ring plus holes) between `z0` and `z1`.
///
/// Ring orientation is normalized, so callers may pass rings in either
/// winding. Returns `None` when the caps cannot be triangulated.
pub fn extrude_region(outer: &Contour, holes: &[Contour], z0: f64, z1: f64) -> Option<Mesh> {
    if outer.points.len() < 3 {
        return None;
    }

    let mut rings: Vec<Vec<Point2<f64>>> = Vec::with_capacity(holes.len() + 1);
    rings.push(oriented(outer, true));
    rings.extend(holes.iter().filter(|h| h.points.len() >= 3).map(|h| oriented(h, false)));

    let points: Vec<Point2<f64>> = rings.iter().flatten().copied().collect();
    let n = points.len() as u32;

    let mut coords = Vec::with_capacity(points.len() * 2);
    for p in &points {
        coords.push(p.x);
        coords.push(p.y);
    }
    let mut hole_indices = Vec::with_capacity(rings.len() - 1);
    let mut start = rings[0].len();
    for ring in &rings[1..] {
        hole_indices.push(start);
        start += ring.len();
    }

    let cap = match earcutr::earcut(&coords, &hole_indices, 2) {
        Ok(indices) if !indices.is_empty() => indices,
        Ok(_) => return None,
        Err(e) => {
            warn!("Cap triangulation failed: {}", e);
            return None;
        }
    };

    let mut mesh = Mesh::with_capacity(points.len() * 2, cap.len() * 2 / 3 + points.len() * 2);
    for p in &points {
        mesh.vertices.push(Vertex::from_coords(p.x, p.y, z0));
    }
    for p in &points {
        mesh.vertices.push(Vertex::from_coords(p.x, p.y, z1));
    }

    for tri in cap.chunks_exact(3) {
        let (a, b, c) = (tri[0] as u32, tri[1] as u32, tri[2] as u32);
        let pa = points[tri[0]];
        let pb = points[tri[1]];
        let pc = points[tri[2]];
        let ccw = (pb - pa).perp(&(pc - pa)) > 0.0;
        let (b, c) = if ccw { (b, c) } else { (c, b) };
        // Top faces up, bottom faces down
        mesh.faces.push([n + a, n + b, n + c]);
        mesh.faces.push([a, c, b]);
    }

    let mut offset = 0u32;
    for ring in &rings {
        let len = ring.len() as u32;
        for k in 0..len {
            let a = offset + k;
            let b = offset + (k + 1) % len;
            mesh.faces.push([a, b, n + b]);
            mesh.faces.push([a, n + b, n + a]);
        }
        offset += len;
    }

    Some(mesh)
}

fn oriented(contour: &Contour, counter_clockwise: bool) -> Vec<Point2<f64>> {
    let mut points = contour.points.clone();
    if contour.is_outer() != counter_clockwise {
        points.reverse();
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::check_integrity;
    use approx::assert_relative_eq;

    fn square(x0: f64, y0: f64, size: f64) -> Contour {
        Contour::new(vec![
            Point2::new(x0, y0),
            Point2::new(x0 + size, y0),
            Point2::new(x0 + size, y0 + size),
            Point2::new(x0, y0 + size),
        ])
    }

    #[test]
    fn test_box_mesh() {
        let mesh = box_mesh(Point3::new(1.0, 1.0, 0.0), Point3::new(2.0, 3.0, 4.0));
        assert_relative_eq!(mesh.signed_volume(), 8.0, epsilon = 1e-9);
        assert!(check_integrity(&mesh).is_sound());
    }

    #[test]
    fn test_extrude_square() {
        let mesh = extrude_region(&square(0.0, 0.0, 2.0), &[], 1.0, 1.5).unwrap();
        assert_relative_eq!(mesh.signed_volume(), 2.0, epsilon = 1e-9);
        assert!(check_integrity(&mesh).is_sound());
    }

    #[test]
    fn test_extrude_with_hole_and_reversed_outer() {
        let mut outer = square(0.0, 0.0, 4.0);
        outer.points.reverse();
        let hole = square(1.0, 1.0, 2.0);
        let mesh = extrude_region(&outer, &[hole], 0.0, 1.0).unwrap();
        assert_relative_eq!(mesh.signed_volume(), 12.0, epsilon = 1e-9);
        assert!(check_integrity(&mesh).is_sound());
    }
}
