//! Ray and segment queries against triangle meshes.

use nalgebra::{Point3, Vector3};

use crate::{Mesh, Triangle};

const RAY_EPSILON: f64 = 1e-10;

/// Ray-triangle intersection (Möller-Trumbore).
///
/// Returns the ray parameter `t` of the hit, if any, for `t > RAY_EPSILON`.
pub(crate) fn ray_triangle(origin: &Point3<f64>, dir: &Vector3<f64>, tri: &Triangle) -> Option<f64> {
    let edge1 = tri.v1 - tri.v0;
    let edge2 = tri.v2 - tri.v0;
    let h = dir.cross(&edge2);
    let a = edge1.dot(&h);

    if a.abs() < RAY_EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - tri.v0;
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = f * dir.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(&q);
    (t > RAY_EPSILON).then_some(t)
}

/// Even-odd inside test by casting one ray.
///
/// The ray is slightly skewed off the axes so it rarely grazes the edges of
/// axis-aligned geometry.
pub(crate) fn point_inside(mesh: &Mesh, point: &Point3<f64>) -> bool {
    let dir = Vector3::new(1.0, 0.000_731, 0.001_187);
    mesh.triangles()
        .filter(|tri| ray_triangle(point, &dir, tri).is_some())
        .count()
        % 2
        == 1
}

/// True when the open segment `p..q` passes through the triangle interior.
///
/// Touching at either endpoint and coplanar contact do not count.
pub(crate) fn segment_crosses(p: &Point3<f64>, q: &Point3<f64>, tri: &Triangle) -> bool {
    let dir = q - p;
    match ray_triangle(p, &dir, tri) {
        Some(t) => t < 1.0 - 1e-9,
        None => false,
    }
}

/// Highest point where a vertical ray cast downward from `origin` meets the mesh.
pub(crate) fn first_hit_below(mesh: &Mesh, origin: &Point3<f64>) -> Option<f64> {
    let down = Vector3::new(0.0, 0.0, -1.0);
    mesh.triangles()
        .filter(|tri| {
            let (min_z, _) = tri.z_range();
            min_z < origin.z
        })
        .filter_map(|tri| ray_triangle(origin, &down, &tri))
        .map(|t| origin.z - t)
        .reduce(f64::max)
}
