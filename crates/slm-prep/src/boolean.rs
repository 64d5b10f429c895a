//! Mesh union.
//!
//! Support synthesis merges every support block into the part through the
//! [`MeshUnion`] trait, so any CSG backend can be plugged in. The bundled
//! [`ShellUnion`] covers the configuration support synthesis produces: shells
//! that are disjoint or nested but never cross. Crossing shells are reported
//! as an error rather than stitched into a corrupted result.

use nalgebra::Point3;
use thiserror::Error;
use tracing::debug;

use crate::raycast::{point_inside, segment_crosses};
use crate::{Mesh, Triangle};

/// A union that could not be completed.
#[derive(Debug, Clone, Error)]
#[error("{details}")]
pub struct UnionError {
    pub details: String,
}

impl UnionError {
    pub fn new(details: impl Into<String>) -> Self {
        Self {
            details: details.into(),
        }
    }
}

/// Boolean union of two closed meshes.
pub trait MeshUnion {
    /// Return a mesh enclosing everything enclosed by `a` or `b`.
    fn union(&self, a: &Mesh, b: &Mesh) -> Result<Mesh, UnionError>;
}

/// Union for shells whose surfaces do not cross.
///
/// Faces of each input are kept when they lie outside the other input, so a
/// shell swallowed by the other mesh disappears and disjoint shells are
/// concatenated.
#[derive(Debug, Clone)]
pub struct ShellUnion {
    /// Bounding boxes further apart than this never interact.
    pub tolerance: f64,
}

impl Default for ShellUnion {
    fn default() -> Self {
        Self { tolerance: 1e-9 }
    }
}

impl MeshUnion for ShellUnion {
    fn union(&self, a: &Mesh, b: &Mesh) -> Result<Mesh, UnionError> {
        if a.is_empty() {
            return Ok(b.clone());
        }
        if b.is_empty() {
            return Ok(a.clone());
        }

        let (Some(bounds_a), Some(bounds_b)) = (a.bounds(), b.bounds()) else {
            return Err(UnionError::new("mesh without vertices"));
        };

        if !boxes_overlap(&bounds_a, &bounds_b, self.tolerance) {
            debug!("Union inputs are disjoint, concatenating");
            let mut result = a.clone();
            result.append(b);
            return Ok(result);
        }

        if let Some(face) = first_crossing(b, a) {
            return Err(UnionError::new(format!(
                "surfaces cross: an edge of the second mesh pierces face {} of the first",
                face
            )));
        }
        if let Some(face) = first_crossing(a, b) {
            return Err(UnionError::new(format!(
                "surfaces cross: an edge of the first mesh pierces face {} of the second",
                face
            )));
        }

        let keep_a = faces_outside(a, b);
        let keep_b = faces_outside(b, a);
        debug!(
            kept_a = keep_a.len(),
            kept_b = keep_b.len(),
            "Classified union faces"
        );

        let mut result = Mesh::new();
        result.append(&subset(a, &keep_a));
        result.append(&subset(b, &keep_b));
        Ok(result)
    }
}

fn boxes_overlap(
    a: &(Point3<f64>, Point3<f64>),
    b: &(Point3<f64>, Point3<f64>),
    tolerance: f64,
) -> bool {
    (0..3).all(|k| a.0[k] <= b.1[k] + tolerance && b.0[k] <= a.1[k] + tolerance)
}

/// Index of the first face of `faces_of` pierced by an edge of `edges_of`.
fn first_crossing(edges_of: &Mesh, faces_of: &Mesh) -> Option<usize> {
    let bounds = faces_of.bounds()?;
    let triangles: Vec<(Triangle, (Point3<f64>, Point3<f64>))> = faces_of
        .triangles()
        .map(|t| (t, triangle_box(&t)))
        .collect();

    for face in &edges_of.faces {
        for k in 0..3 {
            let (i, j) = (face[k], face[(k + 1) % 3]);
            // Each shared edge appears twice, test it once
            if i > j {
                continue;
            }
            let p = edges_of.vertices[i as usize].position;
            let q = edges_of.vertices[j as usize].position;
            let edge_box = (p.inf(&q), p.sup(&q));
            if !boxes_overlap(&edge_box, &bounds, 0.0) {
                continue;
            }
            let hit = triangles.iter().position(|(tri, tri_box)| {
                boxes_overlap(&edge_box, tri_box, 0.0) && segment_crosses(&p, &q, tri)
            });
            if hit.is_some() {
                return hit;
            }
        }
    }
    None
}

fn triangle_box(t: &Triangle) -> (Point3<f64>, Point3<f64>) {
    (t.v0.inf(&t.v1).inf(&t.v2), t.v0.sup(&t.v1).sup(&t.v2))
}

fn faces_outside(mesh: &Mesh, other: &Mesh) -> Vec<usize> {
    let Some((min, max)) = other.bounds() else {
        return (0..mesh.face_count()).collect();
    };
    mesh.triangles()
        .enumerate()
        .filter(|(_, tri)| {
            let c = tri.centroid();
            let in_box = (0..3).all(|k| c[k] >= min[k] && c[k] <= max[k]);
            !in_box || !point_inside(other, &c)
        })
        .map(|(i, _)| i)
        .collect()
}

fn subset(mesh: &Mesh, faces: &[usize]) -> Mesh {
    let mut remap = vec![u32::MAX; mesh.vertex_count()];
    let mut result = Mesh::with_capacity(mesh.vertex_count(), faces.len());
    for &fi in faces {
        let mut new_face = [0u32; 3];
        for (k, &v) in mesh.faces[fi].iter().enumerate() {
            if remap[v as usize] == u32::MAX {
                remap[v as usize] = result.vertices.len() as u32;
                result.vertices.push(mesh.vertices[v as usize].clone());
            }
            new_face[k] = remap[v as usize];
        }
        result.faces.push(new_face);
    }
    result
}
