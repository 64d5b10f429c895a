//! Mesh integrity checks.
//!
//! Support synthesis and the boolean union rely on a closed mesh whose faces
//! all wind the same way. Every undirected edge of such a mesh is used by
//! exactly two faces, once in each direction.

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::Mesh;
use crate::error::{PrepError, PrepResult};

/// Integrity report for a mesh.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    /// Edges used by exactly one face.
    pub boundary_edge_count: usize,

    /// Edges used by more than two faces.
    pub non_manifold_edge_count: usize,

    /// Edges traversed twice in the same direction (neighbouring faces wound oppositely).
    pub inconsistent_edge_count: usize,

    /// Faces referencing an out-of-range vertex.
    pub invalid_face_count: usize,

    /// Signed volume (positive = outward normals).
    pub signed_volume: f64,
}

impl IntegrityReport {
    /// No boundary and no non-manifold edges.
    pub fn is_watertight(&self) -> bool {
        self.boundary_edge_count == 0 && self.non_manifold_edge_count == 0
    }

    /// Every shared edge is traversed once in each direction.
    pub fn is_consistently_wound(&self) -> bool {
        self.inconsistent_edge_count == 0
    }

    /// True when the mesh can go through support synthesis.
    pub fn is_sound(&self) -> bool {
        self.invalid_face_count == 0 && self.is_watertight() && self.is_consistently_wound()
    }
}

impl std::fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} boundary edges, {} non-manifold edges, {} inconsistently wound edges, {} invalid faces",
            self.boundary_edge_count,
            self.non_manifold_edge_count,
            self.inconsistent_edge_count,
            self.invalid_face_count
        )
    }
}

/// Count edge usage and winding consistency.
pub fn check_integrity(mesh: &Mesh) -> IntegrityReport {
    let vertex_count = mesh.vertex_count() as u32;
    let mut report = IntegrityReport::default();

    // (min, max) -> (uses in min->max direction, uses in max->min direction)
    let mut edges: HashMap<(u32, u32), (u32, u32)> = HashMap::with_capacity(mesh.face_count() * 2);

    for face in &mesh.faces {
        if face.iter().any(|&v| v >= vertex_count) {
            report.invalid_face_count += 1;
            continue;
        }
        for k in 0..3 {
            let a = face[k];
            let b = face[(k + 1) % 3];
            let entry = edges.entry((a.min(b), a.max(b))).or_insert((0, 0));
            if a < b {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }
    }

    for &(forward, backward) in edges.values() {
        match forward + backward {
            1 => report.boundary_edge_count += 1,
            2 => {
                if forward != 1 {
                    report.inconsistent_edge_count += 1;
                }
            }
            _ => report.non_manifold_edge_count += 1,
        }
    }

    if report.invalid_face_count == 0 {
        report.signed_volume = mesh.signed_volume();
    }

    debug!(%report, "Integrity check");
    report
}

/// Fail with [`PrepError::MeshIntegrity`] unless the mesh is closed and consistently wound.
pub fn ensure_sound(mesh: &Mesh) -> PrepResult<IntegrityReport> {
    if mesh.is_empty() {
        return Err(PrepError::EmptyMesh {
            details: "mesh has no vertices or faces".to_string(),
        });
    }

    let report = check_integrity(mesh);
    if !report.is_sound() {
        warn!(%report, "Mesh failed integrity check");
        return Err(PrepError::mesh_integrity(report.to_string()));
    }
    Ok(report)
}

/// Flip every face of a closed mesh whose normals point inward.
///
/// Returns true when the mesh was flipped.
pub fn orient_outward(mesh: &mut Mesh) -> bool {
    if mesh.is_inside_out() {
        info!("Mesh is inside-out, flipping all faces");
        mesh.flip_faces();
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_meshes::cube;

    #[test]
    fn test_cube_is_sound() {
        let report = check_integrity(&cube(1.0));
        assert!(report.is_sound());
        assert!(report.signed_volume > 0.0);
        assert!(ensure_sound(&cube(1.0)).is_ok());
    }

    #[test]
    fn test_open_mesh_is_rejected() {
        let mut mesh = cube(1.0);
        mesh.faces.pop();
        let report = check_integrity(&mesh);
        assert_eq!(report.boundary_edge_count, 3);
        assert!(!report.is_watertight());

        let err = ensure_sound(&mesh).unwrap_err();
        assert!(matches!(err, PrepError::MeshIntegrity { .. }));
    }

    #[test]
    fn test_single_flipped_face_is_inconsistent() {
        let mut mesh = cube(1.0);
        mesh.faces[3].swap(1, 2);
        let report = check_integrity(&mesh);
        assert!(report.is_watertight());
        assert_eq!(report.inconsistent_edge_count, 3);
        assert!(!report.is_sound());
    }

    #[test]
    fn test_orient_outward() {
        let mut mesh = cube(1.0);
        mesh.flip_faces();
        assert!(check_integrity(&mesh).is_sound());
        assert!(orient_outward(&mut mesh));
        assert!(mesh.signed_volume() > 0.0);
        assert!(!orient_outward(&mut mesh));
    }
}
