//! Part placement on the build plate.

use nalgebra::{Rotation3, Vector3};
use tracing::debug;

use crate::Mesh;
use crate::config::PartConfig;

/// Rotate (X, then Y, then Z), scale, then optionally drop the part onto Z = 0.
pub fn place_part(mesh: &mut Mesh, part: &PartConfig) {
    let [rx, ry, rz] = part.rotation_deg;
    if rx != 0.0 || ry != 0.0 || rz != 0.0 {
        let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), rz.to_radians())
            * Rotation3::from_axis_angle(&Vector3::y_axis(), ry.to_radians())
            * Rotation3::from_axis_angle(&Vector3::x_axis(), rx.to_radians());
        for vertex in &mut mesh.vertices {
            vertex.position = rotation * vertex.position;
        }
        debug!(rx, ry, rz, "Rotated part");
    }

    if part.scale != 1.0 {
        mesh.scale(part.scale);
        debug!(scale = part.scale, "Scaled part");
    }

    if part.drop_to_platform {
        drop_to_platform(mesh);
    }
}

/// Translate the mesh so its lowest point sits at Z = 0.
pub fn drop_to_platform(mesh: &mut Mesh) {
    if let Some((min, _)) = mesh.bounds() {
        mesh.translate(Vector3::new(0.0, 0.0, -min.z));
    }
}
