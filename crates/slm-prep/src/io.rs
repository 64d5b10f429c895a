//! STL mesh I/O.
//!
//! Binary and ASCII STL are read through `stl_io`, which also merges
//! coincident vertices so the loaded mesh carries shared-edge topology.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::error::{PrepError, PrepResult};
use crate::{Mesh, Vertex};

/// Load a mesh from an STL file (binary or ASCII).
pub fn load_stl(path: &Path) -> PrepResult<Mesh> {
    info!("Loading mesh from {:?}", path);

    let file = File::open(path).map_err(|e| PrepError::io_read(path, e))?;
    let mut reader = BufReader::new(file);

    let stl = stl_io::read_stl(&mut reader).map_err(|e| PrepError::MeshParse {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?;

    debug!(
        "STL contains {} vertices, {} triangles",
        stl.vertices.len(),
        stl.faces.len()
    );

    let mut mesh = Mesh::with_capacity(stl.vertices.len(), stl.faces.len());

    for v in &stl.vertices {
        mesh.vertices.push(Vertex::from_coords(
            v.0[0] as f64,
            v.0[1] as f64,
            v.0[2] as f64,
        ));
    }

    let mut skipped = 0usize;
    for face in &stl.faces {
        let indices = [
            face.vertices[0] as u32,
            face.vertices[1] as u32,
            face.vertices[2] as u32,
        ];

        // Faces collapsed by vertex merging carry no area
        if indices[0] != indices[1] && indices[1] != indices[2] && indices[0] != indices[2] {
            mesh.faces.push(indices);
        } else {
            skipped += 1;
        }
    }

    if skipped > 0 {
        warn!(skipped, "Dropped degenerate STL facets");
    }

    if mesh.is_empty() {
        return Err(PrepError::EmptyMesh {
            details: format!("{} has no usable facets", path.display()),
        });
    }

    if let Some((min, max)) = mesh.bounds() {
        info!(
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "Loaded mesh"
        );
        debug!(
            "Bounding box: [{:.3}, {:.3}, {:.3}] to [{:.3}, {:.3}, {:.3}]",
            min.x, min.y, min.z, max.x, max.y, max.z
        );
    }

    Ok(mesh)
}

/// Save a mesh as binary STL.
pub fn save_stl(mesh: &Mesh, path: &Path) -> PrepResult<()> {
    info!("Saving mesh to {:?}", path);

    let file = File::create(path).map_err(|e| PrepError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);

    let triangles: Vec<stl_io::Triangle> = mesh
        .triangles()
        .map(|tri| {
            let n = tri.normal().unwrap_or_else(Vector3::zeros);
            let (v0, v1, v2) = (tri.v0, tri.v1, tri.v2);
            stl_io::Triangle {
                normal: stl_io::Normal::new([n.x as f32, n.y as f32, n.z as f32]),
                vertices: [
                    stl_io::Vertex::new([v0.x as f32, v0.y as f32, v0.z as f32]),
                    stl_io::Vertex::new([v1.x as f32, v1.y as f32, v1.z as f32]),
                    stl_io::Vertex::new([v2.x as f32, v2.y as f32, v2.z as f32]),
                ],
            }
        })
        .collect();

    stl_io::write_stl(&mut writer, triangles.iter()).map_err(|e| PrepError::io_write(path, e))?;
    writer.flush().map_err(|e| PrepError::io_write(path, e))?;

    info!("Saved {} triangles to {:?}", mesh.face_count(), path);

    Ok(())
}

impl Mesh {
    /// Load a mesh from an STL file.
    pub fn load(path: impl AsRef<Path>) -> PrepResult<Mesh> {
        load_stl(path.as_ref())
    }

    /// Save the mesh as binary STL.
    pub fn save(&self, path: impl AsRef<Path>) -> PrepResult<()> {
        save_stl(self, path.as_ref())
    }
}
