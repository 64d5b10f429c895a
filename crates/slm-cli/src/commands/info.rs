//! slm info command - describe a mesh, a layer set or a machine directory.

use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde::Serialize;
use slm_prep::layers::has_manifest;
use slm_prep::params::{measure_layers, models_in, scan_layer_files};
use slm_prep::{LayerSet, Mesh, check_integrity};

use crate::commands::load_config;
use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PathInfo {
    Mesh(MeshInfo),
    LayerSet(LayerSetInfo),
    Machine(MachineInfo),
}

#[derive(Serialize)]
struct MeshInfo {
    path: String,
    vertices: usize,
    faces: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounds: Option<[[f64; 3]; 2]>,
    volume: f64,
    surface_area: f64,
    watertight: bool,
    sound: bool,
}

#[derive(Serialize)]
struct LayerSetInfo {
    path: String,
    kind: String,
    model: String,
    layers: usize,
    layer_thickness: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    z_range: Option<[f64; 2]>,
}

#[derive(Serialize)]
struct MachineInfo {
    path: String,
    models: Vec<MachineModelInfo>,
}

#[derive(Serialize)]
struct MachineModelInfo {
    model: String,
    layers: usize,
    segments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounds: Option<[f64; 4]>,
}

pub fn run(path: &Path, cli: &Cli) -> Result<()> {
    let info = if path.is_file() {
        PathInfo::Mesh(mesh_info(path)?)
    } else if has_manifest(path) {
        PathInfo::LayerSet(layer_set_info(path)?)
    } else if path.is_dir() {
        PathInfo::Machine(machine_info(path, cli)?)
    } else {
        bail!("{:?} is neither a mesh file nor a directory", path);
    };

    match cli.format {
        OutputFormat::Json => output::print(&info, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                print_text(&info);
            }
        }
    }
    Ok(())
}

fn mesh_info(path: &Path) -> Result<MeshInfo> {
    let mesh = Mesh::load(path).with_context(|| format!("Failed to load mesh from {:?}", path))?;
    let integrity = check_integrity(&mesh);
    Ok(MeshInfo {
        path: path.display().to_string(),
        vertices: mesh.vertex_count(),
        faces: mesh.face_count(),
        bounds: mesh
            .bounds()
            .map(|(min, max)| [[min.x, min.y, min.z], [max.x, max.y, max.z]]),
        volume: mesh.volume(),
        surface_area: mesh.surface_area(),
        watertight: integrity.is_watertight(),
        sound: integrity.is_sound(),
    })
}

fn layer_set_info(path: &Path) -> Result<LayerSetInfo> {
    let set = LayerSet::open(path).with_context(|| format!("Failed to open layer set {:?}", path))?;
    let entries = set.entries();
    let z_range = match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => Some([first.z, last.z]),
        _ => None,
    };
    Ok(LayerSetInfo {
        path: path.display().to_string(),
        kind: set.kind().to_string(),
        model: set.model().to_string(),
        layers: set.len(),
        layer_thickness: set.manifest.layer_thickness,
        z_range,
    })
}

fn machine_info(path: &Path, cli: &Cli) -> Result<MachineInfo> {
    let extension = load_config(cli)?.machine.extension;
    let mut models = Vec::new();
    for model in models_in(path, &extension)? {
        let scan = scan_layer_files(path, &model, &extension, None)?;
        let stats = measure_layers(&scan)?;
        let b = stats.bounds;
        models.push(MachineModelInfo {
            model,
            layers: stats.layer_count,
            segments: stats.segments,
            bounds: (!b.is_empty()).then_some([b.min_x, b.max_x, b.min_y, b.max_y]),
        });
    }
    Ok(MachineInfo {
        path: path.display().to_string(),
        models,
    })
}

fn print_text(info: &PathInfo) {
    match info {
        PathInfo::Mesh(m) => {
            println!("{}", "Mesh Information".bold().underline());
            println!("  {}: {}", "File".cyan(), m.path);
            println!("  {}: {}", "Vertices".cyan(), m.vertices);
            println!("  {}: {}", "Faces".cyan(), m.faces);
            if let Some([min, max]) = m.bounds {
                println!(
                    "  {}: ({:.2}, {:.2}, {:.2}) to ({:.2}, {:.2}, {:.2})",
                    "Bounds".cyan(),
                    min[0],
                    min[1],
                    min[2],
                    max[0],
                    max[1],
                    max[2]
                );
            }
            println!("  {}: {:.2} mm³", "Volume".cyan(), m.volume);
            println!("  {}: {:.2} mm²", "Surface area".cyan(), m.surface_area);
            println!(
                "  {}: {}",
                "Watertight".cyan(),
                if m.watertight { "yes".green() } else { "no".red() }
            );
            println!(
                "  {}: {}",
                "Consistent winding".cyan(),
                if m.sound { "yes".green() } else { "no".red() }
            );
        }
        PathInfo::LayerSet(s) => {
            println!("{}", "Layer Set".bold().underline());
            println!("  {}: {}", "Directory".cyan(), s.path);
            println!("  {}: {}", "Kind".cyan(), s.kind);
            println!("  {}: {}", "Model".cyan(), s.model);
            println!("  {}: {}", "Layers".cyan(), s.layers);
            println!("  {}: {} mm", "Layer thickness".cyan(), s.layer_thickness);
            if let Some([lo, hi]) = s.z_range {
                println!("  {}: {:.3} to {:.3} mm", "Z range".cyan(), lo, hi);
            }
        }
        PathInfo::Machine(d) => {
            println!("{}", "Machine Records".bold().underline());
            println!("  {}: {}", "Directory".cyan(), d.path);
            if d.models.is_empty() {
                println!("  {}", "No layer files found".yellow());
            }
            for m in &d.models {
                println!("  {}: {} layers, {} segments", m.model.cyan(), m.layers, m.segments);
                if let Some([min_x, max_x, min_y, max_y]) = m.bounds {
                    println!(
                        "    X {:.3} to {:.3}, Y {:.3} to {:.3}",
                        min_x, max_x, min_y, max_y
                    );
                }
            }
        }
    }
}
