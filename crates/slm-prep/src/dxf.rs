//! Layer exchange files.
//!
//! Layer files are DXF drawings read and written through the `dxf` crate.
//! Raw layers carry their contours as closed `LWPOLYLINE`s on layer
//! `CONTOUR` and their fill as `LINE`s on layer `HATCH`; cleaned layers are
//! plain `LINE`s on layer `0`. The reader also understands heavy
//! `POLYLINE`s, `ARC`s and `CIRCLE`s, since layer files may come from other
//! CAD tools.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use dxf::entities::{Entity, EntityType, Line, LwPolyline};
use dxf::enums::AcadVersion;
use dxf::{Drawing, DxfError, LwPolylineVertex};
use nalgebra::Point2;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{PrepError, PrepResult};
use crate::layers::{LayerSet, LayerSetKind};
use crate::slice::Layer;
use crate::tracing_ext::{OperationTimer, log_layer_set_written};
use crate::{Contour, Segment};

/// DXF layer holding contour polylines.
pub const CONTOUR_LAYER: &str = "CONTOUR";
/// DXF layer holding fill vectors.
pub const HATCH_LAYER: &str = "HATCH";
/// DXF layer holding cleaned segments.
pub const CLEAN_LAYER: &str = "0";

/// A polyline vertex with the bulge of the edge that starts at it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolyVertex {
    pub point: Point2<f64>,
    /// Tangent of a quarter of the included arc angle; 0 for a straight edge.
    pub bulge: f64,
}

/// Geometric entities read from a layer file.
#[derive(Debug, Clone, PartialEq)]
pub enum DxfEntity {
    Line {
        start: Point2<f64>,
        end: Point2<f64>,
    },
    Polyline {
        vertices: Vec<PolyVertex>,
        closed: bool,
    },
    /// Counter-clockwise arc from `start_angle` to `end_angle`, in degrees.
    Arc {
        center: Point2<f64>,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    },
    Circle {
        center: Point2<f64>,
        radius: f64,
    },
}

fn new_drawing() -> Drawing {
    let mut drawing = Drawing::new();
    // LWPOLYLINE needs R14 or later
    drawing.header.version = AcadVersion::R2000;
    drawing
}

fn on_layer(specific: EntityType, layer: &str) -> Entity {
    let mut entity = Entity::new(specific);
    entity.common.layer = layer.to_string();
    entity
}

fn line_entity(segment: &Segment, layer: &str) -> Entity {
    let line = Line::new(
        dxf::Point::new(segment.start.x, segment.start.y, 0.0),
        dxf::Point::new(segment.end.x, segment.end.y, 0.0),
    );
    on_layer(EntityType::Line(line), layer)
}

fn contour_entity(contour: &Contour) -> Entity {
    let mut polyline = LwPolyline::default();
    polyline.set_is_closed(true);
    polyline.vertices = contour
        .points
        .iter()
        .map(|p| LwPolylineVertex {
            x: p.x,
            y: p.y,
            ..Default::default()
        })
        .collect();
    on_layer(EntityType::LwPolyline(polyline), CONTOUR_LAYER)
}

/// Build the drawing of a sliced layer.
pub fn layer_drawing(layer: &Layer) -> Drawing {
    let mut drawing = new_drawing();
    for contour in &layer.contours {
        drawing.add_entity(contour_entity(contour));
    }
    for segment in &layer.fill {
        drawing.add_entity(line_entity(segment, HATCH_LAYER));
    }
    drawing
}

/// Build the drawing of cleaned segments, all `LINE`s.
pub fn segments_drawing(segments: &[Segment]) -> Drawing {
    let mut drawing = new_drawing();
    for segment in segments {
        drawing.add_entity(line_entity(segment, CLEAN_LAYER));
    }
    drawing
}

fn save(drawing: &Drawing, path: &Path) -> PrepResult<()> {
    let file = File::create(path).map_err(|e| PrepError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    drawing.save(&mut writer).map_err(|e| match e {
        DxfError::IoError(io) => PrepError::io_write(path, io),
        other => PrepError::io_write(path, std::io::Error::other(other.to_string())),
    })?;
    writer.flush().map_err(|e| PrepError::io_write(path, e))
}

/// Write a sliced layer to `path`.
pub fn write_layer_file(layer: &Layer, path: &Path) -> PrepResult<()> {
    save(&layer_drawing(layer), path)
}

/// Write cleaned segments to `path`.
pub fn write_segments_file(segments: &[Segment], path: &Path) -> PrepResult<()> {
    save(&segments_drawing(segments), path)
}

/// Write sliced layers as a raw layer set in `dir`.
///
/// Empty layers are written too, so indices stay contiguous.
pub fn write_raw_layer_set(
    layers: &[Layer],
    dir: &Path,
    model: &str,
    layer_thickness: f64,
) -> PrepResult<LayerSet> {
    let _timer = OperationTimer::with_items("export", layers.len());
    let mut set = LayerSet::create(dir, LayerSetKind::Raw, model, layer_thickness)?;
    layers
        .par_iter()
        .try_for_each(|layer| write_layer_file(layer, &set.layer_path(layer.index, "dxf")))?;
    for layer in layers {
        set.record(layer.index, layer.z, "dxf");
    }
    set.save_manifest()?;
    log_layer_set_written("slice", dir, set.len());
    Ok(set)
}

/// Read every supported entity from a layer file.
pub fn read_layer_file(path: &Path) -> PrepResult<Vec<DxfEntity>> {
    let file = File::open(path).map_err(|e| PrepError::io_read(path, e))?;
    let drawing = Drawing::load(&mut BufReader::new(file)).map_err(|e| match e {
        DxfError::IoError(io) => PrepError::io_read(path, io),
        other => PrepError::malformed(path, None, other.to_string()),
    })?;
    let entities = drawing_entities(&drawing, path)?;
    debug!(
        path = %path.display(),
        entities = entities.len(),
        "Read layer file"
    );
    Ok(entities)
}

fn point(p: &dxf::Point) -> Point2<f64> {
    Point2::new(p.x, p.y)
}

/// Convert the line-like entities of a drawing.
///
/// Non-finite coordinates are rejected; `path` is only used in error
/// messages.
pub fn drawing_entities(drawing: &Drawing, path: &Path) -> PrepResult<Vec<DxfEntity>> {
    let mut entities = Vec::new();
    for entity in drawing.entities() {
        let converted = match &entity.specific {
            EntityType::Line(line) => DxfEntity::Line {
                start: point(&line.p1),
                end: point(&line.p2),
            },
            EntityType::LwPolyline(polyline) => DxfEntity::Polyline {
                vertices: polyline
                    .vertices
                    .iter()
                    .map(|v| PolyVertex {
                        point: Point2::new(v.x, v.y),
                        bulge: v.bulge,
                    })
                    .collect(),
                closed: polyline.is_closed(),
            },
            EntityType::Polyline(polyline) => DxfEntity::Polyline {
                vertices: polyline
                    .vertices()
                    .map(|v| PolyVertex {
                        point: point(&v.location),
                        bulge: v.bulge,
                    })
                    .collect(),
                closed: polyline.is_closed(),
            },
            EntityType::Arc(arc) => DxfEntity::Arc {
                center: point(&arc.center),
                radius: arc.radius,
                start_angle: arc.start_angle,
                end_angle: arc.end_angle,
            },
            EntityType::Circle(circle) => DxfEntity::Circle {
                center: point(&circle.center),
                radius: circle.radius,
            },
            _ => {
                debug!(layer = %entity.common.layer, "Ignoring unsupported entity");
                continue;
            }
        };
        if !converted.is_finite() {
            return Err(PrepError::malformed(
                path,
                None,
                format!("non-finite coordinate in {}", converted.kind()),
            ));
        }
        entities.push(converted);
    }
    Ok(entities)
}

impl DxfEntity {
    /// DXF entity name.
    pub fn kind(&self) -> &'static str {
        match self {
            DxfEntity::Line { .. } => "LINE",
            DxfEntity::Polyline { .. } => "POLYLINE",
            DxfEntity::Arc { .. } => "ARC",
            DxfEntity::Circle { .. } => "CIRCLE",
        }
    }

    fn is_finite(&self) -> bool {
        let finite = |p: &Point2<f64>| p.x.is_finite() && p.y.is_finite();
        match self {
            DxfEntity::Line { start, end } => finite(start) && finite(end),
            DxfEntity::Polyline { vertices, .. } => vertices
                .iter()
                .all(|v| finite(&v.point) && v.bulge.is_finite()),
            DxfEntity::Arc {
                center,
                radius,
                start_angle,
                end_angle,
            } => finite(center) && radius.is_finite() && start_angle.is_finite() && end_angle.is_finite(),
            DxfEntity::Circle { center, radius } => finite(center) && radius.is_finite(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dxf::entities::{Arc, Circle};
    use tempfile::TempDir;

    fn square_layer() -> Layer {
        Layer {
            index: 1,
            z: 0.5,
            contours: vec![Contour::new(vec![
                Point2::new(0.0, 0.0),
                Point2::new(2.0, 0.0),
                Point2::new(2.0, 2.0),
                Point2::new(0.0, 2.0),
            ])],
            fill: vec![Segment::from_coords(0.1, 1.0, 1.9, 1.0)],
            hatch_angle: Some(0.0),
        }
    }

    #[test]
    fn test_written_layer_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("square.dxf");
        write_layer_file(&square_layer(), &path).unwrap();

        let entities = read_layer_file(&path).unwrap();
        assert_eq!(entities.len(), 2);
        match &entities[0] {
            DxfEntity::Polyline { vertices, closed } => {
                assert!(closed);
                assert_eq!(vertices.len(), 4);
                assert_relative_eq!(vertices[2].point, Point2::new(2.0, 2.0), epsilon = 1e-9);
                assert!(vertices.iter().all(|v| v.bulge == 0.0));
            }
            other => panic!("expected polyline, got {other:?}"),
        }
        match &entities[1] {
            DxfEntity::Line { start, end } => {
                assert_relative_eq!(*start, Point2::new(0.1, 1.0), epsilon = 1e-9);
                assert_relative_eq!(*end, Point2::new(1.9, 1.0), epsilon = 1e-9);
            }
            other => panic!("expected line, got {other:?}"),
        }
    }

    #[test]
    fn test_layers_are_tagged() {
        let drawing = layer_drawing(&square_layer());
        let layers: Vec<&str> = drawing.entities().map(|e| e.common.layer.as_str()).collect();
        assert_eq!(layers, vec![CONTOUR_LAYER, HATCH_LAYER]);

        let clean = segments_drawing(&[Segment::from_coords(0.0, 0.0, 1.0, 0.0)]);
        assert!(clean.entities().all(|e| e.common.layer == CLEAN_LAYER));
    }

    #[test]
    fn test_empty_layer_is_valid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.dxf");
        write_layer_file(&Layer::empty(3, 1.0), &path).unwrap();
        assert!(read_layer_file(&path).unwrap().is_empty());
    }

    #[test]
    fn test_arc_circle_and_bulge_convert() {
        let mut drawing = Drawing::new();
        drawing.add_entity(Entity::new(EntityType::Arc(Arc::new(
            dxf::Point::new(1.0, 1.0, 0.0),
            2.0,
            0.0,
            90.0,
        ))));
        drawing.add_entity(Entity::new(EntityType::Circle(Circle::new(
            dxf::Point::new(5.0, 5.0, 0.0),
            0.5,
        ))));
        let mut bulged = LwPolyline::default();
        bulged.vertices = vec![
            LwPolylineVertex {
                x: 0.0,
                y: 0.0,
                bulge: 1.0,
                ..Default::default()
            },
            LwPolylineVertex {
                x: 2.0,
                y: 0.0,
                ..Default::default()
            },
        ];
        drawing.add_entity(Entity::new(EntityType::LwPolyline(bulged)));

        let entities = drawing_entities(&drawing, Path::new("layer.dxf")).unwrap();
        assert_eq!(entities.len(), 3);
        assert!(matches!(
            entities[0],
            DxfEntity::Arc { radius, end_angle, .. } if radius == 2.0 && end_angle == 90.0
        ));
        assert!(matches!(entities[1], DxfEntity::Circle { radius, .. } if radius == 0.5));
        match &entities[2] {
            DxfEntity::Polyline { vertices, closed } => {
                assert!(!closed);
                assert_eq!(vertices[0].bulge, 1.0);
                assert_eq!(vertices[1].bulge, 0.0);
            }
            other => panic!("expected polyline, got {other:?}"),
        }
    }

    #[test]
    fn test_heavy_polyline_from_other_tools() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("heavy.dxf");
        let text = "\
  0\nSECTION\n  2\nENTITIES\n\
  0\nPOLYLINE\n  8\nA\n 66\n1\n 70\n1\n\
  0\nVERTEX\n  8\nA\n 10\n0.0\n 20\n0.0\n 42\n1.0\n\
  0\nVERTEX\n  8\nA\n 10\n2.0\n 20\n0.0\n\
  0\nSEQEND\n  8\nA\n\
  0\nTEXT\n  8\nA\n  1\nignored\n\
  0\nENDSEC\n  0\nEOF\n";
        std::fs::write(&path, text).unwrap();

        let entities = read_layer_file(&path).unwrap();
        assert_eq!(entities.len(), 1);
        match &entities[0] {
            DxfEntity::Polyline { vertices, closed } => {
                assert!(closed);
                assert_eq!(vertices.len(), 2);
                assert_eq!(vertices[0].bulge, 1.0);
                assert_eq!(vertices[1].bulge, 0.0);
            }
            other => panic!("expected polyline, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_files() {
        let dir = TempDir::new().unwrap();
        let bad_number = dir.path().join("bad.dxf");
        std::fs::write(
            &bad_number,
            "  0\nSECTION\n  2\nENTITIES\n  0\nLINE\n 10\nabc\n 20\n0\n  0\nENDSEC\n  0\nEOF\n",
        )
        .unwrap();
        assert!(matches!(
            read_layer_file(&bad_number),
            Err(PrepError::MalformedLayerFile { .. })
        ));

        assert!(matches!(
            read_layer_file(&dir.path().join("missing.dxf")),
            Err(PrepError::IoRead { .. })
        ));
    }

    #[test]
    fn test_non_finite_coordinates_are_rejected() {
        let mut drawing = Drawing::new();
        drawing.add_entity(Entity::new(EntityType::Line(Line::new(
            dxf::Point::new(0.0, 0.0, 0.0),
            dxf::Point::new(f64::NAN, 1.0, 0.0),
        ))));
        assert!(matches!(
            drawing_entities(&drawing, Path::new("layer.dxf")),
            Err(PrepError::MalformedLayerFile { .. })
        ));
    }

    #[test]
    fn test_raw_layer_set_keeps_empty_layers() {
        let dir = TempDir::new().unwrap();
        let layers = vec![square_layer(), Layer::empty(2, 1.0)];
        let set = write_raw_layer_set(&layers, dir.path(), "plate", 0.5).unwrap();
        assert_eq!(set.len(), 2);

        let reopened = LayerSet::open_expecting(dir.path(), LayerSetKind::Raw).unwrap();
        assert_eq!(reopened.entries()[1].file, "plate_layer0002.dxf");
        assert_eq!(read_layer_file(&reopened.path_of(&reopened.entries()[0])).unwrap().len(), 2);
        assert!(read_layer_file(&reopened.path_of(&reopened.entries()[1])).unwrap().is_empty());
    }
}
