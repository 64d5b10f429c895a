//! Machine record encoding.
//!
//! A machine record is plain text with one `x1 y1 x2 y2` line per segment and
//! nothing else. The file extension is cosmetic; content never depends on it.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::MachineConfig;
use crate::dxf::read_layer_file;
use crate::error::{PrepError, PrepResult};
use crate::layers::{LayerSet, LayerSetKind, layer_file_name, remove_layer_files};
use crate::simplify::extract_segments;
use crate::tracing_ext::{OperationTimer, log_layer_set_written};
use crate::Segment;

/// Format a coordinate, never printing a negative zero.
fn coordinate(value: f64, precision: usize) -> String {
    let text = format!("{:.*}", precision, value);
    match text.strip_prefix('-') {
        Some(rest) if rest.bytes().all(|b| b == b'0' || b == b'.') => rest.to_string(),
        _ => text,
    }
}

/// Encode segments in order, one line each.
pub fn encode(segments: &[Segment], precision: usize) -> String {
    let mut out = String::with_capacity(segments.len() * (4 * (precision + 6)));
    for s in segments {
        out.push_str(&format!(
            "{} {} {} {}\n",
            coordinate(s.start.x, precision),
            coordinate(s.start.y, precision),
            coordinate(s.end.x, precision),
            coordinate(s.end.y, precision),
        ));
    }
    out
}

/// Parse a machine record. Fields may be separated by whitespace or commas.
pub fn parse_machine_record(text: &str, path: &Path) -> PrepResult<Vec<Segment>> {
    let mut segments = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line_number = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() != 4 {
            return Err(PrepError::malformed(
                path,
                Some(line_number),
                format!("expected 4 fields, found {}", fields.len()),
            ));
        }
        let mut values = [0.0f64; 4];
        for (slot, field) in values.iter_mut().zip(&fields) {
            *slot = field
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    PrepError::malformed(path, Some(line_number), format!("`{}` is not a finite number", field))
                })?;
        }
        segments.push(Segment::from_coords(values[0], values[1], values[2], values[3]));
    }
    Ok(segments)
}

/// Write a machine record file.
pub fn write_machine_file(segments: &[Segment], path: &Path, precision: usize) -> PrepResult<()> {
    std::fs::write(path, encode(segments, precision)).map_err(|e| PrepError::io_write(path, e))
}

/// Read and parse a machine record file.
pub fn read_machine_file(path: &Path) -> PrepResult<Vec<Segment>> {
    let text = std::fs::read_to_string(path).map_err(|e| PrepError::io_read(path, e))?;
    parse_machine_record(&text, path)
}

/// Machine files written for a layer set.
#[derive(Debug, Clone)]
pub struct EncodeOutcome {
    /// Written files in layer order.
    pub files: Vec<PathBuf>,
    pub segments: usize,
}

/// Encode every clean layer into `out_dir` as `{model}_layer{NNNN}.{extension}`.
///
/// Unlike cleanup, a clean layer that cannot be read aborts the stage: the
/// parameter report needs every machine file.
pub fn encode_layer_set(clean: &LayerSet, out_dir: &Path, config: &MachineConfig) -> PrepResult<EncodeOutcome> {
    if clean.kind() != LayerSetKind::Clean {
        return Err(PrepError::StageMismatch {
            expected: LayerSetKind::Clean.to_string(),
            found: clean.kind().to_string(),
            dir: clean.dir.clone(),
        });
    }
    let _timer = OperationTimer::with_items("encode", clean.len());
    std::fs::create_dir_all(out_dir).map_err(|e| PrepError::io_write(out_dir, e))?;
    // Files of layers that no longer exist would fill gaps in the set
    remove_layer_files(out_dir, clean.model(), Some(&config.extension))?;

    let written: Vec<(PathBuf, usize)> = clean
        .entries()
        .par_iter()
        .map(|entry| -> PrepResult<(PathBuf, usize)> {
            let entities = read_layer_file(&clean.path_of(entry))?;
            // Clean layers only hold lines, so no curve is approximated here
            let segments = extract_segments(&entities, f64::INFINITY);
            let path = out_dir.join(layer_file_name(clean.model(), entry.index, &config.extension));
            write_machine_file(&segments, &path, config.precision)?;
            debug!(index = entry.index, segments = segments.len(), "Encoded layer");
            Ok((path, segments.len()))
        })
        .collect::<PrepResult<_>>()?;

    let segments = written.iter().map(|(_, n)| n).sum();
    log_layer_set_written("encode", out_dir, written.len());
    info!(layers = written.len(), segments, "Machine records written");
    Ok(EncodeOutcome {
        files: written.into_iter().map(|(p, _)| p).collect(),
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_encode_format() {
        let segments = [
            Segment::from_coords(0.0, 0.0, 10.0, 0.0),
            Segment::from_coords(1.23456, -2.5, -0.0001, 3.0),
        ];
        assert_eq!(
            encode(&segments, 3),
            "0.000 0.000 10.000 0.000\n1.235 -2.500 0.000 3.000\n"
        );
        assert_eq!(encode(&[], 3), "");
    }

    #[test]
    fn test_parse_separators_and_blank_lines() {
        let text = "0 0 1 1\n\n  2.5,3.5 , 4,5\n1\t2\t3\t4\n";
        let segments = parse_machine_record(text, Path::new("m.txt")).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1], Segment::from_coords(2.5, 3.5, 4.0, 5.0));
    }

    #[test]
    fn test_parse_reports_line_number() {
        let text = "0 0 1 1\n0 0 1\n";
        match parse_machine_record(text, Path::new("m.txt")) {
            Err(PrepError::MalformedLayerFile { line, .. }) => assert_eq!(line, Some(2)),
            other => panic!("Expected malformed layer, got {:?}", other),
        }
        let text = "0 0 1 1\n\n0 0 1 nan\n";
        match parse_machine_record(text, Path::new("m.txt")) {
            Err(PrepError::MalformedLayerFile { line, .. }) => assert_eq!(line, Some(3)),
            other => panic!("Expected malformed layer, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_within_precision() {
        let segments = [
            Segment::from_coords(12.3456789, -7.0000004, 0.1, 99.9999),
            Segment::from_coords(-1.0, -1.0, 1.0, 1.0),
        ];
        let parsed = parse_machine_record(&encode(&segments, 4), Path::new("m.txt")).unwrap();
        for (a, b) in segments.iter().zip(&parsed) {
            assert_relative_eq!(a.start, b.start, epsilon = 0.5e-4 + 1e-12);
            assert_relative_eq!(a.end, b.end, epsilon = 0.5e-4 + 1e-12);
        }
    }

    #[test]
    fn test_encode_replaces_stale_machine_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut clean = LayerSet::create(dir.path().join("clean"), LayerSetKind::Clean, "part", 1.0).unwrap();
        for index in 1..=2 {
            let path = clean.layer_path(index, "dxf");
            crate::dxf::write_segments_file(&[Segment::from_coords(0.0, 0.0, 1.0, 0.0)], &path).unwrap();
            clean.record(index, index as f64, "dxf");
        }
        clean.save_manifest().unwrap();

        let out = dir.path().join("machine");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("part_layer0003.txt"), "0 0 1 1\n").unwrap();
        std::fs::write(out.join("part_layer0003.dat"), "0 0 1 1\n").unwrap();

        let outcome = encode_layer_set(&clean, &out, &MachineConfig::default()).unwrap();
        assert_eq!(outcome.files.len(), 2);
        assert_eq!(outcome.segments, 2);
        assert!(!out.join("part_layer0003.txt").exists());
        assert!(out.join("part_layer0003.dat").exists());
    }
}
