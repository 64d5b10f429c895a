//! Manufacturing parameter report.
//!
//! The report combines values measured over the complete set of machine
//! files (layer count, XY bounds) with process defaults and caller overrides.
//! It is written as `[KEY]` / value line pairs in a fixed key order.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{HatchConfig, ParametersConfig};
use crate::error::{PrepError, PrepResult};
use crate::layers::parse_layer_file_name;
use crate::machine::read_machine_file;
use crate::tracing_ext::OperationTimer;
use crate::LayerBounds;

/// Process settings that cannot be measured from the layers, in report order.
const MACHINE_DEFAULTS: [(&str, &str); 15] = [
    ("HATCH POWER 1", "40"),
    ("HATCH SPEED 1", "170"),
    ("VBPP1", "1"),
    ("MAGNIFICATION 1", "1.0"),
    ("HATCH POWER 2", "42"),
    ("HATCH SPEED 2", "1202"),
    ("VBPP2", "2"),
    ("MAGNIFICATION 2", "1.0"),
    ("HATCH POWER 3", "43"),
    ("HATCH SPEED 3", "1203"),
    ("VBPP3", "3"),
    ("MAGNIFICATION 3", "1.0"),
    ("NUMBER OF PASSES", "1"),
    ("CONTOUR POWER", "11"),
    ("CONTOUR SPEED", "1001"),
];

/// File name of the report for a part.
pub fn report_file_name(part_name: &str) -> String {
    format!("{}_machine_parameters.txt", part_name)
}

/// Ordered key/value settings of one build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ManufacturingParameters {
    entries: Vec<(String, String)>,
}

impl ManufacturingParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the value of `key` in place, or append it as a new key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as `[KEY]\nvalue\n` records.
    pub fn to_report(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push('[');
            out.push_str(key);
            out.push_str("]\n");
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    /// Parse a report written by [`to_report`](Self::to_report).
    pub fn from_report(text: &str, path: &Path) -> PrepResult<Self> {
        let mut params = Self::new();
        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
        while let Some((i, line)) = lines.next() {
            let key = line
                .trim()
                .strip_prefix('[')
                .and_then(|l| l.strip_suffix(']'))
                .ok_or_else(|| PrepError::malformed(path, Some(i + 1), "expected a [KEY] line"))?;
            let (_, value) = lines
                .next()
                .ok_or_else(|| PrepError::malformed(path, Some(i + 1), format!("no value for [{}]", key)))?;
            params.set(key, value.trim());
        }
        Ok(params)
    }
}

/// Machine files of one model, ordered by layer index.
#[derive(Debug, Clone)]
pub struct LayerScan {
    pub model: String,
    pub files: Vec<(usize, PathBuf)>,
}

/// Model names that have layer files with this extension in `dir`.
pub fn models_in(dir: &Path, extension: &str) -> PrepResult<Vec<String>> {
    let mut models: Vec<String> = read_names(dir)?
        .iter()
        .filter_map(|name| parse_layer_file_name(name, extension).map(|(m, _)| m.to_string()))
        .collect();
    models.sort();
    models.dedup();
    Ok(models)
}

fn read_names(dir: &Path) -> PrepResult<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| PrepError::io_read(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PrepError::io_read(dir, e))?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

/// Collect the layer files of `model` and check that none is missing.
///
/// Indices must run from 1 to the larger of the highest index found and
/// `expected` without gaps.
pub fn scan_layer_files(
    dir: &Path,
    model: &str,
    extension: &str,
    expected: Option<usize>,
) -> PrepResult<LayerScan> {
    let mut files: Vec<(usize, PathBuf)> = read_names(dir)?
        .into_iter()
        .filter_map(|name| {
            let (found, index) = parse_layer_file_name(&name, extension)?;
            (found == model).then(|| (index, dir.join(&name)))
        })
        .collect();
    files.sort_by_key(|(index, _)| *index);
    files.dedup_by_key(|(index, _)| *index);

    let highest = files.last().map(|(i, _)| *i).unwrap_or(0);
    let last = highest.max(expected.unwrap_or(0)).max(1);
    let mut present = files.iter().map(|(i, _)| *i).peekable();
    for index in 1..=last {
        if present.next_if_eq(&index).is_none() {
            return Err(PrepError::MissingLayerFile {
                index,
                dir: dir.to_path_buf(),
            });
        }
    }

    Ok(LayerScan {
        model: model.to_string(),
        files,
    })
}

/// Values measured over a layer set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerStats {
    pub layer_count: usize,
    pub segments: usize,
    pub bounds: LayerBounds,
}

/// Read every machine file and measure the set.
pub fn measure_layers(scan: &LayerScan) -> PrepResult<LayerStats> {
    let per_layer: Vec<(usize, LayerBounds)> = scan
        .files
        .par_iter()
        .map(|(_, path)| -> PrepResult<(usize, LayerBounds)> {
            let segments = read_machine_file(path)?;
            Ok((segments.len(), LayerBounds::of_segments(&segments)))
        })
        .collect::<PrepResult<_>>()?;

    let mut bounds = LayerBounds::empty();
    let mut segments = 0;
    for (count, layer) in &per_layer {
        segments += count;
        bounds.merge(layer);
    }
    Ok(LayerStats {
        layer_count: scan.files.len(),
        segments,
        bounds,
    })
}

fn number(value: f64) -> String {
    format!("{:?}", value)
}

/// Build the parameter set for a scanned layer set.
///
/// Defaults come first in report order; `config.overrides` then replace
/// values in place, and unknown override keys are appended.
pub fn synthesize(
    scan: &LayerScan,
    layer_thickness: f64,
    hatch: &HatchConfig,
    config: &ParametersConfig,
) -> PrepResult<ManufacturingParameters> {
    let _timer = OperationTimer::with_items("parameters", scan.files.len());
    let stats = measure_layers(scan)?;

    let bounds = if stats.bounds.is_empty() {
        warn!(model = %scan.model, "No geometry in any layer, writing a zero bounding box");
        LayerBounds {
            min_x: 0.0,
            max_x: 0.0,
            min_y: 0.0,
            max_y: 0.0,
        }
    } else {
        stats.bounds
    };

    let part_name = config.part_name.clone().unwrap_or_else(|| scan.model.clone());
    let mut params = ManufacturingParameters::new();
    params.set("PART NAME", part_name);
    params.set("MINX", number(bounds.min_x));
    params.set("MAXX", number(bounds.max_x));
    params.set("MINY", number(bounds.min_y));
    params.set("MAXY", number(bounds.max_y));
    params.set("NUMBER OF LAYERS", stats.layer_count.to_string());
    params.set("LAYER THICKNESS", number(layer_thickness));
    params.set("HATCH ANGLE", number(hatch.angle));
    params.set("HATCH ANGLE INCREMENT", number(hatch.angle_increment));
    for (key, value) in MACHINE_DEFAULTS {
        params.set(key, value);
    }
    for (key, value) in &config.overrides {
        params.set(key.as_str(), value.as_str());
    }

    info!(
        model = %scan.model,
        layers = stats.layer_count,
        segments = stats.segments,
        "Parameters synthesized"
    );
    Ok(params)
}

/// Write the report next to the machine directory, returning its path.
pub fn write_report(params: &ManufacturingParameters, dir: &Path) -> PrepResult<PathBuf> {
    let part = params.get("PART NAME").unwrap_or("part");
    std::fs::create_dir_all(dir).map_err(|e| PrepError::io_write(dir, e))?;
    let path = dir.join(report_file_name(part));
    std::fs::write(&path, params.to_report()).map_err(|e| PrepError::io_write(&path, e))?;
    info!(path = %path.display(), keys = params.len(), "Parameter report written");
    Ok(path)
}
