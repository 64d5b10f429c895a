//! Layer sets on disk.
//!
//! A layer set is a directory of per-layer files plus a `manifest.json`
//! recording what kind of layers it holds. Stages read the kind from the
//! manifest instead of guessing it from the directory name.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PrepError, PrepResult};

/// Manifest file name inside every layer set directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// What a layer set contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerSetKind {
    /// Slicer output: contours and fill as written by the slicer.
    Raw,
    /// Simplifier output: reduced straight segments only.
    Clean,
}

impl std::fmt::Display for LayerSetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerSetKind::Raw => write!(f, "raw"),
            LayerSetKind::Clean => write!(f, "clean"),
        }
    }
}

/// One layer file of a set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerEntry {
    /// 1-based layer index.
    pub index: usize,
    /// File name relative to the set directory.
    pub file: String,
    /// Plane height.
    pub z: f64,
}

/// Contents of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerManifest {
    pub kind: LayerSetKind,
    pub model: String,
    pub layer_thickness: f64,
    pub layers: Vec<LayerEntry>,
}

/// File name of a layer: `{model}_layer{index:04}.{extension}`.
pub fn layer_file_name(model: &str, index: usize, extension: &str) -> String {
    format!("{}_layer{:04}.{}", model, index, extension)
}

/// Split a layer file name into its model name and index.
///
/// Returns `None` unless the name has the shape `{model}_layer{digits}.{extension}`.
pub fn parse_layer_file_name<'a>(name: &'a str, extension: &str) -> Option<(&'a str, usize)> {
    let stem = name.strip_suffix(extension)?.strip_suffix('.')?;
    let split = stem.rfind("_layer")?;
    let digits = &stem[split + "_layer".len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((&stem[..split], digits.parse().ok()?))
}

/// A layer set directory and its manifest.
#[derive(Debug, Clone)]
pub struct LayerSet {
    pub dir: PathBuf,
    pub manifest: LayerManifest,
}

impl LayerSet {
    /// Start a new, empty set in `dir`, creating the directory if needed.
    ///
    /// Layer files of `model` left over from an earlier run are removed.
    pub fn create(
        dir: impl Into<PathBuf>,
        kind: LayerSetKind,
        model: impl Into<String>,
        layer_thickness: f64,
    ) -> PrepResult<Self> {
        let dir = dir.into();
        let model: String = model.into();
        std::fs::create_dir_all(&dir).map_err(|e| PrepError::io_write(&dir, e))?;
        remove_layer_files(&dir, &model, None)?;
        Ok(Self {
            dir,
            manifest: LayerManifest {
                kind,
                model,
                layer_thickness,
                layers: Vec::new(),
            },
        })
    }

    /// Open an existing set by reading its manifest.
    pub fn open(dir: impl Into<PathBuf>) -> PrepResult<Self> {
        let dir = dir.into();
        let path = dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| PrepError::io_read(&path, e))?;
        let manifest: LayerManifest = serde_json::from_str(&text).map_err(|e| {
            PrepError::malformed(&path, Some(e.line()), format!("invalid manifest: {}", e))
        })?;
        debug!(
            dir = %dir.display(),
            kind = %manifest.kind,
            layers = manifest.layers.len(),
            "Opened layer set"
        );
        Ok(Self { dir, manifest })
    }

    /// Open a set and check that it holds the expected kind of layers.
    pub fn open_expecting(dir: impl Into<PathBuf>, kind: LayerSetKind) -> PrepResult<Self> {
        let set = Self::open(dir)?;
        if set.manifest.kind != kind {
            return Err(PrepError::StageMismatch {
                expected: kind.to_string(),
                found: set.manifest.kind.to_string(),
                dir: set.dir,
            });
        }
        Ok(set)
    }

    pub fn kind(&self) -> LayerSetKind {
        self.manifest.kind
    }

    pub fn model(&self) -> &str {
        &self.manifest.model
    }

    pub fn len(&self) -> usize {
        self.manifest.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.layers.is_empty()
    }

    pub fn entries(&self) -> &[LayerEntry] {
        &self.manifest.layers
    }

    /// Full path of a layer file.
    pub fn path_of(&self, entry: &LayerEntry) -> PathBuf {
        self.dir.join(&entry.file)
    }

    /// Path a new layer with this index would be written to.
    pub fn layer_path(&self, index: usize, extension: &str) -> PathBuf {
        self.dir
            .join(layer_file_name(&self.manifest.model, index, extension))
    }

    /// Record a layer written to `layer_path(index, extension)`.
    pub fn record(&mut self, index: usize, z: f64, extension: &str) {
        self.manifest.layers.push(LayerEntry {
            index,
            file: layer_file_name(&self.manifest.model, index, extension),
            z,
        });
    }

    /// Write `manifest.json` with layers sorted by index.
    pub fn save_manifest(&mut self) -> PrepResult<()> {
        self.manifest.layers.sort_by_key(|e| e.index);
        let path = self.dir.join(MANIFEST_FILE);
        let text = serde_json::to_string_pretty(&self.manifest).map_err(|e| {
            PrepError::io_write(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        std::fs::write(&path, text).map_err(|e| PrepError::io_write(&path, e))
    }
}

/// Delete the layer files of `model` in `dir`, of any extension unless one
/// is given. Returns how many were removed.
pub fn remove_layer_files(dir: &Path, model: &str, extension: Option<&str>) -> PrepResult<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(PrepError::io_read(dir, e)),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| PrepError::io_read(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some((_, ext)) = name.rsplit_once('.') else {
            continue;
        };
        if extension.is_some_and(|wanted| wanted != ext) {
            continue;
        }
        if parse_layer_file_name(name, ext).is_some_and(|(found, _)| found == model) {
            let path = entry.path();
            std::fs::remove_file(&path).map_err(|e| PrepError::io_write(&path, e))?;
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(dir = %dir.display(), model, removed, "Removed stale layer files");
    }
    Ok(removed)
}

/// True when `dir` holds a layer set manifest.
pub fn has_manifest(dir: &Path) -> bool {
    dir.join(MANIFEST_FILE).is_file()
}
