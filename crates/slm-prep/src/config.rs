//! Process configuration.
//!
//! A single [`ProcessConfig`] carries every setting of a preparation run and
//! is handed to each stage explicitly. It loads from TOML or JSON, and any
//! section or field left out keeps its default.
//!
//! ```toml
//! [slice]
//! layer_thickness = 0.03
//!
//! [support]
//! overhang_angle = 45.0
//!
//! [parameters.overrides]
//! "HATCH POWER 1" = "55"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PrepError, PrepResult};

/// Every setting of a preparation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub part: PartConfig,
    pub support: SupportConfig,
    pub slice: SliceConfig,
    pub hatch: HatchConfig,
    pub simplify: SimplifyConfig,
    pub machine: MachineConfig,
    pub parameters: ParametersConfig,
    pub layout: LayoutConfig,
}

/// Part placement applied before supports are generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartConfig {
    /// Rotation about X, Y and Z in degrees, applied in that order.
    pub rotation_deg: [f64; 3],
    /// Uniform scale factor.
    pub scale: f64,
    /// Translate the part so its lowest point sits on Z = 0.
    pub drop_to_platform: bool,
}

impl Default for PartConfig {
    fn default() -> Self {
        Self {
            rotation_deg: [0.0, 0.0, 0.0],
            scale: 1.0,
            drop_to_platform: true,
        }
    }
}

/// Block support generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportConfig {
    /// Generate supports at all.
    pub enabled: bool,
    /// Overhang threshold in degrees.
    pub overhang_angle: f64,
    /// Footprint grid cell size (mm).
    pub grid_spacing: f64,
    /// Gap left between a block and the surfaces it touches (mm).
    pub height_offset: f64,
    /// Inset applied to every side of a block footprint (mm).
    pub block_inset: f64,
    /// Blocks shorter than this are not generated (mm).
    pub min_block_height: f64,
    /// Footprints smaller than this are not generated (mm²).
    pub min_footprint_area: f64,
    /// Neighbouring cells merge when their top and base heights agree within this (mm).
    pub merge_tolerance: f64,
    /// Faces within this distance of the lowest point rest on the plate (mm).
    pub plate_tolerance: f64,
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overhang_angle: 55.0,
            grid_spacing: 1.5,
            height_offset: 0.05,
            block_inset: 0.05,
            min_block_height: 0.1,
            min_footprint_area: 0.05,
            merge_tolerance: 0.1,
            plate_tolerance: 1e-3,
        }
    }
}

/// Plane slicing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceConfig {
    /// Distance between slice planes (mm).
    pub layer_thickness: f64,
    /// Contour points closer than this are the same point when chaining (mm).
    pub chain_epsilon: f64,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            layer_thickness: 0.03,
            chain_epsilon: 1e-6,
        }
    }
}

/// Fill vector generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HatchConfig {
    /// Generate fill vectors.
    pub enabled: bool,
    /// Hatch angle of layer 0 in degrees.
    pub angle: f64,
    /// Angle added per layer in degrees.
    pub angle_increment: f64,
    /// Distance between neighbouring scan lines (mm).
    pub hatch_distance: f64,
    /// Each scan vector is shortened by this at both ends (mm).
    pub spot_compensation: f64,
    /// Length of stripe pieces scan vectors are split into; 0 disables stripes (mm).
    pub stripe_width: f64,
}

impl Default for HatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            angle: 10.0,
            angle_increment: 66.7,
            hatch_distance: 0.08,
            spot_compensation: 0.06,
            stripe_width: 0.0,
        }
    }
}

impl HatchConfig {
    /// Hatch angle for a layer, in [0, 180).
    pub fn angle_for_layer(&self, index: usize) -> f64 {
        (self.angle + self.angle_increment * index as f64).rem_euclid(180.0)
    }
}

/// Layer cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplifyConfig {
    /// Endpoint snapping grid and duplicate tolerance (mm).
    pub epsilon: f64,
    /// Maximum chord height when linearizing arcs (mm).
    pub arc_tolerance: f64,
    /// Rebuild a stacked 3D preview of the cleaned layers.
    pub preview: bool,
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            arc_tolerance: 0.01,
            preview: false,
        }
    }
}

/// Machine record output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Decimal places of every coordinate.
    pub precision: usize,
    /// File extension of machine records, without the dot.
    pub extension: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            precision: 3,
            extension: "txt".to_string(),
        }
    }
}

/// Parameter report generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParametersConfig {
    /// Part name written to the report; defaults to the model directory name.
    pub part_name: Option<String>,
    /// Number of layers the set must contain, when known up front.
    pub expected_layers: Option<usize>,
    /// Report values that replace computed and default ones.
    pub overrides: BTreeMap<String, String>,
}

/// File and directory names inside a model directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub supported_mesh: PathBuf,
    pub raw_dir: PathBuf,
    pub clean_dir: PathBuf,
    pub machine_dir: PathBuf,
    pub preview_mesh: PathBuf,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            supported_mesh: PathBuf::from("supported.stl"),
            raw_dir: PathBuf::from("raw_layers"),
            clean_dir: PathBuf::from("clean_layers"),
            machine_dir: PathBuf::from("machine"),
            preview_mesh: PathBuf::from("preview.stl"),
        }
    }
}

impl ProcessConfig {
    /// Parse from a TOML string and validate.
    pub fn from_toml(toml_str: &str) -> PrepResult<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| PrepError::invalid_config("<toml>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a JSON string and validate.
    pub fn from_json(json_str: &str) -> PrepResult<Self> {
        let config: Self = serde_json::from_str(json_str)
            .map_err(|e| PrepError::invalid_config("<json>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> PrepResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| PrepError::io_read(path, e))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&contents)
        } else {
            Self::from_toml(&contents)
        }
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> PrepResult<String> {
        toml::to_string_pretty(self).map_err(|e| PrepError::invalid_config("<toml>", e.to_string()))
    }

    /// Check every value a stage would reject.
    pub fn validate(&self) -> PrepResult<()> {
        fn positive(field: &str, value: f64) -> PrepResult<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(PrepError::invalid_config(field, format!("must be > 0, got {}", value)))
            }
        }
        fn non_negative(field: &str, value: f64) -> PrepResult<()> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(PrepError::invalid_config(field, format!("must be >= 0, got {}", value)))
            }
        }

        positive("part.scale", self.part.scale)?;

        if !(0.0..90.0).contains(&self.support.overhang_angle) {
            return Err(PrepError::invalid_config(
                "support.overhang_angle",
                format!("must be in [0, 90), got {}", self.support.overhang_angle),
            ));
        }
        positive("support.grid_spacing", self.support.grid_spacing)?;
        non_negative("support.height_offset", self.support.height_offset)?;
        non_negative("support.block_inset", self.support.block_inset)?;
        if self.support.block_inset * 2.0 >= self.support.grid_spacing {
            return Err(PrepError::invalid_config(
                "support.block_inset",
                "must be less than half of support.grid_spacing",
            ));
        }
        non_negative("support.min_block_height", self.support.min_block_height)?;
        non_negative("support.min_footprint_area", self.support.min_footprint_area)?;
        non_negative("support.merge_tolerance", self.support.merge_tolerance)?;
        non_negative("support.plate_tolerance", self.support.plate_tolerance)?;

        positive("slice.layer_thickness", self.slice.layer_thickness)?;
        positive("slice.chain_epsilon", self.slice.chain_epsilon)?;

        if self.hatch.enabled {
            positive("hatch.hatch_distance", self.hatch.hatch_distance)?;
        }
        non_negative("hatch.spot_compensation", self.hatch.spot_compensation)?;
        non_negative("hatch.stripe_width", self.hatch.stripe_width)?;

        positive("simplify.epsilon", self.simplify.epsilon)?;
        positive("simplify.arc_tolerance", self.simplify.arc_tolerance)?;

        if self.machine.precision > 9 {
            return Err(PrepError::invalid_config(
                "machine.precision",
                format!("at most 9 decimals are supported, got {}", self.machine.precision),
            ));
        }
        let ext = self.machine.extension.as_str();
        if ext.is_empty() || ext.contains(['.', '/', '\\']) {
            return Err(PrepError::invalid_config(
                "machine.extension",
                format!("expected a bare extension such as `txt`, got {:?}", ext),
            ));
        }

        Ok(())
    }
}
