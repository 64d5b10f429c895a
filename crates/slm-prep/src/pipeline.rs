//! Stage orchestration.
//!
//! Each stage reads its complete input from files and writes its complete
//! output before the next one starts, so a run can be resumed at any stage
//! whose upstream files exist:
//!
//! | Stage | Reads | Writes |
//! | --- | --- | --- |
//! | `supports` | input STL | supported STL |
//! | `slice` | supported STL | raw layer set |
//! | `clean` | raw layer set | clean layer set, optional preview STL |
//! | `encode` | clean layer set | machine records |
//! | `parameters` | machine records | parameter report |
//!
//! # Example
//!
//! ```rust,ignore
//! use slm_prep::{ProcessConfig, pipeline::{Pipeline, PipelinePlan, Stage}};
//!
//! let plan = PipelinePlan::new("out/bracket").starting_at(Stage::Clean);
//! let report = Pipeline::new(ProcessConfig::default()).run(&plan)?;
//! println!("{} stages executed", report.stages_executed.len());
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::boolean::{MeshUnion, ShellUnion};
use crate::config::{LayoutConfig, ProcessConfig};
use crate::dxf::write_raw_layer_set;
use crate::error::{BatchReport, PrepError, PrepResult};
use crate::hatch::{Hatcher, ScanlineHatcher};
use crate::layers::{LayerSet, LayerSetKind, has_manifest};
use crate::machine::encode_layer_set;
use crate::params::{ManufacturingParameters, scan_layer_files, synthesize, write_report};
use crate::simplify::{build_preview, clean_layer_set};
use crate::slice::slice_mesh;
use crate::support::{SupportParams, generate_supports_with};
use crate::tracing_ext::{OperationTimer, log_mesh_stats};
use crate::transform::place_part;
use crate::validate::orient_outward;
use crate::Mesh;

/// A batch stage of the preparation chain, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Supports,
    Slice,
    Clean,
    Encode,
    Parameters,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Supports,
        Stage::Slice,
        Stage::Clean,
        Stage::Encode,
        Stage::Parameters,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Supports => "supports",
            Stage::Slice => "slice",
            Stage::Clean => "clean",
            Stage::Encode => "encode",
            Stage::Parameters => "parameters",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown stage `{}`, expected one of: supports, slice, clean, encode, parameters",
                    s
                )
            })
    }
}

/// Files and directories of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPaths {
    pub root: PathBuf,
    /// Model name used in layer file names; the root directory name.
    pub model: String,
    pub supported_mesh: PathBuf,
    pub raw_dir: PathBuf,
    pub clean_dir: PathBuf,
    pub machine_dir: PathBuf,
    pub preview_mesh: PathBuf,
}

impl ModelPaths {
    pub fn new(root: impl Into<PathBuf>, layout: &LayoutConfig) -> Self {
        let root = root.into();
        let model = model_name(&root);
        Self {
            supported_mesh: root.join(&layout.supported_mesh),
            raw_dir: root.join(&layout.raw_dir),
            clean_dir: root.join(&layout.clean_dir),
            machine_dir: root.join(&layout.machine_dir),
            preview_mesh: root.join(&layout.preview_mesh),
            model,
            root,
        }
    }
}

/// Last path component of a model directory, resolving `.` and `..`.
fn model_name(root: &Path) -> String {
    let named = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .or_else(|| {
            std::fs::canonicalize(root)
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        });
    named.unwrap_or_else(|| "part".to_string())
}

/// Which stages to run and where.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePlan {
    /// Source mesh; only needed when starting at [`Stage::Supports`].
    pub input: Option<PathBuf>,
    pub model_dir: PathBuf,
    pub from: Stage,
    pub to: Stage,
}

impl PipelinePlan {
    /// Plan every stage for `model_dir`.
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: None,
            model_dir: model_dir.into(),
            from: Stage::Supports,
            to: Stage::Parameters,
        }
    }

    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn starting_at(mut self, stage: Stage) -> Self {
        self.from = stage;
        self
    }

    pub fn ending_at(mut self, stage: Stage) -> Self {
        self.to = stage;
        self
    }

    /// Run exactly one stage.
    pub fn only(self, stage: Stage) -> Self {
        self.starting_at(stage).ending_at(stage)
    }

    /// Stages this plan executes, in order.
    pub fn stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| *s >= self.from && *s <= self.to)
            .collect()
    }

    /// Check that the upstream output needed by the first stage exists.
    ///
    /// Nothing is read or written beyond the manifest of an input layer set.
    pub fn validate(&self, layout: &LayoutConfig) -> PrepResult<()> {
        if self.from > self.to {
            return Err(PrepError::invalid_config(
                "pipeline",
                format!("start stage `{}` comes after end stage `{}`", self.from, self.to),
            ));
        }
        let paths = ModelPaths::new(&self.model_dir, layout);
        let missing = |path: &Path| PrepError::MissingStageInput {
            stage: self.from.to_string(),
            path: path.to_path_buf(),
        };

        match self.from {
            Stage::Supports => match &self.input {
                Some(input) if input.is_file() => Ok(()),
                Some(input) => Err(missing(input)),
                None => Err(missing(Path::new("<input mesh>"))),
            },
            Stage::Slice => {
                if paths.supported_mesh.is_file() {
                    Ok(())
                } else {
                    Err(missing(&paths.supported_mesh))
                }
            }
            Stage::Clean => require_layer_set(&paths.raw_dir, LayerSetKind::Raw, missing),
            Stage::Encode => require_layer_set(&paths.clean_dir, LayerSetKind::Clean, missing),
            Stage::Parameters => {
                if paths.machine_dir.is_dir() {
                    Ok(())
                } else {
                    Err(missing(&paths.machine_dir))
                }
            }
        }
    }
}

fn require_layer_set(
    dir: &Path,
    kind: LayerSetKind,
    missing: impl Fn(&Path) -> PrepError,
) -> PrepResult<()> {
    if !has_manifest(dir) {
        return Err(missing(dir));
    }
    LayerSet::open_expecting(dir, kind).map(|_| ())
}

/// What a pipeline run did.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Stages in execution order.
    pub stages_executed: Vec<Stage>,
    /// Layers written by each layer-producing stage.
    pub layer_counts: Vec<(Stage, usize)>,
    /// Support blocks added, when the supports stage ran.
    pub support_blocks: Option<usize>,
    /// Per-layer issues of every stage.
    pub batch: BatchReport,
    /// Parameter report path and contents, when the parameters stage ran.
    pub parameters: Option<(PathBuf, ManufacturingParameters)>,
    /// One line per completed stage.
    pub operation_log: Vec<String>,
}

impl PipelineReport {
    fn log(&mut self, stage: Stage, message: String) {
        info!(stage = %stage, "{}", message);
        self.stages_executed.push(stage);
        self.operation_log.push(message);
    }

    /// Layers written by `stage`, if it ran.
    pub fn layers_of(&self, stage: Stage) -> Option<usize> {
        self.layer_counts
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, n)| *n)
    }
}

/// Runs planned stages with one configuration.
pub struct Pipeline {
    config: ProcessConfig,
    hatcher: Box<dyn Hatcher>,
    union: Box<dyn MeshUnion>,
}

impl Pipeline {
    /// A pipeline with the bundled scan-line hatcher and shell union.
    pub fn new(config: ProcessConfig) -> Self {
        let hatcher = Box::new(ScanlineHatcher::from(&config.hatch));
        Self {
            config,
            hatcher,
            union: Box::new(ShellUnion::default()),
        }
    }

    /// Replace the fill strategy.
    pub fn with_hatcher(mut self, hatcher: Box<dyn Hatcher>) -> Self {
        self.hatcher = hatcher;
        self
    }

    /// Replace the mesh union used to merge supports.
    pub fn with_union(mut self, union: Box<dyn MeshUnion>) -> Self {
        self.union = union;
        self
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Validate the configuration and the plan, then run every planned stage.
    ///
    /// Per-layer problems are collected in the report; any other error
    /// aborts the run immediately.
    pub fn run(&self, plan: &PipelinePlan) -> PrepResult<PipelineReport> {
        self.config.validate()?;
        plan.validate(&self.config.layout)?;
        let _timer = OperationTimer::new("pipeline");
        let paths = ModelPaths::new(&plan.model_dir, &self.config.layout);
        std::fs::create_dir_all(&paths.root).map_err(|e| PrepError::io_write(&paths.root, e))?;

        let mut report = PipelineReport::default();
        for stage in plan.stages() {
            match stage {
                Stage::Supports => {
                    let input = plan.input.as_deref().ok_or_else(|| PrepError::MissingStageInput {
                        stage: Stage::Supports.to_string(),
                        path: PathBuf::from("<input mesh>"),
                    })?;
                    self.supports(input, &paths, &mut report)?
                }
                Stage::Slice => self.slice(&paths, &mut report)?,
                Stage::Clean => self.clean(&paths, &mut report)?,
                Stage::Encode => self.encode(&paths, &mut report)?,
                Stage::Parameters => self.parameters(&paths, &mut report)?,
            }
        }

        report.batch.sort();
        Ok(report)
    }

    fn supports(&self, input: &Path, paths: &ModelPaths, report: &mut PipelineReport) -> PrepResult<()> {
        let mut mesh = Mesh::load(input)?;
        place_part(&mut mesh, &self.config.part);
        orient_outward(&mut mesh);
        log_mesh_stats(&mesh, "placed part");

        let support = &self.config.support;
        let (supported, blocks) = if support.enabled {
            let result = generate_supports_with(
                &mesh,
                support.overhang_angle,
                &SupportParams::from(support),
                self.union.as_ref(),
            )?;
            (result.mesh, result.blocks.len())
        } else {
            (mesh, 0)
        };
        log_mesh_stats(&supported, "supported part");
        supported.save(&paths.supported_mesh)?;

        report.support_blocks = Some(blocks);
        report.log(
            Stage::Supports,
            format!("Wrote {} with {} support blocks", paths.supported_mesh.display(), blocks),
        );
        Ok(())
    }

    fn slice(&self, paths: &ModelPaths, report: &mut PipelineReport) -> PrepResult<()> {
        let mesh = Mesh::load(&paths.supported_mesh)?;
        let hatching = self
            .config
            .hatch
            .enabled
            .then(|| (self.hatcher.as_ref(), &self.config.hatch));
        let result = slice_mesh(&mesh, &self.config.slice, hatching);

        let set = write_raw_layer_set(
            &result.layers,
            &paths.raw_dir,
            &paths.model,
            self.config.slice.layer_thickness,
        )?;
        report.batch.extend(result.report);
        report.layer_counts.push((Stage::Slice, set.len()));
        report.log(
            Stage::Slice,
            format!("Sliced {} layers into {}", set.len(), paths.raw_dir.display()),
        );
        Ok(())
    }

    fn clean(&self, paths: &ModelPaths, report: &mut PipelineReport) -> PrepResult<()> {
        let raw = LayerSet::open_expecting(&paths.raw_dir, LayerSetKind::Raw)?;
        let outcome = clean_layer_set(&raw, &paths.clean_dir, &self.config.simplify)?;

        if self.config.simplify.preview {
            let preview = build_preview(
                &outcome.layers,
                raw.manifest.layer_thickness,
                self.config.simplify.epsilon,
            );
            log_mesh_stats(&preview, "preview");
            preview.save(&paths.preview_mesh)?;
        }

        report.batch.extend(outcome.report);
        report.layer_counts.push((Stage::Clean, outcome.set.len()));
        report.log(
            Stage::Clean,
            format!("Cleaned {} layers into {}", outcome.set.len(), paths.clean_dir.display()),
        );
        Ok(())
    }

    fn encode(&self, paths: &ModelPaths, report: &mut PipelineReport) -> PrepResult<()> {
        let clean = LayerSet::open_expecting(&paths.clean_dir, LayerSetKind::Clean)?;
        let outcome = encode_layer_set(&clean, &paths.machine_dir, &self.config.machine)?;
        report.layer_counts.push((Stage::Encode, outcome.files.len()));
        report.log(
            Stage::Encode,
            format!(
                "Encoded {} segments in {} layers into {}",
                outcome.segments,
                outcome.files.len(),
                paths.machine_dir.display()
            ),
        );
        Ok(())
    }

    /// Layer count the machine files must reach: the sliced count when the
    /// raw set exists, and never less than configured. Cleanup drops layers
    /// it cannot read, so the clean set cannot tell.
    fn expected_layers(&self, paths: &ModelPaths) -> PrepResult<Option<usize>> {
        let sliced = if has_manifest(&paths.raw_dir) {
            let raw = LayerSet::open_expecting(&paths.raw_dir, LayerSetKind::Raw)?;
            raw.entries().iter().map(|e| e.index).max()
        } else {
            None
        };
        Ok(sliced.max(self.config.parameters.expected_layers))
    }

    fn parameters(&self, paths: &ModelPaths, report: &mut PipelineReport) -> PrepResult<()> {
        let expected = self.expected_layers(paths)?;
        let scan = scan_layer_files(
            &paths.machine_dir,
            &paths.model,
            &self.config.machine.extension,
            expected,
        )?;
        let params = synthesize(
            &scan,
            self.config.slice.layer_thickness,
            &self.config.hatch,
            &self.config.parameters,
        )?;
        let path = write_report(&params, &paths.root)?;
        report.log(Stage::Parameters, format!("Wrote {}", path.display()));
        report.parameters = Some((path, params));
        Ok(())
    }
}
