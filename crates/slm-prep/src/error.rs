//! Error types for build preparation with rich diagnostics.
//!
//! This module provides:
//! - Machine-readable error codes for programmatic handling
//! - Context about where a failure happened (file, line, layer, footprint)
//! - Recovery suggestions for common issues
//! - Terminal display via miette
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `SLM-XXXX`:
//! - `SLM-1xxx`: I/O errors (file reading, writing, mesh parsing)
//! - `SLM-2xxx`: Mesh errors (empty or non-manifold input)
//! - `SLM-3xxx`: Support synthesis errors
//! - `SLM-4xxx`: Layer file errors
//! - `SLM-5xxx`: Configuration and pipeline errors
//!
//! Problems that only affect one layer are not errors. They are collected as
//! [`LayerIssue`]s into a [`BatchReport`] so a whole batch can be reviewed at once.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for preparation operations.
pub type PrepResult<T> = Result<T, PrepError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // I/O errors (1xxx)
    /// SLM-1001: Failed to read file
    IoRead = 1001,
    /// SLM-1002: Failed to write file
    IoWrite = 1002,
    /// SLM-1003: Failed to parse a mesh file
    MeshParse = 1003,

    // Mesh errors (2xxx)
    /// SLM-2001: Mesh has no vertices or faces
    EmptyMesh = 2001,
    /// SLM-2002: Mesh is not watertight or has inconsistent normals
    MeshIntegrity = 2002,

    // Support errors (3xxx)
    /// SLM-3001: Support geometry could not be merged with the part
    UnionFailure = 3001,

    // Layer file errors (4xxx)
    /// SLM-4001: Layer file is structurally invalid
    MalformedLayerFile = 4001,
    /// SLM-4002: A layer of the set is missing
    MissingLayerFile = 4002,

    // Configuration / pipeline errors (5xxx)
    /// SLM-5001: Invalid configuration value
    InvalidConfig = 5001,
    /// SLM-5002: A stage's upstream output is missing
    MissingStageInput = 5002,
    /// SLM-5003: A layer set has the wrong kind for the stage
    StageMismatch = 5003,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `SLM-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "SLM-1001",
            ErrorCode::IoWrite => "SLM-1002",
            ErrorCode::MeshParse => "SLM-1003",
            ErrorCode::EmptyMesh => "SLM-2001",
            ErrorCode::MeshIntegrity => "SLM-2002",
            ErrorCode::UnionFailure => "SLM-3001",
            ErrorCode::MalformedLayerFile => "SLM-4001",
            ErrorCode::MissingLayerFile => "SLM-4002",
            ErrorCode::InvalidConfig => "SLM-5001",
            ErrorCode::MissingStageInput => "SLM-5002",
            ErrorCode::StageMismatch => "SLM-5003",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for preparation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Check files or directories.
    CheckPaths { checks: Vec<String> },
    /// Repair the source mesh before preparing it.
    RepairMesh { operations: Vec<String> },
    /// Adjust configuration values.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Re-run an earlier pipeline stage.
    RerunStage { stage: String },
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::CheckPaths { checks } => {
                write!(f, "Check: {}", checks.join(", "))
            }
            RecoverySuggestion::RepairMesh { operations } => {
                write!(f, "Repair the source mesh: {}", operations.join(", "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::RerunStage { stage } => {
                write!(f, "Re-run the pipeline from the `{}` stage", stage)
            }
            RecoverySuggestion::None => write!(f, "No automatic recovery available"),
        }
    }
}

/// Where an error happened.
#[derive(Debug, Clone)]
pub enum ErrorLocation {
    /// A file, optionally at a specific line.
    File { path: PathBuf, line: Option<usize> },
    /// A layer of a layer set.
    Layer { index: usize },
    /// A support footprint.
    Footprint { index: usize },
}

impl std::fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorLocation::File { path, line } => match line {
                Some(l) => write!(f, "{}:{}", path.display(), l),
                None => write!(f, "{}", path.display()),
            },
            ErrorLocation::Layer { index } => write!(f, "layer {}", index),
            ErrorLocation::Footprint { index } => write!(f, "support footprint {}", index),
        }
    }
}

/// Errors that can occur while preparing a build.
#[derive(Debug, Error, Diagnostic)]
pub enum PrepError {
    /// Error reading from a file.
    #[error("failed to read {path}")]
    #[diagnostic(
        code(slm::io::read),
        help("Check that the file exists and is readable. Try: ls -la {}", path.display())
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write {path}")]
    #[diagnostic(
        code(slm::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing a mesh file.
    #[error("failed to parse mesh from {path}: {details}")]
    #[diagnostic(
        code(slm::mesh::parse),
        help("The file may be corrupted. Try re-exporting it as binary STL.")
    )]
    MeshParse { path: PathBuf, details: String },

    /// Empty mesh (no vertices or faces).
    #[error("mesh is empty: {details}")]
    #[diagnostic(
        code(slm::mesh::empty),
        help("The mesh must have at least one face. Check that the file was exported correctly.")
    )]
    EmptyMesh { details: String },

    /// Mesh is not watertight or its normals are inconsistent.
    #[error("mesh integrity check failed: {details}")]
    #[diagnostic(
        code(slm::mesh::integrity),
        help("Supports need a closed, consistently wound mesh. Repair the model before preparing it.")
    )]
    MeshIntegrity { details: String },

    /// A support block could not be merged with the part.
    #[error("failed to union support footprint {footprint} with the part: {details}")]
    #[diagnostic(
        code(slm::support::union),
        help("Support blocks must not cross the part. Increase `support.height_offset` or check the mesh for self-intersections.")
    )]
    UnionFailure { footprint: usize, details: String },

    /// A layer file is structurally invalid.
    #[error("malformed layer file {path}{}: {details}", line_suffix(.line))]
    #[diagnostic(code(slm::layer::malformed))]
    MalformedLayerFile {
        path: PathBuf,
        line: Option<usize>,
        details: String,
    },

    /// A layer of the set is missing.
    #[error("layer {index} is missing from {dir}")]
    #[diagnostic(
        code(slm::layer::missing),
        help("Aggregate parameters need the complete layer set. Re-run the stage that produces it.")
    )]
    MissingLayerFile { index: usize, dir: PathBuf },

    /// Invalid configuration value.
    #[error("invalid configuration `{field}`: {details}")]
    #[diagnostic(code(slm::config::invalid))]
    InvalidConfig { field: String, details: String },

    /// Upstream output required by a stage is missing.
    #[error("stage `{stage}` needs {path}, which does not exist")]
    #[diagnostic(code(slm::pipeline::input))]
    MissingStageInput { stage: String, path: PathBuf },

    /// A layer set of the wrong kind was handed to a stage.
    #[error("expected a {expected} layer set in {dir}, found {found}")]
    #[diagnostic(code(slm::pipeline::kind))]
    StageMismatch {
        expected: String,
        found: String,
        dir: PathBuf,
    },
}

impl PrepError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            PrepError::IoRead { .. } => ErrorCode::IoRead,
            PrepError::IoWrite { .. } => ErrorCode::IoWrite,
            PrepError::MeshParse { .. } => ErrorCode::MeshParse,
            PrepError::EmptyMesh { .. } => ErrorCode::EmptyMesh,
            PrepError::MeshIntegrity { .. } => ErrorCode::MeshIntegrity,
            PrepError::UnionFailure { .. } => ErrorCode::UnionFailure,
            PrepError::MalformedLayerFile { .. } => ErrorCode::MalformedLayerFile,
            PrepError::MissingLayerFile { .. } => ErrorCode::MissingLayerFile,
            PrepError::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            PrepError::MissingStageInput { .. } => ErrorCode::MissingStageInput,
            PrepError::StageMismatch { .. } => ErrorCode::StageMismatch,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            PrepError::IoRead { .. } => RecoverySuggestion::CheckPaths {
                checks: vec!["file exists".into(), "file permissions".into()],
            },
            PrepError::IoWrite { .. } => RecoverySuggestion::CheckPaths {
                checks: vec!["directory exists".into(), "write permissions".into()],
            },
            PrepError::MeshParse { .. } | PrepError::EmptyMesh { .. } => {
                RecoverySuggestion::RepairMesh {
                    operations: vec!["re-export as binary STL".into()],
                }
            }
            PrepError::MeshIntegrity { .. } => RecoverySuggestion::RepairMesh {
                operations: vec![
                    "close holes".into(),
                    "fix winding".into(),
                    "remove non-manifold edges".into(),
                ],
            },
            PrepError::UnionFailure { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![
                    ("support.height_offset".into(), "try a larger value".into()),
                    ("support.block_inset".into(), "try a larger value".into()),
                ],
            },
            PrepError::MalformedLayerFile { .. } => RecoverySuggestion::RerunStage {
                stage: "slice".into(),
            },
            PrepError::MissingLayerFile { .. } => RecoverySuggestion::RerunStage {
                stage: "encode".into(),
            },
            PrepError::InvalidConfig { field, .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![(field.clone(), "see `slm config` for defaults".into())],
            },
            PrepError::MissingStageInput { .. } | PrepError::StageMismatch { .. } => {
                RecoverySuggestion::RerunStage {
                    stage: "an earlier".into(),
                }
            }
        }
    }

    /// Returns location information if available.
    pub fn location(&self) -> Option<ErrorLocation> {
        match self {
            PrepError::IoRead { path, .. }
            | PrepError::IoWrite { path, .. }
            | PrepError::MeshParse { path, .. }
            | PrepError::MissingStageInput { path, .. } => Some(ErrorLocation::File {
                path: path.clone(),
                line: None,
            }),
            PrepError::MalformedLayerFile { path, line, .. } => Some(ErrorLocation::File {
                path: path.clone(),
                line: *line,
            }),
            PrepError::MissingLayerFile { index, .. } => {
                Some(ErrorLocation::Layer { index: *index })
            }
            PrepError::UnionFailure { footprint, .. } => Some(ErrorLocation::Footprint {
                index: *footprint,
            }),
            _ => None,
        }
    }

    // Constructor helpers for common error patterns

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PrepError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PrepError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a MeshIntegrity error.
    pub fn mesh_integrity(details: impl Into<String>) -> Self {
        PrepError::MeshIntegrity {
            details: details.into(),
        }
    }

    /// Create a UnionFailure error.
    pub fn union_failure(footprint: usize, details: impl Into<String>) -> Self {
        PrepError::UnionFailure {
            footprint,
            details: details.into(),
        }
    }

    /// Create a MalformedLayerFile error.
    pub fn malformed(path: impl Into<PathBuf>, line: Option<usize>, details: impl Into<String>) -> Self {
        PrepError::MalformedLayerFile {
            path: path.into(),
            line,
            details: details.into(),
        }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(field: impl Into<String>, details: impl Into<String>) -> Self {
        PrepError::InvalidConfig {
            field: field.into(),
            details: details.into(),
        }
    }
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|l| format!(" (line {})", l)).unwrap_or_default()
}

/// A problem confined to a single layer.
///
/// Layer issues never abort a batch. They are collected and reported together
/// once every layer has been processed.
#[derive(Debug, Clone)]
pub enum LayerIssue {
    /// The slice plane produced no geometry.
    EmptyLayer { index: usize, z: f64 },
    /// Segments at this plane could not be chained into closed loops.
    OpenContour {
        index: usize,
        z: f64,
        loose_endpoints: usize,
    },
    /// The layer file could not be read or parsed.
    MalformedLayer {
        index: usize,
        path: PathBuf,
        details: String,
    },
}

impl LayerIssue {
    /// Returns a severity level for the issue.
    pub fn severity(&self) -> IssueSeverity {
        match self {
            LayerIssue::EmptyLayer { .. } => IssueSeverity::Warning,
            LayerIssue::OpenContour { .. } => IssueSeverity::Warning,
            LayerIssue::MalformedLayer { .. } => IssueSeverity::Error,
        }
    }

    /// Returns an error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            LayerIssue::EmptyLayer { .. } => "SLM-4101",
            LayerIssue::OpenContour { .. } => "SLM-2002",
            LayerIssue::MalformedLayer { .. } => "SLM-4001",
        }
    }

    /// Index of the affected layer.
    pub fn layer_index(&self) -> usize {
        match self {
            LayerIssue::EmptyLayer { index, .. }
            | LayerIssue::OpenContour { index, .. }
            | LayerIssue::MalformedLayer { index, .. } => *index,
        }
    }
}

impl std::fmt::Display for LayerIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerIssue::EmptyLayer { index, z } => {
                write!(f, "layer {} at z={:.4} is empty", index, z)
            }
            LayerIssue::OpenContour {
                index,
                z,
                loose_endpoints,
            } => write!(
                f,
                "layer {} at z={:.4} has {} loose contour endpoints (non-manifold mesh?)",
                index, z, loose_endpoints
            ),
            LayerIssue::MalformedLayer {
                index,
                path,
                details,
            } => write!(f, "layer {} ({}) is malformed: {}", index, path.display(), details),
        }
    }
}

/// Severity levels for layer issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueSeverity {
    /// The layer was produced, possibly with missing geometry.
    Warning,
    /// The layer was skipped.
    Error,
}

/// Layer issues collected over a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Issues in layer order.
    pub issues: Vec<LayerIssue>,
}

impl BatchReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an issue.
    pub fn push(&mut self, issue: LayerIssue) {
        self.issues.push(issue);
    }

    /// Append every issue of another report.
    pub fn extend(&mut self, other: BatchReport) {
        self.issues.extend(other.issues);
    }

    /// True when no issue was recorded.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Number of issues at the given severity.
    pub fn count(&self, severity: IssueSeverity) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity() == severity)
            .count()
    }

    /// Sort issues by layer index, keeping insertion order within a layer.
    pub fn sort(&mut self) {
        self.issues.sort_by_key(LayerIssue::layer_index);
    }

    /// Emit one log line per issue and a closing summary.
    pub fn log_summary(&self, stage: &str) {
        for issue in &self.issues {
            match issue.severity() {
                IssueSeverity::Warning => tracing::warn!(stage, code = issue.code(), "{}", issue),
                IssueSeverity::Error => tracing::error!(stage, code = issue.code(), "{}", issue),
            }
        }
        if !self.is_clean() {
            tracing::warn!(
                stage,
                warnings = self.count(IssueSeverity::Warning),
                errors = self.count(IssueSeverity::Error),
                "Layer issues recorded"
            );
        }
    }
}
