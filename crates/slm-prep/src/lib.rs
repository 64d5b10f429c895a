//! Build preparation for laser powder-bed fusion.
//!
//! This crate turns a triangulated part into the files a powder-bed machine
//! consumes:
//!
//! - **Supports**: block supports under overhanging faces, unioned with the part
//! - **Slicing**: closed contours per layer plus fill vectors from a [`Hatcher`]
//! - **Layer exchange**: per-layer ASCII DXF files with a kind-tagged manifest
//! - **Cleanup**: curves linearized, duplicates removed, collinear runs merged
//! - **Machine records**: one `x1 y1 x2 y2` line per segment
//! - **Parameters**: layer count, bounds and process settings in one report
//!
//! # Units and Coordinates
//!
//! **All lengths are in millimeters, all angles in degrees.**
//!
//! Z is the build direction. Faces wind counter-clockwise seen from outside
//! the part. In a layer, outer contours run counter-clockwise and holes run
//! clockwise.
//!
//! # Quick Start
//!
//! ```no_run
//! use slm_prep::{Pipeline, PipelinePlan, ProcessConfig};
//!
//! let config = ProcessConfig::from_file("process.toml").unwrap();
//! let plan = PipelinePlan::new("out/bracket").with_input("bracket.stl");
//! let report = Pipeline::new(config).run(&plan).unwrap();
//!
//! for issue in &report.batch.issues {
//!     println!("{}", issue);
//! }
//! ```
//!
//! # Running Stages Separately
//!
//! Every stage reads files and writes files, so stages can also be called
//! one at a time:
//!
//! ```no_run
//! use std::path::Path;
//! use slm_prep::{Mesh, SliceConfig, slice::slice_mesh, dxf::write_raw_layer_set};
//!
//! let mesh = Mesh::load("bracket_supported.stl").unwrap();
//! let result = slice_mesh(&mesh, &SliceConfig::default(), None);
//! write_raw_layer_set(&result.layers, Path::new("out/raw"), "bracket", 0.03).unwrap();
//! ```

mod error;
mod raycast;
mod types;

pub mod boolean;
pub mod config;
pub mod dxf;
pub mod extrude;
pub mod hatch;
pub mod io;
pub mod layers;
pub mod machine;
pub mod params;
pub mod pipeline;
pub mod simplify;
pub mod slice;
pub mod support;
pub mod tracing_ext;
pub mod transform;
pub mod validate;

pub use error::{
    BatchReport, ErrorCode, ErrorLocation, IssueSeverity, LayerIssue, PrepError, PrepResult,
    RecoverySuggestion,
};
pub use types::{Contour, LayerBounds, Mesh, Segment, Triangle, Vertex};

pub use boolean::{MeshUnion, ShellUnion, UnionError};
pub use config::{
    HatchConfig, LayoutConfig, MachineConfig, ParametersConfig, PartConfig, ProcessConfig,
    SimplifyConfig, SliceConfig, SupportConfig,
};
pub use dxf::{DxfEntity, read_layer_file, write_raw_layer_set};
pub use hatch::{HatchContext, Hatcher, ScanlineHatcher};
pub use layers::{LayerSet, LayerSetKind};
pub use machine::{encode, parse_machine_record};
pub use params::{ManufacturingParameters, synthesize};
pub use pipeline::{ModelPaths, Pipeline, PipelinePlan, PipelineReport, Stage};
pub use simplify::{SimplifyParams, simplify};
pub use slice::{Layer, PlaneSlicer, SliceResult, slice_mesh};
pub use support::{SupportParams, SupportResult, generate_supports};
pub use tracing_ext::OperationTimer;
pub use validate::{IntegrityReport, check_integrity};
