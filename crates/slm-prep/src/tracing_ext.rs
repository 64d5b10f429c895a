//! Tracing helpers for preparation stages.
//!
//! Stage timings go to the `slm_prep::timing` target, mesh snapshots to
//! `slm_prep::mesh_state` and layer-set I/O to `slm_prep::io`, so each can be
//! enabled separately:
//!
//! ```text
//! RUST_LOG=slm_prep=info,slm_prep::timing=debug slm run part.stl -o out/
//! ```

use std::path::Path;
use std::time::Instant;
use tracing::{Span, debug, info};

/// A performance timer that logs duration on drop.
///
/// ```rust,ignore
/// use slm_prep::tracing_ext::OperationTimer;
///
/// fn slice_everything() {
///     let _timer = OperationTimer::new("slice");
///     // ... do work ...
/// } // duration logged here
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("prep_operation", operation = name);
        debug!(target: "slm_prep::timing", operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Create a timer that also records how many items (faces, layers) it covers.
    pub fn with_items(name: &'static str, items: usize) -> Self {
        let span = tracing::info_span!("prep_operation", operation = name, items);
        debug!(
            target: "slm_prep::timing",
            operation = name,
            items,
            "Starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    /// Get the elapsed time.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.elapsed_ms();
        let _entered = self.span.enter();
        info!(
            target: "slm_prep::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", elapsed_ms),
            "Operation completed"
        );
    }
}

/// Log mesh statistics at debug level.
pub fn log_mesh_stats(mesh: &crate::Mesh, context: &str) {
    let (min_bounds, max_bounds) = mesh.bounds().unwrap_or_default();
    let dims = max_bounds - min_bounds;

    debug!(
        target: "slm_prep::mesh_state",
        context = context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        dimensions = format!("{:.2} x {:.2} x {:.2}", dims.x, dims.y, dims.z),
        "Mesh state"
    );
}

/// Log a layer set written to disk.
pub fn log_layer_set_written(stage: &str, dir: &Path, layers: usize) {
    info!(
        target: "slm_prep::io",
        stage,
        dir = dir.display().to_string(),
        layers,
        "Layer set written"
    );
}
