//! Tracing extensions for mapping and analysis passes.
//!
//! Passes log through the `tracing` facade; nothing is printed unless the
//! host installs a subscriber:
//!
//! ```rust,ignore
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//!
//! // RUST_LOG=spine_fem=debug for per-element detail
//! ```
//!
//! # Targets
//!
//! - `spine_fem::timing`: operation start and elapsed time
//! - `spine_fem::material`: sampling summaries and HU statistics
//! - `spine_fem::quality`: degenerate elements and metric summaries
//! - `spine_fem::stats`: field summaries
//! - `spine_fem::progress`: batch progress
//! - `spine_fem::config`: configured runs
//! - `spine_fem::mesh_state`: mesh size and extent
//! - `spine_fem::perf`: hot sections, at trace level

use nalgebra::Point3;
use std::time::Instant;
use tracing::span::EnteredSpan;
use tracing::{debug, info, trace};

use crate::stats::StatisticsSummary;
use crate::types::Mesh;

/// A performance timer that logs duration on drop.
///
/// The timer enters a `fem_operation` span for its lifetime, so events logged
/// by the pass on the calling thread nest under it.
///
/// ```rust,ignore
/// let _timer = OperationTimer::with_context("quality_analysis", &mesh);
/// // ... do work ...
/// // elapsed time logged when the timer goes out of scope
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    _span: EnteredSpan,
}

impl OperationTimer {
    /// Create a new operation timer.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!("fem_operation", operation = name).entered();
        debug!(target: "spine_fem::timing", operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
            _span: span,
        }
    }

    /// Create a timer carrying the mesh size.
    pub fn with_context(name: &'static str, mesh: &Mesh) -> Self {
        let span = tracing::info_span!(
            "fem_operation",
            operation = name,
            elements = mesh.element_count(),
            nodes = mesh.node_count()
        )
        .entered();
        debug!(
            target: "spine_fem::timing",
            operation = name,
            elements = mesh.element_count(),
            nodes = mesh.node_count(),
            "Starting operation"
        );
        Self {
            name,
            start: Instant::now(),
            _span: span,
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
        info!(
            target: "spine_fem::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", elapsed_ms),
            "Operation completed"
        );
    }
}

/// Log mesh size and extent at debug level.
pub fn log_mesh_stats(mesh: &Mesh, context: &str) {
    let (min_bounds, max_bounds) = mesh
        .bounds()
        .unwrap_or((Point3::origin(), Point3::origin()));
    let dims = max_bounds - min_bounds;
    let (triangles, tetrahedra) = mesh.kind_counts();

    debug!(
        target: "spine_fem::mesh_state",
        context = context,
        nodes = mesh.node_count(),
        triangles = triangles,
        tetrahedra = tetrahedra,
        dimensions = format!("{:.2} x {:.2} x {:.2}", dims.x, dims.y, dims.z),
        "Mesh state"
    );
}

/// Log a field summary at info level.
pub fn log_field_statistics(target_field: &str, stats: &StatisticsSummary) {
    info!(
        target: "spine_fem::stats",
        field = target_field,
        count = stats.count,
        undefined = stats.undefined_count,
        min = stats.min,
        max = stats.max,
        mean = stats.mean,
        std_dev = stats.std_dev,
        "Field statistics"
    );
}

/// Log progress for a batched pass.
pub fn log_progress(operation: &str, current: usize, total: usize) {
    let percent = if total > 0 {
        (current as f64 / total as f64 * 100.0) as u32
    } else {
        0
    };

    debug!(
        target: "spine_fem::progress",
        operation = operation,
        current = current,
        total = total,
        percent = percent,
        "Progress update"
    );
}

/// Log a performance-critical section.
///
/// Returns a guard that logs when dropped.
#[must_use]
pub fn log_perf_section(name: &'static str) -> impl Drop {
    struct PerfGuard {
        name: &'static str,
        start: Instant,
    }
    impl Drop for PerfGuard {
        fn drop(&mut self) {
            trace!(
                target: "spine_fem::perf",
                section = self.name,
                elapsed_us = self.start.elapsed().as_micros(),
                "Performance section completed"
            );
        }
    }
    PerfGuard {
        name,
        start: Instant::now(),
    }
}
