//! Per-element geometric quality metrics and their statistics.
//!
//! Every metric is a pure function of one element's node coordinates, so a
//! pass is embarrassingly parallel and repeated passes over the same mesh give
//! bit-identical fields.
//!
//! Normalized scores (aspect ratio, scaled Jacobian, dihedral score) are 1.0
//! for a regular tetrahedron or equilateral triangle. A degenerate element
//! (zero or near-zero volume or area) receives a fixed sentinel per metric
//! instead of a division by zero:
//!
//! | metric | sentinel |
//! |---|---|
//! | aspect ratio, scaled Jacobian, dihedral score, min angle | 0.0 |
//! | max angle | 180.0 |
//! | edge ratio | +inf when the shortest edge has zero length |
//! | edge lengths, volume, Jacobian | raw value |
//!
//! # Example
//!
//! ```
//! use nalgebra::Point3;
//! use spine_fem::{Mesh, QualityMetric, QualityParams};
//! use spine_fem::quality::compute_quality_fields;
//!
//! let mesh = Mesh::from_connectivity(
//!     vec![
//!         Point3::new(0.0, 0.0, 0.0),
//!         Point3::new(1.0, 0.0, 0.0),
//!         Point3::new(0.0, 1.0, 0.0),
//!         Point3::new(0.0, 0.0, 1.0),
//!     ],
//!     &[vec![0, 1, 2, 3]],
//! ).unwrap();
//!
//! let analysis = compute_quality_fields(
//!     &mesh,
//!     &[QualityMetric::AspectRatio, QualityMetric::EdgeRatio],
//!     &QualityParams::default(),
//! ).unwrap();
//! let ratio = analysis.get(QualityMetric::EdgeRatio).unwrap();
//! assert!((ratio.field.values[0] - 2f64.sqrt()).abs() < 1e-12);
//! ```

use std::str::FromStr;

use hashbrown::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::{ElementWarning, FemError, FemResult};
use crate::field::{FieldDomain, ScalarField};
use crate::progress::{ProgressCallback, process_in_batches};
use crate::stats::{StatisticsParams, StatisticsSummary, compute_statistics};
use crate::tracing_ext::{OperationTimer, log_perf_section};
use crate::types::{EdgeStats, ElementGeometry, ElementKind, Mesh, Tetrahedron, Triangle};
use crate::validate::{ValidationOptions, validate_mesh_geometry};

/// Dihedral angle of a regular tetrahedron, arccos(1/3), in degrees.
pub const REGULAR_TET_DIHEDRAL: f64 = 70.528_779_365_509_31;

/// The fixed registry of quality metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum QualityMetric {
    /// Shortest edge length.
    MinEdgeLength,
    /// Longest edge length.
    MaxEdgeLength,
    /// Mean edge length.
    MeanEdgeLength,
    /// Longest over shortest edge (>= 1).
    EdgeRatio,
    /// Inradius relative to longest edge, normalized to 1 for regular elements.
    AspectRatio,
    /// Volume (tetrahedra) or area (triangles).
    Volume,
    /// Absolute determinant of the edge matrix.
    Jacobian,
    /// Worst corner Jacobian normalized by its edge lengths, in [-1, 1].
    ScaledJacobian,
    /// Smallest angle relative to the regular element's angle, in [0, 1].
    DihedralScore,
    /// Smallest dihedral (tetrahedra) or interior (triangles) angle, degrees.
    MinAngle,
    /// Largest dihedral (tetrahedra) or interior (triangles) angle, degrees.
    MaxAngle,
}

impl QualityMetric {
    /// All metrics, in registry order.
    pub const ALL: [QualityMetric; 11] = [
        QualityMetric::MinEdgeLength,
        QualityMetric::MaxEdgeLength,
        QualityMetric::MeanEdgeLength,
        QualityMetric::EdgeRatio,
        QualityMetric::AspectRatio,
        QualityMetric::Volume,
        QualityMetric::Jacobian,
        QualityMetric::ScaledJacobian,
        QualityMetric::DihedralScore,
        QualityMetric::MinAngle,
        QualityMetric::MaxAngle,
    ];

    /// Stable snake_case key.
    pub fn key(&self) -> &'static str {
        match self {
            QualityMetric::MinEdgeLength => "min_edge_length",
            QualityMetric::MaxEdgeLength => "max_edge_length",
            QualityMetric::MeanEdgeLength => "mean_edge_length",
            QualityMetric::EdgeRatio => "edge_ratio",
            QualityMetric::AspectRatio => "aspect_ratio",
            QualityMetric::Volume => "volume",
            QualityMetric::Jacobian => "jacobian",
            QualityMetric::ScaledJacobian => "scaled_jacobian",
            QualityMetric::DihedralScore => "dihedral_score",
            QualityMetric::MinAngle => "min_angle",
            QualityMetric::MaxAngle => "max_angle",
        }
    }

    /// Display name, also used as the output field name.
    pub fn name(&self) -> &'static str {
        match self {
            QualityMetric::MinEdgeLength => "Min Edge Length",
            QualityMetric::MaxEdgeLength => "Max Edge Length",
            QualityMetric::MeanEdgeLength => "Edge Length",
            QualityMetric::EdgeRatio => "Edge Ratio",
            QualityMetric::AspectRatio => "Aspect Ratio",
            QualityMetric::Volume => "Volume",
            QualityMetric::Jacobian => "Jacobian",
            QualityMetric::ScaledJacobian => "Scaled Jacobian",
            QualityMetric::DihedralScore => "Dihedral Score",
            QualityMetric::MinAngle => "Min Angle",
            QualityMetric::MaxAngle => "Max Angle",
        }
    }

    /// Unit of the metric values, if any.
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            QualityMetric::MinAngle | QualityMetric::MaxAngle => Some("deg"),
            _ => None,
        }
    }

    /// Whether the metric is normalized so that 1.0 is ideal.
    pub fn is_normalized(&self) -> bool {
        matches!(
            self,
            QualityMetric::AspectRatio | QualityMetric::ScaledJacobian | QualityMetric::DihedralScore
        )
    }

    /// Evaluate the metric on one element.
    pub fn evaluate(&self, geometry: &ElementGeometry, degenerate_tolerance: f64) -> f64 {
        ElementMeasures::of(geometry, degenerate_tolerance).value(*self)
    }
}

impl std::fmt::Display for QualityMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for QualityMetric {
    type Err = FemError;

    /// Accepts the key (`edge_ratio`), display name (`Edge Ratio`) or
    /// CamelCase form (`EdgeRatio`), case-insensitively. `EdgeLength` and
    /// `TetrahedralVolume` are accepted as aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | ' ' | '-'))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "edgelength" => return Ok(QualityMetric::MeanEdgeLength),
            "tetrahedralvolume" => return Ok(QualityMetric::Volume),
            _ => {}
        }

        QualityMetric::ALL
            .into_iter()
            .find(|m| m.key().replace('_', "") == normalized)
            .ok_or_else(|| FemError::unknown_metric(s))
    }
}

/// Base measures of one element from which every metric is derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementMeasures {
    pub kind: ElementKind,
    /// Volume (tetrahedra) or area (triangles).
    pub measure: f64,
    pub jacobian: f64,
    pub min_edge: f64,
    pub max_edge: f64,
    pub mean_edge: f64,
    pub aspect_ratio: f64,
    pub scaled_jacobian: f64,
    pub min_angle: f64,
    pub max_angle: f64,
    /// Measure at or below `tolerance * max_edge^d`.
    pub degenerate: bool,
}

impl ElementMeasures {
    /// Compute all base measures of an element.
    pub fn of(geometry: &ElementGeometry, degenerate_tolerance: f64) -> Self {
        match geometry {
            ElementGeometry::Tetrahedron(tet) => Self::of_tet(tet, degenerate_tolerance),
            ElementGeometry::Triangle(tri) => Self::of_triangle(tri, degenerate_tolerance),
        }
    }

    fn of_tet(tet: &Tetrahedron, tolerance: f64) -> Self {
        let lengths = tet.edge_lengths();
        let edges = EdgeStats::from_lengths(&lengths);
        let [e01, e02, e03, e12, e13, e23] = lengths;
        let volume = tet.volume();
        let jacobian = tet.jacobian();

        let aspect_ratio = if edges.max > 0.0 {
            2.0 * 6f64.sqrt() * tet.inradius() / edges.max
        } else {
            0.0
        };

        // Edge-length products at each corner
        let corner_max = (e01 * e02 * e03)
            .max(e01 * e12 * e13)
            .max(e12 * e02 * e23)
            .max(e03 * e13 * e23);
        let scaled_jacobian = if corner_max > 0.0 {
            (jacobian * std::f64::consts::SQRT_2 / corner_max).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let angles = tet.dihedral_angles();
        let (min_angle, max_angle) = min_max(&angles);

        Self {
            kind: ElementKind::Tetrahedron,
            measure: volume,
            jacobian: jacobian.abs(),
            min_edge: edges.min,
            max_edge: edges.max,
            mean_edge: edges.mean,
            aspect_ratio,
            scaled_jacobian,
            min_angle,
            max_angle,
            degenerate: edges.max == 0.0 || volume <= tolerance * edges.max.powi(3),
        }
    }

    fn of_triangle(tri: &Triangle, tolerance: f64) -> Self {
        let lengths = tri.edge_lengths();
        let edges = EdgeStats::from_lengths(&lengths);
        let [e01, e12, e20] = lengths;
        let area = tri.area();

        let aspect_ratio = if edges.max > 0.0 {
            2.0 * 3f64.sqrt() * tri.inradius() / edges.max
        } else {
            0.0
        };

        // sin(theta) at a corner is 2A over the product of its two edges
        let corner_max = (e01 * e20).max(e01 * e12).max(e12 * e20);
        let scaled_jacobian = if corner_max > 0.0 {
            (2.0 / 3f64.sqrt() * 2.0 * area / corner_max).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let (min_angle, max_angle) = min_max(&tri.interior_angles());

        Self {
            kind: ElementKind::Triangle,
            measure: area,
            jacobian: 2.0 * area,
            min_edge: edges.min,
            max_edge: edges.max,
            mean_edge: edges.mean,
            aspect_ratio,
            scaled_jacobian,
            min_angle,
            max_angle,
            degenerate: edges.max == 0.0 || area <= tolerance * edges.max.powi(2),
        }
    }

    /// Value of `metric`, with degenerate sentinels applied.
    pub fn value(&self, metric: QualityMetric) -> f64 {
        match metric {
            QualityMetric::MinEdgeLength => self.min_edge,
            QualityMetric::MaxEdgeLength => self.max_edge,
            QualityMetric::MeanEdgeLength => self.mean_edge,
            QualityMetric::EdgeRatio => {
                if self.min_edge > 0.0 {
                    self.max_edge / self.min_edge
                } else {
                    f64::INFINITY
                }
            }
            QualityMetric::Volume => self.measure,
            QualityMetric::Jacobian => self.jacobian,
            _ if self.degenerate => match metric {
                QualityMetric::MaxAngle => 180.0,
                _ => 0.0,
            },
            QualityMetric::AspectRatio => self.aspect_ratio,
            QualityMetric::ScaledJacobian => self.scaled_jacobian,
            QualityMetric::DihedralScore => {
                let ideal = match self.kind {
                    ElementKind::Tetrahedron => REGULAR_TET_DIHEDRAL,
                    ElementKind::Triangle => 60.0,
                };
                (self.min_angle / ideal).clamp(0.0, 1.0)
            }
            QualityMetric::MinAngle => self.min_angle,
            QualityMetric::MaxAngle => self.max_angle,
        }
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// Parameters for quality analysis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct QualityParams {
    /// Histogram settings for the per-metric summaries.
    pub statistics: StatisticsParams,

    /// Relative threshold below which an element counts as degenerate:
    /// `measure <= tolerance * max_edge^d`. Default: 1e-12.
    pub degenerate_tolerance: f64,

    /// Aspect ratio below which an element counts as poor. Default: 0.2,
    /// which corresponds to a classic edge-to-inradius ratio above 5.
    pub poor_aspect_ratio: f64,

    /// Elements per batch. Cancellation is checked between batches.
    /// Default: 4096.
    pub batch_size: usize,

    /// Maximum number of degenerate-element warnings kept. Default: 100.
    pub max_warnings: usize,
}

impl Default for QualityParams {
    fn default() -> Self {
        Self {
            statistics: StatisticsParams::default(),
            degenerate_tolerance: 1e-12,
            poor_aspect_ratio: 0.2,
            batch_size: 4096,
            max_warnings: 100,
        }
    }
}

impl QualityParams {
    /// Params with a specific histogram bin count.
    pub fn with_bins(bin_count: usize) -> Self {
        Self {
            statistics: StatisticsParams::with_bins(bin_count),
            ..Self::default()
        }
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> FemResult<()> {
        if self.batch_size == 0 {
            return Err(FemError::invalid_params("batch_size", "must be at least 1"));
        }
        if !self.degenerate_tolerance.is_finite() || self.degenerate_tolerance < 0.0 {
            return Err(FemError::invalid_params(
                "degenerate_tolerance",
                format!("{} must be finite and non-negative", self.degenerate_tolerance),
            ));
        }
        if !self.poor_aspect_ratio.is_finite() {
            return Err(FemError::invalid_params("poor_aspect_ratio", "must be finite"));
        }
        Ok(())
    }
}

/// One metric's field and summary.
#[derive(Debug, Clone)]
pub struct MetricResult {
    pub metric: QualityMetric,
    pub field: ScalarField,
    pub statistics: StatisticsSummary,
}

/// Result of one quality analysis pass.
#[derive(Debug, Clone)]
pub struct QualityAnalysis {
    /// One entry per distinct requested metric, in request order.
    pub results: Vec<MetricResult>,

    /// Number of degenerate elements.
    pub degenerate_count: usize,

    pub element_count: usize,

    /// First `max_warnings` degenerate-element warnings in element order.
    pub warnings: Vec<ElementWarning>,

    /// Threshold used by [`poor_element_count`](Self::poor_element_count).
    pub poor_aspect_ratio: f64,
}

impl QualityAnalysis {
    /// Result for a metric, if it was requested.
    pub fn get(&self, metric: QualityMetric) -> Option<&MetricResult> {
        self.results.iter().find(|r| r.metric == metric)
    }

    /// Result for a metric name in any accepted spelling.
    pub fn get_by_name(&self, name: &str) -> Option<&MetricResult> {
        name.parse().ok().and_then(|m| self.get(m))
    }

    /// Elements whose aspect ratio is below the poor threshold.
    ///
    /// `None` if aspect ratio was not requested.
    pub fn poor_element_count(&self) -> Option<usize> {
        let result = self.get(QualityMetric::AspectRatio)?;
        Some(
            result
                .field
                .values
                .iter()
                .filter(|&&v| v < self.poor_aspect_ratio)
                .count(),
        )
    }

    /// Field names in request order.
    pub fn field_names(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.field.name.as_str()).collect()
    }

    /// Fields and summaries keyed by field name.
    pub fn into_map(self) -> HashMap<String, (ScalarField, StatisticsSummary)> {
        self.results
            .into_iter()
            .map(|r| (r.field.name.clone(), (r.field, r.statistics)))
            .collect()
    }

    /// Fields in request order.
    pub fn into_fields(self) -> Vec<ScalarField> {
        self.results.into_iter().map(|r| r.field).collect()
    }
}

impl std::fmt::Display for QualityAnalysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Mesh quality: {} elements", self.element_count)?;
        for r in &self.results {
            writeln!(f, "  {}: {}", r.field.label(), r.statistics)?;
        }
        if let Some(poor) = self.poor_element_count() {
            let percent = if self.element_count > 0 {
                poor as f64 / self.element_count as f64 * 100.0
            } else {
                0.0
            };
            writeln!(
                f,
                "  Poor elements (aspect ratio < {}): {} ({:.2}%)",
                self.poor_aspect_ratio, poor, percent
            )?;
        }
        write!(f, "  Degenerate elements: {}", self.degenerate_count)
    }
}

/// Compute the requested quality fields for every element of `mesh`.
///
/// Duplicate metrics are computed once. Fails on invalid parameters or
/// malformed mesh geometry; degenerate elements only get sentinel values.
pub fn compute_quality_fields(
    mesh: &Mesh,
    metrics: &[QualityMetric],
    params: &QualityParams,
) -> FemResult<QualityAnalysis> {
    compute_quality_fields_with_progress(mesh, metrics, params, None)
}

/// Like [`compute_quality_fields`], with metrics given by name.
///
/// Fails with `UnknownMetric` on the first name not in the registry.
pub fn compute_quality_fields_by_name(
    mesh: &Mesh,
    names: &[&str],
    params: &QualityParams,
) -> FemResult<QualityAnalysis> {
    let metrics = names
        .iter()
        .map(|n| n.parse())
        .collect::<FemResult<Vec<QualityMetric>>>()?;
    compute_quality_fields(mesh, &metrics, params)
}

/// Compute quality fields with progress reporting.
///
/// The callback is invoked after each batch. Returning `false` cancels the
/// pass and yields `FemError::Cancelled`; no partial fields are returned.
pub fn compute_quality_fields_with_progress(
    mesh: &Mesh,
    metrics: &[QualityMetric],
    params: &QualityParams,
    callback: Option<&ProgressCallback>,
) -> FemResult<QualityAnalysis> {
    let _timer = OperationTimer::with_context("quality_analysis", mesh);
    params.validate()?;
    validate_mesh_geometry(mesh, &ValidationOptions::default())?;

    let mut seen = HashSet::new();
    let metrics: Vec<QualityMetric> = metrics.iter().copied().filter(|m| seen.insert(*m)).collect();

    let element_count = mesh.element_count();
    info!(
        target: "spine_fem::quality",
        elements = element_count,
        metrics = ?metrics.iter().map(QualityMetric::key).collect::<Vec<_>>(),
        "Analyzing mesh quality"
    );

    let tolerance = params.degenerate_tolerance;
    let measures: Vec<ElementMeasures> = process_in_batches(
        "quality analysis",
        element_count,
        params.batch_size,
        callback,
        |i| Ok(ElementMeasures::of(&mesh.geometry(i)?, tolerance)),
    )?;

    let mut degenerate_count = 0;
    let mut warnings = Vec::new();
    for (element_index, m) in measures.iter().enumerate().filter(|(_, m)| m.degenerate) {
        degenerate_count += 1;
        debug!(
            target: "spine_fem::quality",
            element = element_index,
            measure = m.measure,
            max_edge = m.max_edge,
            "Degenerate element"
        );
        if warnings.len() < params.max_warnings {
            warnings.push(ElementWarning::DegenerateElement {
                element_index,
                measure: m.measure,
            });
        }
    }
    if degenerate_count > 0 {
        warn!(
            target: "spine_fem::quality",
            degenerate = degenerate_count,
            total = element_count,
            "{} of {} elements are degenerate",
            degenerate_count,
            element_count
        );
    }

    let _perf = log_perf_section("metric_fields");
    let results = metrics
        .into_iter()
        .map(|metric| {
            let values: Vec<f64> = measures.iter().map(|m| m.value(metric)).collect();
            let statistics = compute_statistics(&values, &params.statistics);
            debug!(
                target: "spine_fem::quality",
                metric = metric.key(),
                mean = statistics.mean,
                min = statistics.min,
                max = statistics.max,
                "Metric computed"
            );
            MetricResult {
                metric,
                field: ScalarField::new(metric.name(), metric.unit(), FieldDomain::Element, values),
                statistics,
            }
        })
        .collect();

    Ok(QualityAnalysis {
        results,
        degenerate_count,
        element_count,
        warnings,
        poor_aspect_ratio: params.poor_aspect_ratio,
    })
}
