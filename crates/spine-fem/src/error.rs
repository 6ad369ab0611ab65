//! Error types for mapping and analysis passes with rich diagnostics.
//!
//! This module provides:
//! - Machine-readable error codes for programmatic handling
//! - Rich context (which element, which node, which field)
//! - Recovery suggestions for common issues
//! - Terminal display via miette
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `FEM-XXXX`:
//! - `FEM-1xxx`: Input errors (calibration, parameters, images, metric names)
//! - `FEM-2xxx`: Mesh geometry errors (indices, cardinality, coordinates)
//! - `FEM-3xxx`: Field errors (length, missing entries, lookups)
//! - `FEM-4xxx`: Pass control (cancellation)
//!
//! Per-element anomalies are not errors. An element without image data or a
//! degenerate element is reported as an [`ElementWarning`] and the pass goes on.
//!
//! # Example
//!
//! ```
//! use spine_fem::{FemError, FemErrorCode};
//!
//! let err = FemError::invalid_node_index(5, 100, 50);
//! assert_eq!(err.code(), FemErrorCode::InvalidNodeIndex);
//! assert_eq!(err.code().as_str(), "FEM-2001");
//! ```

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for fallible operations in this crate.
pub type FemResult<T> = Result<T, FemError>;

/// Machine-readable error codes.
///
/// Codes follow the pattern `FEM-XXXX` where:
/// - 1xxx = Input errors
/// - 2xxx = Mesh geometry errors
/// - 3xxx = Field errors
/// - 4xxx = Pass control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FemErrorCode {
    // Input errors (1xxx)
    /// FEM-1001: Calibration slope or intercept is not finite
    InvalidCalibration = 1001,
    /// FEM-1002: Operation parameters are out of range
    InvalidParams = 1002,
    /// FEM-1003: Image grid is inconsistent
    InvalidImage = 1003,
    /// FEM-1004: Quality metric name is not in the registry
    UnknownMetric = 1004,
    /// FEM-1005: Analysis configuration could not be parsed
    Config = 1005,

    // Mesh geometry errors (2xxx)
    /// FEM-2001: Element references a node index that does not exist
    InvalidNodeIndex = 2001,
    /// FEM-2002: Node has NaN or infinite coordinate
    InvalidCoordinate = 2002,
    /// FEM-2003: Element has an unsupported number of nodes
    WrongCardinality = 2003,

    // Field errors (3xxx)
    /// FEM-3001: Field length does not match the mesh
    FieldLengthMismatch = 3001,
    /// FEM-3002: Field construction is missing a value
    MissingValue = 3002,
    /// FEM-3003: No field of that name is attached
    FieldNotFound = 3003,
    /// FEM-3004: Requested element range is outside the field
    InvalidRange = 3004,

    // Pass control (4xxx)
    /// FEM-4001: Pass was cancelled between batches
    Cancelled = 4001,
}

impl FemErrorCode {
    /// Returns the error code as a string in the format `FEM-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FemErrorCode::InvalidCalibration => "FEM-1001",
            FemErrorCode::InvalidParams => "FEM-1002",
            FemErrorCode::InvalidImage => "FEM-1003",
            FemErrorCode::UnknownMetric => "FEM-1004",
            FemErrorCode::Config => "FEM-1005",
            FemErrorCode::InvalidNodeIndex => "FEM-2001",
            FemErrorCode::InvalidCoordinate => "FEM-2002",
            FemErrorCode::WrongCardinality => "FEM-2003",
            FemErrorCode::FieldLengthMismatch => "FEM-3001",
            FemErrorCode::MissingValue => "FEM-3002",
            FemErrorCode::FieldNotFound => "FEM-3003",
            FemErrorCode::InvalidRange => "FEM-3004",
            FemErrorCode::Cancelled => "FEM-4001",
        }
    }
}

impl std::fmt::Display for FemErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Re-run the upstream meshing step.
    RegenerateMesh { checks: Vec<String> },
    /// Fix the named parameters.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Check the image provider.
    CheckImage { checks: Vec<String> },
    /// Choose one of the listed names instead.
    ChooseFrom { names: Vec<String> },
    /// Retry the operation.
    Retry,
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::RegenerateMesh { checks } => {
                write!(
                    f,
                    "Regenerate the volume mesh and check: {}",
                    checks.join(", ")
                )
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::CheckImage { checks } => {
                write!(f, "Check the image for: {}", checks.join(", "))
            }
            RecoverySuggestion::ChooseFrom { names } => {
                write!(f, "Use one of: {}", names.join(", "))
            }
            RecoverySuggestion::Retry => write!(f, "Run the operation again"),
            RecoverySuggestion::None => write!(f, "No automatic recovery available"),
        }
    }
}

/// Location information for errors and warnings.
#[derive(Debug, Clone, PartialEq)]
pub enum FemLocation {
    /// A specific mesh element.
    Element { index: usize },
    /// A specific mesh node.
    Node {
        index: usize,
        position: Option<[f64; 3]>,
    },
    /// A named field, optionally at one entry.
    Field { name: String, index: Option<usize> },
    /// No specific location.
    Unknown,
}

impl std::fmt::Display for FemLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FemLocation::Element { index } => write!(f, "element {}", index),
            FemLocation::Node { index, position } => {
                if let Some([x, y, z]) = position {
                    write!(f, "node {} at ({:.3}, {:.3}, {:.3})", index, x, y, z)
                } else {
                    write!(f, "node {}", index)
                }
            }
            FemLocation::Field { name, index } => match index {
                Some(i) => write!(f, "field '{}' entry {}", name, i),
                None => write!(f, "field '{}'", name),
            },
            FemLocation::Unknown => write!(f, "unknown location"),
        }
    }
}

/// Errors that abort a mapping or analysis pass.
#[derive(Debug, Error, Diagnostic)]
pub enum FemError {
    /// Calibration slope or intercept is NaN or infinite.
    #[error("invalid calibration: slope {slope}, intercept {intercept} must both be finite")]
    #[diagnostic(
        code(fem::input::calibration),
        help("Calibration values come from the phantom scan; check the configured slope and intercept.")
    )]
    InvalidCalibration { slope: f64, intercept: f64 },

    /// Operation parameter out of range.
    #[error("invalid parameter {parameter}: {details}")]
    #[diagnostic(code(fem::input::params))]
    InvalidParams {
        parameter: &'static str,
        details: String,
    },

    /// Image grid is inconsistent.
    #[error("invalid image: {details}")]
    #[diagnostic(
        code(fem::input::image),
        help("Check the voxel count against the image dimensions, and the spacing and direction.")
    )]
    InvalidImage { details: String },

    /// Quality metric name not in the registry.
    #[error("unknown quality metric '{name}'")]
    #[diagnostic(
        code(fem::input::metric),
        help("Metric names are snake_case keys such as aspect_ratio, edge_ratio or scaled_jacobian.")
    )]
    UnknownMetric { name: String },

    /// Analysis configuration could not be parsed or written.
    #[error("invalid analysis configuration: {details}")]
    #[diagnostic(code(fem::input::config))]
    Config { details: String },

    /// Element references a node index outside the node array.
    #[error(
        "invalid node index: element {element_index} references node {node_index}, but mesh only has {node_count} nodes"
    )]
    #[diagnostic(
        code(fem::geometry::node_index),
        help("The mesh connectivity is corrupt. Regenerate the volume mesh.")
    )]
    InvalidNodeIndex {
        element_index: usize,
        node_index: u32,
        node_count: usize,
    },

    /// Node coordinate is NaN or infinite.
    #[error("invalid coordinate at node {node_index}: {coordinate} is {value}")]
    #[diagnostic(
        code(fem::geometry::coordinate),
        help("Check the mesh export for numerical issues.")
    )]
    InvalidCoordinate {
        node_index: usize,
        coordinate: &'static str,
        value: f64,
    },

    /// Element has neither 3 nor 4 node indices.
    #[error(
        "element {element_index} has {found} node indices; expected 3 (triangle) or 4 (tetrahedron)"
    )]
    #[diagnostic(
        code(fem::geometry::cardinality),
        help("Only linear triangles and tetrahedra are supported. Drop higher-order nodes before mapping.")
    )]
    WrongCardinality { element_index: usize, found: usize },

    /// Field length does not match the mesh.
    #[error("field '{field}' has {found} values, but the mesh has {expected} {domain}")]
    #[diagnostic(code(fem::field::length))]
    FieldLengthMismatch {
        field: String,
        domain: &'static str,
        expected: usize,
        found: usize,
    },

    /// A field value was not supplied.
    #[error("field '{field}' has no value for entry {index}")]
    #[diagnostic(
        code(fem::field::missing),
        help("Every element must receive a value. Use NaN to mark undefined data explicitly.")
    )]
    MissingValue { field: String, index: usize },

    /// No field of that name is attached.
    #[error("no field named '{name}' is attached")]
    #[diagnostic(code(fem::field::not_found))]
    FieldNotFound { name: String },

    /// Element range outside the field.
    #[error("range {start}..{end} is out of bounds for field '{field}' of length {len}")]
    #[diagnostic(code(fem::field::range))]
    InvalidRange {
        field: String,
        start: usize,
        end: usize,
        len: usize,
    },

    /// Pass cancelled between batches.
    #[error("{operation} cancelled after {completed} of {total} elements")]
    #[diagnostic(
        code(fem::pass::cancelled),
        help("No partial field was produced. Run the operation again to get a complete result.")
    )]
    Cancelled {
        operation: &'static str,
        completed: usize,
        total: usize,
    },
}

impl FemError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> FemErrorCode {
        match self {
            FemError::InvalidCalibration { .. } => FemErrorCode::InvalidCalibration,
            FemError::InvalidParams { .. } => FemErrorCode::InvalidParams,
            FemError::InvalidImage { .. } => FemErrorCode::InvalidImage,
            FemError::UnknownMetric { .. } => FemErrorCode::UnknownMetric,
            FemError::Config { .. } => FemErrorCode::Config,
            FemError::InvalidNodeIndex { .. } => FemErrorCode::InvalidNodeIndex,
            FemError::InvalidCoordinate { .. } => FemErrorCode::InvalidCoordinate,
            FemError::WrongCardinality { .. } => FemErrorCode::WrongCardinality,
            FemError::FieldLengthMismatch { .. } => FemErrorCode::FieldLengthMismatch,
            FemError::MissingValue { .. } => FemErrorCode::MissingValue,
            FemError::FieldNotFound { .. } => FemErrorCode::FieldNotFound,
            FemError::InvalidRange { .. } => FemErrorCode::InvalidRange,
            FemError::Cancelled { .. } => FemErrorCode::Cancelled,
        }
    }

    /// Whether this error describes malformed mesh geometry.
    pub fn is_mesh_geometry(&self) -> bool {
        matches!(
            self,
            FemError::InvalidNodeIndex { .. }
                | FemError::InvalidCoordinate { .. }
                | FemError::WrongCardinality { .. }
        )
    }

    /// Whether this error is a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FemError::Cancelled { .. })
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            FemError::InvalidCalibration { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![
                    ("slope".into(), "a finite value".into()),
                    ("intercept".into(), "a finite value".into()),
                ],
            },
            FemError::InvalidParams { parameter, details } => {
                RecoverySuggestion::AdjustParameters {
                    parameters: vec![((*parameter).into(), details.clone())],
                }
            }
            FemError::InvalidImage { .. } => RecoverySuggestion::CheckImage {
                checks: vec![
                    "voxel count".into(),
                    "spacing".into(),
                    "direction matrix".into(),
                ],
            },
            FemError::UnknownMetric { .. } => RecoverySuggestion::ChooseFrom {
                names: crate::quality::QualityMetric::ALL
                    .iter()
                    .map(|m| m.key().to_string())
                    .collect(),
            },
            FemError::Config { .. } => RecoverySuggestion::None,
            FemError::InvalidNodeIndex { .. } | FemError::WrongCardinality { .. } => {
                RecoverySuggestion::RegenerateMesh {
                    checks: vec!["element connectivity".into(), "element types".into()],
                }
            }
            FemError::InvalidCoordinate { .. } => RecoverySuggestion::RegenerateMesh {
                checks: vec!["node coordinates".into(), "export precision".into()],
            },
            FemError::FieldLengthMismatch { .. }
            | FemError::MissingValue { .. }
            | FemError::FieldNotFound { .. }
            | FemError::InvalidRange { .. } => RecoverySuggestion::None,
            FemError::Cancelled { .. } => RecoverySuggestion::Retry,
        }
    }

    /// Returns location information if available.
    pub fn location(&self) -> Option<FemLocation> {
        match self {
            FemError::InvalidNodeIndex { element_index, .. }
            | FemError::WrongCardinality { element_index, .. } => Some(FemLocation::Element {
                index: *element_index,
            }),
            FemError::InvalidCoordinate { node_index, .. } => Some(FemLocation::Node {
                index: *node_index,
                position: None,
            }),
            FemError::FieldLengthMismatch { field, .. } => Some(FemLocation::Field {
                name: field.clone(),
                index: None,
            }),
            FemError::MissingValue { field, index } => Some(FemLocation::Field {
                name: field.clone(),
                index: Some(*index),
            }),
            FemError::FieldNotFound { name } => Some(FemLocation::Field {
                name: name.clone(),
                index: None,
            }),
            _ => None,
        }
    }

    // Constructor helpers for common error patterns

    /// Create an InvalidCalibration error.
    pub fn invalid_calibration(slope: f64, intercept: f64) -> Self {
        FemError::InvalidCalibration { slope, intercept }
    }

    /// Create an InvalidParams error.
    pub fn invalid_params(parameter: &'static str, details: impl Into<String>) -> Self {
        FemError::InvalidParams {
            parameter,
            details: details.into(),
        }
    }

    /// Create an InvalidImage error.
    pub fn invalid_image(details: impl Into<String>) -> Self {
        FemError::InvalidImage {
            details: details.into(),
        }
    }

    /// Create an UnknownMetric error.
    pub fn unknown_metric(name: impl Into<String>) -> Self {
        FemError::UnknownMetric { name: name.into() }
    }

    /// Create an InvalidNodeIndex error.
    pub fn invalid_node_index(element_index: usize, node_index: u32, node_count: usize) -> Self {
        FemError::InvalidNodeIndex {
            element_index,
            node_index,
            node_count,
        }
    }

    /// Create an InvalidCoordinate error.
    pub fn invalid_coordinate(node_index: usize, coordinate: &'static str, value: f64) -> Self {
        FemError::InvalidCoordinate {
            node_index,
            coordinate,
            value,
        }
    }

    /// Create a WrongCardinality error.
    pub fn wrong_cardinality(element_index: usize, found: usize) -> Self {
        FemError::WrongCardinality {
            element_index,
            found,
        }
    }

    /// Create a FieldNotFound error.
    pub fn field_not_found(name: impl Into<String>) -> Self {
        FemError::FieldNotFound { name: name.into() }
    }

    /// Create a Cancelled error.
    pub fn cancelled(operation: &'static str, completed: usize, total: usize) -> Self {
        FemError::Cancelled {
            operation,
            completed,
            total,
        }
    }
}

/// Per-element anomalies absorbed into sentinel values during a pass.
///
/// Unlike [`FemError`], a warning never interrupts the pass. Passes collect
/// them (up to a cap) next to an aggregate count.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ElementWarning {
    /// Every sample point of the element fell outside the image.
    NoImageData {
        element_index: usize,
        rejected_samples: usize,
    },
    /// Element has zero (or near-zero) volume or area.
    DegenerateElement { element_index: usize, measure: f64 },
}

impl ElementWarning {
    /// Index of the element the warning refers to.
    pub fn element_index(&self) -> usize {
        match self {
            ElementWarning::NoImageData { element_index, .. }
            | ElementWarning::DegenerateElement { element_index, .. } => *element_index,
        }
    }

    /// Returns a warning code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            ElementWarning::NoImageData { .. } => "FEM-W001",
            ElementWarning::DegenerateElement { .. } => "FEM-W002",
        }
    }

    /// Returns a short follow-up hint.
    pub fn suggestion(&self) -> &'static str {
        match self {
            ElementWarning::NoImageData { .. } => {
                "Check the mesh-to-image transform; the element lies outside the scanned volume"
            }
            ElementWarning::DegenerateElement { .. } => {
                "Remesh the region; sliver elements distort FE results"
            }
        }
    }
}

impl std::fmt::Display for ElementWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementWarning::NoImageData {
                element_index,
                rejected_samples,
            } => write!(
                f,
                "element {} has no image data ({} samples out of bounds)",
                element_index, rejected_samples
            ),
            ElementWarning::DegenerateElement {
                element_index,
                measure,
            } => write!(
                f,
                "element {} is degenerate (measure: {:.2e})",
                element_index, measure
            ),
        }
    }
}

/// Severity levels for geometry issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueSeverity {
    /// Warning, results may be affected.
    Warning,
    /// Error, the mesh cannot be processed.
    Error,
}

/// Geometry issues collected by mesh validation.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryIssue {
    /// Element references a node index that doesn't exist.
    InvalidNodeIndex {
        element_index: usize,
        node_index: u32,
        node_count: usize,
    },
    /// Node has a NaN or infinite coordinate.
    NonFiniteCoordinate {
        node_index: usize,
        coordinate: &'static str,
        value: f64,
    },
    /// Element references the same node more than once.
    RepeatedNode { element_index: usize, node_index: u32 },
}

impl GeometryIssue {
    /// Returns a severity level for the issue.
    pub fn severity(&self) -> IssueSeverity {
        match self {
            GeometryIssue::InvalidNodeIndex { .. } => IssueSeverity::Error,
            GeometryIssue::NonFiniteCoordinate { .. } => IssueSeverity::Error,
            GeometryIssue::RepeatedNode { .. } => IssueSeverity::Warning,
        }
    }

    /// Convert an error-severity issue into the matching [`FemError`].
    pub fn to_error(&self) -> Option<FemError> {
        match *self {
            GeometryIssue::InvalidNodeIndex {
                element_index,
                node_index,
                node_count,
            } => Some(FemError::invalid_node_index(
                element_index,
                node_index,
                node_count,
            )),
            GeometryIssue::NonFiniteCoordinate {
                node_index,
                coordinate,
                value,
            } => Some(FemError::invalid_coordinate(node_index, coordinate, value)),
            GeometryIssue::RepeatedNode { .. } => None,
        }
    }
}

impl std::fmt::Display for GeometryIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeometryIssue::InvalidNodeIndex {
                element_index,
                node_index,
                node_count,
            } => write!(
                f,
                "element {} references node {}, but mesh only has {} nodes",
                element_index, node_index, node_count
            ),
            GeometryIssue::NonFiniteCoordinate {
                node_index,
                coordinate,
                value,
            } => write!(
                f,
                "node {} has non-finite {} coordinate ({})",
                node_index, coordinate, value
            ),
            GeometryIssue::RepeatedNode {
                element_index,
                node_index,
            } => write!(
                f,
                "element {} references node {} more than once",
                element_index, node_index
            ),
        }
    }
}
