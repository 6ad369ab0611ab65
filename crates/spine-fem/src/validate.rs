//! Mesh geometry validation.
//!
//! Every pass validates its input mesh before touching any element, so a
//! malformed mesh aborts the pass with the offending element or node index
//! instead of producing a partial field.

use nalgebra::Point3;
use tracing::{debug, warn};

use crate::error::{FemResult, GeometryIssue, IssueSeverity};
use crate::types::Mesh;

/// Options for mesh geometry validation.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Whether to fail on the first error-severity issue (default: true).
    /// If false, issues are collected but validation continues.
    pub reject_on_invalid: bool,
    /// Maximum number of issues to collect before stopping (default: 100).
    pub max_issues: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            reject_on_invalid: true,
            max_issues: 100,
        }
    }
}

impl ValidationOptions {
    /// Create options that collect all issues without rejecting.
    pub fn collect_all() -> Self {
        Self {
            reject_on_invalid: false,
            max_issues: 1000,
        }
    }
}

/// Result of mesh geometry validation.
#[derive(Debug, Clone)]
pub struct GeometryReport {
    /// Issues found, capped at [`ValidationOptions::max_issues`].
    pub issues: Vec<GeometryIssue>,
    /// Number of out-of-range node indices found.
    pub invalid_index_count: usize,
    /// Number of NaN or infinite coordinates found.
    pub non_finite_count: usize,
    /// Number of elements that reference a node twice.
    pub repeated_node_count: usize,
    /// Node and element counts of the validated mesh.
    pub node_count: usize,
    pub element_count: usize,
    /// Bounding box of the nodes.
    pub bounds: Option<(Point3<f64>, Point3<f64>)>,
}

impl GeometryReport {
    /// Check if no error-severity issue was found.
    pub fn is_valid(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity() == IssueSeverity::Error)
    }

    /// Get total number of issues found.
    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }
}

impl std::fmt::Display for GeometryReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Mesh geometry: {} nodes, {} elements",
            self.node_count, self.element_count
        )?;
        if let Some((min, max)) = &self.bounds {
            writeln!(
                f,
                "  Bounds: [{:.1}, {:.1}, {:.1}] to [{:.1}, {:.1}, {:.1}]",
                min.x, min.y, min.z, max.x, max.y, max.z
            )?;
        }
        if self.issues.is_empty() {
            return write!(f, "  No issues found");
        }
        writeln!(f, "  {} issue(s):", self.issue_count())?;
        if self.invalid_index_count > 0 {
            writeln!(f, "  - {} invalid node indices", self.invalid_index_count)?;
        }
        if self.non_finite_count > 0 {
            writeln!(f, "  - {} non-finite coordinates", self.non_finite_count)?;
        }
        if self.repeated_node_count > 0 {
            writeln!(f, "  - {} elements with repeated nodes", self.repeated_node_count)?;
        }
        Ok(())
    }
}

/// Validate element connectivity and node coordinates.
///
/// Checks, in order:
/// - every element's node indices are within the node array
/// - no element references the same node twice (warning only)
/// - every coordinate is finite
///
/// # Returns
/// - `Ok(GeometryReport)` - validation completed (check `is_valid()` when
///   `reject_on_invalid` is false)
/// - `Err(FemError)` - first error-severity issue, when `reject_on_invalid` is true
///
/// # Example
/// ```
/// use spine_fem::{Mesh, validate::{validate_mesh_geometry, ValidationOptions}};
///
/// let mesh = Mesh::new();
/// let report = validate_mesh_geometry(&mesh, &ValidationOptions::default()).unwrap();
/// assert!(report.is_valid());
/// ```
pub fn validate_mesh_geometry(
    mesh: &Mesh,
    options: &ValidationOptions,
) -> FemResult<GeometryReport> {
    let mut issues = Vec::new();
    let mut invalid_index_count = 0;
    let mut non_finite_count = 0;
    let mut repeated_node_count = 0;
    let node_count = mesh.node_count();

    let record = |issue: GeometryIssue, issues: &mut Vec<GeometryIssue>| -> FemResult<()> {
        if options.reject_on_invalid {
            if let Some(err) = issue.to_error() {
                return Err(err);
            }
        }
        if issues.len() < options.max_issues {
            issues.push(issue);
        }
        Ok(())
    };

    for (element_index, element) in mesh.elements.iter().enumerate() {
        let indices = element.node_indices();
        for (pos, &node_index) in indices.iter().enumerate() {
            if node_index as usize >= node_count {
                invalid_index_count += 1;
                record(
                    GeometryIssue::InvalidNodeIndex {
                        element_index,
                        node_index,
                        node_count,
                    },
                    &mut issues,
                )?;
            } else if indices[..pos].contains(&node_index) {
                repeated_node_count += 1;
                record(
                    GeometryIssue::RepeatedNode {
                        element_index,
                        node_index,
                    },
                    &mut issues,
                )?;
            }
        }
    }

    for (node_index, node) in mesh.nodes.iter().enumerate() {
        for (coordinate, value) in [("x", node.x), ("y", node.y), ("z", node.z)] {
            if !value.is_finite() {
                non_finite_count += 1;
                record(
                    GeometryIssue::NonFiniteCoordinate {
                        node_index,
                        coordinate,
                        value,
                    },
                    &mut issues,
                )?;
            }
        }
    }

    if repeated_node_count > 0 {
        warn!(
            repeated = repeated_node_count,
            "Mesh has elements with repeated nodes; they will be treated as degenerate"
        );
    }

    let report = GeometryReport {
        issues,
        invalid_index_count,
        non_finite_count,
        repeated_node_count,
        node_count,
        element_count: mesh.element_count(),
        bounds: mesh.bounds(),
    };
    debug!("{}", report);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FemError;
    use crate::types::Element;

    fn unit_tet_mesh() -> Mesh {
        Mesh {
            nodes: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            elements: vec![Element::Tetrahedron([0, 1, 2, 3])],
        }
    }

    #[test]
    fn test_valid_mesh() {
        let report = validate_mesh_geometry(&unit_tet_mesh(), &ValidationOptions::default())
            .expect("valid mesh should pass");
        assert!(report.is_valid());
        assert_eq!(report.issue_count(), 0);
        assert_eq!(report.element_count, 1);
    }

    #[test]
    fn test_invalid_index_rejected_with_element() {
        let mut mesh = unit_tet_mesh();
        mesh.elements.push(Element::Tetrahedron([0, 1, 2, 3]));
        mesh.elements.push(Element::Triangle([0, 1, 7]));

        let err = validate_mesh_geometry(&mesh, &ValidationOptions::default()).unwrap_err();
        match err {
            FemError::InvalidNodeIndex {
                element_index,
                node_index,
                node_count,
            } => {
                assert_eq!(element_index, 2);
                assert_eq!(node_index, 7);
                assert_eq!(node_count, 4);
            }
            other => panic!("Expected InvalidNodeIndex, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_coordinate_rejected() {
        let mut mesh = unit_tet_mesh();
        mesh.nodes[2].y = f64::NAN;

        let err = validate_mesh_geometry(&mesh, &ValidationOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            FemError::InvalidCoordinate {
                node_index: 2,
                coordinate: "y",
                ..
            }
        ));
    }

    #[test]
    fn test_collect_all_reports_every_issue() {
        let mut mesh = unit_tet_mesh();
        mesh.nodes[0].x = f64::INFINITY;
        mesh.elements.push(Element::Tetrahedron([0, 0, 1, 9]));

        let report = validate_mesh_geometry(&mesh, &ValidationOptions::collect_all())
            .expect("collect_all never rejects");
        assert!(!report.is_valid());
        assert_eq!(report.invalid_index_count, 1);
        assert_eq!(report.repeated_node_count, 1);
        assert_eq!(report.non_finite_count, 1);
        assert_eq!(report.issue_count(), 3);
        assert!(format!("{}", report).contains("3 issue(s)"));
    }

    #[test]
    fn test_repeated_node_is_only_a_warning() {
        let mut mesh = unit_tet_mesh();
        mesh.elements.push(Element::Tetrahedron([0, 1, 1, 3]));

        let report = validate_mesh_geometry(&mesh, &ValidationOptions::default())
            .expect("repeated nodes do not reject");
        assert!(report.is_valid());
        assert_eq!(report.repeated_node_count, 1);
    }
}
