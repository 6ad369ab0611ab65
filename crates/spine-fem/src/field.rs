//! Named scalar fields attached to mesh elements or nodes.

use crate::error::{FemError, FemResult};
use crate::stats::{StatisticsParams, StatisticsSummary, compute_statistics};
use crate::types::Mesh;

/// Whether a field holds one value per element or per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldDomain {
    Element,
    Node,
}

impl FieldDomain {
    /// Number of entries a field of this domain needs on `mesh`.
    pub fn len_on(&self, mesh: &Mesh) -> usize {
        match self {
            FieldDomain::Element => mesh.element_count(),
            FieldDomain::Node => mesh.node_count(),
        }
    }

    /// Plural noun used in messages.
    pub fn plural(&self) -> &'static str {
        match self {
            FieldDomain::Element => "elements",
            FieldDomain::Node => "nodes",
        }
    }
}

impl std::fmt::Display for FieldDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldDomain::Element => write!(f, "element"),
            FieldDomain::Node => write!(f, "node"),
        }
    }
}

/// One floating-point value per element (or node), with a name and unit.
///
/// NaN entries mean "undefined" and are kept as-is. A field holds no
/// reference to the mesh it was built for.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScalarField {
    /// Field name, e.g. "BMD" or "Aspect Ratio".
    pub name: String,

    /// Unit label, e.g. "mg/cc". `None` for unitless quantities.
    pub unit: Option<String>,

    pub domain: FieldDomain,

    #[cfg_attr(feature = "serde", serde(with = "crate::serde_float::values"))]
    pub values: Vec<f64>,
}

impl ScalarField {
    /// Create a field without checking it against a mesh.
    pub fn new(
        name: impl Into<String>,
        unit: Option<&str>,
        domain: FieldDomain,
        values: Vec<f64>,
    ) -> Self {
        Self {
            name: name.into(),
            unit: unit.map(str::to_string),
            domain,
            values,
        }
    }

    /// Create a field whose length must match `mesh`.
    ///
    /// Fails with `FieldLengthMismatch` otherwise.
    pub fn for_mesh(
        mesh: &Mesh,
        name: impl Into<String>,
        unit: Option<&str>,
        domain: FieldDomain,
        values: Vec<f64>,
    ) -> FemResult<Self> {
        let field = Self::new(name, unit, domain, values);
        field.check_length(mesh)?;
        Ok(field)
    }

    /// Create a field from per-entry optional values.
    ///
    /// Every entry must be present; the first `None` fails with
    /// `MissingValue`. Use NaN for entries that are known to be undefined.
    pub fn from_partial(
        mesh: &Mesh,
        name: impl Into<String>,
        unit: Option<&str>,
        domain: FieldDomain,
        values: Vec<Option<f64>>,
    ) -> FemResult<Self> {
        let name = name.into();
        let values = values
            .into_iter()
            .enumerate()
            .map(|(index, v)| {
                v.ok_or_else(|| FemError::MissingValue {
                    field: name.clone(),
                    index,
                })
            })
            .collect::<FemResult<Vec<_>>>()?;
        Self::for_mesh(mesh, name, unit, domain, values)
    }

    /// Check that this field has one entry per element (or node) of `mesh`.
    pub fn check_length(&self, mesh: &Mesh) -> FemResult<()> {
        let expected = self.domain.len_on(mesh);
        if self.values.len() != expected {
            return Err(FemError::FieldLengthMismatch {
                field: self.name.clone(),
                domain: self.domain.plural(),
                expected,
                found: self.values.len(),
            });
        }
        Ok(())
    }

    /// Display label, e.g. "BMD (mg/cc)".
    pub fn label(&self) -> String {
        match &self.unit {
            Some(unit) => format!("{} ({})", self.name, unit),
            None => self.name.clone(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of NaN entries.
    pub fn undefined_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    /// Summarize the current values. Recomputed on every call.
    pub fn statistics(&self, params: &StatisticsParams) -> StatisticsSummary {
        compute_statistics(&self.values, params)
    }
}
