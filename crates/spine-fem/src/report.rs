//! Field access and formatting for export and visualization layers.
//!
//! [`MeshFields`] borrows a mesh and holds the named fields attached to it.
//! Everything here is projection: values are returned at full precision and
//! NaN entries are kept, never rounded away or dropped.

use std::ops::Range;

use hashbrown::HashMap;

use crate::error::{FemError, FemResult};
use crate::field::{FieldDomain, ScalarField};
use crate::material::MaterialFields;
use crate::quality::QualityAnalysis;
use crate::stats::{StatisticsParams, StatisticsSummary};
use crate::types::Mesh;

/// Named fields attached to one mesh, in attachment order.
#[derive(Debug, Clone)]
pub struct MeshFields<'a> {
    mesh: &'a Mesh,
    fields: Vec<ScalarField>,
    index: HashMap<String, usize>,
}

impl<'a> MeshFields<'a> {
    /// Start with no fields.
    pub fn new(mesh: &'a Mesh) -> Self {
        Self {
            mesh,
            fields: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// The mesh the fields belong to.
    pub fn mesh(&self) -> &'a Mesh {
        self.mesh
    }

    /// Attach a field.
    ///
    /// The field length must match the mesh. A field with the same name is
    /// replaced in place (keeping its position) and returned.
    pub fn attach(&mut self, field: ScalarField) -> FemResult<Option<ScalarField>> {
        field.check_length(self.mesh)?;
        match self.index.get(&field.name) {
            Some(&slot) => Ok(Some(std::mem::replace(&mut self.fields[slot], field))),
            None => {
                self.index.insert(field.name.clone(), self.fields.len());
                self.fields.push(field);
                Ok(None)
            }
        }
    }

    /// Attach HU, BMD and BV/TV from a material mapping pass.
    pub fn attach_material(&mut self, material: MaterialFields) -> FemResult<()> {
        for field in material.into_fields() {
            self.attach(field)?;
        }
        Ok(())
    }

    /// Attach every metric field from a quality analysis.
    pub fn attach_quality(&mut self, analysis: QualityAnalysis) -> FemResult<()> {
        for field in analysis.into_fields() {
            self.attach(field)?;
        }
        Ok(())
    }

    /// Remove a field by name.
    pub fn detach(&mut self, name: &str) -> Option<ScalarField> {
        let slot = self.index.remove(name)?;
        let field = self.fields.remove(slot);
        for i in self.index.values_mut() {
            if *i > slot {
                *i -= 1;
            }
        }
        Some(field)
    }

    /// Names of attached fields, in attachment order.
    pub fn list_field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> FemResult<&ScalarField> {
        self.index
            .get(name)
            .map(|&slot| &self.fields[slot])
            .ok_or_else(|| FemError::field_not_found(name))
    }

    /// Values of a field for an index range.
    ///
    /// Fails with `InvalidRange` if the range is reversed or past the end.
    pub fn field_values(&self, name: &str, range: Range<usize>) -> FemResult<&[f64]> {
        let field = self.field(name)?;
        check_range(field, &range)?;
        Ok(&field.values[range])
    }

    /// Current summary of a field, recomputed from its values.
    pub fn statistics(&self, name: &str, params: &StatisticsParams) -> FemResult<StatisticsSummary> {
        Ok(self.field(name)?.statistics(params))
    }

    /// Full report of every attached field, in attachment order.
    pub fn report(&self, params: &StatisticsParams) -> Vec<FieldReport> {
        self.fields
            .iter()
            .map(|f| FieldReport::of(f, params))
            .collect()
    }

    /// Per-element rows of the named element fields over `range`.
    ///
    /// Columns follow the order of `names`.
    pub fn element_rows(&self, names: &[&str], range: Range<usize>) -> FemResult<Vec<ElementRow>> {
        let columns = names
            .iter()
            .map(|&name| {
                let field = self.field(name)?;
                if field.domain != FieldDomain::Element {
                    return Err(FemError::invalid_params(
                        "names",
                        format!("field '{}' is per-node, rows are per-element", name),
                    ));
                }
                check_range(field, &range)?;
                Ok(&field.values[..])
            })
            .collect::<FemResult<Vec<&[f64]>>>()?;

        if columns.is_empty() && range.end > self.mesh.element_count() {
            return Err(FemError::InvalidRange {
                field: String::new(),
                start: range.start,
                end: range.end,
                len: self.mesh.element_count(),
            });
        }

        Ok(range
            .map(|element_index| ElementRow {
                element_index,
                values: columns.iter().map(|c| c[element_index]).collect(),
            })
            .collect())
    }
}

fn check_range(field: &ScalarField, range: &Range<usize>) -> FemResult<()> {
    if range.start > range.end || range.end > field.len() {
        return Err(FemError::InvalidRange {
            field: field.name.clone(),
            start: range.start,
            end: range.end,
            len: field.len(),
        });
    }
    Ok(())
}

/// Names of attached fields, in attachment order.
pub fn list_field_names<'f>(fields: &'f MeshFields<'_>) -> Vec<&'f str> {
    fields.list_field_names()
}

/// One field with its summary, ready for export.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldReport {
    pub name: String,
    /// Name with unit, e.g. "BMD (mg/cc)".
    pub label: String,
    pub domain: FieldDomain,
    /// Values at full precision; NaN marks undefined entries.
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_float::values"))]
    pub values: Vec<f64>,
    pub statistics: StatisticsSummary,
}

impl FieldReport {
    /// Build the report of one field.
    pub fn of(field: &ScalarField, params: &StatisticsParams) -> Self {
        Self {
            name: field.name.clone(),
            label: field.label(),
            domain: field.domain,
            values: field.values.clone(),
            statistics: field.statistics(params),
        }
    }
}

impl std::fmt::Display for FieldReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} [{} values per {}]", self.label, self.values.len(), self.domain)?;
        writeln!(f, "  {}", self.statistics)?;
        for bin in &self.statistics.histogram {
            writeln!(
                f,
                "  [{}, {}]: {}",
                format_value(bin.lower),
                format_value(bin.upper),
                bin.count
            )?;
        }
        Ok(())
    }
}

/// One element's values for a set of fields.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ElementRow {
    pub element_index: usize,
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_float::values"))]
    pub values: Vec<f64>,
}

impl ElementRow {
    /// Render as `index<sep>value<sep>value...` with [`format_value`].
    pub fn to_delimited(&self, separator: &str) -> String {
        std::iter::once(self.element_index.to_string())
            .chain(self.values.iter().map(|&v| format_value(v)))
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Shortest text that parses back to the same `f64`, with explicit markers
/// for non-finite values: `"NaN"`, `"inf"`, `"-inf"`.
///
/// ```
/// use spine_fem::report::format_value;
///
/// assert_eq!(format_value(75.1), "75.1");
/// assert_eq!(format_value(f64::NAN), "NaN");
/// assert_eq!(format_value(f64::NEG_INFINITY), "-inf");
/// assert_eq!(format_value(0.1 + 0.2).parse::<f64>().unwrap(), 0.1 + 0.2);
/// ```
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Element;
    use nalgebra::Point3;

    fn mesh() -> Mesh {
        Mesh {
            nodes: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
                Point3::new(1.0, 1.0, 1.0),
            ],
            elements: vec![
                Element::Tetrahedron([0, 1, 2, 3]),
                Element::Tetrahedron([1, 2, 3, 4]),
                Element::Triangle([0, 1, 2]),
            ],
        }
    }

    fn field(name: &str, values: Vec<f64>) -> ScalarField {
        ScalarField::new(name, None, FieldDomain::Element, values)
    }

    #[test]
    fn test_attach_and_list() {
        let mesh = mesh();
        let mut fields = MeshFields::new(&mesh);
        assert!(fields.attach(field("BMD", vec![1.0, 2.0, 3.0])).unwrap().is_none());
        fields.attach(field("BV/TV", vec![0.1, 0.2, 0.3])).unwrap();
        assert_eq!(fields.list_field_names(), vec!["BMD", "BV/TV"]);
        assert_eq!(list_field_names(&fields), vec!["BMD", "BV/TV"]);
    }

    #[test]
    fn test_attach_replaces_in_place() {
        let mesh = mesh();
        let mut fields = MeshFields::new(&mesh);
        fields.attach(field("A", vec![1.0; 3])).unwrap();
        fields.attach(field("B", vec![2.0; 3])).unwrap();

        let old = fields.attach(field("A", vec![9.0; 3])).unwrap();
        assert_eq!(old.map(|f| f.values), Some(vec![1.0; 3]));
        assert_eq!(fields.list_field_names(), vec!["A", "B"]);
        assert_eq!(fields.field("A").unwrap().values, vec![9.0; 3]);
    }

    #[test]
    fn test_attach_rejects_wrong_length() {
        let mesh = mesh();
        let mut fields = MeshFields::new(&mesh);
        let err = fields.attach(field("A", vec![1.0; 2])).unwrap_err();
        assert!(matches!(err, FemError::FieldLengthMismatch { expected: 3, found: 2, .. }));
        assert!(fields.is_empty());
    }

    #[test]
    fn test_field_values_range() {
        let mesh = mesh();
        let mut fields = MeshFields::new(&mesh);
        fields.attach(field("BMD", vec![1.0, f64::NAN, 3.0])).unwrap();

        let values = fields.field_values("BMD", 1..3).unwrap();
        assert!(values[0].is_nan());
        assert_eq!(values[1], 3.0);

        assert!(matches!(
            fields.field_values("BMD", 2..4),
            Err(FemError::InvalidRange { len: 3, .. })
        ));
        assert!(matches!(
            fields.field_values("HU", 0..1),
            Err(FemError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn test_statistics_recomputed_after_replace() {
        let mesh = mesh();
        let mut fields = MeshFields::new(&mesh);
        let params = StatisticsParams::default();
        fields.attach(field("A", vec![1.0; 3])).unwrap();
        assert_eq!(fields.statistics("A", &params).unwrap().mean, 1.0);

        fields.attach(field("A", vec![4.0; 3])).unwrap();
        assert_eq!(fields.statistics("A", &params).unwrap().mean, 4.0);
    }

    #[test]
    fn test_detach_keeps_index_consistent() {
        let mesh = mesh();
        let mut fields = MeshFields::new(&mesh);
        fields.attach(field("A", vec![1.0; 3])).unwrap();
        fields.attach(field("B", vec![2.0; 3])).unwrap();
        fields.attach(field("C", vec![3.0; 3])).unwrap();

        assert!(fields.detach("A").is_some());
        assert_eq!(fields.list_field_names(), vec!["B", "C"]);
        assert_eq!(fields.field("C").unwrap().values[0], 3.0);
        assert!(fields.detach("A").is_none());
    }

    #[test]
    fn test_element_rows() {
        let mesh = mesh();
        let mut fields = MeshFields::new(&mesh);
        fields.attach(field("BMD", vec![75.1, f64::NAN, 10.0])).unwrap();
        fields.attach(field("BV/TV", vec![0.5, f64::NAN, 0.25])).unwrap();

        let rows = fields.element_rows(&["BV/TV", "BMD"], 0..2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values, vec![0.5, 75.1]);
        assert_eq!(rows[0].to_delimited(","), "0,0.5,75.1");
        assert_eq!(rows[1].to_delimited(","), "1,NaN,NaN");
    }

    #[test]
    fn test_element_rows_reject_node_field() {
        let mesh = mesh();
        let mut fields = MeshFields::new(&mesh);
        fields
            .attach(ScalarField::new("T", None, FieldDomain::Node, vec![0.0; 5]))
            .unwrap();
        assert!(matches!(
            fields.element_rows(&["T"], 0..1),
            Err(FemError::InvalidParams { .. })
        ));
    }

    #[test]
    fn test_report_preserves_nan() {
        let mesh = mesh();
        let mut fields = MeshFields::new(&mesh);
        fields
            .attach(ScalarField::new("BMD", Some("mg/cc"), FieldDomain::Element, vec![1.0, f64::NAN, 3.0]))
            .unwrap();

        let report = fields.report(&StatisticsParams::with_bins(2));
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].label, "BMD (mg/cc)");
        assert!(report[0].values[1].is_nan());
        assert_eq!(report[0].statistics.undefined_count, 1);
        assert!(format!("{}", report[0]).contains("BMD (mg/cc)"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_report_json_keeps_undefined_values() {
        let mesh = mesh();
        let mut fields = MeshFields::new(&mesh);
        fields
            .attach(ScalarField::new("BMD", Some("mg/cc"), FieldDomain::Element, vec![f64::NAN; 3]))
            .unwrap();
        fields.attach(field("Edge Ratio", vec![1.5, f64::INFINITY, 2.0])).unwrap();

        let report = fields.report(&StatisticsParams::with_bins(2));
        let json = serde_json::to_string(&report).unwrap();
        let back: Vec<FieldReport> = serde_json::from_str(&json).unwrap();

        assert_eq!(back.len(), 2);
        assert!(back[0].values.iter().all(|v| v.is_nan()));
        assert!(back[0].statistics.is_empty());
        assert!(back[0].statistics.mean.is_nan());
        assert_eq!(back[0].statistics.undefined_count, 3);
        assert_eq!(back[1].values[1], f64::INFINITY);
        assert_eq!(back[1].statistics, report[1].statistics);

        let rows = fields.element_rows(&["BMD"], 0..1).unwrap();
        let back: Vec<ElementRow> = serde_json::from_str(&serde_json::to_string(&rows).unwrap()).unwrap();
        assert!(back[0].values[0].is_nan());
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(1.0), "1");
        assert_eq!(format_value(f64::INFINITY), "inf");
        let v = 1.0 / 3.0;
        assert_eq!(format_value(v).parse::<f64>().unwrap(), v);
    }
}
