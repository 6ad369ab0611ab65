//! Mapping CT intensities onto mesh elements as bone material fields.
//!
//! For each element the pass samples HU from the image, converts it to
//! bone mineral density (BMD) with the caller's [`Calibration`], and derives
//! the bone volume fraction (BV/TV) from BMD. Elements without image data
//! carry NaN in all three fields.
//!
//! # Example
//!
//! ```
//! use nalgebra::{Affine3, Point3};
//! use spine_fem::{Calibration, FunctionImage, ImageBounds, Mesh, MaterialParams};
//! use spine_fem::material::compute_material_fields;
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
//! let image = FunctionImage::new(
//!     ImageBounds::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(2.0, 2.0, 2.0)),
//!     |_: &Point3<f64>| 100.0,
//! );
//! let cal = Calibration::new(0.7, 5.1).unwrap();
//!
//! let fields = compute_material_fields(
//!     &mesh, &image, &Affine3::identity(), &cal, &MaterialParams::default(),
//! ).unwrap();
//! assert!((fields.bmd.values[0] - 75.1).abs() < 1e-9);
//! assert_eq!(fields.undefined_count, 0);
//! ```

use nalgebra::Affine3;
use tracing::{info, warn};

use crate::calibration::{Calibration, bv_tv};
use crate::error::{ElementWarning, FemError, FemResult};
use crate::field::{FieldDomain, ScalarField};
use crate::image::IntensitySource;
use crate::progress::{ProgressCallback, process_in_batches};
use crate::sampler::{ElementSample, SamplingParams, sample_element};
use crate::stats::StatisticsParams;
use crate::tracing_ext::{OperationTimer, log_field_statistics};
use crate::types::Mesh;
use crate::validate::{ValidationOptions, validate_mesh_geometry};

/// Name of the sampled intensity field.
pub const HU_FIELD: &str = "HU";
/// Name of the bone mineral density field.
pub const BMD_FIELD: &str = "BMD";
/// Unit of the bone mineral density field.
pub const BMD_UNIT: &str = "mg/cc";
/// Name of the bone volume fraction field.
pub const BV_TV_FIELD: &str = "BV/TV";

/// Parameters for material mapping.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MaterialParams {
    /// Sample point placement per element.
    pub sampling: SamplingParams,

    /// Elements per batch. Cancellation is checked between batches.
    /// Default: 4096.
    pub batch_size: usize,

    /// Maximum number of per-element warnings kept in the result.
    /// The undefined count is always exact. Default: 100.
    pub max_warnings: usize,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            sampling: SamplingParams::default(),
            batch_size: 4096,
            max_warnings: 100,
        }
    }
}

impl MaterialParams {
    /// Sample each element at its centroid only.
    pub fn centroid_only() -> Self {
        Self {
            sampling: SamplingParams::centroid_only(),
            ..Self::default()
        }
    }

    /// Use a specific sampling placement.
    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> FemResult<()> {
        if self.batch_size == 0 {
            return Err(FemError::invalid_params("batch_size", "must be at least 1"));
        }
        self.sampling.validate()
    }
}

/// Per-element material fields produced by one mapping pass.
#[derive(Debug, Clone)]
pub struct MaterialFields {
    /// Sampled intensity.
    pub hu: ScalarField,

    /// Bone mineral density in mg/cc.
    pub bmd: ScalarField,

    /// Bone volume fraction in [0, 1].
    pub bv_tv: ScalarField,

    /// Elements with no image data (NaN in every field).
    pub undefined_count: usize,

    pub element_count: usize,

    /// First `max_warnings` per-element warnings in element order.
    pub warnings: Vec<ElementWarning>,
}

impl MaterialFields {
    /// Caller-facing warning line, e.g. "3 of 120 elements had no image data".
    pub fn summary(&self) -> String {
        format!(
            "{} of {} elements had no image data",
            self.undefined_count, self.element_count
        )
    }

    /// Whether every element received image data.
    pub fn is_complete(&self) -> bool {
        self.undefined_count == 0
    }

    /// The three fields, in HU, BMD, BV/TV order.
    pub fn fields(&self) -> [&ScalarField; 3] {
        [&self.hu, &self.bmd, &self.bv_tv]
    }

    /// Consume into the three fields, in HU, BMD, BV/TV order.
    pub fn into_fields(self) -> Vec<ScalarField> {
        vec![self.hu, self.bmd, self.bv_tv]
    }
}

impl std::fmt::Display for MaterialFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params = StatisticsParams::default();
        writeln!(f, "Material mapping: {} elements", self.element_count)?;
        for field in self.fields() {
            writeln!(f, "  {}: {}", field.label(), field.statistics(&params))?;
        }
        write!(f, "  {}", self.summary())
    }
}

/// Compute HU, BMD and BV/TV for every element of `mesh`.
///
/// `transform` maps mesh coordinates into the image's physical space.
/// Fails on invalid parameters or malformed mesh geometry; an element
/// outside the image only yields NaN and a warning.
pub fn compute_material_fields<I: IntensitySource + ?Sized>(
    mesh: &Mesh,
    image: &I,
    transform: &Affine3<f64>,
    calibration: &Calibration,
    params: &MaterialParams,
) -> FemResult<MaterialFields> {
    compute_material_fields_with_progress(mesh, image, transform, calibration, params, None)
}

/// Compute material fields with progress reporting.
///
/// The callback is invoked after each batch. Returning `false` cancels the
/// pass and yields `FemError::Cancelled`; no partial fields are returned.
pub fn compute_material_fields_with_progress<I: IntensitySource + ?Sized>(
    mesh: &Mesh,
    image: &I,
    transform: &Affine3<f64>,
    calibration: &Calibration,
    params: &MaterialParams,
    callback: Option<&ProgressCallback>,
) -> FemResult<MaterialFields> {
    let _timer = OperationTimer::with_context("material_mapping", mesh);
    params.validate()?;
    validate_mesh_geometry(mesh, &ValidationOptions::default())?;

    let element_count = mesh.element_count();
    info!(
        target: "spine_fem::material",
        elements = element_count,
        calibration = %calibration,
        samples_per_tet = params.sampling.samples_per_element(4),
        "Mapping material properties"
    );

    let samples: Vec<ElementSample> = process_in_batches(
        "material mapping",
        element_count,
        params.batch_size,
        callback,
        |i| {
            let geometry = mesh.geometry(i)?;
            Ok(sample_element(&geometry, image, transform, &params.sampling))
        },
    )?;

    let hu_values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let bmd_values: Vec<f64> = hu_values.iter().map(|&hu| calibration.density(hu)).collect();
    let bv_tv_values: Vec<f64> = bmd_values.iter().map(|&bmd| bv_tv(bmd)).collect();

    let undefined_count = bmd_values.iter().filter(|v| v.is_nan()).count();
    let warnings: Vec<ElementWarning> = samples
        .iter()
        .zip(&bmd_values)
        .enumerate()
        .filter(|(_, (_, bmd))| bmd.is_nan())
        .take(params.max_warnings)
        .map(|(element_index, (s, _))| ElementWarning::NoImageData {
            element_index,
            rejected_samples: s.rejected,
        })
        .collect();

    let fields = MaterialFields {
        hu: ScalarField::new(HU_FIELD, None, FieldDomain::Element, hu_values),
        bmd: ScalarField::new(BMD_FIELD, Some(BMD_UNIT), FieldDomain::Element, bmd_values),
        bv_tv: ScalarField::new(BV_TV_FIELD, None, FieldDomain::Element, bv_tv_values),
        undefined_count,
        element_count,
        warnings,
    };

    log_field_statistics(HU_FIELD, &fields.hu.statistics(&StatisticsParams::default()));
    if undefined_count > 0 {
        warn!(
            target: "spine_fem::material",
            undefined = undefined_count,
            total = element_count,
            "{}",
            fields.summary()
        );
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{FunctionImage, ImageBounds, VoxelVolume};
    use crate::types::Element;
    use nalgebra::{Point3, Vector3};

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn two_tets(offset: f64) -> Mesh {
        let p = |x: f64, y: f64, z: f64| Point3::new(x + offset, y, z);
        Mesh {
            nodes: vec![
                p(0.0, 0.0, 0.0),
                p(1.0, 0.0, 0.0),
                p(0.0, 1.0, 0.0),
                p(0.0, 0.0, 1.0),
                p(1.0, 1.0, 1.0),
            ],
            elements: vec![
                Element::Tetrahedron([0, 1, 2, 3]),
                Element::Tetrahedron([1, 2, 3, 4]),
            ],
        }
    }

    fn constant_image(hu: f64) -> FunctionImage<impl Fn(&Point3<f64>) -> f64 + Sync> {
        FunctionImage::new(
            ImageBounds::new(Point3::new(-5.0, -5.0, -5.0), Point3::new(5.0, 5.0, 5.0)),
            move |_: &Point3<f64>| hu,
        )
    }

    #[test]
    fn test_constant_image_two_tets() {
        let cal = Calibration::new(0.7, 5.1).unwrap();
        let fields = compute_material_fields(
            &two_tets(0.0),
            &constant_image(100.0),
            &Affine3::identity(),
            &cal,
            &MaterialParams::default(),
        )
        .unwrap();

        assert_eq!(fields.bmd.values.len(), 2);
        for &v in &fields.bmd.values {
            assert!(approx_eq(v, 75.1));
        }
        for &v in &fields.bv_tv.values {
            assert!(approx_eq(v, 75.1 / 684.0));
        }
        assert_eq!(fields.undefined_count, 0);
        assert!(fields.warnings.is_empty());
        assert_eq!(fields.bmd.label(), "BMD (mg/cc)");
        assert_eq!(fields.summary(), "0 of 2 elements had no image data");
    }

    #[test]
    fn test_outside_image_is_nan_not_error() {
        let cal = Calibration::new(0.7, 5.1).unwrap();
        let fields = compute_material_fields(
            &two_tets(100.0),
            &constant_image(100.0),
            &Affine3::identity(),
            &cal,
            &MaterialParams::default(),
        )
        .unwrap();

        assert!(fields.hu.values.iter().all(|v| v.is_nan()));
        assert!(fields.bmd.values.iter().all(|v| v.is_nan()));
        assert!(fields.bv_tv.values.iter().all(|v| v.is_nan()));
        assert_eq!(fields.undefined_count, fields.element_count);
        assert_eq!(fields.warnings.len(), 2);
        assert!(matches!(
            fields.warnings[1],
            ElementWarning::NoImageData {
                element_index: 1,
                rejected_samples: 5
            }
        ));
    }

    #[test]
    fn test_nan_voxels_count_as_undefined() {
        // Voxel layers x = 2 and x = 3 are NaN padding
        let volume = VoxelVolume::from_fn(
            [4, 4, 4],
            Point3::origin(),
            Vector3::new(1.0, 1.0, 1.0),
            |p| if p.x < 1.5 { 200.0 } else { f32::NAN },
        )
        .unwrap();
        let mut mesh = two_tets(0.0);
        mesh.nodes.extend([
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(3.0, 0.0, 0.0),
            Point3::new(2.0, 1.0, 0.0),
            Point3::new(2.0, 0.0, 1.0),
        ]);
        mesh.elements.push(Element::Tetrahedron([5, 6, 7, 8]));

        let cal = Calibration::new(1.0, 0.0).unwrap();
        let fields = compute_material_fields(
            &mesh,
            &volume,
            &Affine3::identity(),
            &cal,
            &MaterialParams::default(),
        )
        .unwrap();

        assert_eq!(fields.bmd.values[0], 200.0);
        assert_eq!(fields.bmd.values[1], 200.0);
        assert!(fields.bmd.values[2].is_nan());
        assert_eq!(fields.undefined_count, 1);
        assert_eq!(fields.undefined_count, fields.bmd.undefined_count());
        assert_eq!(fields.warnings.len(), 1);
        assert!(matches!(
            fields.warnings[0],
            ElementWarning::NoImageData {
                element_index: 2,
                rejected_samples: 5
            }
        ));
        assert_eq!(fields.summary(), "1 of 3 elements had no image data");
    }

    #[test]
    fn test_warnings_capped_but_count_exact() {
        let cal = Calibration::new(1.0, 0.0).unwrap();
        let params = MaterialParams {
            max_warnings: 1,
            ..MaterialParams::default()
        };
        let fields = compute_material_fields(
            &two_tets(100.0),
            &constant_image(0.0),
            &Affine3::identity(),
            &cal,
            &params,
        )
        .unwrap();
        assert_eq!(fields.warnings.len(), 1);
        assert_eq!(fields.undefined_count, 2);
    }

    #[test]
    fn test_malformed_mesh_aborts() {
        let mut mesh = two_tets(0.0);
        mesh.elements.push(Element::Tetrahedron([0, 1, 2, 42]));
        let cal = Calibration::new(0.7, 5.1).unwrap();
        let err = compute_material_fields(
            &mesh,
            &constant_image(100.0),
            &Affine3::identity(),
            &cal,
            &MaterialParams::default(),
        )
        .unwrap_err();
        assert!(err.is_mesh_geometry());
        assert!(matches!(err, FemError::InvalidNodeIndex { element_index: 2, .. }));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let cal = Calibration::new(0.7, 5.1).unwrap();
        let params = MaterialParams {
            batch_size: 0,
            ..MaterialParams::default()
        };
        let err = compute_material_fields(
            &two_tets(0.0),
            &constant_image(100.0),
            &Affine3::identity(),
            &cal,
            &params,
        )
        .unwrap_err();
        assert!(matches!(err, FemError::InvalidParams { parameter: "batch_size", .. }));
    }

    #[test]
    fn test_cancel_returns_no_fields() {
        let cal = Calibration::new(0.7, 5.1).unwrap();
        let params = MaterialParams {
            batch_size: 1,
            ..MaterialParams::default()
        };
        let callback: ProgressCallback = Box::new(|_| false);
        let err = compute_material_fields_with_progress(
            &two_tets(0.0),
            &constant_image(100.0),
            &Affine3::identity(),
            &cal,
            &params,
            Some(&callback),
        )
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
