//! Material-property mapping and element-quality analysis for finite-element
//! meshes built from CT segmentations.
//!
//! Given a tetrahedral (or triangular) mesh, a CT volume and a scan
//! calibration, this crate produces per-element scalar fields ready to be
//! written next to the mesh by an export layer:
//!
//! - **HU**: mean Hounsfield value sampled inside each element
//! - **BMD**: apparent bone mineral density in mg/cc, `slope * HU + intercept`
//! - **BV/TV**: bone volume fraction, BMD over a 684 mg/cc reference, clamped to [0, 1]
//! - **Quality metrics**: edge lengths, aspect ratio, Jacobians, angles and more
//!
//! Every field comes with summary statistics (count, min, max, mean, standard
//! deviation and a histogram) that skip undefined entries.
//!
//! # Units and Frames
//!
//! **This library assumes millimeter (mm) units** for node coordinates and
//! voxel spacing. Densities are in mg/cc.
//!
//! Mesh coordinates are mapped into image space with an [`nalgebra::Affine3`]
//! before sampling. Pass `Affine3::identity()` when both share a frame.
//!
//! # Undefined Values
//!
//! An element whose sample points all fall outside the image gets NaN for
//! HU, BMD and BV/TV and an [`ElementWarning`]; the pass continues. Degenerate
//! elements get fixed sentinels for normalized metrics (0 for aspect ratio and
//! scaled Jacobian). Structural problems in the mesh, such as a node index out
//! of range, abort the pass with a [`FemError`].
//!
//! # Quick Start
//!
//! ```
//! use nalgebra::{Affine3, Point3};
//! use spine_fem::{
//!     Calibration, FunctionImage, ImageBounds, MaterialParams, Mesh, MeshFields,
//!     QualityMetric, QualityParams, StatisticsParams, compute_material_fields,
//!     compute_quality_fields,
//! };
//!
//! let mesh = Mesh::from_connectivity(
//!     vec![
//!         Point3::new(0.0, 0.0, 0.0),
//!         Point3::new(1.0, 0.0, 0.0),
//!         Point3::new(0.0, 1.0, 0.0),
//!         Point3::new(0.0, 0.0, 1.0),
//!     ],
//!     &[vec![0, 1, 2, 3]],
//! )
//! .unwrap();
//!
//! // A uniform 100 HU phantom.
//! let image = FunctionImage::new(
//!     ImageBounds::new(Point3::new(-5.0, -5.0, -5.0), Point3::new(5.0, 5.0, 5.0)),
//!     |_: &Point3<f64>| 100.0,
//! );
//! let calibration = Calibration::new(0.7, 5.1).unwrap();
//!
//! let material = compute_material_fields(
//!     &mesh,
//!     &image,
//!     &Affine3::identity(),
//!     &calibration,
//!     &MaterialParams::default(),
//! )
//! .unwrap();
//! let quality = compute_quality_fields(
//!     &mesh,
//!     &[QualityMetric::AspectRatio, QualityMetric::ScaledJacobian],
//!     &QualityParams::default(),
//! )
//! .unwrap();
//!
//! let mut fields = MeshFields::new(&mesh);
//! fields.attach_material(material).unwrap();
//! fields.attach_quality(quality).unwrap();
//!
//! assert!((fields.field("BMD").unwrap().values[0] - 75.1).abs() < 1e-9);
//! for report in fields.report(&StatisticsParams::default()) {
//!     println!("{}", report);
//! }
//! ```
//!
//! # Progress and Cancellation
//!
//! Both passes have `_with_progress` variants taking a
//! [`ProgressCallback`]. Work is split into batches; the callback runs after
//! each one and can return `false` to stop. A stopped pass returns
//! [`FemError::Cancelled`] and never a partial field.
//!
//! # Feature Flags
//!
//! - `serde`: serialization for parameters, fields and reports
//! - `config`: [`AnalysisConfig`], a run configuration loadable from JSON or TOML

mod calibration;
mod error;
mod types;

pub mod field;
pub mod image;
pub mod material;
pub mod progress;
pub mod quality;
pub mod report;
pub mod sampler;
pub mod stats;
pub mod tracing_ext;
pub mod validate;

#[cfg(feature = "config")]
mod config;
#[cfg(feature = "serde")]
mod serde_float;

// Core types
pub use calibration::{Calibration, REFERENCE_BONE_DENSITY, bv_tv};
pub use error::{
    ElementWarning, FemError, FemErrorCode, FemLocation, FemResult, GeometryIssue, IssueSeverity,
    RecoverySuggestion,
};
pub use types::{
    EdgeStats, Element, ElementGeometry, ElementKind, Mesh, TET_EDGES, Tetrahedron, Triangle,
};

// Fields and statistics
pub use field::{FieldDomain, ScalarField};
pub use stats::{
    HistogramBin, StatisticsParams, StatisticsSummary, compute_statistics, get_statistics,
};

// Sampling
pub use image::{FunctionImage, ImageBounds, IntensitySource, Interpolation, VoxelVolume};
pub use sampler::{ElementSample, SamplingParams, sample_element};

// Passes
pub use material::{
    BMD_FIELD, BV_TV_FIELD, HU_FIELD, MaterialFields, MaterialParams, compute_material_fields,
    compute_material_fields_with_progress,
};
pub use quality::{
    ElementMeasures, MetricResult, QualityAnalysis, QualityMetric, QualityParams,
    compute_quality_fields, compute_quality_fields_by_name, compute_quality_fields_with_progress,
};
pub use validate::{GeometryReport, ValidationOptions, validate_mesh_geometry};

// Reporting
pub use report::{ElementRow, FieldReport, MeshFields, format_value, list_field_names};

pub use progress::{Progress, ProgressCallback};

#[cfg(feature = "config")]
pub use config::AnalysisConfig;
