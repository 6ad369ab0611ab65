//! Serializable analysis configuration, in JSON or TOML.
//!
//! An [`AnalysisConfig`] bundles everything a host needs to reproduce a run:
//! the scan calibration, sampling and batching parameters, and the quality
//! metrics to compute. Every field has a default, so a config file only needs
//! to name what it changes.
//!
//! ```
//! use spine_fem::AnalysisConfig;
//!
//! let config = AnalysisConfig::from_json(r#"{
//!     "calibration": { "slope": 0.7, "intercept": 5.1 },
//!     "quality_metrics": ["aspect_ratio", "Scaled Jacobian"]
//! }"#).unwrap();
//!
//! assert_eq!(config.metrics().unwrap().len(), 2);
//! assert_eq!(config.material.batch_size, 4096);
//! ```

use std::path::Path;

use nalgebra::Affine3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calibration::Calibration;
use crate::error::{FemError, FemResult};
use crate::image::{IntensitySource, Interpolation, VoxelVolume};
use crate::material::{MaterialParams, compute_material_fields};
use crate::quality::{QualityMetric, QualityParams, compute_quality_fields};
use crate::report::MeshFields;
use crate::stats::StatisticsParams;
use crate::tracing_ext::log_mesh_stats;
use crate::types::Mesh;

/// Configuration for a full material and quality run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Scan calibration. Required by [`analyze`](Self::analyze).
    pub calibration: Option<Calibration>,

    /// Material mapping parameters.
    pub material: MaterialParams,

    /// Interpolation mode applied by [`analyze_volume`](Self::analyze_volume).
    pub interpolation: Interpolation,

    /// Quality metric names, parsed like [`QualityMetric::from_str`](std::str::FromStr).
    /// Empty selects every metric.
    pub quality_metrics: Vec<String>,

    /// Quality analysis parameters.
    pub quality: QualityParams,

    /// Histogram settings for field reports.
    pub statistics: StatisticsParams,
}

impl AnalysisConfig {
    /// Default configuration for a calibrated scan.
    pub fn new(calibration: Calibration) -> Self {
        Self {
            calibration: Some(calibration),
            ..Self::default()
        }
    }

    /// Load from a JSON string.
    pub fn from_json(json: &str) -> FemResult<Self> {
        serde_json::from_str(json).map_err(|e| FemError::Config {
            details: e.to_string(),
        })
    }

    /// Save to a pretty-printed JSON string.
    pub fn to_json(&self) -> FemResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| FemError::Config {
            details: e.to_string(),
        })
    }

    /// Load from a TOML string.
    pub fn from_toml(toml_str: &str) -> FemResult<Self> {
        toml::from_str(toml_str).map_err(|e| FemError::Config {
            details: e.to_string(),
        })
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> FemResult<String> {
        toml::to_string_pretty(self).map_err(|e| FemError::Config {
            details: e.to_string(),
        })
    }

    /// Load from a file, TOML if the extension is `.toml` and JSON otherwise.
    pub fn load(path: impl AsRef<Path>) -> FemResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| FemError::Config {
            details: format!("{}: {}", path.display(), e),
        })?;
        if is_toml(path) {
            Self::from_toml(&contents)
        } else {
            Self::from_json(&contents)
        }
    }

    /// Save to a file in the format implied by its extension.
    pub fn save(&self, path: impl AsRef<Path>) -> FemResult<()> {
        let path = path.as_ref();
        let contents = if is_toml(path) {
            self.to_toml()?
        } else {
            self.to_json()?
        };
        std::fs::write(path, contents).map_err(|e| FemError::Config {
            details: format!("{}: {}", path.display(), e),
        })
    }

    /// The calibration, or a `Config` error when none is set.
    pub fn calibration(&self) -> FemResult<Calibration> {
        self.calibration.ok_or_else(|| FemError::Config {
            details: "no calibration set".to_string(),
        })
    }

    /// Resolve the configured metric names, in order.
    pub fn metrics(&self) -> FemResult<Vec<QualityMetric>> {
        if self.quality_metrics.is_empty() {
            return Ok(QualityMetric::ALL.to_vec());
        }
        self.quality_metrics.iter().map(|n| n.parse()).collect()
    }

    /// Check every section without running anything.
    pub fn validate(&self) -> FemResult<()> {
        self.material.validate()?;
        self.quality.validate()?;
        self.metrics()?;
        Ok(())
    }

    /// Set the configured interpolation mode on a voxel volume.
    pub fn apply_interpolation(&self, volume: VoxelVolume) -> VoxelVolume {
        volume.with_interpolation(self.interpolation)
    }

    /// Like [`analyze`](Self::analyze), sampling `volume` with the configured
    /// interpolation mode.
    pub fn analyze_volume<'a>(
        &self,
        mesh: &'a Mesh,
        volume: VoxelVolume,
        mesh_to_image: &Affine3<f64>,
    ) -> FemResult<MeshFields<'a>> {
        let volume = self.apply_interpolation(volume);
        self.analyze(mesh, &volume, mesh_to_image)
    }

    /// Run material mapping and quality analysis and collect every field.
    ///
    /// Fails before any work if the calibration is missing or a section is
    /// invalid. `image` is sampled as given; use
    /// [`analyze_volume`](Self::analyze_volume) to apply the configured
    /// interpolation to a voxel volume.
    pub fn analyze<'a, I: IntensitySource + ?Sized>(
        &self,
        mesh: &'a Mesh,
        image: &I,
        mesh_to_image: &Affine3<f64>,
    ) -> FemResult<MeshFields<'a>> {
        let calibration = self.calibration()?;
        self.validate()?;
        let metrics = self.metrics()?;
        log_mesh_stats(mesh, "analysis input");

        info!(
            target: "spine_fem::config",
            calibration = %calibration,
            metrics = metrics.len(),
            "Running analysis"
        );

        let material = compute_material_fields(
            mesh,
            image,
            mesh_to_image,
            &calibration,
            &self.material,
        )?;
        let quality = compute_quality_fields(mesh, &metrics, &self.quality)?;

        let mut fields = MeshFields::new(mesh);
        fields.attach_material(material)?;
        fields.attach_quality(quality)?;
        Ok(fields)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{FunctionImage, ImageBounds};
    use nalgebra::Point3;

    fn unit_tet_mesh() -> Mesh {
        Mesh::from_connectivity(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            &[vec![0, 1, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = AnalysisConfig::from_json("{}").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert!(config.calibration.is_none());
    }

    #[test]
    fn test_round_trip() {
        let mut config = AnalysisConfig::new(Calibration::new(0.7, 5.1).unwrap());
        config.quality_metrics = vec!["edge_ratio".into(), "volume".into()];
        config.interpolation = Interpolation::NeighborhoodMean { radius: 2 };
        config.material.batch_size = 128;

        let json = config.to_json().unwrap();
        let back = AnalysisConfig::from_json(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AnalysisConfig::new(Calibration::new(0.7, 5.1).unwrap());
        config.interpolation = Interpolation::Trilinear;
        config.quality_metrics = vec!["aspect_ratio".into()];

        let text = config.to_toml().unwrap();
        assert_eq!(AnalysisConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_toml_defaults_and_errors() {
        let config = AnalysisConfig::from_toml("[material]\nbatch_size = 64\n").unwrap();
        assert_eq!(config.material.batch_size, 64);
        assert_eq!(config.material.max_warnings, 100);

        let err = AnalysisConfig::from_toml("material = 3").unwrap_err();
        assert!(matches!(err, FemError::Config { .. }));
    }

    #[test]
    fn test_extension_selects_format() {
        assert!(is_toml(Path::new("run.toml")));
        assert!(is_toml(Path::new("RUN.TOML")));
        assert!(!is_toml(Path::new("run.json")));
        assert!(!is_toml(Path::new("run")));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AnalysisConfig::load("/nonexistent/spine-fem/run.toml").unwrap_err();
        match err {
            FemError::Config { details } => assert!(details.contains("run.toml")),
            other => panic!("Expected Config, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_calibration_rejected_on_load() {
        let err =
            AnalysisConfig::from_json(r#"{"calibration": {"slope": 1e999, "intercept": 0}}"#)
                .unwrap_err();
        assert!(matches!(err, FemError::Config { .. }), "Expected Config, got {:?}", err);
    }

    #[test]
    fn test_malformed_json() {
        let err = AnalysisConfig::from_json("{ not json").unwrap_err();
        assert_eq!(err.code().as_str(), "FEM-1005");
    }

    #[test]
    fn test_missing_calibration() {
        let config = AnalysisConfig::default();
        match config.calibration() {
            Err(FemError::Config { details }) => assert!(details.contains("calibration")),
            other => panic!("Expected Config, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_metric_list_selects_all() {
        let config = AnalysisConfig::default();
        assert_eq!(config.metrics().unwrap(), QualityMetric::ALL.to_vec());
    }

    #[test]
    fn test_unknown_metric_fails_validation() {
        let config = AnalysisConfig {
            quality_metrics: vec!["warpage".into()],
            ..AnalysisConfig::default()
        };
        match config.validate() {
            Err(FemError::UnknownMetric { name }) => assert_eq!(name, "warpage"),
            other => panic!("Expected UnknownMetric, got {:?}", other),
        }
    }

    #[test]
    fn test_analyze_collects_all_fields() {
        let mesh = unit_tet_mesh();
        let image = FunctionImage::new(
            ImageBounds::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(2.0, 2.0, 2.0)),
            |_| 100.0,
        );
        let mut config = AnalysisConfig::new(Calibration::new(0.7, 5.1).unwrap());
        config.quality_metrics = vec!["aspect_ratio".into()];

        let fields = config
            .analyze(&mesh, &image, &Affine3::identity())
            .unwrap();
        assert_eq!(
            fields.list_field_names(),
            vec!["HU", "BMD", "BV/TV", "Aspect Ratio"]
        );
        let bmd = fields.field("BMD").unwrap();
        assert!((bmd.values[0] - 75.1).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_volume_applies_interpolation() {
        // value = x at voxel centers; the centroid sits at x = 1.25
        let volume = VoxelVolume::from_fn(
            [4, 4, 4],
            Point3::origin(),
            nalgebra::Vector3::new(1.0, 1.0, 1.0),
            |p| p.x as f32,
        )
        .unwrap();
        let mesh = Mesh::from_connectivity(
            vec![
                Point3::new(1.0, 1.0, 1.0),
                Point3::new(2.0, 1.0, 1.0),
                Point3::new(1.0, 2.0, 1.0),
                Point3::new(1.0, 1.0, 2.0),
            ],
            &[vec![0, 1, 2, 3]],
        )
        .unwrap();

        let mut config = AnalysisConfig::new(Calibration::new(1.0, 0.0).unwrap());
        config.material = MaterialParams::centroid_only();
        config.quality_metrics = vec!["volume".into()];

        let nearest = config
            .analyze_volume(&mesh, volume.clone(), &Affine3::identity())
            .unwrap();
        assert_eq!(nearest.field("HU").unwrap().values, vec![1.0]);

        config.interpolation = Interpolation::Trilinear;
        assert_eq!(
            config.apply_interpolation(volume.clone()).interpolation(),
            Interpolation::Trilinear
        );
        let trilinear = config
            .analyze_volume(&mesh, volume, &Affine3::identity())
            .unwrap();
        assert!((trilinear.field("HU").unwrap().values[0] - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_requires_calibration() {
        let mesh = unit_tet_mesh();
        let image = FunctionImage::new(
            ImageBounds::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0)),
            |_| 0.0,
        );
        let err = AnalysisConfig::default()
            .analyze(&mesh, &image, &Affine3::identity())
            .unwrap_err();
        assert!(matches!(err, FemError::Config { .. }));
    }
}
