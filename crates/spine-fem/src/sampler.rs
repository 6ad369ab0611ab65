//! Element-wise sampling of a volumetric image.
//!
//! An element's representative intensity is the mean over a small set of
//! sample points: the centroid, plus, for each configured fraction `t`, the
//! points `c + t * (v_i - c)` on the segments from the centroid `c` to each
//! node `v_i`. Points are mapped into image space first. Points outside the
//! image are dropped from the mean; they are never clamped onto the boundary.
//! Points inside the image whose intensity is NaN or infinite (padding voxels)
//! are dropped the same way.

use nalgebra::{Affine3, Point3};

use crate::error::{FemError, FemResult};
use crate::image::IntensitySource;
use crate::types::ElementGeometry;

/// Parameters for sample point placement.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SamplingParams {
    /// Fractions along each centroid-to-node segment at which to sample, in
    /// addition to the centroid. Each must lie in [0, 1]; 0 repeats the
    /// centroid and 1 samples the node itself.
    /// Default: `[0.5]` (5 samples per tetrahedron, 4 per triangle).
    pub interior_fractions: Vec<f64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            interior_fractions: vec![0.5],
        }
    }
}

impl SamplingParams {
    /// Sample at the centroid only.
    pub fn centroid_only() -> Self {
        Self {
            interior_fractions: Vec::new(),
        }
    }

    /// Denser placement for large elements relative to the voxel size.
    pub fn dense() -> Self {
        Self {
            interior_fractions: vec![0.25, 0.5, 0.75],
        }
    }

    /// Check that every fraction is finite and within [0, 1].
    pub fn validate(&self) -> FemResult<()> {
        match self
            .interior_fractions
            .iter()
            .find(|t| !(0.0..=1.0).contains(*t))
        {
            Some(t) => Err(FemError::invalid_params(
                "interior_fractions",
                format!("{} is outside [0, 1]", t),
            )),
            None => Ok(()),
        }
    }

    /// Number of sample points for an element with `node_count` nodes.
    pub fn samples_per_element(&self, node_count: usize) -> usize {
        1 + self.interior_fractions.len() * node_count
    }
}

/// Aggregated sample of one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementSample {
    /// Mean intensity over accepted samples; NaN if none was accepted.
    pub value: f64,
    /// Samples inside the image.
    pub accepted: usize,
    /// Samples outside the image or with a non-finite intensity.
    pub rejected: usize,
}

impl ElementSample {
    /// Whether the element received any image data.
    #[inline]
    pub fn is_defined(&self) -> bool {
        self.accepted > 0
    }
}

/// Sample points of an element in mesh space.
pub fn sample_points(geometry: &ElementGeometry, params: &SamplingParams) -> Vec<Point3<f64>> {
    let c = geometry.centroid();
    let vertices = geometry.vertices();

    let mut points = Vec::with_capacity(params.samples_per_element(vertices.len()));
    points.push(c);
    for &t in &params.interior_fractions {
        points.extend(vertices.iter().map(|v| c + (v - c) * t));
    }
    points
}

/// Sample one element.
///
/// `transform` maps mesh coordinates into the image's physical space.
/// `params` is assumed to be validated.
pub fn sample_element<I: IntensitySource + ?Sized>(
    geometry: &ElementGeometry,
    image: &I,
    transform: &Affine3<f64>,
    params: &SamplingParams,
) -> ElementSample {
    let mut sum = 0.0;
    let mut accepted = 0;
    let mut rejected = 0;

    for p in sample_points(geometry, params) {
        let q = transform * p;
        let intensity = if image.contains(&q) {
            image.intensity(&q)
        } else {
            f64::NAN
        };
        if intensity.is_finite() {
            sum += intensity;
            accepted += 1;
        } else {
            rejected += 1;
        }
    }

    let value = if accepted > 0 {
        sum / accepted as f64
    } else {
        f64::NAN
    };

    ElementSample {
        value,
        accepted,
        rejected,
    }
}
