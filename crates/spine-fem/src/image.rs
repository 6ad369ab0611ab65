//! Volumetric intensity sources.
//!
//! The sampler reads image data only through [`IntensitySource`], so the host
//! can hand in whatever volume representation it has loaded. [`VoxelVolume`]
//! covers the common case of a dense CT grid; [`FunctionImage`] wraps a closure.

use nalgebra::{Matrix3, Point3, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{FemError, FemResult};

/// Axis-aligned physical extent of an image (inclusive).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageBounds {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl ImageBounds {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Smallest box containing all `points`.
    pub fn enclosing(points: &[Point3<f64>]) -> Option<Self> {
        let first = *points.first()?;
        Some(points.iter().fold(Self::new(first, first), |b, p| Self {
            min: b.min.inf(p),
            max: b.max.sup(p),
        }))
    }

    /// Whether `point` lies inside or on the boundary.
    #[inline]
    pub fn contains(&self, point: &Point3<f64>) -> bool {
        (0..3).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }
}

/// Read access to a 3-D scalar image in physical coordinates.
///
/// Implementations must be shareable across worker threads.
pub trait IntensitySource: Sync {
    /// Physical bounds of the image.
    fn bounds(&self) -> ImageBounds;

    /// Whether `point` has image data. Defaults to the bounds test.
    fn contains(&self, point: &Point3<f64>) -> bool {
        self.bounds().contains(point)
    }

    /// Intensity at a point for which [`contains`](Self::contains) is true.
    fn intensity(&self, point: &Point3<f64>) -> f64;
}

/// How a [`VoxelVolume`] turns a continuous index into an intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Interpolation {
    /// Value of the voxel whose center is nearest.
    #[default]
    Nearest,
    /// Trilinear blend of the 8 surrounding voxel centers.
    Trilinear,
    /// Mean of the `(2r+1)^3` cube around the nearest voxel, clipped to the grid.
    NeighborhoodMean { radius: usize },
}

/// Dense voxel grid with an oriented physical frame.
///
/// Voxel `(i, j, k)` has its center at `origin + direction * (spacing ∘ (i, j, k))`.
/// Values are stored x-fastest. The grid is fixed at construction; only the
/// interpolation mode can change afterwards.
#[derive(Debug, Clone)]
pub struct VoxelVolume {
    dims: [usize; 3],
    origin: Point3<f64>,
    spacing: Vector3<f64>,
    direction: Matrix3<f64>,
    values: Vec<f32>,
    interpolation: Interpolation,
    /// Physical-to-index matrix, `(direction * diag(spacing))^-1`.
    to_index: Matrix3<f64>,
    bounds: ImageBounds,
}

impl VoxelVolume {
    /// Create a volume and check its consistency.
    ///
    /// Fails with `InvalidImage` if `values.len()` differs from the voxel
    /// count, a dimension is zero, spacing is not positive and finite, or the
    /// direction matrix is singular.
    pub fn new(
        dims: [usize; 3],
        origin: Point3<f64>,
        spacing: Vector3<f64>,
        direction: Matrix3<f64>,
        values: Vec<f32>,
    ) -> FemResult<Self> {
        if dims.contains(&0) {
            return Err(FemError::invalid_image(format!(
                "dimensions {:?} contain zero",
                dims
            )));
        }
        let total = dims.iter().product::<usize>();
        if values.len() != total {
            return Err(FemError::invalid_image(format!(
                "{} values for {}x{}x{} = {} voxels",
                values.len(),
                dims[0],
                dims[1],
                dims[2],
                total
            )));
        }
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(FemError::invalid_image(format!(
                "spacing ({}, {}, {}) must be positive and finite",
                spacing.x, spacing.y, spacing.z
            )));
        }
        if !origin.iter().all(|c| c.is_finite()) {
            return Err(FemError::invalid_image("origin must be finite"));
        }

        let frame = direction * Matrix3::from_diagonal(&spacing);
        let to_index = frame
            .try_inverse()
            .ok_or_else(|| FemError::invalid_image("direction matrix is singular"))?;

        let corners: Vec<Point3<f64>> = (0..8)
            .map(|c| {
                let idx = Vector3::new(
                    if c & 1 == 0 { -0.5 } else { dims[0] as f64 - 0.5 },
                    if c & 2 == 0 { -0.5 } else { dims[1] as f64 - 0.5 },
                    if c & 4 == 0 { -0.5 } else { dims[2] as f64 - 0.5 },
                );
                origin + frame * idx
            })
            .collect();
        let bounds = ImageBounds::enclosing(&corners)
            .ok_or_else(|| FemError::invalid_image("no corners"))?;

        debug!(
            dims = ?dims,
            total = total,
            spacing = ?[spacing.x, spacing.y, spacing.z],
            "Created voxel volume"
        );

        Ok(Self {
            dims,
            origin,
            spacing,
            direction,
            values,
            interpolation: Interpolation::default(),
            to_index,
            bounds,
        })
    }

    /// Create an axis-aligned volume.
    pub fn axis_aligned(
        dims: [usize; 3],
        origin: Point3<f64>,
        spacing: Vector3<f64>,
        values: Vec<f32>,
    ) -> FemResult<Self> {
        Self::new(dims, origin, spacing, Matrix3::identity(), values)
    }

    /// Create an axis-aligned volume by evaluating `f` at every voxel center.
    pub fn from_fn<F>(
        dims: [usize; 3],
        origin: Point3<f64>,
        spacing: Vector3<f64>,
        f: F,
    ) -> FemResult<Self>
    where
        F: Fn(Point3<f64>) -> f32 + Sync,
    {
        let total = dims[0] * dims[1] * dims[2];
        let values = (0..total)
            .into_par_iter()
            .map(|i| {
                let x = i % dims[0];
                let y = (i / dims[0]) % dims[1];
                let z = i / (dims[0] * dims[1]);
                f(Point3::new(
                    origin.x + x as f64 * spacing.x,
                    origin.y + y as f64 * spacing.y,
                    origin.z + z as f64 * spacing.z,
                ))
            })
            .collect();
        Self::axis_aligned(dims, origin, spacing, values)
    }

    /// Select the interpolation mode.
    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Grid dimensions [x, y, z].
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Physical center of voxel (0, 0, 0).
    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    /// Voxel size along each grid axis, in mm.
    pub fn spacing(&self) -> Vector3<f64> {
        self.spacing
    }

    /// Grid axis directions as columns.
    pub fn direction(&self) -> &Matrix3<f64> {
        &self.direction
    }

    /// Intensity values (HU for CT), x-fastest.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    /// Convert 3D grid coordinates to linear index.
    #[inline]
    pub fn linearize(&self, x: usize, y: usize, z: usize) -> usize {
        x + y * self.dims[0] + z * self.dims[0] * self.dims[1]
    }

    /// Value stored at a voxel.
    #[inline]
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> f64 {
        f64::from(self.values[self.linearize(x, y, z)])
    }

    /// Physical position of a voxel center.
    pub fn voxel_center(&self, x: usize, y: usize, z: usize) -> Point3<f64> {
        let idx = Vector3::new(x as f64, y as f64, z as f64);
        self.origin + self.direction * self.spacing.component_mul(&idx)
    }

    /// Continuous voxel index of a physical point.
    #[inline]
    pub fn physical_to_index(&self, point: &Point3<f64>) -> Vector3<f64> {
        self.to_index * (point - self.origin)
    }

    fn nearest_index(&self, idx: &Vector3<f64>) -> [usize; 3] {
        [0, 1, 2].map(|a| (idx[a].round().max(0.0) as usize).min(self.dims[a] - 1))
    }

    fn trilinear(&self, idx: &Vector3<f64>) -> f64 {
        let mut base = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for a in 0..3 {
            let hi = (self.dims[a] - 1) as f64;
            let t = idx[a].clamp(0.0, hi);
            let i0 = (t.floor() as usize).min(self.dims[a].saturating_sub(2));
            base[a] = i0;
            frac[a] = t - i0 as f64;
        }

        let mut acc = 0.0;
        for corner in 0..8 {
            let mut w = 1.0;
            let mut at = [0usize; 3];
            for a in 0..3 {
                let upper = corner & (1 << a) != 0;
                if upper {
                    w *= frac[a];
                    at[a] = (base[a] + 1).min(self.dims[a] - 1);
                } else {
                    w *= 1.0 - frac[a];
                    at[a] = base[a];
                }
            }
            if w != 0.0 {
                acc += w * self.voxel(at[0], at[1], at[2]);
            }
        }
        acc
    }

    fn neighborhood_mean(&self, idx: &Vector3<f64>, radius: usize) -> f64 {
        let center = self.nearest_index(idx);
        let range = |a: usize| {
            let lo = center[a].saturating_sub(radius);
            let hi = (center[a] + radius).min(self.dims[a] - 1);
            lo..=hi
        };

        let mut sum = 0.0;
        let mut count = 0usize;
        for z in range(2) {
            for y in range(1) {
                for x in range(0) {
                    sum += self.voxel(x, y, z);
                    count += 1;
                }
            }
        }
        sum / count as f64
    }
}

impl IntensitySource for VoxelVolume {
    fn bounds(&self) -> ImageBounds {
        self.bounds
    }

    fn contains(&self, point: &Point3<f64>) -> bool {
        let idx = self.physical_to_index(point);
        (0..3).all(|a| idx[a] >= -0.5 && idx[a] < self.dims[a] as f64 - 0.5)
    }

    fn intensity(&self, point: &Point3<f64>) -> f64 {
        let idx = self.physical_to_index(point);
        match self.interpolation {
            Interpolation::Nearest => {
                let [x, y, z] = self.nearest_index(&idx);
                self.voxel(x, y, z)
            }
            Interpolation::Trilinear => self.trilinear(&idx),
            Interpolation::NeighborhoodMean { radius } => self.neighborhood_mean(&idx, radius),
        }
    }
}

/// An image defined by a closure over physical coordinates.
///
/// ```
/// use nalgebra::Point3;
/// use spine_fem::{FunctionImage, ImageBounds, IntensitySource};
///
/// let image = FunctionImage::new(
///     ImageBounds::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 10.0)),
///     |p: &Point3<f64>| 100.0 + p.z,
/// );
/// assert_eq!(image.intensity(&Point3::new(1.0, 2.0, 3.0)), 103.0);
/// assert!(!image.contains(&Point3::new(11.0, 0.0, 0.0)));
/// ```
pub struct FunctionImage<F> {
    bounds: ImageBounds,
    f: F,
}

impl<F> FunctionImage<F>
where
    F: Fn(&Point3<f64>) -> f64 + Sync,
{
    pub fn new(bounds: ImageBounds, f: F) -> Self {
        Self { bounds, f }
    }
}

impl<F> IntensitySource for FunctionImage<F>
where
    F: Fn(&Point3<f64>) -> f64 + Sync,
{
    fn bounds(&self) -> ImageBounds {
        self.bounds
    }

    fn intensity(&self, point: &Point3<f64>) -> f64 {
        (self.f)(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    fn ramp_volume() -> VoxelVolume {
        // value = x + 10y + 100z at voxel centers, 1mm spacing, origin at 0
        VoxelVolume::from_fn(
            [4, 4, 4],
            Point3::origin(),
            Vector3::new(1.0, 1.0, 1.0),
            |p| (p.x + 10.0 * p.y + 100.0 * p.z) as f32,
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_inconsistent_grid() {
        let err = VoxelVolume::axis_aligned(
            [2, 2, 2],
            Point3::origin(),
            Vector3::new(1.0, 1.0, 1.0),
            vec![0.0; 7],
        )
        .unwrap_err();
        assert!(matches!(err, FemError::InvalidImage { .. }));

        let err = VoxelVolume::axis_aligned(
            [2, 2, 2],
            Point3::origin(),
            Vector3::new(1.0, 0.0, 1.0),
            vec![0.0; 8],
        )
        .unwrap_err();
        assert!(matches!(err, FemError::InvalidImage { .. }));

        let err = VoxelVolume::new(
            [2, 2, 2],
            Point3::origin(),
            Vector3::new(1.0, 1.0, 1.0),
            Matrix3::zeros(),
            vec![0.0; 8],
        )
        .unwrap_err();
        assert!(matches!(err, FemError::InvalidImage { .. }));
    }

    #[test]
    fn test_accessors_reflect_construction() {
        let vol = ramp_volume().with_interpolation(Interpolation::Trilinear);
        assert_eq!(vol.dims(), [4, 4, 4]);
        assert_eq!(vol.origin(), Point3::origin());
        assert_eq!(vol.spacing(), Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(*vol.direction(), Matrix3::identity());
        assert_eq!(vol.values().len(), 64);
        assert_eq!(vol.values()[vol.linearize(1, 2, 3)], 321.0);
        assert_eq!(vol.interpolation(), Interpolation::Trilinear);
    }

    #[test]
    fn test_contains_uses_voxel_footprint() {
        let vol = ramp_volume();
        assert!(vol.contains(&Point3::new(-0.5, 0.0, 0.0)));
        assert!(vol.contains(&Point3::new(3.49, 3.49, 3.49)));
        assert!(!vol.contains(&Point3::new(3.5, 0.0, 0.0)));
        assert!(!vol.contains(&Point3::new(0.0, -0.51, 0.0)));

        let b = vol.bounds();
        assert!(approx_eq(b.min.x, -0.5));
        assert!(approx_eq(b.max.z, 3.5));
    }

    #[test]
    fn test_nearest_matches_containing_voxel() {
        let vol = ramp_volume();
        assert_eq!(vol.intensity(&Point3::new(1.4, 2.2, 0.6)), 1.0 + 20.0 + 100.0);
        assert_eq!(vol.intensity(&Point3::new(-0.4, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_trilinear_reproduces_linear_image() {
        let vol = ramp_volume().with_interpolation(Interpolation::Trilinear);
        let p = Point3::new(1.25, 2.5, 0.75);
        assert!(approx_eq(vol.intensity(&p), 1.25 + 25.0 + 75.0));

        // Last voxel layer
        let p = Point3::new(3.0, 3.0, 3.0);
        assert!(approx_eq(vol.intensity(&p), 333.0));
    }

    #[test]
    fn test_neighborhood_mean_clips_to_grid() {
        let vol = VoxelVolume::axis_aligned(
            [3, 1, 1],
            Point3::origin(),
            Vector3::new(1.0, 1.0, 1.0),
            vec![0.0, 3.0, 6.0],
        )
        .unwrap()
        .with_interpolation(Interpolation::NeighborhoodMean { radius: 1 });

        assert!(approx_eq(vol.intensity(&Point3::new(0.0, 0.0, 0.0)), 1.5));
        assert!(approx_eq(vol.intensity(&Point3::new(1.0, 0.0, 0.0)), 3.0));
    }

    #[test]
    fn test_oriented_volume() {
        // Grid x axis points along physical -x
        let direction = Matrix3::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let vol = VoxelVolume::new(
            [2, 1, 1],
            Point3::new(10.0, 0.0, 0.0),
            Vector3::new(2.0, 1.0, 1.0),
            direction,
            vec![5.0, 7.0],
        )
        .unwrap();

        assert_eq!(vol.voxel_center(1, 0, 0), Point3::new(8.0, 0.0, 0.0));
        assert_eq!(vol.intensity(&Point3::new(8.2, 0.0, 0.0)), 7.0);
        assert!(vol.contains(&Point3::new(10.9, 0.0, 0.0)));
        assert!(!vol.contains(&Point3::new(11.1, 0.0, 0.0)));
    }
}
