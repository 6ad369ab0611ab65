//! CT calibration: Hounsfield Units to apparent bone mineral density.
//!
//! A [`Calibration`] is an immutable `(slope, intercept)` pair from a phantom
//! scan. It is passed by value into each mapping call; there is no default.

use crate::error::{FemError, FemResult};

/// Reference maximum bone density in mg/cc, used to derive BV/TV from BMD.
pub const REFERENCE_BONE_DENSITY: f64 = 684.0;

/// Affine map from HU to density in mg/cc.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawCalibration"))]
pub struct Calibration {
    slope: f64,
    intercept: f64,
}

/// Unchecked wire form; deserialized calibrations go through [`Calibration::new`].
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawCalibration {
    slope: f64,
    intercept: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawCalibration> for Calibration {
    type Error = FemError;

    fn try_from(raw: RawCalibration) -> FemResult<Self> {
        Self::new(raw.slope, raw.intercept)
    }
}

impl Calibration {
    /// Create a calibration. Both values must be finite; a zero slope is
    /// accepted and yields a constant density.
    ///
    /// ```
    /// use spine_fem::Calibration;
    ///
    /// let cal = Calibration::new(0.7, 5.1).unwrap();
    /// assert!((cal.density(100.0) - 75.1).abs() < 1e-9);
    /// assert!(Calibration::new(f64::NAN, 0.0).is_err());
    /// ```
    pub fn new(slope: f64, intercept: f64) -> FemResult<Self> {
        if !slope.is_finite() || !intercept.is_finite() {
            return Err(FemError::invalid_calibration(slope, intercept));
        }
        Ok(Self { slope, intercept })
    }

    #[inline]
    pub fn slope(&self) -> f64 {
        self.slope
    }

    #[inline]
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Density in mg/cc for a HU value. NaN in, NaN out.
    #[inline]
    pub fn density(&self, hu: f64) -> f64 {
        self.slope * hu + self.intercept
    }
}

impl std::fmt::Display for Calibration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BMD = {} * HU + {}", self.slope, self.intercept)
    }
}

/// Bone volume fraction for a density, clamped to [0, 1].
///
/// NaN in, NaN out.
#[inline]
pub fn bv_tv(bmd: f64) -> f64 {
    if bmd.is_nan() {
        return f64::NAN;
    }
    (bmd / REFERENCE_BONE_DENSITY).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_density_is_affine() {
        let cal = Calibration::new(0.7, 5.1).unwrap();
        assert!((cal.density(0.0) - 5.1).abs() < 1e-9);
        assert!((cal.density(100.0) - 75.1).abs() < 1e-9);
        assert!((cal.density(-1000.0) - (-694.9)).abs() < 1e-9);
    }

    #[test]
    fn test_zero_slope_is_constant() {
        let cal = Calibration::new(0.0, 42.0).unwrap();
        assert_eq!(cal.density(-500.0), 42.0);
        assert_eq!(cal.density(1500.0), 42.0);
    }

    #[test]
    fn test_non_finite_rejected() {
        for (s, i) in [(f64::NAN, 1.0), (1.0, f64::INFINITY), (f64::NEG_INFINITY, 0.0)] {
            match Calibration::new(s, i) {
                Err(FemError::InvalidCalibration { .. }) => {}
                other => panic!("Expected InvalidCalibration, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_bv_tv_range() {
        assert_eq!(bv_tv(0.0), 0.0);
        assert_eq!(bv_tv(REFERENCE_BONE_DENSITY), 1.0);
        assert_eq!(bv_tv(2000.0), 1.0);
        assert_eq!(bv_tv(-50.0), 0.0);
        assert!((bv_tv(342.0) - 0.5).abs() < 1e-12);
        assert!(bv_tv(f64::NAN).is_nan());
    }
}
