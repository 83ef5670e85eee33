//! Observed pixels.

use std::collections::BTreeMap;

use ndarray::Array2;

use crate::errors::{HelioError, Result};
use crate::region::LineOfSight;
use crate::stokes::{broadcast, check_shape, StokesVector};

/// Observed Stokes profiles of one pixel in one spectral region.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationPixel {
    /// Observed Stokes profiles, `[n_wvl, 4]`
    pub stokes: Array2<f64>,
    /// Per-sample noise standard deviation, `[n_wvl, 4]`
    pub sigma: Array2<f64>,
    /// Observing geometry
    pub los: LineOfSight,
    /// Incident Stokes spectrum, `[n_wvl, 4]`
    pub boundary: Array2<f64>,
}

impl ObservationPixel {
    pub fn new(stokes: Array2<f64>, sigma: Array2<f64>, los: LineOfSight, boundary: Array2<f64>) -> Self {
        Self {
            stokes,
            sigma,
            los,
            boundary,
        }
    }

    /// Pixel with a uniform noise level and constant boundary condition.
    pub fn with_uniform_noise(stokes: Array2<f64>, noise: f64, los: LineOfSight, boundary: StokesVector) -> Self {
        let n_wvl = stokes.nrows();
        Self {
            sigma: Array2::from_elem(stokes.raw_dim(), noise),
            boundary: broadcast(boundary, n_wvl),
            stokes,
            los,
        }
    }

    pub fn n_wvl(&self) -> usize {
        self.stokes.nrows()
    }

    /// Checks shapes against the region grid and that every sigma is positive.
    pub fn validate(&self, region: &str, n_wvl: usize) -> Result<()> {
        check_shape(&format!("stokes for region '{}'", region), self.stokes.view(), n_wvl)?;
        check_shape(&format!("sigma for region '{}'", region), self.sigma.view(), n_wvl)?;
        check_shape(&format!("boundary for region '{}'", region), self.boundary.view(), n_wvl)?;
        if self.sigma.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(HelioError::config(format!(
                "sigma for region '{}' must be finite and > 0",
                region
            )));
        }
        if self.stokes.iter().any(|s| !s.is_finite()) {
            return Err(HelioError::config(format!(
                "stokes for region '{}' contains non-finite values",
                region
            )));
        }
        Ok(())
    }
}

/// One pixel's observations, keyed by spectral region name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    regions: BTreeMap<String, ObservationPixel>,
}

impl Observation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observation of a single spectral region.
    pub fn single(region: impl Into<String>, pixel: ObservationPixel) -> Self {
        Self::new().with_region(region, pixel)
    }

    pub fn with_region(mut self, region: impl Into<String>, pixel: ObservationPixel) -> Self {
        self.regions.insert(region.into(), pixel);
        self
    }

    pub fn insert(&mut self, region: impl Into<String>, pixel: ObservationPixel) {
        self.regions.insert(region.into(), pixel);
    }

    pub fn get(&self, region: &str) -> Option<&ObservationPixel> {
        self.regions.get(region)
    }

    /// Looks up a region, failing with a configuration error when absent.
    pub fn require(&self, region: &str) -> Result<&ObservationPixel> {
        self.get(region).ok_or_else(|| {
            HelioError::config(format!("observation has no data for region '{}'", region))
        })
    }

    pub fn regions(&self) -> impl Iterator<Item = (&str, &ObservationPixel)> {
        self.regions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(n: usize) -> ObservationPixel {
        ObservationPixel::with_uniform_noise(
            Array2::ones((n, 4)),
            1e-3,
            LineOfSight::default(),
            [1.0, 0.0, 0.0, 0.0],
        )
    }

    #[test]
    fn test_validate_accepts_matching_shapes() {
        assert!(pixel(150).validate("spec1", 150).is_ok());
    }

    #[test]
    fn test_validate_rejects_shape_mismatch() {
        let mut p = pixel(150);
        p.sigma = Array2::ones((149, 4));
        let err = p.validate("spec1", 150).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("sigma"));
    }

    #[test]
    fn test_validate_rejects_zero_sigma() {
        let mut p = pixel(10);
        p.sigma[[3, 1]] = 0.0;
        assert!(p.validate("spec1", 10).is_err());
    }

    #[test]
    fn test_require_missing_region() {
        let obs = Observation::single("spec1", pixel(10));
        assert!(obs.require("spec1").is_ok());
        assert!(obs.require("spec2").unwrap_err().is_configuration());
    }
}
