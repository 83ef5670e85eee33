//! Spectral regions and line-of-sight geometry.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::errors::{HelioError, Result};
use crate::stokes::{broadcast, check_shape, StokesVector};

/// Line-of-sight angles in degrees.
///
/// `theta` is the heliocentric angle (0 at disk center), `phi` the azimuth of
/// the line of sight and `gamma` the reference direction for Stokes Q.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineOfSight {
    pub theta: f64,
    pub phi: f64,
    pub gamma: f64,
}

impl LineOfSight {
    pub fn new(theta: f64, phi: f64, gamma: f64) -> Self {
        Self { theta, phi, gamma }
    }

    /// Cosine of the heliocentric angle.
    pub fn mu(&self) -> f64 {
        self.theta.to_radians().cos()
    }

    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            [theta, phi, gamma] => Ok(Self::new(*theta, *phi, *gamma)),
            _ => Err(HelioError::config(format!(
                "line of sight needs 3 angles, got {}",
                values.len()
            ))),
        }
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.theta, self.phi, self.gamma]
    }
}

impl Default for LineOfSight {
    fn default() -> Self {
        Self::new(0.0, 0.0, 90.0)
    }
}

/// Closed wavelength interval `[start, end]` in Å.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WavelengthWindow {
    pub start: f64,
    pub end: f64,
}

impl WavelengthWindow {
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !(start.is_finite() && end.is_finite() && start < end) {
            return Err(HelioError::config(format!(
                "wavelength window [{}, {}] is empty",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, wavelength: f64) -> bool {
        wavelength >= self.start && wavelength <= self.end
    }
}

/// A wavelength grid plus the geometry and incident light it is evaluated with.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralRegion {
    name: String,
    wavelength: Array1<f64>,
    los: LineOfSight,
    boundary: Array2<f64>,
}

impl SpectralRegion {
    /// Creates a region with a constant boundary Stokes vector.
    pub fn new(
        name: impl Into<String>,
        wavelength: Array1<f64>,
        los: LineOfSight,
        boundary: StokesVector,
    ) -> Result<Self> {
        let name = name.into();
        validate_grid(&name, &wavelength)?;
        if boundary.iter().any(|v| !v.is_finite()) {
            return Err(HelioError::config(format!(
                "region '{}': boundary condition must be finite",
                name
            )));
        }
        let boundary = broadcast(boundary, wavelength.len());
        Ok(Self {
            name,
            wavelength,
            los,
            boundary,
        })
    }

    /// Creates a region over `n_points` equally spaced wavelengths in `[start, end]`.
    pub fn linspace(
        name: impl Into<String>,
        start: f64,
        end: f64,
        n_points: usize,
        los: LineOfSight,
        boundary: StokesVector,
    ) -> Result<Self> {
        if n_points < 2 {
            return Err(HelioError::config(format!(
                "wavelength axis needs at least 2 points, got {}",
                n_points
            )));
        }
        Self::new(name, Array1::linspace(start, end, n_points), los, boundary)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wavelength(&self) -> &Array1<f64> {
        &self.wavelength
    }

    pub fn n_wvl(&self) -> usize {
        self.wavelength.len()
    }

    pub fn los(&self) -> &LineOfSight {
        &self.los
    }

    /// Incident Stokes spectrum at the line-of-sight entry point, `[n_wvl, 4]`.
    pub fn boundary(&self) -> &Array2<f64> {
        &self.boundary
    }

    /// Same grid, observed along `los` with a per-wavelength incident spectrum.
    pub fn with_geometry(&self, los: LineOfSight, boundary: Array2<f64>) -> Result<Self> {
        check_shape(
            &format!("boundary for region '{}'", self.name),
            boundary.view(),
            self.n_wvl(),
        )?;
        Ok(Self {
            name: self.name.clone(),
            wavelength: self.wavelength.clone(),
            los,
            boundary,
        })
    }
}

fn validate_grid(name: &str, wavelength: &Array1<f64>) -> Result<()> {
    if wavelength.is_empty() {
        return Err(HelioError::config(format!(
            "region '{}': empty wavelength axis",
            name
        )));
    }
    if wavelength.iter().any(|w| !w.is_finite()) {
        return Err(HelioError::config(format!(
            "region '{}': wavelength axis contains non-finite values",
            name
        )));
    }
    if wavelength.windows(2).into_iter().any(|w| w[1] <= w[0]) {
        return Err(HelioError::config(format!(
            "region '{}': wavelength axis must be strictly increasing",
            name
        )));
    }
    Ok(())
}
