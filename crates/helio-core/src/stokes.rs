//! Stokes arrays and synthesized spectra.
//!
//! A Stokes spectrum is an `[n_wvl, 4]` array with columns `I, Q, U, V`.

use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::errors::{HelioError, Result};

/// Number of Stokes parameters.
pub const N_STOKES: usize = 4;

/// A single Stokes vector `(I, Q, U, V)`.
pub type StokesVector = [f64; N_STOKES];

/// Broadcasts a Stokes vector over `n_wvl` wavelengths.
pub fn broadcast(vector: StokesVector, n_wvl: usize) -> Array2<f64> {
    Array2::from_shape_fn((n_wvl, N_STOKES), |(_, s)| vector[s])
}

/// Checks that `array` is `[n_wvl, 4]`.
pub fn check_shape(what: &str, array: ArrayView2<'_, f64>, n_wvl: usize) -> Result<()> {
    if array.dim() != (n_wvl, N_STOKES) {
        return Err(HelioError::config(format!(
            "{} has shape {:?}, expected ({}, {})",
            what,
            array.dim(),
            n_wvl,
            N_STOKES
        )));
    }
    Ok(())
}

/// Emergent spectrum of one spectral region.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Spectral region name
    pub region: String,
    /// Wavelength axis (Å)
    pub wavelength: Array1<f64>,
    /// Stokes profiles, `[n_wvl, 4]`
    pub stokes: Array2<f64>,
}

impl Spectrum {
    /// Creates a spectrum, checking that the Stokes array matches the axis.
    pub fn new(region: impl Into<String>, wavelength: Array1<f64>, stokes: Array2<f64>) -> Result<Self> {
        check_shape("spectrum", stokes.view(), wavelength.len())?;
        Ok(Self {
            region: region.into(),
            wavelength,
            stokes,
        })
    }

    /// Number of wavelength points.
    pub fn n_wvl(&self) -> usize {
        self.wavelength.len()
    }

    /// Returns a copy with additive Gaussian noise of standard deviation `sigma`
    /// on every Stokes parameter.
    pub fn with_noise<R: Rng + ?Sized>(&self, sigma: f64, rng: &mut R) -> Result<Self> {
        if !(sigma >= 0.0 && sigma.is_finite()) {
            return Err(HelioError::config(format!("noise sigma must be >= 0, got {}", sigma)));
        }
        let mut noisy = self.clone();
        if sigma > 0.0 {
            let normal = Normal::new(0.0, sigma)
                .map_err(|e| HelioError::config(format!("invalid noise distribution: {}", e)))?;
            noisy.stokes.mapv_inplace(|v| v + normal.sample(rng));
        }
        Ok(noisy)
    }

    /// Standard deviation of the first `n` Stokes I samples, the usual
    /// continuum noise estimate.
    pub fn continuum_noise(&self, n: usize) -> f64 {
        let n = n.min(self.n_wvl());
        if n < 2 {
            return 0.0;
        }
        let column = self.stokes.column(0);
        let head = column.slice(ndarray::s![..n]);
        let mean = head.sum() / n as f64;
        (head.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64).sqrt()
    }
}
