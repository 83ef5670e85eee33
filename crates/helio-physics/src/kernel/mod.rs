//! Per-layer radiative-transfer kernels.
//!
//! Each kernel is a pure function of its parameters, the wavelength axis, the
//! observing geometry and the light entering the layer. Identical inputs give
//! bit-identical outputs. Parameters outside the physical domain are reported
//! as [`NonPhysical`], never clamped.

pub mod milne_eddington;
pub mod parametric;
pub mod slab;

use helio_core::LineOfSight;
use ndarray::{Array1, ArrayView2};
use thiserror::Error;

pub use milne_eddington::{milne_eddington, MilneEddingtonParameters};
pub use parametric::{parametric, ParametricParameters, ProfileShape};
pub use slab::{slab, SlabParameters};

/// Smallest `cos(theta)` a layer accepts.
pub const MIN_MU: f64 = 1e-3;

/// The kernel cannot produce a physical result for the given inputs.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct NonPhysical(pub String);

/// Everything a kernel sees besides its own parameters.
#[derive(Debug, Clone, Copy)]
pub struct KernelInput<'a> {
    pub wavelength: &'a Array1<f64>,
    pub los: &'a LineOfSight,
    /// Light entering the layer, `[n_wvl, 4]`
    pub incoming: ArrayView2<'a, f64>,
}

pub(crate) fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), NonPhysical> {
    if condition {
        Ok(())
    } else {
        Err(NonPhysical(message()))
    }
}

pub(crate) fn ensure_finite(values: &[f64]) -> Result<(), NonPhysical> {
    ensure(values.iter().all(|v| v.is_finite()), || {
        format!("non-finite parameter in {:?}", values)
    })
}

pub(crate) fn ensure_line_of_sight(los: &LineOfSight) -> Result<f64, NonPhysical> {
    let mu = los.mu();
    ensure(mu > MIN_MU, || {
        format!(
            "line of sight does not cross the layer (theta = {}°, mu = {:.4})",
            los.theta, mu
        )
    })?;
    Ok(mu)
}
