//! # helio-core
//!
//! Core types and errors for heliograph, a polarized spectral-line synthesis
//! and inversion engine.
//!
//! This crate defines the abstractions shared by every other crate:
//! - **Stokes**: `[n_wvl, 4]` spectra, broadcasting, noise injection
//! - **Regions**: wavelength grids, line-of-sight geometry, boundary light
//! - **Observations**: per-pixel observed profiles and noise
//! - **Errors**: the `HelioError` taxonomy
//!
//! ## Architecture
//! ```text
//! ┌─────────────────┐
//! │  helio-core     │  ← Core types/errors
//! └─────────────────┘
//!         ▲
//!    ┌────┴──────────────┐
//! ┌──▼────────────┐ ┌────▼──────┐
//! │ helio-physics │ │ helio-io  │
//! └───────────────┘ └───────────┘
//!         ▲               ▲
//!         └──────┬────────┘
//!       ┌────────▼────────┐
//!       │ helio-pipeline  │
//!       └─────────────────┘
//! ```

pub mod errors;
pub mod observation;
pub mod region;
pub mod stokes;

// Re-export commonly used items
pub use errors::{HelioError, Result};
pub use observation::{Observation, ObservationPixel};
pub use region::{LineOfSight, SpectralRegion, WavelengthWindow};
pub use stokes::{broadcast, Spectrum, StokesVector, N_STOKES};
