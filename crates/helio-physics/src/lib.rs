//! # helio-physics
//!
//! Atmosphere components and the per-layer radiative-transfer kernels they
//! evaluate.
//!
//! - **lines**: chromospheric multiplets and photospheric line catalog
//! - **profile**: Voigt and Gaussian absorption profiles
//! - **kernel**: slab, Milne-Eddington and parametric layers, pure functions
//!   of `(parameters, wavelength, line of sight, incoming light)`
//! - **atmosphere**: named components with fixed-arity parameter vectors

pub mod atmosphere;
pub mod kernel;
pub mod lines;
pub mod profile;

pub use atmosphere::{AtmosphereComponent, AtmosphereKind, AtmosphereModel};
pub use kernel::{NonPhysical, ProfileShape};
pub use lines::{multiplet, photospheric_line, Multiplet, PhotosphericLine};
