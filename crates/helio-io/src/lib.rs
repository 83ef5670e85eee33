//! # helio-io
//!
//! Readers and writers for observation and result files.
//!
//! ## Formats
//! - **text**: wavelength axis, per-wavelength weights and single-pixel
//!   Stokes files, `#`-prefixed headers
//! - **npz**: multi-pixel observation cubes and result archives
//!
//! ## Usage Example
//! ```rust,no_run
//! use helio_io::{read_pixels, read_wavelength};
//!
//! # fn main() -> helio_core::Result<()> {
//! let wavelength = read_wavelength("10830_example.wavelength")?;
//! let pixels = read_pixels("10830_example_stokes.npz")?;
//! println!("{} pixels on {} wavelengths", pixels.len(), wavelength.len());
//! # Ok(())
//! # }
//! ```

pub mod npz;
pub mod text;

pub use npz::{read_pixels, write_pixels, NpzArchive, NpzSource};
pub use text::{
    read_single_pixel, read_wavelength, read_weights, write_single_pixel, write_wavelength,
    write_weights,
};
