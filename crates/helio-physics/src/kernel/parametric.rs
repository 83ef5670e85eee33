//! Parametric absorption line.
//!
//! A single line described only by its shape: the layer multiplies the
//! incoming Stokes vector by `1 - depth * profile(λ)`.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{ensure, ensure_finite, KernelInput, NonPhysical};
use crate::profile::{gaussian, voigt_peak_normalized};

/// Line shape of a parametric layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileShape {
    #[default]
    Voigt,
    Gaussian,
}

/// Parameters of a parametric line, in storage order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParametricParameters {
    /// Line center (Å)
    pub lambda0: f64,
    /// Width (Å)
    pub sigma: f64,
    /// Fractional depth at line center, in [0, 1]
    pub depth: f64,
    /// Damping, ignored by the Gaussian shape
    pub a: f64,
}

impl ParametricParameters {
    pub const ARITY: usize = 4;

    /// Reads the first four values of `p`. The caller checks arity.
    pub fn from_slice(p: &[f64]) -> Self {
        Self {
            lambda0: p[0],
            sigma: p[1],
            depth: p[2],
            a: p[3],
        }
    }
}

/// Emergent Stokes spectrum of the parametric layer.
pub fn parametric(
    params: &ParametricParameters,
    shape: ProfileShape,
    input: &KernelInput<'_>,
) -> Result<Array2<f64>, NonPhysical> {
    ensure_finite(&[params.lambda0, params.sigma, params.depth, params.a])?;
    ensure(params.sigma > 0.0, || format!("line width must be positive, got {}", params.sigma))?;
    ensure((0.0..=1.0).contains(&params.depth), || {
        format!("line depth must lie in [0, 1], got {}", params.depth)
    })?;
    ensure(params.a >= 0.0, || format!("negative damping {}", params.a))?;

    let mut out = input.incoming.to_owned();
    for (i, &lambda) in input.wavelength.iter().enumerate() {
        let x = (lambda - params.lambda0) / params.sigma;
        let profile = match shape {
            ProfileShape::Voigt => voigt_peak_normalized(params.a, x),
            ProfileShape::Gaussian => gaussian(x),
        };
        let transmission = 1.0 - params.depth * profile;
        out.row_mut(i).mapv_inplace(|s| s * transmission);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use helio_core::{broadcast, LineOfSight};
    use ndarray::Array1;

    fn run(params: &ParametricParameters, shape: ProfileShape) -> Result<Array2<f64>, NonPhysical> {
        let wavelength = Array1::linspace(6300.0, 6303.0, 61);
        let incoming = broadcast([1.0, 0.1, 0.0, 0.0], 61);
        let los = LineOfSight::default();
        let input = KernelInput {
            wavelength: &wavelength,
            los: &los,
            incoming: incoming.view(),
        };
        parametric(params, shape, &input)
    }

    #[test]
    fn test_line_core_depth() {
        let p = ParametricParameters::from_slice(&[6301.5, 0.1, 0.6, 0.0]);
        for shape in [ProfileShape::Voigt, ProfileShape::Gaussian] {
            let out = run(&p, shape).unwrap();
            // sample 30 sits exactly on 6301.5
            assert_relative_eq!(out[[30, 0]], 0.4, epsilon = 1e-12);
            assert_relative_eq!(out[[30, 1]], 0.04, epsilon = 1e-12);
            assert_relative_eq!(out[[0, 0]], 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_zero_depth_is_transparent() {
        let p = ParametricParameters::from_slice(&[6301.5, 0.1, 0.0, 0.3]);
        let out = run(&p, ProfileShape::Voigt).unwrap();
        for row in out.rows() {
            assert_eq!(row[0], 1.0);
        }
    }

    #[test]
    fn test_invalid_parameters() {
        for bad in [
            [6301.5, 0.0, 0.5, 0.0],
            [6301.5, 0.1, -0.1, 0.0],
            [6301.5, 0.1, 1.5, 0.0],
            [6301.5, 0.1, 0.5, -1.0],
            [f64::NAN, 0.1, 0.5, 0.0],
        ] {
            let p = ParametricParameters::from_slice(&bad);
            assert!(run(&p, ProfileShape::Voigt).is_err(), "{:?} accepted", bad);
        }
    }
}
