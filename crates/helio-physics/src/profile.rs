//! Absorption profiles.
//!
//! `voigt(a, v)` approximates the Voigt function `H(a, v)` in Doppler units,
//! normalized like `H`: `H(0, v) = exp(-v²)` and `∫ H dv = √π`. The
//! approximation is the pseudo-Voigt mixture of Thompson, Cox & Hastings
//! (1987), accurate to about 1% and smooth in both arguments.

use std::f64::consts::{LN_2, PI};

/// Step used for numerical profile derivatives, in Doppler units.
const DERIVATIVE_STEP: f64 = 1e-3;

/// Pseudo-Voigt approximation of `H(a, v)`.
pub fn voigt(a: f64, v: f64) -> f64 {
    if a <= 0.0 {
        return (-v * v).exp();
    }
    let fwhm_g = 2.0 * LN_2.sqrt();
    let fwhm_l = 2.0 * a;
    let f = (fwhm_g.powi(5)
        + 2.69269 * fwhm_g.powi(4) * fwhm_l
        + 2.42843 * fwhm_g.powi(3) * fwhm_l.powi(2)
        + 4.47163 * fwhm_g.powi(2) * fwhm_l.powi(3)
        + 0.07842 * fwhm_g * fwhm_l.powi(4)
        + fwhm_l.powi(5))
    .powf(0.2);
    let ratio = fwhm_l / f;
    let eta = 1.36603 * ratio - 0.47719 * ratio * ratio + 0.11116 * ratio.powi(3);

    let hwhm = 0.5 * f;
    let lorentz = hwhm / (PI * (v * v + hwhm * hwhm));
    let sigma2 = f * f / (8.0 * LN_2);
    let gauss = (-v * v / (2.0 * sigma2)).exp() / (2.0 * PI * sigma2).sqrt();

    PI.sqrt() * (eta * lorentz + (1.0 - eta) * gauss)
}

/// Voigt profile normalized to unit peak.
pub fn voigt_peak_normalized(a: f64, v: f64) -> f64 {
    voigt(a, v) / voigt(a, 0.0)
}

/// First derivative `dH/dv` by central differences.
pub fn voigt_dv(a: f64, v: f64) -> f64 {
    (voigt(a, v + DERIVATIVE_STEP) - voigt(a, v - DERIVATIVE_STEP)) / (2.0 * DERIVATIVE_STEP)
}

/// Second derivative `d²H/dv²` by central differences.
pub fn voigt_dv2(a: f64, v: f64) -> f64 {
    (voigt(a, v + DERIVATIVE_STEP) - 2.0 * voigt(a, v) + voigt(a, v - DERIVATIVE_STEP))
        / (DERIVATIVE_STEP * DERIVATIVE_STEP)
}

/// Gaussian profile with unit peak.
pub fn gaussian(v: f64) -> f64 {
    (-v * v).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_damping_is_gaussian() {
        for &v in &[0.0, 0.5, 1.0, 2.5] {
            assert_relative_eq!(voigt(0.0, v), (-v * v).exp());
        }
    }

    #[test]
    fn test_small_damping_is_continuous() {
        assert_relative_eq!(voigt(1e-9, 0.7), voigt(0.0, 0.7), max_relative = 1e-3);
    }

    #[test]
    fn test_area_is_sqrt_pi() {
        for &a in &[0.0, 0.1, 0.5] {
            let dv = 0.01;
            let area: f64 = (-20_000..=20_000).map(|i| voigt(a, i as f64 * dv) * dv).sum();
            assert_relative_eq!(area, PI.sqrt(), max_relative = 0.02);
        }
    }

    #[test]
    fn test_derivatives_of_gaussian() {
        let v = 0.8;
        assert_relative_eq!(voigt_dv(0.0, v), -2.0 * v * (-v * v).exp(), max_relative = 1e-5);
        assert_relative_eq!(
            voigt_dv2(0.0, v),
            (4.0 * v * v - 2.0) * (-v * v).exp(),
            max_relative = 1e-4
        );
    }

    #[test]
    fn test_peak_normalized() {
        assert_relative_eq!(voigt_peak_normalized(0.3, 0.0), 1.0);
        assert!(voigt_peak_normalized(0.3, 1.0) < 1.0);
    }
}
