//! Milne-Eddington photosphere.
//!
//! Analytic solution of the polarized transfer equation for a source function
//! linear in optical depth, `S = S0 + S1 τ`, and depth-independent absorption
//! matrix. Magneto-optical terms are neglected. The emergent spectrum is
//! normalized to its own continuum and scaled by the incoming Stokes I, so the
//! boundary condition sets the continuum level.

use ndarray::Array2;

use super::{ensure, ensure_finite, ensure_line_of_sight, KernelInput, NonPhysical};
use crate::lines::{PhotosphericLine, LARMOR, SPEED_OF_LIGHT};
use crate::profile::voigt;

/// Parameters of a Milne-Eddington atmosphere, in storage order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MilneEddingtonParameters {
    /// Field strength (G)
    pub b: f64,
    /// Field inclination to the line of sight (deg)
    pub inclination: f64,
    /// Field azimuth from the Stokes Q reference direction (deg)
    pub azimuth: f64,
    /// Line-of-sight velocity (km/s)
    pub v: f64,
    /// Doppler width (km/s)
    pub deltav: f64,
    /// Line-to-continuum absorption ratio
    pub eta0: f64,
    /// Damping
    pub a: f64,
    /// Source function at τ = 0
    pub s0: f64,
    /// Source function gradient
    pub s1: f64,
}

impl MilneEddingtonParameters {
    pub const ARITY: usize = 9;

    /// Reads the first nine values of `p`. The caller checks arity.
    pub fn from_slice(p: &[f64]) -> Self {
        Self {
            b: p[0],
            inclination: p[1],
            azimuth: p[2],
            v: p[3],
            deltav: p[4],
            eta0: p[5],
            a: p[6],
            s0: p[7],
            s1: p[8],
        }
    }

    fn as_array(&self) -> [f64; Self::ARITY] {
        [
            self.b,
            self.inclination,
            self.azimuth,
            self.v,
            self.deltav,
            self.eta0,
            self.a,
            self.s0,
            self.s1,
        ]
    }
}

/// Emergent Stokes spectrum of the photosphere.
pub fn milne_eddington(
    params: &MilneEddingtonParameters,
    lines: &[PhotosphericLine],
    input: &KernelInput<'_>,
) -> Result<Array2<f64>, NonPhysical> {
    ensure_finite(&params.as_array())?;
    ensure(params.b >= 0.0, || format!("negative field strength {}", params.b))?;
    ensure(params.deltav > 0.0, || {
        format!("Doppler width must be positive, got {}", params.deltav)
    })?;
    ensure(params.eta0 >= 0.0, || format!("negative line strength {}", params.eta0))?;
    ensure(params.a >= 0.0, || format!("negative damping {}", params.a))?;
    let mu = ensure_line_of_sight(input.los)?;
    let continuum = params.s0 + mu * params.s1;
    ensure(continuum > 0.0, || {
        format!("continuum intensity must be positive, got {}", continuum)
    })?;

    let gamma = params.inclination.to_radians();
    let (sin_g, cos_g) = gamma.sin_cos();
    let (sin_2chi, cos_2chi) = (2.0 * params.azimuth.to_radians()).sin_cos();

    let mut out = Array2::zeros(input.incoming.raw_dim());
    for (i, &lambda) in input.wavelength.iter().enumerate() {
        let mut eta_i = 1.0;
        let mut eta_q = 0.0;
        let mut eta_u = 0.0;
        let mut eta_v = 0.0;
        for line in lines {
            let doppler = line.lambda0 * params.deltav / SPEED_OF_LIGHT;
            let center = line.lambda0 * (1.0 + params.v / SPEED_OF_LIGHT);
            let x = (lambda - center) / doppler;
            let shift = LARMOR * line.lambda0 * line.lambda0 * line.g_eff * params.b / doppler;

            let pi = voigt(params.a, x);
            let blue = voigt(params.a, x + shift);
            let red = voigt(params.a, x - shift);
            let sigma = 0.5 * (blue + red);
            let half = 0.5 * params.eta0;

            eta_i += half * (pi * sin_g * sin_g + sigma * (1.0 + cos_g * cos_g));
            let linear = half * (pi - sigma) * sin_g * sin_g;
            eta_q += linear * cos_2chi;
            eta_u += linear * sin_2chi;
            eta_v += half * (red - blue) * cos_g;
        }

        let det = eta_i * eta_i - eta_q * eta_q - eta_u * eta_u - eta_v * eta_v;
        ensure(det > 0.0, || format!("singular absorption matrix at {} Å", lambda))?;
        let scale = input.incoming[[i, 0]] / continuum;
        let gradient = mu * params.s1 / det;
        out[[i, 0]] = scale * (params.s0 + gradient * eta_i);
        out[[i, 1]] = -scale * gradient * eta_q;
        out[[i, 2]] = -scale * gradient * eta_u;
        out[[i, 3]] = -scale * gradient * eta_v;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::photospheric_line;
    use approx::assert_relative_eq;
    use helio_core::{broadcast, LineOfSight};
    use ndarray::Array1;

    fn run(params: &MilneEddingtonParameters) -> Result<Array2<f64>, NonPhysical> {
        let wavelength = Array1::linspace(10825.0, 10829.0, 200);
        let incoming = broadcast([1.0, 0.0, 0.0, 0.0], 200);
        let los = LineOfSight::default();
        let input = KernelInput {
            wavelength: &wavelength,
            los: &los,
            incoming: incoming.view(),
        };
        milne_eddington(params, &[photospheric_line(300).unwrap()], &input)
    }

    fn reference() -> MilneEddingtonParameters {
        MilneEddingtonParameters::from_slice(&[800.0, 45.0, 30.0, 0.5, 3.0, 5.0, 0.1, 0.2, 0.8])
    }

    #[test]
    fn test_continuum_is_normalized() {
        let out = run(&reference()).unwrap();
        assert_relative_eq!(out[[0, 0]], 1.0, max_relative = 5e-3);
        assert!(out.column(0).iter().any(|&i| i < 0.7));
    }

    #[test]
    fn test_field_free_has_no_polarization() {
        let mut p = reference();
        p.b = 0.0;
        let out = run(&p).unwrap();
        for row in out.rows() {
            assert_relative_eq!(row[1], 0.0, epsilon = 1e-14);
            assert_relative_eq!(row[3], 0.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_longitudinal_field_has_no_linear_polarization() {
        let mut p = reference();
        p.inclination = 0.0;
        let out = run(&p).unwrap();
        assert!(out.column(3).iter().any(|v| v.abs() > 1e-3));
        for row in out.rows() {
            assert_relative_eq!(row[1], 0.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_negative_continuum_rejected() {
        let mut p = reference();
        p.s0 = -1.0;
        assert!(run(&p).unwrap_err().0.contains("continuum"));
    }
}
