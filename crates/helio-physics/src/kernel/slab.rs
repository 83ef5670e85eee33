//! Constant-property slab in the weak-field regime.
//!
//! The slab absorbs and re-emits the incoming light with a source function
//! `beta * W * I_cont`, where `I_cont` is the brightest incoming Stokes I
//! sample and `W` the geometric dilution at the slab height.
//! Circular polarization is first order in the longitudinal field, linear
//! polarization second order in the transverse field.

use ndarray::Array2;

use super::{ensure, ensure_finite, ensure_line_of_sight, KernelInput, NonPhysical};
use crate::lines::{Multiplet, LARMOR, SPEED_OF_LIGHT};
use crate::profile::{voigt, voigt_dv, voigt_dv2};

/// Parameters of a chromospheric slab, in storage order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlabParameters {
    /// Field components in the local vertical frame (G)
    pub bx: f64,
    pub by: f64,
    pub bz: f64,
    /// Line-center optical depth
    pub tau: f64,
    /// Bulk velocity (km/s, positive = redshift)
    pub v: f64,
    /// Doppler width (km/s)
    pub deltav: f64,
    /// Source-function enhancement
    pub beta: f64,
    /// Damping
    pub a: f64,
}

impl SlabParameters {
    pub const ARITY: usize = 8;

    /// Reads the first eight values of `p`. The caller checks arity.
    pub fn from_slice(p: &[f64]) -> Self {
        Self {
            bx: p[0],
            by: p[1],
            bz: p[2],
            tau: p[3],
            v: p[4],
            deltav: p[5],
            beta: p[6],
            a: p[7],
        }
    }

    fn as_array(&self) -> [f64; Self::ARITY] {
        [self.bx, self.by, self.bz, self.tau, self.v, self.deltav, self.beta, self.a]
    }
}

/// Emergent Stokes spectrum of the slab.
pub fn slab(
    params: &SlabParameters,
    multiplet: &Multiplet,
    dilution: f64,
    input: &KernelInput<'_>,
) -> Result<Array2<f64>, NonPhysical> {
    ensure_finite(&params.as_array())?;
    ensure(params.tau >= 0.0, || format!("negative optical depth {}", params.tau))?;
    ensure(params.deltav > 0.0, || {
        format!("Doppler width must be positive, got {}", params.deltav)
    })?;
    ensure(params.beta >= 0.0, || format!("negative source enhancement {}", params.beta))?;
    ensure(params.a >= 0.0, || format!("negative damping {}", params.a))?;
    let mu = ensure_line_of_sight(input.los)?;

    let continuum = input
        .incoming
        .column(0)
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    ensure(continuum > 0.0, || {
        format!("incident continuum must be positive, got {}", continuum)
    })?;
    let source = params.beta * dilution * continuum;
    let tau_los = params.tau / mu;

    let (q_geometry, u_geometry, b_parallel) = project_field(params, input);

    let mut out = Array2::zeros(input.incoming.raw_dim());
    for (i, &lambda) in input.wavelength.iter().enumerate() {
        let mut eta_i = 0.0;
        let mut eta_q = 0.0;
        let mut eta_u = 0.0;
        let mut eta_v = 0.0;
        for c in &multiplet.components {
            let doppler = c.lambda0 * params.deltav / SPEED_OF_LIGHT;
            let center = c.lambda0 * (1.0 + params.v / SPEED_OF_LIGHT);
            let x = (lambda - center) / doppler;
            let split = LARMOR * c.lambda0 * c.lambda0 * c.g_eff;

            eta_i += c.strength * voigt(params.a, x);
            eta_v -= c.strength * split * b_parallel * voigt_dv(params.a, x) / doppler;
            let second = voigt_dv2(params.a, x) / (doppler * doppler);
            eta_q -= 0.25 * c.strength * split * split * q_geometry * second;
            eta_u -= 0.25 * c.strength * split * split * u_geometry * second;
        }

        let attenuation = (-tau_los * eta_i).exp();
        let in_i = input.incoming[[i, 0]];
        let excess = in_i - source;
        out[[i, 0]] = in_i * attenuation + source * (1.0 - attenuation);
        out[[i, 1]] = input.incoming[[i, 1]] * attenuation - tau_los * eta_q * attenuation * excess;
        out[[i, 2]] = input.incoming[[i, 2]] * attenuation - tau_los * eta_u * attenuation * excess;
        out[[i, 3]] = input.incoming[[i, 3]] * attenuation - tau_los * eta_v * attenuation * excess;
    }
    Ok(out)
}

/// Geometric dilution factor of the photospheric radiation field at
/// `height` arcsec above the surface.
pub fn dilution_factor(height: f64) -> f64 {
    const SOLAR_RADIUS_ARCSEC: f64 = 959.63;
    let r = 1.0 / (1.0 + height.max(0.0) / SOLAR_RADIUS_ARCSEC);
    0.5 * (1.0 - (1.0 - r * r).sqrt())
}

/// Rotates the vertical-frame field into the line-of-sight frame.
///
/// Returns `(B⊥² cos 2χ, B⊥² sin 2χ, B∥)` with χ measured from the Stokes Q
/// reference direction.
fn project_field(params: &SlabParameters, input: &KernelInput<'_>) -> (f64, f64, f64) {
    let theta = input.los.theta.to_radians();
    let phi = input.los.phi.to_radians();
    let gamma = input.los.gamma.to_radians();

    let bx_h = params.bx * phi.cos() + params.by * phi.sin();
    let by_h = -params.bx * phi.sin() + params.by * phi.cos();

    let b_parallel = params.bz * theta.cos() + bx_h * theta.sin();
    let bt_x = bx_h * theta.cos() - params.bz * theta.sin();
    let bt_y = by_h;

    let diff = bt_x * bt_x - bt_y * bt_y;
    let cross = 2.0 * bt_x * bt_y;
    let (s2g, c2g) = (2.0 * gamma).sin_cos();
    (diff * c2g + cross * s2g, cross * c2g - diff * s2g, b_parallel)
}
