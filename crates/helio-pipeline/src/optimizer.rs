//! Bounded Levenberg-Marquardt least squares.
//!
//! Minimizes `chi2 = Σ r_i(x)²` for a residual function supplied by the
//! caller. The Jacobian is built by forward differences with per-parameter
//! steps, falling back to backward differences at the upper bound or when
//! the forward probe fails to evaluate. Every trial point is clipped to the
//! bounds before it is evaluated.

use helio_core::{HelioError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Damping schedule and stopping floor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Initial damping factor λ
    #[serde(default = "default_lambda_init")]
    pub lambda_init: f64,
    /// λ multiplier on a rejected step
    #[serde(default = "default_lambda_up")]
    pub lambda_up: f64,
    /// λ multiplier on an accepted step
    #[serde(default = "default_lambda_down")]
    pub lambda_down: f64,
    /// The cycle stops once λ exceeds this
    #[serde(default = "default_lambda_max")]
    pub lambda_max: f64,
    /// Chi-square below which the fit is exact
    #[serde(default = "default_chi2_floor")]
    pub chi2_floor: f64,
}

fn default_lambda_init() -> f64 {
    1e-3
}

fn default_lambda_up() -> f64 {
    10.0
}

fn default_lambda_down() -> f64 {
    0.1
}

fn default_lambda_max() -> f64 {
    1e10
}

fn default_chi2_floor() -> f64 {
    1e-20
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            lambda_init: default_lambda_init(),
            lambda_up: default_lambda_up(),
            lambda_down: default_lambda_down(),
            lambda_max: default_lambda_max(),
            chi2_floor: default_chi2_floor(),
        }
    }
}

impl OptimizerSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.lambda_init > 0.0 && self.lambda_max > self.lambda_init) {
            return Err(HelioError::config(
                "optimizer needs 0 < lambda_init < lambda_max",
            ));
        }
        if !(self.lambda_up > 1.0 && self.lambda_down > 0.0 && self.lambda_down < 1.0) {
            return Err(HelioError::config(
                "optimizer needs lambda_up > 1 and 0 < lambda_down < 1",
            ));
        }
        if !(self.chi2_floor >= 0.0) {
            return Err(HelioError::config("chi2_floor must be non-negative"));
        }
        Ok(())
    }
}

/// One bounded minimization.
#[derive(Debug, Clone, Copy)]
pub struct Problem<'a> {
    pub start: &'a [f64],
    pub bounds: &'a [(f64, f64)],
    pub steps: &'a [f64],
    pub max_iterations: usize,
    /// Relative chi-square improvement below which the fit has converged
    pub tolerance: f64,
}

/// Outcome of a minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct Fit {
    pub x: Vec<f64>,
    pub residuals: Vec<f64>,
    pub chi2: f64,
    pub iterations: usize,
    /// False when `max_iterations` ran out before the tolerance was met
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LevenbergMarquardt {
    settings: OptimizerSettings,
}

fn sum_of_squares(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

impl LevenbergMarquardt {
    pub fn new(settings: OptimizerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    /// Minimizes the residuals returned by `residuals`.
    ///
    /// An error evaluating the starting point is returned to the caller.
    /// Errors at trial points only reject the step.
    pub fn minimize<F>(&self, problem: &Problem<'_>, mut residuals: F) -> Result<Fit>
    where
        F: FnMut(&[f64]) -> Result<Vec<f64>>,
    {
        let n = problem.start.len();
        if problem.bounds.len() != n || problem.steps.len() != n {
            return Err(HelioError::internal(format!(
                "optimizer got {} values, {} bounds and {} steps",
                n,
                problem.bounds.len(),
                problem.steps.len()
            )));
        }

        let mut x = problem.start.to_vec();
        let mut r = residuals(&x)?;
        let mut chi2 = sum_of_squares(&r);
        let s = self.settings;

        if n == 0 || chi2 < s.chi2_floor {
            return Ok(Fit {
                x,
                residuals: r,
                chi2,
                iterations: 0,
                converged: true,
            });
        }

        let mut lambda = s.lambda_init;
        for iteration in 1..=problem.max_iterations {
            let jacobian = self.jacobian(problem, &x, &r, &mut residuals);
            let jt = jacobian.transpose();
            let a = &jt * &jacobian;
            let g = &jt * DVector::from_column_slice(&r);

            let accepted = loop {
                if lambda > s.lambda_max {
                    break None;
                }
                let mut damped = a.clone();
                for i in 0..n {
                    damped[(i, i)] += lambda * a[(i, i)].max(1e-12);
                }
                let Some(cholesky) = damped.cholesky() else {
                    lambda *= s.lambda_up;
                    continue;
                };
                let delta = cholesky.solve(&(-&g));

                let trial: Vec<f64> = x
                    .iter()
                    .zip(delta.iter())
                    .zip(problem.bounds)
                    .map(|((xi, di), (lo, hi))| (xi + di).clamp(*lo, *hi))
                    .collect();
                if trial == x {
                    break None;
                }
                match residuals(&trial) {
                    Ok(r_trial) => {
                        let chi2_trial = sum_of_squares(&r_trial);
                        if chi2_trial < chi2 {
                            break Some((trial, r_trial, chi2_trial));
                        }
                    }
                    Err(e) => log::trace!("trial step rejected: {}", e),
                }
                lambda *= s.lambda_up;
            };

            let Some((trial, r_trial, chi2_trial)) = accepted else {
                // damping ran out or the step vanished: no further progress
                log::debug!(
                    "LM stalled at iteration {}: chi2 = {:.6e}, lambda = {:.1e}",
                    iteration,
                    chi2,
                    lambda
                );
                return Ok(Fit {
                    x,
                    residuals: r,
                    chi2,
                    iterations: iteration,
                    converged: true,
                });
            };

            let improvement = (chi2 - chi2_trial) / chi2.max(f64::MIN_POSITIVE);
            x = trial;
            r = r_trial;
            chi2 = chi2_trial;
            lambda = (lambda * s.lambda_down).max(f64::EPSILON);
            log::trace!("LM iteration {}: chi2 = {:.6e}, lambda = {:.1e}", iteration, chi2, lambda);

            if improvement < problem.tolerance || chi2 < s.chi2_floor {
                return Ok(Fit {
                    x,
                    residuals: r,
                    chi2,
                    iterations: iteration,
                    converged: true,
                });
            }
        }

        Ok(Fit {
            x,
            residuals: r,
            chi2,
            iterations: problem.max_iterations,
            converged: false,
        })
    }

    /// `dr/dx` by one-sided differences. Columns that cannot be evaluated in
    /// either direction stay zero.
    fn jacobian<F>(&self, problem: &Problem<'_>, x: &[f64], r: &[f64], residuals: &mut F) -> DMatrix<f64>
    where
        F: FnMut(&[f64]) -> Result<Vec<f64>>,
    {
        let mut jacobian = DMatrix::zeros(r.len(), x.len());
        let mut probe = x.to_vec();
        for j in 0..x.len() {
            let (lo, hi) = problem.bounds[j];
            let h = problem.steps[j];
            let forward = x[j] + h;
            let backward = x[j] - h;
            let mut candidates = Vec::with_capacity(2);
            if forward <= hi {
                candidates.push(forward);
            }
            if backward >= lo {
                candidates.push(backward);
            }

            for value in candidates {
                probe[j] = value;
                match residuals(&probe) {
                    Ok(shifted) if shifted.len() == r.len() => {
                        let dx = value - x[j];
                        for (i, (s, base)) in shifted.iter().zip(r).enumerate() {
                            jacobian[(i, j)] = (s - base) / dx;
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => log::trace!("jacobian probe {} failed: {}", j, e),
                }
            }
            probe[j] = x[j];
        }
        jacobian
    }
}
