//! Multi-cycle, multi-restart inversion of one pixel.
//!
//! Per `(pixel, restart)` the engine walks the configured cycles in order.
//! Each cycle fits only the parameters free in that cycle, starting from
//! where the previous cycle ended, and emits exactly one
//! [`InversionResult`]. A cycle whose physics cannot be evaluated is retried
//! from randomly perturbed starting values; when the retry budget runs out
//! the cycle and every later cycle of that restart are recorded as failed
//! sentinels.

mod result;

pub use result::{CycleStatus, InversionResult, PixelBatch};

use helio_core::{HelioError, Observation, ObservationPixel, Result, SpectralRegion, Spectrum};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::model::Model;
use crate::optimizer::{LevenbergMarquardt, OptimizerSettings, Problem};
use crate::params::ParameterStore;
use crate::synthesis::SynthesisEngine;

/// Restart, retry and optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InversionSettings {
    /// Independent starts per pixel
    pub restarts: usize,
    /// Perturbed retries of a cycle after a physical evaluation failure
    pub retries: usize,
    /// Base seed of the restart and retry generators
    pub seed: u64,
    /// Retry perturbation amplitude as a fraction of each range
    pub perturbation: f64,
    pub optimizer: OptimizerSettings,
}

impl Default for InversionSettings {
    fn default() -> Self {
        Self {
            restarts: 1,
            retries: 3,
            seed: 42,
            perturbation: 0.1,
            optimizer: OptimizerSettings::default(),
        }
    }
}

/// One configured cycle, with the per-region weight arrays resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct CyclePlan {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// `[n_wvl, 4]` weights, in region order
    pub weights: Vec<Array2<f64>>,
}

impl CyclePlan {
    /// Number of residuals that carry weight.
    pub fn n_weighted(&self) -> usize {
        self.weights
            .iter()
            .map(|w| w.iter().filter(|&&v| v > 0.0).count())
            .sum()
    }
}

/// Seed of the generator owned by one `(pixel, restart)`.
///
/// Depends only on its arguments, so results do not depend on which worker
/// runs the pixel.
pub fn restart_seed(seed: u64, pixel: usize, restart: usize) -> u64 {
    seed ^ (pixel as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (restart as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

/// A model region observed under one pixel's geometry.
struct Target<'o> {
    region: SpectralRegion,
    observed: &'o ObservationPixel,
}

/// Result of a cycle that completed.
struct CycleOutcome {
    store: ParameterStore,
    fitted: Vec<Spectrum>,
    chi_square: f64,
    region_chi_square: Vec<f64>,
    n_free: usize,
    iterations: usize,
    converged: bool,
    retries: usize,
}

pub struct InversionEngine<'a> {
    model: &'a Model,
    optimizer: LevenbergMarquardt,
}

impl<'a> InversionEngine<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self {
            model,
            optimizer: LevenbergMarquardt::new(model.settings().optimizer),
        }
    }

    /// Checks that `observation` covers every region with consistent shapes.
    pub fn validate(&self, observation: &Observation) -> Result<()> {
        self.targets(observation).map(|_| ())
    }

    fn targets<'o>(&self, observation: &'o Observation) -> Result<Vec<Target<'o>>> {
        for (name, _) in observation.regions() {
            if self.model.regions().iter().all(|r| r.name() != name) {
                return Err(HelioError::config(format!(
                    "observation has data for unknown region '{}'",
                    name
                )));
            }
        }
        self.model
            .regions()
            .iter()
            .map(|region| {
                let observed = observation.require(region.name())?;
                observed.validate(region.name(), region.n_wvl())?;
                Ok(Target {
                    region: region.with_geometry(observed.los, observed.boundary.clone())?,
                    observed,
                })
            })
            .collect()
    }

    /// Runs every restart and cycle for one pixel.
    ///
    /// Only malformed observations are errors; evaluation failures end up
    /// as failed results inside the batch.
    pub fn invert_pixel(&self, pixel_index: usize, observation: &Observation) -> Result<PixelBatch> {
        let targets = self.targets(observation)?;
        let settings = self.model.settings();
        let n_cycles = self.model.cycles().len();
        let mut results = Vec::with_capacity(settings.restarts * n_cycles);
        for restart in 0..settings.restarts {
            results.extend(self.run_restart(pixel_index, restart, &targets));
        }
        Ok(PixelBatch {
            pixel_index,
            n_restarts: settings.restarts,
            n_cycles,
            results,
        })
    }

    fn run_restart(&self, pixel: usize, restart: usize, targets: &[Target<'_>]) -> Vec<InversionResult> {
        let schema = self.model.schema();
        let settings = self.model.settings();
        let mut rng = StdRng::seed_from_u64(restart_seed(settings.seed, pixel, restart));

        let mut store = self.model.initial_store().clone();
        if restart > 0 {
            for slot in schema.free_in_any_cycle() {
                let (lower, upper) = schema.bounds(slot);
                store.set_slot(slot, rng.gen_range(lower..=upper));
            }
        }

        let n_cycles = self.model.cycles().len();
        let mut results = Vec::with_capacity(n_cycles);
        for cycle in 0..n_cycles {
            match self.run_cycle(cycle, &store, targets, &mut rng) {
                Ok(outcome) => {
                    let status = if outcome.converged {
                        CycleStatus::Converged
                    } else {
                        log::warn!(
                            "Pixel {} restart {} cycle {}: no convergence after {} iterations (chi2 = {:.4e})",
                            pixel,
                            restart,
                            cycle,
                            outcome.iterations,
                            outcome.chi_square
                        );
                        CycleStatus::Exhausted
                    };
                    log::debug!(
                        "Pixel {} restart {} cycle {}: chi2 = {:.6e} after {} iterations",
                        pixel,
                        restart,
                        cycle,
                        outcome.chi_square,
                        outcome.iterations
                    );
                    let n_weighted = self.model.cycles()[cycle].n_weighted();
                    let dof = n_weighted.saturating_sub(outcome.n_free).max(1);
                    results.push(InversionResult {
                        pixel_index: pixel,
                        restart_index: restart,
                        cycle_index: cycle,
                        fitted_stokes: outcome.fitted,
                        chi_square: outcome.chi_square,
                        reduced_chi_square: outcome.chi_square / dof as f64,
                        region_chi_square: outcome.region_chi_square,
                        parameters: outcome.store.snapshot(),
                        converged: outcome.converged,
                        status,
                        iterations: outcome.iterations,
                        retries: outcome.retries,
                    });
                    store = outcome.store;
                }
                Err(e) => {
                    log::error!(
                        "Pixel {} restart {} failed in cycle {}: {}",
                        pixel,
                        restart,
                        cycle,
                        e
                    );
                    let regions: Vec<SpectralRegion> = targets.iter().map(|t| t.region.clone()).collect();
                    let retries = if e.is_retriable() { settings.retries } else { 0 };
                    for failed in cycle..n_cycles {
                        results.push(InversionResult::failed_sentinel(
                            pixel,
                            restart,
                            failed,
                            &regions,
                            store.snapshot(),
                            if failed == cycle { retries } else { 0 },
                        ));
                    }
                    break;
                }
            }
        }
        results
    }

    /// Fits one cycle from `initial`, retrying from perturbed values while
    /// the physics cannot be evaluated.
    fn run_cycle(
        &self,
        cycle: usize,
        initial: &ParameterStore,
        targets: &[Target<'_>],
        rng: &mut StdRng,
    ) -> Result<CycleOutcome> {
        let schema = self.model.schema();
        let settings = self.model.settings();
        let plan = &self.model.cycles()[cycle];
        let free = schema.free_slots(cycle);
        let bounds: Vec<(f64, f64)> = free.iter().map(|&s| schema.bounds(s)).collect();
        let steps: Vec<f64> = free.iter().map(|&s| schema.step(s)).collect();

        let mut start = initial.clone();
        let mut retries = 0;
        loop {
            let x0: Vec<f64> = free.iter().map(|&s| schema.clip(s, start.get(s))).collect();
            let problem = Problem {
                start: &x0,
                bounds: &bounds,
                steps: &steps,
                max_iterations: plan.max_iterations,
                tolerance: plan.tolerance,
            };
            let attempt = self
                .optimizer
                .minimize(&problem, |x| {
                    let store = with_free(&start, &free, x);
                    self.residuals(&store, targets, &plan.weights)
                })
                .and_then(|fit| {
                    let store = with_free(&start, &free, &fit.x);
                    let fitted = self.synthesize(&store, targets)?;
                    let per_region = targets.iter().map(|t| t.region.n_wvl() * helio_core::N_STOKES);
                    let mut offset = 0;
                    let region_chi_square = per_region
                        .map(|len| {
                            let chi2 = fit.residuals[offset..offset + len].iter().map(|r| r * r).sum();
                            offset += len;
                            chi2
                        })
                        .collect();
                    Ok(CycleOutcome {
                        store,
                        fitted,
                        chi_square: fit.chi2,
                        region_chi_square,
                        n_free: free.len(),
                        iterations: fit.iterations,
                        converged: fit.converged,
                        retries,
                    })
                });

            match attempt {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retriable() && retries < settings.retries => {
                    retries += 1;
                    log::warn!(
                        "Cycle {} retry {}/{}: {}",
                        cycle,
                        retries,
                        settings.retries,
                        e
                    );
                    for &slot in &free {
                        let (lower, upper) = schema.bounds(slot);
                        let kick = rng.gen_range(-1.0..=1.0) * settings.perturbation * (upper - lower);
                        start.set_slot(slot, schema.clip(slot, start.get(slot) + kick));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn synthesize(&self, store: &ParameterStore, targets: &[Target<'_>]) -> Result<Vec<Spectrum>> {
        let engine = SynthesisEngine::new(self.model.components());
        targets
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let stokes = engine.synthesize(self.model.topology().plan(i), &t.region, store)?;
                Spectrum::new(t.region.name(), t.region.wavelength().clone(), stokes)
            })
            .collect()
    }

    /// Weighted residuals `w (observed - synthesized) / sigma`, regions
    /// concatenated in order, each flattened wavelength-major.
    fn residuals(
        &self,
        store: &ParameterStore,
        targets: &[Target<'_>],
        weights: &[Array2<f64>],
    ) -> Result<Vec<f64>> {
        let engine = SynthesisEngine::new(self.model.components());
        let mut residuals = Vec::new();
        for (i, target) in targets.iter().enumerate() {
            let synthetic = engine.synthesize(self.model.topology().plan(i), &target.region, store)?;
            let observed = target.observed;
            residuals.extend(
                ndarray::Zip::from(&observed.stokes)
                    .and(&synthetic)
                    .and(&observed.sigma)
                    .and(&weights[i])
                    .map_collect(|o, s, e, w| w * (o - s) / e)
                    .iter()
                    .copied(),
            );
        }
        Ok(residuals)
    }
}

fn with_free(base: &ParameterStore, free: &[usize], x: &[f64]) -> ParameterStore {
    let mut store = base.clone();
    for (&slot, &value) in free.iter().zip(x) {
        store.set_slot(slot, value);
    }
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_seeds_differ() {
        let a = restart_seed(42, 0, 0);
        assert_eq!(a, 42);
        assert_ne!(restart_seed(42, 1, 0), restart_seed(42, 0, 1));
        assert_ne!(restart_seed(42, 3, 2), restart_seed(43, 3, 2));
    }

    #[test]
    fn test_n_weighted_skips_zero_weights() {
        let mut w = Array2::ones((10, 4));
        w.column_mut(2).fill(0.0);
        let plan = CyclePlan {
            max_iterations: 10,
            tolerance: 1e-4,
            weights: vec![w, Array2::ones((5, 4))],
        };
        assert_eq!(plan.n_weighted(), 30 + 20);
    }
}
