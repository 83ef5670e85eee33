//! Inversion results.

use helio_core::{SpectralRegion, Spectrum, N_STOKES};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::params::ParameterSnapshot;

/// Terminal state of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    /// Relative chi-square improvement fell below the tolerance
    Converged,
    /// The iteration budget ran out first; the result is still usable
    Exhausted,
    /// Physical evaluation kept failing after every retry
    Failed,
}

impl CycleStatus {
    /// Numeric code used in result archives.
    pub fn code(self) -> u8 {
        match self {
            CycleStatus::Converged => 0,
            CycleStatus::Exhausted => 1,
            CycleStatus::Failed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CycleStatus::Converged => "converged",
            CycleStatus::Exhausted => "exhausted",
            CycleStatus::Failed => "failed",
        }
    }
}

/// Snapshot emitted at the end of one cycle of one restart of one pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct InversionResult {
    pub pixel_index: usize,
    pub restart_index: usize,
    pub cycle_index: usize,
    /// Synthesized spectra at the fitted parameters, in region order
    pub fitted_stokes: Vec<Spectrum>,
    pub chi_square: f64,
    /// `chi_square / max(n_weighted - n_free, 1)`
    pub reduced_chi_square: f64,
    /// Chi-square contribution of each region, in region order
    pub region_chi_square: Vec<f64>,
    pub parameters: ParameterSnapshot,
    pub converged: bool,
    pub status: CycleStatus,
    pub iterations: usize,
    pub retries: usize,
}

impl InversionResult {
    /// Placeholder for a cycle that could not be evaluated: NaN spectra,
    /// infinite chi-square and the last parameters that could be.
    pub fn failed_sentinel(
        pixel_index: usize,
        restart_index: usize,
        cycle_index: usize,
        regions: &[SpectralRegion],
        parameters: ParameterSnapshot,
        retries: usize,
    ) -> Self {
        Self {
            pixel_index,
            restart_index,
            cycle_index,
            fitted_stokes: regions
                .iter()
                .map(|r| Spectrum {
                    region: r.name().to_string(),
                    wavelength: r.wavelength().clone(),
                    stokes: Array2::from_elem((r.n_wvl(), N_STOKES), f64::NAN),
                })
                .collect(),
            chi_square: f64::INFINITY,
            reduced_chi_square: f64::INFINITY,
            region_chi_square: vec![f64::INFINITY; regions.len()],
            parameters,
            converged: false,
            status: CycleStatus::Failed,
            iterations: 0,
            retries,
        }
    }
}

/// All results of one pixel, restart-major then cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBatch {
    pub pixel_index: usize,
    pub n_restarts: usize,
    pub n_cycles: usize,
    pub results: Vec<InversionResult>,
}

impl PixelBatch {
    pub fn result(&self, restart: usize, cycle: usize) -> Option<&InversionResult> {
        if restart >= self.n_restarts || cycle >= self.n_cycles {
            return None;
        }
        self.results.get(restart * self.n_cycles + cycle)
    }

    /// Final-cycle result with the lowest chi-square across restarts.
    pub fn best(&self) -> Option<&InversionResult> {
        let last = self.n_cycles.checked_sub(1)?;
        (0..self.n_restarts)
            .filter_map(|r| self.result(r, last))
            .filter(|r| r.status != CycleStatus::Failed)
            .min_by(|a, b| a.chi_square.total_cmp(&b.chi_square))
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.status == CycleStatus::Failed)
    }
}
