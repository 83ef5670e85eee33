//! Multi-pixel batch execution.
//!
//! [`BatchIterator::run`] inverts a sequence of pixels with a pluggable
//! [`BatchStrategy`] and returns one [`PixelBatch`] per pixel in input
//! order. Workers share the [`Model`] read-only; each pixel gets its own
//! parameter store and generators inside the inversion engine.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use helio_core::{HelioError, Observation, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::BatchConfig;
use crate::inversion::{CycleStatus, PixelBatch};
use crate::model::Model;
use crate::telemetry;

/// Execution mode selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

/// Called with every finished pixel, possibly from several threads.
pub type PixelCallback = Arc<dyn Fn(&PixelBatch) + Send + Sync>;

/// Everything a strategy needs to process pixels.
pub struct BatchContext<'a> {
    pub model: &'a Model,
    pub pixels: &'a [Observation],
    pub cancel: &'a AtomicBool,
    pub on_pixel: Option<&'a PixelCallback>,
}

impl BatchContext<'_> {
    /// Inverts pixel `index` unless the batch was cancelled first.
    fn process(&self, index: usize) -> Option<Result<PixelBatch>> {
        if self.cancel.load(Ordering::Relaxed) {
            return None;
        }
        let batch = self.model.invert_pixel(index, &self.pixels[index]);
        if let (Ok(batch), Some(callback)) = (&batch, self.on_pixel) {
            callback(batch);
        }
        Some(batch)
    }
}

/// How pixels are scheduled.
///
/// Implementations return the batches of the pixels they processed, in
/// pixel order. Pixels skipped after cancellation are absent.
pub trait BatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, ctx: &BatchContext<'_>) -> Result<Vec<PixelBatch>>;
}

/// One pixel after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl BatchStrategy for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn execute(&self, ctx: &BatchContext<'_>) -> Result<Vec<PixelBatch>> {
        let mut batches = Vec::with_capacity(ctx.pixels.len());
        for index in 0..ctx.pixels.len() {
            match ctx.process(index) {
                Some(batch) => batches.push(batch?),
                None => break,
            }
        }
        Ok(batches)
    }
}

/// Pixels partitioned over a dedicated rayon pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parallel {
    /// Worker threads, 0 = one per core
    pub workers: usize,
}

impl BatchStrategy for Parallel {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn execute(&self, ctx: &BatchContext<'_>) -> Result<Vec<PixelBatch>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("helio-worker-{}", i))
            .build()
            .map_err(|e| HelioError::internal(format!("failed to start worker pool: {}", e)))?;
        log::debug!("Parallel batch on {} worker(s)", pool.current_num_threads());

        // indexed collect keeps input order whatever the completion order
        let processed: Vec<Option<Result<PixelBatch>>> =
            pool.install(|| (0..ctx.pixels.len()).into_par_iter().map(|i| ctx.process(i)).collect());
        processed.into_iter().flatten().collect()
    }
}

/// Shared flag that stops dispatch of new pixels.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counts and timing of a finished batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub n_pixels: usize,
    pub completed: usize,
    pub skipped: usize,
    /// Per final-cycle result, over every restart
    pub converged: usize,
    pub exhausted: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn new(n_pixels: usize, batches: &[PixelBatch], elapsed: Duration) -> Self {
        let mut summary = Self {
            n_pixels,
            completed: batches.len(),
            skipped: n_pixels - batches.len(),
            converged: 0,
            exhausted: 0,
            failed: 0,
            elapsed,
        };
        for batch in batches {
            let Some(last) = batch.n_cycles.checked_sub(1) else {
                continue;
            };
            for restart in 0..batch.n_restarts {
                match batch.result(restart, last).map(|r| r.status) {
                    Some(CycleStatus::Converged) => summary.converged += 1,
                    Some(CycleStatus::Exhausted) => summary.exhausted += 1,
                    Some(CycleStatus::Failed) => summary.failed += 1,
                    None => {}
                }
            }
        }
        summary
    }

    pub fn log(&self) {
        log::info!(
            "Batch finished in {:.2}s: {}/{} pixels, {} converged, {} exhausted, {} failed",
            self.elapsed.as_secs_f64(),
            self.completed,
            self.n_pixels,
            self.converged,
            self.exhausted,
            self.failed
        );
        if self.skipped > 0 {
            log::warn!("{} pixel(s) skipped after cancellation", self.skipped);
        }
    }
}

/// Result of [`BatchIterator::run`].
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Batches of the processed pixels, in input order
    pub batches: Vec<PixelBatch>,
    pub cancelled: bool,
    pub summary: BatchSummary,
}

impl BatchOutcome {
    /// Total number of cycle results.
    pub fn n_results(&self) -> usize {
        self.batches.iter().map(|b| b.results.len()).sum()
    }
}

pub struct BatchIterator<'a> {
    model: &'a Model,
    strategy: Box<dyn BatchStrategy + 'a>,
    cancel: CancelHandle,
    on_pixel: Option<PixelCallback>,
    telemetry_path: Option<PathBuf>,
}

impl<'a> BatchIterator<'a> {
    pub fn new(model: &'a Model, strategy: impl BatchStrategy + 'a) -> Self {
        Self {
            model,
            strategy: Box::new(strategy),
            cancel: CancelHandle::default(),
            on_pixel: None,
            telemetry_path: None,
        }
    }

    pub fn sequential(model: &'a Model) -> Self {
        Self::new(model, Sequential)
    }

    pub fn parallel(model: &'a Model, workers: usize) -> Self {
        Self::new(model, Parallel { workers })
    }

    /// Strategy and telemetry from the `[batch]` section.
    pub fn from_config(model: &'a Model, config: &BatchConfig) -> Self {
        let iterator = match config.mode {
            ExecutionMode::Sequential => Self::sequential(model),
            ExecutionMode::Parallel => Self::parallel(model, config.workers),
        };
        match &config.telemetry_path {
            Some(path) => iterator.with_telemetry(path.clone()),
            None => iterator,
        }
    }

    pub fn with_telemetry(mut self, path: impl Into<PathBuf>) -> Self {
        self.telemetry_path = Some(path.into());
        self
    }

    pub fn on_pixel(mut self, callback: impl Fn(&PixelBatch) + Send + Sync + 'static) -> Self {
        self.on_pixel = Some(Arc::new(callback));
        self
    }

    /// Handle that aborts the batch between pixels.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Inverts `pixels`.
    ///
    /// Every pixel is validated before the first one is processed, so a
    /// malformed observation aborts the run with nothing computed. Pixel
    /// failures afterwards are recorded inside their batches.
    pub fn run(&self, pixels: &[Observation]) -> Result<BatchOutcome> {
        for (index, pixel) in pixels.iter().enumerate() {
            self.model.validate_observation(pixel).map_err(|e| match e {
                HelioError::Configuration(msg) => HelioError::config(format!("pixel {}: {}", index, msg)),
                other => other,
            })?;
        }

        log::info!(
            "Inverting {} pixel(s) ({} strategy, {} restart(s) x {} cycle(s))",
            pixels.len(),
            self.strategy.name(),
            self.model.settings().restarts,
            self.model.cycles().len()
        );
        let start = Instant::now();
        let ctx = BatchContext {
            model: self.model,
            pixels,
            cancel: &self.cancel.0,
            on_pixel: self.on_pixel.as_ref(),
        };
        let batches = self.strategy.execute(&ctx)?;
        let summary = BatchSummary::new(pixels.len(), &batches, start.elapsed());
        summary.log();

        if let Some(path) = &self.telemetry_path {
            telemetry::write_batches(path, &batches)?;
        }

        Ok(BatchOutcome {
            cancelled: self.cancel.is_cancelled(),
            batches,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_mode_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: ExecutionMode,
        }
        let w: Wrapper = toml::from_str("mode = \"parallel\"").unwrap();
        assert_eq!(w.mode, ExecutionMode::Parallel);
        assert_eq!(ExecutionMode::default(), ExecutionMode::Sequential);
    }

    #[test]
    fn test_cancel_handle_is_shared() {
        let handle = CancelHandle::default();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_summary_of_empty_batch() {
        let summary = BatchSummary::new(4, &[], Duration::from_millis(5));
        assert_eq!(summary.skipped, 4);
        assert_eq!(summary.converged + summary.exhausted + summary.failed, 0);
    }
}
