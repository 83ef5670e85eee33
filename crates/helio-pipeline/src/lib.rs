//! # helio-pipeline
//!
//! Model configuration, forward synthesis, multi-cycle inversion and pixel
//! batch execution for heliograph.
//!
//! ## Usage Example
//! ```rust,no_run
//! use helio_pipeline::{configure, BatchIterator, ModelConfig};
//!
//! # fn main() -> helio_core::Result<()> {
//! let config = ModelConfig::from_file("model.toml")?;
//! let model = configure(&config)?;
//! let spectra = model.synthesize()?;
//! let observation = model.observation(&spectra, 1e-3)?;
//! let outcome = BatchIterator::from_config(&model, &config.batch).run(&[observation])?;
//! println!("{} results", outcome.n_results());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod inversion;
pub mod model;
pub mod optimizer;
pub mod output;
pub mod params;
pub mod synthesis;
pub mod telemetry;
pub mod topology;

// Re-export commonly used items
pub use batch::{
    BatchIterator, BatchOutcome, BatchStrategy, BatchSummary, CancelHandle, ExecutionMode, Parallel, Sequential,
};
pub use config::{AtmosphereConfig, BatchConfig, CycleConfig, InversionConfig, ModelConfig, RegionConfig};
pub use inversion::{CycleStatus, InversionEngine, InversionResult, InversionSettings, PixelBatch};
pub use model::{configure, Model};
pub use optimizer::{LevenbergMarquardt, OptimizerSettings};
pub use output::{write_results, write_spectra};
pub use params::{ParameterSchema, ParameterSnapshot, ParameterStore};
pub use synthesis::SynthesisEngine;
pub use telemetry::TelemetryEvent;
pub use topology::{EvaluationPlan, Topology};
