//! Per-cycle telemetry.
//!
//! One JSON line per emitted [`InversionResult`], appended to a file in
//! pixel order once a batch has been aggregated.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use helio_core::Result;
use serde::{Deserialize, Serialize};

use crate::inversion::{CycleStatus, InversionResult, PixelBatch};

/// Telemetry event emitted for one cycle result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// RFC 3339 timestamp
    pub timestamp: String,

    pub pixel: usize,
    pub restart: usize,
    pub cycle: usize,

    pub status: CycleStatus,

    /// `null` in JSON for failed cycles
    pub chi_square: Option<f64>,
    pub reduced_chi_square: Option<f64>,

    pub iterations: usize,
    pub retries: usize,
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

impl TelemetryEvent {
    pub fn from_result(result: &InversionResult) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            pixel: result.pixel_index,
            restart: result.restart_index,
            cycle: result.cycle_index,
            status: result.status,
            chi_square: finite(result.chi_square),
            reduced_chi_square: finite(result.reduced_chi_square),
            iterations: result.iterations,
            retries: result.retries,
        }
    }

    /// Serializes to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Appends this event as one line to `path`.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", self.to_json()?)?;
        Ok(())
    }
}

/// Appends one event per result of `batches`, in order.
pub fn write_batches(path: impl AsRef<Path>, batches: &[PixelBatch]) -> Result<usize> {
    let path = path.as_ref();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    let mut count = 0;
    for result in batches.iter().flat_map(|b| &b.results) {
        writeln!(writer, "{}", TelemetryEvent::from_result(result).to_json()?)?;
        count += 1;
    }
    writer.flush()?;
    log::debug!("Wrote {} telemetry events to {}", count, path.display());
    Ok(count)
}
