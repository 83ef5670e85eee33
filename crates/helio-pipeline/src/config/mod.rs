//! Model configuration and validation.
//!
//! A model file is TOML:
//!
//! ```toml
//! [[regions]]
//! name = "spec1"
//! wavelength = { start = 10826.0, end = 10833.0, points = 150 }
//! topology = "ch1"
//! los = [0.0, 0.0, 90.0]
//! boundary = [1.0, 0.0, 0.0, 0.0]
//!
//! [[atmospheres]]
//! name = "ch1"
//! kind = "chromosphere"
//! line = "10830"
//! height = 3.0
//! parameters = [100.0, 100.0, 100.0, 0.5, 10.0, 8.0, 1.0, 0.0]
//! free = { tau = [1, 1], v = [0, 1] }
//!
//! [[inversion.cycle]]
//! max_iterations = 20
//!
//! [[inversion.cycle]]
//! max_iterations = 20
//! stokes_weights = [1.0, 0.0, 0.0, 1.0]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use helio_core::{HelioError, Result, StokesVector};
use helio_physics::ProfileShape;
use serde::{Deserialize, Serialize};

use crate::batch::ExecutionMode;
use crate::optimizer::OptimizerSettings;

/// Root of a model file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub regions: Vec<RegionConfig>,

    pub atmospheres: Vec<AtmosphereConfig>,

    #[serde(default)]
    pub inversion: InversionConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

/// Equally spaced wavelength axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WavelengthAxis {
    pub start: f64,
    pub end: f64,
    pub points: usize,
}

/// One spectral region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,

    /// Equally spaced axis; exclusive with `wavelength_file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wavelength: Option<WavelengthAxis>,

    /// Plain-text wavelength file; exclusive with `wavelength`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wavelength_file: Option<PathBuf>,

    /// Topology expression, e.g. `"ph1->ch1+ch2->te1"`
    pub topology: String,

    /// Line-of-sight angles `[theta, phi, gamma]` (deg)
    #[serde(default = "default_los")]
    pub los: [f64; 3],

    /// Incident Stokes vector
    #[serde(default = "default_boundary")]
    pub boundary: StokesVector,

    /// Per-wavelength weights file, `[n_wvl, 4]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights_file: Option<PathBuf>,

    /// Observations to invert (`.npz` cube or single-pixel text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_file: Option<PathBuf>,
}

fn default_los() -> [f64; 3] {
    [0.0, 0.0, 90.0]
}

fn default_boundary() -> StokesVector {
    [1.0, 0.0, 0.0, 0.0]
}

impl RegionConfig {
    pub fn new(name: impl Into<String>, start: f64, end: f64, points: usize, topology: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wavelength: Some(WavelengthAxis { start, end, points }),
            wavelength_file: None,
            topology: topology.into(),
            los: default_los(),
            boundary: default_boundary(),
            weights_file: None,
            observation_file: None,
        }
    }

    pub fn los(mut self, theta: f64, phi: f64, gamma: f64) -> Self {
        self.los = [theta, phi, gamma];
        self
    }

    pub fn boundary(mut self, boundary: StokesVector) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn weights_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.weights_file = Some(path.into());
        self
    }

    pub fn observation_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.observation_file = Some(path.into());
        self
    }
}

/// Kind-specific fields of an atmosphere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AtmosphereKindConfig {
    Photosphere {
        /// Line catalog identifiers
        lines: Vec<u32>,
        /// Reference model path, kept as metadata
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference_model: Option<String>,
    },
    Chromosphere {
        /// Multiplet label, e.g. `"10830"`
        line: String,
        /// Height above the surface (arcsec)
        #[serde(default = "default_height")]
        height: f64,
    },
    Parametric {
        #[serde(default)]
        shape: ProfileShape,
    },
}

fn default_height() -> f64 {
    3.0
}

/// One atmosphere component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtmosphereConfig {
    pub name: String,

    #[serde(flatten)]
    pub kind: AtmosphereKindConfig,

    /// Initial values in the kind's parameter order
    pub parameters: Vec<f64>,

    #[serde(default = "default_filling_factor")]
    pub filling_factor: f64,

    /// Window `[start, end]` (Å) outside which the component is transparent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wavelength: Option<[f64; 2]>,

    /// Search range overrides by parameter name
    #[serde(default)]
    pub ranges: BTreeMap<String, [f64; 2]>,

    /// Per-cycle free flags (0/1) by parameter name; one flag applies to all cycles
    #[serde(default)]
    pub free: BTreeMap<String, Vec<u8>>,

    /// Finite-difference step overrides by parameter name
    #[serde(default)]
    pub steps: BTreeMap<String, f64>,
}

fn default_filling_factor() -> f64 {
    1.0
}

impl AtmosphereConfig {
    fn with_kind(name: impl Into<String>, kind: AtmosphereKindConfig, parameters: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            kind,
            parameters,
            filling_factor: default_filling_factor(),
            wavelength: None,
            ranges: BTreeMap::new(),
            free: BTreeMap::new(),
            steps: BTreeMap::new(),
        }
    }

    pub fn chromosphere(name: impl Into<String>, line: impl Into<String>, height: f64, parameters: Vec<f64>) -> Self {
        Self::with_kind(
            name,
            AtmosphereKindConfig::Chromosphere {
                line: line.into(),
                height,
            },
            parameters,
        )
    }

    pub fn photosphere(name: impl Into<String>, lines: Vec<u32>, parameters: Vec<f64>) -> Self {
        Self::with_kind(
            name,
            AtmosphereKindConfig::Photosphere {
                lines,
                reference_model: None,
            },
            parameters,
        )
    }

    pub fn parametric(name: impl Into<String>, shape: ProfileShape, parameters: Vec<f64>) -> Self {
        Self::with_kind(name, AtmosphereKindConfig::Parametric { shape }, parameters)
    }

    pub fn filling_factor(mut self, filling_factor: f64) -> Self {
        self.filling_factor = filling_factor;
        self
    }

    pub fn window(mut self, start: f64, end: f64) -> Self {
        self.wavelength = Some([start, end]);
        self
    }

    pub fn range(mut self, parameter: impl Into<String>, lower: f64, upper: f64) -> Self {
        self.ranges.insert(parameter.into(), [lower, upper]);
        self
    }

    /// Frees `parameter` in the cycles flagged in `mask`.
    pub fn free(mut self, parameter: impl Into<String>, mask: &[bool]) -> Self {
        self.free
            .insert(parameter.into(), mask.iter().map(|&f| u8::from(f)).collect());
        self
    }

    pub fn step(mut self, parameter: impl Into<String>, step: f64) -> Self {
        self.steps.insert(parameter.into(), step);
        self
    }
}

/// One inversion cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Relative chi-square improvement that ends the cycle
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Multipliers of the per-wavelength weights for I, Q, U, V
    #[serde(default = "default_stokes_weights")]
    pub stokes_weights: StokesVector,
}

fn default_max_iterations() -> usize {
    30
}

fn default_tolerance() -> f64 {
    1e-4
}

fn default_stokes_weights() -> StokesVector {
    [1.0; 4]
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            stokes_weights: default_stokes_weights(),
        }
    }
}

/// `[inversion]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InversionConfig {
    #[serde(default = "default_cycles", rename = "cycle")]
    pub cycles: Vec<CycleConfig>,

    #[serde(default = "default_restarts")]
    pub restarts: usize,

    /// Perturbed retries after a physical evaluation failure
    #[serde(default = "default_retries")]
    pub retries: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Retry perturbation as a fraction of each parameter range
    #[serde(default = "default_perturbation")]
    pub perturbation: f64,

    #[serde(default)]
    pub optimizer: OptimizerSettings,
}

fn default_cycles() -> Vec<CycleConfig> {
    vec![CycleConfig::default()]
}

fn default_restarts() -> usize {
    1
}

fn default_retries() -> usize {
    3
}

fn default_seed() -> u64 {
    42
}

fn default_perturbation() -> f64 {
    0.1
}

impl Default for InversionConfig {
    fn default() -> Self {
        Self {
            cycles: default_cycles(),
            restarts: default_restarts(),
            retries: default_retries(),
            seed: default_seed(),
            perturbation: default_perturbation(),
            optimizer: OptimizerSettings::default(),
        }
    }
}

/// `[batch]` section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Worker threads in parallel mode, 0 = one per core
    #[serde(default)]
    pub workers: usize,

    /// Result archive path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    /// JSONL telemetry path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_path: Option<PathBuf>,
}

impl ModelConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ModelConfigBuilder {
        ModelConfigBuilder::default()
    }

    /// Loads a model file. Relative paths inside it are resolved against
    /// the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)
            .map_err(|e| HelioError::config(format!("{}: {}", path.display(), e)))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| HelioError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HelioError::internal(e.to_string()))
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut Option<PathBuf>| {
            if let Some(path) = p {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
        };
        for region in &mut self.regions {
            resolve(&mut region.wavelength_file);
            resolve(&mut region.weights_file);
            resolve(&mut region.observation_file);
        }
        resolve(&mut self.batch.output);
        resolve(&mut self.batch.telemetry_path);
    }

    pub fn n_cycles(&self) -> usize {
        self.inversion.cycles.len()
    }

    /// Validates everything that can be checked without building the model.
    ///
    /// Topology references, arities and ranges are checked by
    /// [`configure`](crate::model::configure).
    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(HelioError::config("at least one region is required"));
        }
        if self.atmospheres.is_empty() {
            return Err(HelioError::config("at least one atmosphere is required"));
        }

        let mut region_names: Vec<&str> = Vec::new();
        for region in &self.regions {
            if region.name.trim().is_empty() || region.name.contains('/') {
                return Err(HelioError::config(format!(
                    "invalid region name '{}'",
                    region.name
                )));
            }
            if region_names.contains(&region.name.as_str()) {
                return Err(HelioError::config(format!("duplicate region '{}'", region.name)));
            }
            region_names.push(&region.name);

            match (&region.wavelength, &region.wavelength_file) {
                (Some(axis), None) => {
                    if axis.points < 2 || !(axis.start < axis.end) {
                        return Err(HelioError::config(format!(
                            "region '{}': wavelength axis needs start < end and at least 2 points",
                            region.name
                        )));
                    }
                }
                (None, Some(_)) => {}
                _ => {
                    return Err(HelioError::config(format!(
                        "region '{}': give exactly one of wavelength or wavelength_file",
                        region.name
                    )))
                }
            }
        }

        let mut atmosphere_names: Vec<&str> = Vec::new();
        for atmosphere in &self.atmospheres {
            if atmosphere.name.contains('/') {
                return Err(HelioError::config(format!(
                    "invalid atmosphere name '{}'",
                    atmosphere.name
                )));
            }
            if atmosphere_names.contains(&atmosphere.name.as_str()) || region_names.contains(&atmosphere.name.as_str()) {
                return Err(HelioError::config(format!(
                    "name '{}' is used more than once",
                    atmosphere.name
                )));
            }
            atmosphere_names.push(&atmosphere.name);

            if let Some([start, end]) = atmosphere.wavelength {
                if !(start < end) {
                    return Err(HelioError::config(format!(
                        "atmosphere '{}': empty wavelength window",
                        atmosphere.name
                    )));
                }
            }
            for (parameter, mask) in &atmosphere.free {
                if mask.iter().any(|&f| f > 1) {
                    return Err(HelioError::config(format!(
                        "atmosphere '{}': free flags of '{}' must be 0 or 1",
                        atmosphere.name, parameter
                    )));
                }
                if mask.len() != 1 && mask.len() != self.n_cycles() {
                    return Err(HelioError::config(format!(
                        "atmosphere '{}': free flags of '{}' have {} entries for {} cycles",
                        atmosphere.name,
                        parameter,
                        mask.len(),
                        self.n_cycles()
                    )));
                }
            }
        }

        let inversion = &self.inversion;
        if inversion.cycles.is_empty() {
            return Err(HelioError::config("at least one inversion cycle is required"));
        }
        for (i, cycle) in inversion.cycles.iter().enumerate() {
            if cycle.max_iterations == 0 {
                return Err(HelioError::config(format!("cycle {} has max_iterations = 0", i)));
            }
            if !(cycle.tolerance >= 0.0) {
                return Err(HelioError::config(format!("cycle {} has negative tolerance", i)));
            }
            if cycle.stokes_weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
                return Err(HelioError::config(format!(
                    "cycle {} has negative or non-finite Stokes weights",
                    i
                )));
            }
        }
        if inversion.restarts == 0 {
            return Err(HelioError::config("restarts must be at least 1"));
        }
        if !(inversion.perturbation > 0.0 && inversion.perturbation <= 1.0) {
            return Err(HelioError::config(format!(
                "perturbation must lie in (0, 1], got {}",
                inversion.perturbation
            )));
        }
        inversion.optimizer.validate()?;
        Ok(())
    }
}

/// Builder for ModelConfig.
#[derive(Debug, Default)]
pub struct ModelConfigBuilder {
    regions: Vec<RegionConfig>,
    atmospheres: Vec<AtmosphereConfig>,
    cycles: Vec<CycleConfig>,
    inversion: InversionConfig,
    batch: BatchConfig,
}

impl ModelConfigBuilder {
    pub fn region(mut self, region: RegionConfig) -> Self {
        self.regions.push(region);
        self
    }

    pub fn atmosphere(mut self, atmosphere: AtmosphereConfig) -> Self {
        self.atmospheres.push(atmosphere);
        self
    }

    /// Appends a cycle. Without any, one default cycle is used.
    pub fn cycle(mut self, cycle: CycleConfig) -> Self {
        self.cycles.push(cycle);
        self
    }

    pub fn restarts(mut self, restarts: usize) -> Self {
        self.inversion.restarts = restarts;
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.inversion.retries = retries;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.inversion.seed = seed;
        self
    }

    pub fn optimizer(mut self, settings: OptimizerSettings) -> Self {
        self.inversion.optimizer = settings;
        self
    }

    pub fn batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn build(mut self) -> Result<ModelConfig> {
        if !self.cycles.is_empty() {
            self.inversion.cycles = self.cycles;
        }
        let config = ModelConfig {
            regions: self.regions,
            atmospheres: self.atmospheres,
            inversion: self.inversion,
            batch: self.batch,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"
        [[regions]]
        name = "spec1"
        wavelength = { start = 10826.0, end = 10833.0, points = 150 }
        topology = "ph1->ch1->te1"
        weights_file = "10830_example.weights"

        [[atmospheres]]
        name = "ph1"
        kind = "photosphere"
        lines = [300]
        reference_model = "model_photosphere.1d"
        parameters = [500.0, 45.0, 0.0, 0.0, 3.0, 5.0, 0.1, 0.2, 0.8]

        [[atmospheres]]
        name = "ch1"
        kind = "chromosphere"
        line = "10830"
        parameters = [100, 100, 100, 0.5, 10, 8, 1, 0]
        free = { tau = [1, 1], v = [0, 1] }
        ranges = { tau = [0.05, 3.0] }

        [[atmospheres]]
        name = "te1"
        kind = "parametric"
        shape = "gaussian"
        wavelength = [10830.5, 10833.0]
        parameters = [10832.0, 0.1, 0.3, 0.0]

        [inversion]
        restarts = 2

        [[inversion.cycle]]
        max_iterations = 10

        [[inversion.cycle]]
        stokes_weights = [1.0, 0.0, 0.0, 1.0]

        [batch]
        mode = "parallel"
        workers = 4
    "#;

    #[test]
    fn test_parse_model_file() {
        let config = ModelConfig::from_toml(MODEL).unwrap();
        assert_eq!(config.regions[0].los, [0.0, 0.0, 90.0]);
        assert_eq!(config.atmospheres.len(), 3);
        assert!(matches!(
            &config.atmospheres[0].kind,
            AtmosphereKindConfig::Photosphere { lines, .. } if lines == &[300]
        ));
        assert!(matches!(
            config.atmospheres[2].kind,
            AtmosphereKindConfig::Parametric { shape: ProfileShape::Gaussian }
        ));
        assert_eq!(config.atmospheres[1].parameters[4], 10.0);
        assert_eq!(config.atmospheres[1].free["v"], vec![0, 1]);
        assert_eq!(config.n_cycles(), 2);
        assert_eq!(config.inversion.cycles[0].max_iterations, 10);
        assert_eq!(config.inversion.cycles[1].max_iterations, 30);
        assert_eq!(config.inversion.retries, 3);
        assert_eq!(config.batch.mode, ExecutionMode::Parallel);
    }

    #[test]
    fn test_paths_resolve_against_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.toml");
        std::fs::write(&path, MODEL).unwrap();
        let config = ModelConfig::from_file(&path).unwrap();
        assert_eq!(
            config.regions[0].weights_file.as_deref(),
            Some(dir.path().join("10830_example.weights").as_path())
        );
    }

    #[test]
    fn test_config_validation() {
        let bad_mask = MODEL.replace("v = [0, 1]", "v = [0, 1, 1]");
        assert!(ModelConfig::from_toml(&bad_mask).is_err());

        let bad_kind = MODEL.replace("kind = \"parametric\"", "kind = \"corona\"");
        assert!(ModelConfig::from_toml(&bad_kind).is_err());

        let no_axis = MODEL.replace("wavelength = { start = 10826.0, end = 10833.0, points = 150 }", "");
        assert!(ModelConfig::from_toml(&no_axis).is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = ModelConfig::builder()
            .region(RegionConfig::new("spec1", 10826.0, 10833.0, 150, "ch1"))
            .atmosphere(
                AtmosphereConfig::chromosphere("ch1", "10830", 3.0, vec![0.0; 8]).free("tau", &[true]),
            )
            .restarts(3)
            .build()
            .unwrap();
        assert_eq!(config.inversion.restarts, 3);
        assert_eq!(config.n_cycles(), 1);
        assert_eq!(config.atmospheres[0].free["tau"], vec![1]);

        let err = ModelConfig::builder()
            .region(RegionConfig::new("spec1", 10826.0, 10833.0, 150, "ch1"))
            .build()
            .unwrap_err();
        assert!(err.is_configuration());

        let round_trip = ModelConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(round_trip, config);
    }
}
