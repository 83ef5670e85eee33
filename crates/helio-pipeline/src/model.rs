//! Configured forward model.
//!
//! [`configure`] turns a [`ModelConfig`] into an immutable [`Model`]:
//! components, regions, the parsed topology, the parameter schema and the
//! resolved cycle weights. Every configuration error surfaces here, before
//! anything is synthesized.

use helio_core::{
    HelioError, LineOfSight, Observation, ObservationPixel, Result, SpectralRegion, Spectrum, WavelengthWindow,
    N_STOKES,
};
use helio_physics::{multiplet, photospheric_line, AtmosphereComponent, AtmosphereModel};
use ndarray::{Array1, Array2};

use crate::config::{AtmosphereConfig, AtmosphereKindConfig, ModelConfig, RegionConfig};
use crate::inversion::{CyclePlan, InversionEngine, InversionSettings, PixelBatch};
use crate::params::{ParameterSchema, ParameterStore};
use crate::synthesis::SynthesisEngine;
use crate::topology::Topology;

/// Everything needed to synthesize and invert, shared read-only by workers.
#[derive(Debug, Clone)]
pub struct Model {
    regions: Vec<SpectralRegion>,
    components: Vec<AtmosphereComponent>,
    topology: Topology,
    schema: ParameterSchema,
    store: ParameterStore,
    cycles: Vec<CyclePlan>,
    settings: InversionSettings,
}

/// Builds a model from its configuration.
pub fn configure(config: &ModelConfig) -> Result<Model> {
    config.validate()?;

    let components = config
        .atmospheres
        .iter()
        .map(build_component)
        .collect::<Result<Vec<_>>>()?;

    let regions = config
        .regions
        .iter()
        .map(build_region)
        .collect::<Result<Vec<_>>>()?;

    let topology = Topology::new(
        config
            .regions
            .iter()
            .map(|r| (r.name.as_str(), r.topology.as_str())),
        &components,
    )?;

    let n_cycles = config.n_cycles();
    let mut schema = ParameterSchema::new(&components, n_cycles);
    for atmosphere in &config.atmospheres {
        for (parameter, &[lower, upper]) in &atmosphere.ranges {
            let slot = schema.slot(&atmosphere.name, parameter)?;
            schema.set_bounds(slot, lower, upper)?;
        }
        for (parameter, &step) in &atmosphere.steps {
            let slot = schema.slot(&atmosphere.name, parameter)?;
            schema.set_step(slot, step)?;
        }
        for (parameter, flags) in &atmosphere.free {
            let slot = schema.slot(&atmosphere.name, parameter)?;
            let mask: Vec<bool> = flags.iter().map(|&f| f == 1).collect();
            schema.set_free(slot, &mask)?;
        }
    }
    let store = schema.store(&components);
    schema.check_within_bounds(&store)?;

    let base_weights = config
        .regions
        .iter()
        .zip(&regions)
        .map(|(rc, region)| match &rc.weights_file {
            Some(path) => helio_io::read_weights(path, Some(region.n_wvl())),
            None => Ok(Array2::ones((region.n_wvl(), N_STOKES))),
        })
        .collect::<Result<Vec<_>>>()?;
    let cycles = config
        .inversion
        .cycles
        .iter()
        .map(|cycle| CyclePlan {
            max_iterations: cycle.max_iterations,
            tolerance: cycle.tolerance,
            weights: base_weights
                .iter()
                .map(|w| {
                    let mut w = w.clone();
                    for (mut column, factor) in w.columns_mut().into_iter().zip(cycle.stokes_weights) {
                        column *= factor;
                    }
                    w
                })
                .collect(),
        })
        .collect();

    let inversion = &config.inversion;
    let settings = InversionSettings {
        restarts: inversion.restarts,
        retries: inversion.retries,
        seed: inversion.seed,
        perturbation: inversion.perturbation,
        optimizer: inversion.optimizer,
    };

    log::info!(
        "Configured model: {} region(s), {} atmosphere(s), {} parameters ({} free), {} cycle(s), {} restart(s)",
        regions.len(),
        components.len(),
        schema.len(),
        schema.free_in_any_cycle().len(),
        n_cycles,
        settings.restarts
    );
    for (region, plan) in regions.iter().zip(topology.plans()) {
        log::debug!(
            "  region '{}': {} points in [{}, {}], topology {}",
            region.name(),
            region.n_wvl(),
            region.wavelength()[0],
            region.wavelength()[region.n_wvl() - 1],
            plan.expression()
        );
    }

    Ok(Model {
        regions,
        components,
        topology,
        schema,
        store,
        cycles,
        settings,
    })
}

fn build_component(config: &AtmosphereConfig) -> Result<AtmosphereComponent> {
    let model = match &config.kind {
        AtmosphereKindConfig::Photosphere { lines, reference_model } => AtmosphereModel::Photosphere {
            lines: lines
                .iter()
                .map(|&id| photospheric_line(id))
                .collect::<Result<Vec<_>>>()?,
            reference_model: reference_model.clone(),
        },
        AtmosphereKindConfig::Chromosphere { line, height } => AtmosphereModel::Chromosphere {
            multiplet: multiplet(line)?,
            height: *height,
        },
        AtmosphereKindConfig::Parametric { shape } => AtmosphereModel::Parametric { shape: *shape },
    };
    let component = AtmosphereComponent::new(
        config.name.clone(),
        model,
        config.parameters.clone(),
        config.filling_factor,
    )?;
    match config.wavelength {
        Some([start, end]) => Ok(component.with_window(WavelengthWindow::new(start, end)?)),
        None => Ok(component),
    }
}

fn build_region(config: &RegionConfig) -> Result<SpectralRegion> {
    let wavelength = match (&config.wavelength, &config.wavelength_file) {
        (Some(axis), _) => Array1::linspace(axis.start, axis.end, axis.points),
        (None, Some(path)) => helio_io::read_wavelength(path)?,
        (None, None) => {
            return Err(HelioError::config(format!(
                "region '{}' has no wavelength axis",
                config.name
            )))
        }
    };
    let [theta, phi, gamma] = config.los;
    SpectralRegion::new(
        config.name.clone(),
        wavelength,
        LineOfSight::new(theta, phi, gamma),
        config.boundary,
    )
}

impl Model {
    pub fn regions(&self) -> &[SpectralRegion] {
        &self.regions
    }

    pub fn region(&self, name: &str) -> Result<&SpectralRegion> {
        self.regions
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| HelioError::config(format!("unknown region '{}'", name)))
    }

    pub fn components(&self) -> &[AtmosphereComponent] {
        &self.components
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    /// Parameter values every restart 0 starts from.
    pub fn initial_store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn cycles(&self) -> &[CyclePlan] {
        &self.cycles
    }

    pub fn settings(&self) -> &InversionSettings {
        &self.settings
    }

    /// Current values of the named component.
    pub fn parameters(&self, component: &str) -> Result<&[f64]> {
        self.components
            .iter()
            .position(|c| c.name() == component)
            .map(|id| self.store.component(id))
            .ok_or_else(|| HelioError::config(format!("unknown atmosphere '{}'", component)))
    }

    /// Replaces the starting values of one component.
    ///
    /// Values are not checked against the search ranges: forward synthesis
    /// accepts any physical values and the inversion clips its start.
    pub fn set_parameters(&mut self, component: &str, values: &[f64]) -> Result<()> {
        self.store.set(component, values)?;
        if let Some(c) = self.components.iter_mut().find(|c| c.name() == component) {
            c.set_parameters(values)?;
        }
        Ok(())
    }

    /// Forward synthesis of every region at the current parameters.
    pub fn synthesize(&self) -> Result<Vec<Spectrum>> {
        let engine = SynthesisEngine::new(&self.components);
        self.regions
            .iter()
            .zip(self.topology.plans())
            .map(|(region, plan)| {
                let stokes = engine.synthesize(plan, region, &self.store)?;
                Spectrum::new(region.name(), region.wavelength().clone(), stokes)
            })
            .collect()
    }

    /// Forward synthesis of one region.
    pub fn synthesize_region(&self, name: &str) -> Result<Spectrum> {
        let region = self.region(name)?;
        let plan = self.topology.resolve(name)?;
        let stokes = SynthesisEngine::new(&self.components).synthesize(plan, region, &self.store)?;
        Spectrum::new(region.name(), region.wavelength().clone(), stokes)
    }

    /// Wraps spectra as an observation with uniform noise `sigma`, observed
    /// with each region's own geometry.
    pub fn observation(&self, spectra: &[Spectrum], sigma: f64) -> Result<Observation> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(HelioError::config(format!("observation sigma must be > 0, got {}", sigma)));
        }
        let mut observation = Observation::new();
        for spectrum in spectra {
            let region = self.region(&spectrum.region)?;
            observation.insert(
                region.name(),
                ObservationPixel::new(
                    spectrum.stokes.clone(),
                    Array2::from_elem(spectrum.stokes.raw_dim(), sigma),
                    *region.los(),
                    region.boundary().clone(),
                ),
            );
        }
        Ok(observation)
    }

    /// Checks an observation against the region grids.
    pub fn validate_observation(&self, observation: &Observation) -> Result<()> {
        InversionEngine::new(self).validate(observation)
    }

    /// Single-pixel inversion.
    pub fn invert(&self, observation: &Observation) -> Result<PixelBatch> {
        self.invert_pixel(0, observation)
    }

    /// Inverts one pixel of a larger batch; `pixel_index` seeds its restarts.
    pub fn invert_pixel(&self, pixel_index: usize, observation: &Observation) -> Result<PixelBatch> {
        InversionEngine::new(self).invert_pixel(pixel_index, observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AtmosphereConfig, CycleConfig, RegionConfig};
    use approx::assert_relative_eq;
    use helio_physics::ProfileShape;

    fn config() -> ModelConfig {
        ModelConfig::builder()
            .region(RegionConfig::new("spec1", 10826.0, 10833.0, 150, "ch1->te1"))
            .atmosphere(
                AtmosphereConfig::chromosphere(
                    "ch1",
                    "10830",
                    3.0,
                    vec![100.0, 100.0, 100.0, 0.5, 10.0, 8.0, 1.0, 0.0],
                )
                .free("tau", &[true, true])
                .free("v", &[false, true])
                .range("tau", 0.1, 2.0),
            )
            .atmosphere(
                AtmosphereConfig::parametric("te1", ProfileShape::Gaussian, vec![10832.0, 0.1, 0.3, 0.0])
                    .window(10831.0, 10833.0),
            )
            .cycle(CycleConfig::default())
            .cycle(CycleConfig {
                stokes_weights: [1.0, 0.0, 0.0, 2.0],
                ..CycleConfig::default()
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_configure_applies_overrides() {
        let model = configure(&config()).unwrap();
        let schema = model.schema();
        let tau = schema.slot("ch1", "tau").unwrap();
        let v = schema.slot("ch1", "v").unwrap();
        assert_eq!(schema.bounds(tau), (0.1, 2.0));
        assert_eq!(schema.free_slots(0), vec![tau]);
        assert_eq!(schema.free_slots(1), vec![tau, v]);
        assert_eq!(model.cycles()[1].weights[0][[0, 1]], 0.0);
        assert_eq!(model.cycles()[1].weights[0][[0, 3]], 2.0);
        assert_eq!(model.parameters("te1").unwrap()[0], 10832.0);
    }

    #[test]
    fn test_configuration_errors() {
        let mut bad = config();
        bad.regions[0].topology = "ch1->ch9".into();
        assert!(configure(&bad).unwrap_err().is_configuration());

        let mut bad = config();
        bad.atmospheres[0].parameters.pop();
        assert!(matches!(
            configure(&bad).unwrap_err(),
            HelioError::ParameterShape { expected: 8, got: 7, .. }
        ));

        let mut bad = config();
        bad.atmospheres[0].parameters[3] = 5.0;
        assert!(configure(&bad).unwrap_err().is_configuration());

        let mut bad = config();
        bad.atmospheres[0].ranges.insert("gamma".into(), [0.0, 1.0]);
        assert!(configure(&bad).is_err());
    }

    #[test]
    fn test_synthesize_and_set_parameters() {
        let mut model = configure(&config()).unwrap();
        let before = model.synthesize().unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].stokes.dim(), (150, 4));
        assert_eq!(model.synthesize_region("spec1").unwrap(), before[0]);

        model
            .set_parameters("ch1", &[100.0, 100.0, 100.0, 1.5, 10.0, 8.0, 1.0, 0.0])
            .unwrap();
        assert_relative_eq!(model.parameters("ch1").unwrap()[3], 1.5);
        assert_ne!(model.synthesize().unwrap(), before);

        assert!(matches!(
            model.set_parameters("ch1", &[1.0; 3]),
            Err(HelioError::ParameterShape { .. })
        ));
    }
}
