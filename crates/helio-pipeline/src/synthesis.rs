//! Forward synthesis.

use helio_core::{Result, SpectralRegion};
use helio_physics::AtmosphereComponent;
use ndarray::Array2;

use crate::params::ParameterStore;
use crate::topology::EvaluationPlan;

/// Evaluates evaluation plans over spectral regions.
///
/// Holds no state besides a borrow of the components, so identical inputs
/// give identical spectra.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisEngine<'a> {
    components: &'a [AtmosphereComponent],
}

impl<'a> SynthesisEngine<'a> {
    pub fn new(components: &'a [AtmosphereComponent]) -> Self {
        Self { components }
    }

    /// Emergent Stokes spectrum `[n_wvl, 4]` of `region` through `plan`.
    ///
    /// Light enters the first stage with the region's boundary spectrum.
    pub fn synthesize(
        &self,
        plan: &EvaluationPlan,
        region: &SpectralRegion,
        store: &ParameterStore,
    ) -> Result<Array2<f64>> {
        let mut light = region.boundary().clone();
        for stage in plan.stages() {
            light = match stage.members() {
                [id] => {
                    let component = &self.components[*id];
                    let out = component.evaluate_with(store.component(*id), region, light.view())?;
                    let f = component.filling_factor();
                    if f < 1.0 {
                        out * f + &light * (1.0 - f)
                    } else {
                        out
                    }
                }
                members => {
                    let mut merged = Array2::zeros(light.raw_dim());
                    for &id in members {
                        let component = &self.components[id];
                        let out = component.evaluate_with(store.component(id), region, light.view())?;
                        merged.scaled_add(component.filling_factor(), &out);
                    }
                    merged
                }
            };
        }
        Ok(light)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSchema;
    use approx::assert_relative_eq;
    use helio_core::LineOfSight;
    use helio_physics::{AtmosphereModel, ProfileShape};

    fn line(name: &str, depth: f64, ff: f64) -> AtmosphereComponent {
        AtmosphereComponent::new(
            name,
            AtmosphereModel::Parametric { shape: ProfileShape::Gaussian },
            vec![10830.0, 0.3, depth, 0.0],
            ff,
        )
        .unwrap()
    }

    fn region() -> SpectralRegion {
        // 10830.0 is sample 20
        SpectralRegion::linspace("spec1", 10828.0, 10832.0, 41, LineOfSight::default(), [1.0, 0.0, 0.0, 0.0])
            .unwrap()
    }

    fn run(components: &[AtmosphereComponent], expression: &str) -> Array2<f64> {
        let plan = EvaluationPlan::parse(expression, components).unwrap();
        let store = ParameterSchema::new(components, 1).store(components);
        SynthesisEngine::new(components).synthesize(&plan, &region(), &store).unwrap()
    }

    #[test]
    fn test_serial_stages_compose() {
        let comps = vec![line("a", 0.5, 1.0), line("b", 0.2, 1.0)];
        let out = run(&comps, "a->b");
        assert_relative_eq!(out[[20, 0]], 0.5 * 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_parallel_stage_weights_by_filling_factor() {
        let comps = vec![line("a", 0.5, 0.25), line("b", 0.1, 0.75)];
        let out = run(&comps, "a+b");
        assert_relative_eq!(out[[20, 0]], 0.25 * 0.5 + 0.75 * 0.9, epsilon = 1e-12);
    }

    #[test]
    fn test_partial_component_lets_light_through() {
        let comps = vec![line("a", 0.5, 0.4)];
        let out = run(&comps, "a");
        assert_relative_eq!(out[[20, 0]], 0.4 * 0.5 + 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let comps = vec![line("a", 0.5, 1.0), line("b", 0.2, 0.3), line("c", 0.3, 0.7)];
        assert_eq!(run(&comps, "a->b+c"), run(&comps, "a->b+c"));
    }
}
