//! Topology expressions.
//!
//! A topology says how the atmospheres of a model combine along the line of
//! sight of one spectral region:
//!
//! ```text
//! expr  := stage ("->" stage)*
//! stage := name ("+" name)*
//! ```
//!
//! `->` stacks stages in the order light crosses them. `+` puts components
//! side by side inside one resolution element: every member sees the same
//! incoming light and the outputs are summed with the members' filling
//! factors, which must add up to one. A lone component with filling factor
//! `f < 1` covers part of the element and lets `1 - f` of the incoming
//! light through untouched.
//!
//! Expressions are parsed once into [`EvaluationPlan`]s that reference
//! components by index.

use helio_core::{HelioError, Result};
use helio_physics::AtmosphereComponent;

/// Index of a component in the model's component list.
pub type ComponentId = usize;

/// Tolerance on the filling-factor sum of a parallel stage.
pub const FILLING_FACTOR_TOLERANCE: f64 = 1e-6;

/// One step along the line of sight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    members: Vec<ComponentId>,
}

impl Stage {
    pub fn members(&self) -> &[ComponentId] {
        &self.members
    }

    pub fn is_parallel(&self) -> bool {
        self.members.len() > 1
    }
}

/// Resolved topology of one spectral region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationPlan {
    expression: String,
    stages: Vec<Stage>,
}

impl EvaluationPlan {
    /// Parses `expression` against the model's components.
    pub fn parse(expression: &str, components: &[AtmosphereComponent]) -> Result<Self> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(HelioError::config("empty topology expression"));
        }

        let mut seen: Vec<ComponentId> = Vec::new();
        let mut stages = Vec::new();
        for stage_text in trimmed.split("->") {
            let mut members = Vec::new();
            for token in stage_text.split('+') {
                let name = token.trim();
                if name.is_empty() {
                    return Err(HelioError::config(format!(
                        "topology '{}': dangling operator or empty component name",
                        trimmed
                    )));
                }
                let id = components
                    .iter()
                    .position(|c| c.name() == name)
                    .ok_or_else(|| {
                        HelioError::config(format!(
                            "topology '{}' references unknown atmosphere '{}'",
                            trimmed, name
                        ))
                    })?;
                if seen.contains(&id) {
                    return Err(HelioError::config(format!(
                        "topology '{}' uses atmosphere '{}' more than once",
                        trimmed, name
                    )));
                }
                seen.push(id);
                members.push(id);
            }
            let stage = Stage { members };
            check_filling_factors(trimmed, &stage, components)?;
            stages.push(stage);
        }

        Ok(Self {
            expression: trimmed.to_string(),
            stages,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Stages in the order light crosses them.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Every component the plan touches.
    pub fn components(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.stages.iter().flat_map(|s| s.members.iter().copied())
    }
}

fn check_filling_factors(expression: &str, stage: &Stage, components: &[AtmosphereComponent]) -> Result<()> {
    if !stage.is_parallel() {
        return Ok(());
    }
    let total: f64 = stage
        .members
        .iter()
        .map(|&id| components[id].filling_factor())
        .sum();
    if (total - 1.0).abs() > FILLING_FACTOR_TOLERANCE {
        let names: Vec<&str> = stage.members.iter().map(|&id| components[id].name()).collect();
        return Err(HelioError::config(format!(
            "topology '{}': filling factors of {} sum to {}, expected 1",
            expression,
            names.join(" + "),
            total
        )));
    }
    Ok(())
}

/// Evaluation plans of every region, in region order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    regions: Vec<String>,
    plans: Vec<EvaluationPlan>,
}

impl Topology {
    /// Builds the topology from `(region name, expression)` pairs.
    pub fn new<'a>(
        expressions: impl IntoIterator<Item = (&'a str, &'a str)>,
        components: &[AtmosphereComponent],
    ) -> Result<Self> {
        let mut regions = Vec::new();
        let mut plans = Vec::new();
        for (region, expression) in expressions {
            let plan = EvaluationPlan::parse(expression, components)
                .map_err(|e| match e {
                    HelioError::Configuration(msg) => {
                        HelioError::config(format!("region '{}': {}", region, msg))
                    }
                    other => other,
                })?;
            regions.push(region.to_string());
            plans.push(plan);
        }
        Ok(Self { regions, plans })
    }

    /// Plan of the named region.
    pub fn resolve(&self, region: &str) -> Result<&EvaluationPlan> {
        self.regions
            .iter()
            .position(|r| r == region)
            .map(|i| &self.plans[i])
            .ok_or_else(|| HelioError::config(format!("no topology for region '{}'", region)))
    }

    /// Plan of the region at `index`.
    pub fn plan(&self, index: usize) -> &EvaluationPlan {
        &self.plans[index]
    }

    pub fn plans(&self) -> &[EvaluationPlan] {
        &self.plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helio_physics::{AtmosphereModel, ProfileShape};

    fn parametric(name: &str, ff: f64) -> AtmosphereComponent {
        AtmosphereComponent::new(
            name,
            AtmosphereModel::Parametric { shape: ProfileShape::Gaussian },
            vec![10830.0, 0.2, 0.3, 0.0],
            ff,
        )
        .unwrap()
    }

    fn components() -> Vec<AtmosphereComponent> {
        vec![
            parametric("ph1", 1.0),
            parametric("ch1", 0.4),
            parametric("ch2", 0.6),
            parametric("te1", 1.0),
        ]
    }

    #[test]
    fn test_serial_and_parallel_stages() {
        let plan = EvaluationPlan::parse("ph1 -> ch1+ch2 -> te1", &components()).unwrap();
        assert_eq!(plan.stages().len(), 3);
        assert_eq!(plan.stages()[0].members(), &[0]);
        assert!(plan.stages()[1].is_parallel());
        assert_eq!(plan.stages()[1].members(), &[1, 2]);
        assert_eq!(plan.components().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_malformed_expressions() {
        let comps = components();
        for bad in ["", "ph1->", "->ph1", "ph1->->te1", "ch1+", "ph1->nope", "ph1->ph1"] {
            let err = EvaluationPlan::parse(bad, &comps).unwrap_err();
            assert!(err.is_configuration(), "'{}' gave {:?}", bad, err);
        }
    }

    #[test]
    fn test_filling_factor_decomposition() {
        let mut comps = components();
        comps[2] = parametric("ch2", 0.5);
        let err = EvaluationPlan::parse("ph1->ch1+ch2", &comps).unwrap_err();
        assert!(err.to_string().contains("sum to"));
        // a lone partial component is fine
        assert!(EvaluationPlan::parse("ph1->ch1", &comps).is_ok());
    }

    #[test]
    fn test_resolve_by_region() {
        let topology = Topology::new([("spec1", "ph1->te1"), ("spec2", "ch1+ch2")], &components()).unwrap();
        assert_eq!(topology.resolve("spec2").unwrap().expression(), "ch1+ch2");
        assert!(topology.resolve("spec3").is_err());

        let err = Topology::new([("spec1", "ph1->x")], &components()).unwrap_err();
        assert!(err.to_string().contains("region 'spec1'"));
    }
}
