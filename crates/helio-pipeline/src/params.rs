//! Parameter bookkeeping.
//!
//! [`ParameterSchema`] is the read-only half: where each component's values
//! live in the flat vector, their bounds, finite-difference steps and the
//! per-cycle free masks. It is shared by every worker.
//!
//! [`ParameterStore`] is the mutable half: one flat value vector. Each
//! worker owns its own copy for the pixel it is fitting.

use std::sync::Arc;

use helio_core::{HelioError, Result};
use helio_physics::{AtmosphereComponent, AtmosphereKind};

use crate::topology::ComponentId;

/// Position of one component's values in the flat parameter vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentLayout {
    pub name: String,
    pub kind: AtmosphereKind,
    pub offset: usize,
    pub arity: usize,
}

impl ComponentLayout {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.arity
    }
}

fn layout_of(components: &[AtmosphereComponent]) -> Arc<[ComponentLayout]> {
    let mut offset = 0;
    components
        .iter()
        .map(|c| {
            let layout = ComponentLayout {
                name: c.name().to_string(),
                kind: c.kind(),
                offset,
                arity: c.arity(),
            };
            offset += c.arity();
            layout
        })
        .collect()
}

/// Bounds, steps and free masks of the flat parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSchema {
    layout: Arc<[ComponentLayout]>,
    bounds: Vec<(f64, f64)>,
    steps: Vec<f64>,
    /// `free[cycle][slot]`
    free: Vec<Vec<bool>>,
}

impl ParameterSchema {
    /// Schema with each kind's default ranges and steps and every
    /// parameter fixed in every cycle.
    pub fn new(components: &[AtmosphereComponent], n_cycles: usize) -> Self {
        let layout = layout_of(components);
        let mut bounds = Vec::new();
        let mut steps = Vec::new();
        for c in components {
            bounds.extend(c.kind().default_ranges(c.parameters()));
            steps.extend_from_slice(c.kind().default_steps());
        }
        let len = bounds.len();
        Self {
            layout,
            bounds,
            steps,
            free: vec![vec![false; len]; n_cycles.max(1)],
        }
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn n_cycles(&self) -> usize {
        self.free.len()
    }

    pub fn layout(&self) -> &[ComponentLayout] {
        &self.layout
    }

    /// Flat index of `parameter` in component `component`.
    pub fn slot(&self, component: &str, parameter: &str) -> Result<usize> {
        let layout = self
            .layout
            .iter()
            .find(|l| l.name == component)
            .ok_or_else(|| HelioError::config(format!("unknown atmosphere '{}'", component)))?;
        let index = layout.kind.parameter_index(parameter).ok_or_else(|| {
            HelioError::config(format!(
                "{} '{}' has no parameter '{}' (known: {})",
                layout.kind,
                component,
                parameter,
                layout.kind.parameter_names().join(", ")
            ))
        })?;
        Ok(layout.offset + index)
    }

    /// Human-readable `component.parameter` label of a flat index.
    pub fn label(&self, slot: usize) -> String {
        self.layout
            .iter()
            .find(|l| l.range().contains(&slot))
            .map(|l| format!("{}.{}", l.name, l.kind.parameter_names()[slot - l.offset]))
            .unwrap_or_else(|| format!("#{}", slot))
    }

    pub fn bounds(&self, slot: usize) -> (f64, f64) {
        self.bounds[slot]
    }

    pub fn step(&self, slot: usize) -> f64 {
        self.steps[slot]
    }

    pub fn set_bounds(&mut self, slot: usize, lower: f64, upper: f64) -> Result<()> {
        if !(lower.is_finite() && upper.is_finite() && lower < upper) {
            return Err(HelioError::config(format!(
                "range of {} must satisfy lower < upper, got [{}, {}]",
                self.label(slot),
                lower,
                upper
            )));
        }
        self.bounds[slot] = (lower, upper);
        Ok(())
    }

    pub fn set_step(&mut self, slot: usize, step: f64) -> Result<()> {
        if !(step.is_finite() && step > 0.0) {
            return Err(HelioError::config(format!(
                "step of {} must be positive, got {}",
                self.label(slot),
                step
            )));
        }
        self.steps[slot] = step;
        Ok(())
    }

    /// Sets the per-cycle free flags of one parameter. A single flag applies
    /// to every cycle.
    pub fn set_free(&mut self, slot: usize, mask: &[bool]) -> Result<()> {
        let n_cycles = self.n_cycles();
        match mask.len() {
            1 => self.free.iter_mut().for_each(|cycle| cycle[slot] = mask[0]),
            n if n == n_cycles => {
                for (cycle, &flag) in self.free.iter_mut().zip(mask) {
                    cycle[slot] = flag;
                }
            }
            n => {
                return Err(HelioError::config(format!(
                    "free mask of {} has {} entries for {} cycles",
                    self.label(slot),
                    n,
                    n_cycles
                )))
            }
        }
        Ok(())
    }

    /// Slots optimized in `cycle`, ascending.
    pub fn free_slots(&self, cycle: usize) -> Vec<usize> {
        (0..self.len()).filter(|&s| self.free[cycle][s]).collect()
    }

    /// Slots free in at least one cycle.
    pub fn free_in_any_cycle(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|&s| self.free.iter().any(|cycle| cycle[s]))
            .collect()
    }

    pub fn clip(&self, slot: usize, value: f64) -> f64 {
        let (lower, upper) = self.bounds[slot];
        value.clamp(lower, upper)
    }

    /// Fails unless every value lies within its bounds.
    pub fn check_within_bounds(&self, store: &ParameterStore) -> Result<()> {
        for (slot, &value) in store.values().iter().enumerate() {
            let (lower, upper) = self.bounds[slot];
            if !(value >= lower && value <= upper) {
                return Err(HelioError::config(format!(
                    "initial value {} of {} lies outside its range [{}, {}]",
                    value,
                    self.label(slot),
                    lower,
                    upper
                )));
            }
        }
        Ok(())
    }

    /// Store initialized with the components' current parameters.
    pub fn store(&self, components: &[AtmosphereComponent]) -> ParameterStore {
        ParameterStore {
            layout: Arc::clone(&self.layout),
            values: components
                .iter()
                .flat_map(|c| c.parameters().iter().copied())
                .collect(),
        }
    }
}

/// Live parameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStore {
    layout: Arc<[ComponentLayout]>,
    values: Vec<f64>,
}

impl ParameterStore {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, slot: usize) -> f64 {
        self.values[slot]
    }

    pub fn set_slot(&mut self, slot: usize, value: f64) {
        self.values[slot] = value;
    }

    /// Values of one component.
    pub fn component(&self, id: ComponentId) -> &[f64] {
        &self.values[self.layout[id].range()]
    }

    /// Replaces the values of the named component.
    pub fn set(&mut self, component: &str, values: &[f64]) -> Result<()> {
        let layout = self
            .layout
            .iter()
            .find(|l| l.name == component)
            .ok_or_else(|| HelioError::config(format!("unknown atmosphere '{}'", component)))?;
        if values.len() != layout.arity {
            return Err(HelioError::shape(
                component,
                layout.kind.as_str(),
                layout.arity,
                values.len(),
            ));
        }
        self.values[layout.range()].copy_from_slice(values);
        Ok(())
    }

    /// Immutable per-component copy of the current values.
    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot(
            self.layout
                .iter()
                .map(|l| self.values[l.range()].to_vec())
                .collect(),
        )
    }
}

/// Parameter values at the time a result was recorded, indexed by
/// [`ComponentId`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterSnapshot(Vec<Vec<f64>>);

impl ParameterSnapshot {
    pub fn component(&self, id: ComponentId) -> &[f64] {
        &self.0[id]
    }

    pub fn components(&self) -> &[Vec<f64>] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helio_physics::{multiplet, AtmosphereModel, ProfileShape};

    fn components() -> Vec<AtmosphereComponent> {
        vec![
            AtmosphereComponent::new(
                "ch1",
                AtmosphereModel::Chromosphere {
                    multiplet: multiplet("10830").unwrap(),
                    height: 3.0,
                },
                vec![100.0, 100.0, 100.0, 0.5, 10.0, 8.0, 1.0, 0.0],
                1.0,
            )
            .unwrap(),
            AtmosphereComponent::new(
                "te1",
                AtmosphereModel::Parametric { shape: ProfileShape::Voigt },
                vec![10832.0, 0.1, 0.2, 0.1],
                1.0,
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_layout_and_defaults() {
        let schema = ParameterSchema::new(&components(), 2);
        assert_eq!(schema.len(), 12);
        assert_eq!(schema.slot("ch1", "tau").unwrap(), 3);
        assert_eq!(schema.slot("te1", "lambda0").unwrap(), 8);
        assert_eq!(schema.bounds(8), (10831.0, 10833.0));
        assert_eq!(schema.label(11), "te1.a");
        assert!(schema.free_in_any_cycle().is_empty());
        assert!(schema.slot("ch1", "B").is_err());
    }

    #[test]
    fn test_free_masks_per_cycle() {
        let mut schema = ParameterSchema::new(&components(), 2);
        schema.set_free(3, &[true]).unwrap();
        schema.set_free(4, &[false, true]).unwrap();
        assert_eq!(schema.free_slots(0), vec![3]);
        assert_eq!(schema.free_slots(1), vec![3, 4]);
        assert_eq!(schema.free_in_any_cycle(), vec![3, 4]);
        assert!(schema.set_free(5, &[true, true, true]).is_err());
    }

    #[test]
    fn test_store_shape_errors_and_snapshot() {
        let comps = components();
        let schema = ParameterSchema::new(&comps, 1);
        let mut store = schema.store(&comps);
        schema.check_within_bounds(&store).unwrap();

        let err = store.set("ch1", &[1.0; 4]).unwrap_err();
        assert!(matches!(err, HelioError::ParameterShape { expected: 8, got: 4, .. }));

        let before = store.snapshot();
        store.set("te1", &[10832.5, 0.2, 0.3, 0.0]).unwrap();
        assert_eq!(before.component(1), &[10832.0, 0.1, 0.2, 0.1]);
        assert_eq!(store.component(1), &[10832.5, 0.2, 0.3, 0.0]);

        store.set_slot(3, 50.0);
        assert!(schema.check_within_bounds(&store).is_err());
    }
}
