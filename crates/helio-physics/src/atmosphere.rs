//! Atmosphere components.
//!
//! An [`AtmosphereComponent`] is one named physical layer: a closed
//! [`AtmosphereModel`] variant, its parameter vector and a filling factor.
//! Every kind has a fixed arity and a fixed parameter order, listed by
//! [`AtmosphereKind::parameter_names`].

use std::fmt;

use helio_core::{HelioError, Result, SpectralRegion, WavelengthWindow};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::kernel::{
    milne_eddington, parametric, slab, KernelInput, MilneEddingtonParameters,
    ParametricParameters, ProfileShape, SlabParameters,
};
use crate::kernel::slab::dilution_factor;
use crate::lines::{Multiplet, PhotosphericLine};

/// The three families of layer the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtmosphereKind {
    Photosphere,
    Chromosphere,
    Parametric,
}

const PHOTOSPHERE_NAMES: &[&str] = &[
    "B", "inclination", "azimuth", "v", "deltav", "eta0", "a", "S0", "S1",
];
const CHROMOSPHERE_NAMES: &[&str] = &["Bx", "By", "Bz", "tau", "v", "deltav", "beta", "a"];
const PARAMETRIC_NAMES: &[&str] = &["lambda0", "sigma", "depth", "a"];

const PHOTOSPHERE_RANGES: &[(f64, f64)] = &[
    (0.0, 4000.0),
    (0.0, 180.0),
    (0.0, 180.0),
    (-10.0, 10.0),
    (0.5, 10.0),
    (0.1, 50.0),
    (0.0, 2.0),
    (0.0, 2.0),
    (0.0, 5.0),
];
const CHROMOSPHERE_RANGES: &[(f64, f64)] = &[
    (-1000.0, 1000.0),
    (-1000.0, 1000.0),
    (-1000.0, 1000.0),
    (0.01, 10.0),
    (-20.0, 20.0),
    (1.0, 20.0),
    (0.0, 10.0),
    (0.0, 2.0),
];

const PHOTOSPHERE_STEPS: &[f64] = &[1.0, 0.1, 0.1, 1e-3, 1e-3, 1e-3, 1e-4, 1e-4, 1e-4];
const CHROMOSPHERE_STEPS: &[f64] = &[1.0, 1.0, 1.0, 1e-3, 1e-2, 1e-2, 1e-3, 1e-3];
const PARAMETRIC_STEPS: &[f64] = &[1e-4, 1e-4, 1e-4, 1e-4];

impl AtmosphereKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AtmosphereKind::Photosphere => "photosphere",
            AtmosphereKind::Chromosphere => "chromosphere",
            AtmosphereKind::Parametric => "parametric",
        }
    }

    /// Length of the parameter vector.
    pub fn arity(self) -> usize {
        match self {
            AtmosphereKind::Photosphere => MilneEddingtonParameters::ARITY,
            AtmosphereKind::Chromosphere => SlabParameters::ARITY,
            AtmosphereKind::Parametric => ParametricParameters::ARITY,
        }
    }

    /// Parameter names in storage order.
    pub fn parameter_names(self) -> &'static [&'static str] {
        match self {
            AtmosphereKind::Photosphere => PHOTOSPHERE_NAMES,
            AtmosphereKind::Chromosphere => CHROMOSPHERE_NAMES,
            AtmosphereKind::Parametric => PARAMETRIC_NAMES,
        }
    }

    /// Storage slot of a named parameter.
    pub fn parameter_index(self, name: &str) -> Option<usize> {
        self.parameter_names().iter().position(|n| *n == name)
    }

    /// Default search ranges.
    ///
    /// The parametric line center is allowed to move 1 Å around its initial
    /// value, so `initial` must already have the kind's arity.
    pub fn default_ranges(self, initial: &[f64]) -> Vec<(f64, f64)> {
        match self {
            AtmosphereKind::Photosphere => PHOTOSPHERE_RANGES.to_vec(),
            AtmosphereKind::Chromosphere => CHROMOSPHERE_RANGES.to_vec(),
            AtmosphereKind::Parametric => {
                let center = initial.first().copied().unwrap_or(0.0);
                vec![(center - 1.0, center + 1.0), (0.01, 2.0), (0.0, 1.0), (0.0, 2.0)]
            }
        }
    }

    /// Default finite-difference steps.
    pub fn default_steps(self) -> &'static [f64] {
        match self {
            AtmosphereKind::Photosphere => PHOTOSPHERE_STEPS,
            AtmosphereKind::Chromosphere => CHROMOSPHERE_STEPS,
            AtmosphereKind::Parametric => PARAMETRIC_STEPS,
        }
    }
}

impl fmt::Display for AtmosphereKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific physics of a component.
#[derive(Debug, Clone, PartialEq)]
pub enum AtmosphereModel {
    /// Milne-Eddington photosphere over catalog lines. The reference model
    /// path is carried as metadata only.
    Photosphere {
        lines: Vec<PhotosphericLine>,
        reference_model: Option<String>,
    },
    /// Constant-property slab at `height` arcsec.
    Chromosphere { multiplet: Multiplet, height: f64 },
    /// Multiplicative line profile.
    Parametric { shape: ProfileShape },
}

impl AtmosphereModel {
    pub fn kind(&self) -> AtmosphereKind {
        match self {
            AtmosphereModel::Photosphere { .. } => AtmosphereKind::Photosphere,
            AtmosphereModel::Chromosphere { .. } => AtmosphereKind::Chromosphere,
            AtmosphereModel::Parametric { .. } => AtmosphereKind::Parametric,
        }
    }
}

/// A named layer with its current parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AtmosphereComponent {
    name: String,
    model: AtmosphereModel,
    parameters: Vec<f64>,
    filling_factor: f64,
    window: Option<WavelengthWindow>,
}

impl AtmosphereComponent {
    pub fn new(
        name: impl Into<String>,
        model: AtmosphereModel,
        parameters: Vec<f64>,
        filling_factor: f64,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(HelioError::config("atmosphere name must not be empty"));
        }
        if !(filling_factor > 0.0 && filling_factor <= 1.0) {
            return Err(HelioError::config(format!(
                "atmosphere '{}': filling factor must lie in (0, 1], got {}",
                name, filling_factor
            )));
        }
        if let AtmosphereModel::Photosphere { lines, .. } = &model {
            if lines.is_empty() {
                return Err(HelioError::config(format!(
                    "photosphere '{}' has no spectral lines",
                    name
                )));
            }
        }
        let component = Self {
            name,
            model,
            parameters: Vec::new(),
            filling_factor,
            window: None,
        };
        component.check_arity(&parameters)?;
        Ok(Self {
            parameters,
            ..component
        })
    }

    /// Restricts the component to `window`; light outside passes unchanged.
    pub fn with_window(mut self, window: WavelengthWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AtmosphereKind {
        self.model.kind()
    }

    pub fn model(&self) -> &AtmosphereModel {
        &self.model
    }

    pub fn arity(&self) -> usize {
        self.kind().arity()
    }

    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    pub fn filling_factor(&self) -> f64 {
        self.filling_factor
    }

    pub fn window(&self) -> Option<&WavelengthWindow> {
        self.window.as_ref()
    }

    /// Fails with `ParameterShape` unless `values` has this kind's arity.
    pub fn check_arity(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.arity() {
            return Err(HelioError::shape(
                &self.name,
                self.kind().as_str(),
                self.arity(),
                values.len(),
            ));
        }
        Ok(())
    }

    pub fn set_parameters(&mut self, values: &[f64]) -> Result<()> {
        self.check_arity(values)?;
        self.parameters.clear();
        self.parameters.extend_from_slice(values);
        Ok(())
    }

    /// Emergent light for the component's own parameters.
    pub fn evaluate<'a>(&self, region: &'a SpectralRegion, incoming: ArrayView2<'a, f64>) -> Result<Array2<f64>> {
        self.evaluate_with(&self.parameters, region, incoming)
    }

    /// Emergent light for externally held parameters.
    ///
    /// Kernel failures come back as `PhysicalEvaluation` tagged with the
    /// component name.
    pub fn evaluate_with<'a>(
        &self,
        params: &[f64],
        region: &'a SpectralRegion,
        incoming: ArrayView2<'a, f64>,
    ) -> Result<Array2<f64>> {
        self.check_arity(params)?;
        let input = KernelInput {
            wavelength: region.wavelength(),
            los: region.los(),
            incoming,
        };
        let emergent = match &self.model {
            AtmosphereModel::Photosphere { lines, .. } => {
                milne_eddington(&MilneEddingtonParameters::from_slice(params), lines, &input)
            }
            AtmosphereModel::Chromosphere { multiplet, height } => slab(
                &SlabParameters::from_slice(params),
                multiplet,
                dilution_factor(*height),
                &input,
            ),
            AtmosphereModel::Parametric { shape } => {
                parametric(&ParametricParameters::from_slice(params), *shape, &input)
            }
        };
        let mut emergent = emergent.map_err(|e| {
            log::trace!("'{}' rejected {:?}: {}", self.name, params, e.0);
            HelioError::physical(&self.name, e.0)
        })?;

        if let Some(window) = &self.window {
            for (i, &lambda) in region.wavelength().iter().enumerate() {
                if !window.contains(lambda) {
                    emergent.row_mut(i).assign(&incoming.row(i));
                }
            }
        }
        Ok(emergent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::multiplet;
    use helio_core::LineOfSight;

    fn region() -> SpectralRegion {
        SpectralRegion::linspace(
            "spec1",
            10826.0,
            10833.0,
            150,
            LineOfSight::default(),
            [1.0, 0.0, 0.0, 0.0],
        )
        .unwrap()
    }

    fn chromosphere(params: Vec<f64>) -> Result<AtmosphereComponent> {
        AtmosphereComponent::new(
            "ch1",
            AtmosphereModel::Chromosphere {
                multiplet: multiplet("10830").unwrap(),
                height: 3.0,
            },
            params,
            1.0,
        )
    }

    #[test]
    fn test_arity_is_enforced() {
        let err = chromosphere(vec![0.0; 7]).unwrap_err();
        assert!(matches!(
            err,
            HelioError::ParameterShape { expected: 8, got: 7, .. }
        ));

        let mut ch = chromosphere(vec![100.0, 100.0, 100.0, 0.5, 10.0, 8.0, 1.0, 0.0]).unwrap();
        assert!(ch.set_parameters(&[1.0; 9]).is_err());
        assert_eq!(ch.parameters()[3], 0.5);
    }

    #[test]
    fn test_filling_factor_domain() {
        let model = AtmosphereModel::Parametric { shape: ProfileShape::Gaussian };
        for ff in [0.0, -0.5, 1.5, f64::NAN] {
            let r = AtmosphereComponent::new("te1", model.clone(), vec![10830.0, 0.1, 0.5, 0.0], ff);
            assert!(matches!(r, Err(HelioError::Configuration(_))), "ff = {}", ff);
        }
    }

    #[test]
    fn test_physical_error_is_tagged() {
        let ch = chromosphere(vec![100.0, 100.0, 100.0, -0.5, 10.0, 8.0, 1.0, 0.0]).unwrap();
        let region = region();
        let err = ch.evaluate(&region, region.boundary().view()).unwrap_err();
        assert!(err.is_retriable());
        match err {
            HelioError::PhysicalEvaluation { component, .. } => assert_eq!(component, "ch1"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_window_passes_light_outside() {
        let ch = chromosphere(vec![100.0, 100.0, 100.0, 2.0, 0.0, 8.0, 0.0, 0.0])
            .unwrap()
            .with_window(WavelengthWindow::new(10829.5, 10831.0).unwrap());
        let region = region();
        let out = ch.evaluate(&region, region.boundary().view()).unwrap();
        for (i, &lambda) in region.wavelength().iter().enumerate() {
            if lambda < 10829.5 || lambda > 10831.0 {
                assert_eq!(out[[i, 0]], 1.0);
            }
        }
        assert!(out.column(0).iter().any(|&v| v < 0.5));
    }

    #[test]
    fn test_kind_tables_are_consistent() {
        for kind in [
            AtmosphereKind::Photosphere,
            AtmosphereKind::Chromosphere,
            AtmosphereKind::Parametric,
        ] {
            let initial = vec![1.0; kind.arity()];
            assert_eq!(kind.parameter_names().len(), kind.arity());
            assert_eq!(kind.default_ranges(&initial).len(), kind.arity());
            assert_eq!(kind.default_steps().len(), kind.arity());
        }
        assert_eq!(AtmosphereKind::Chromosphere.parameter_index("tau"), Some(3));
    }
}
