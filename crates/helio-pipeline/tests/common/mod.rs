//! Shared model setups for the integration tests.
#![allow(dead_code)]

use helio_physics::ProfileShape;
use helio_pipeline::{AtmosphereConfig, CycleConfig, ModelConfig, RegionConfig};

/// `[Bx, By, Bz, tau, v, deltav, beta, a]` of the He I 10830 example.
pub const CHROMOSPHERE: [f64; 8] = [100.0, 100.0, 100.0, 0.5, 10.0, 8.0, 1.0, 0.0];

/// `[lambda0, sigma, depth, a]` of a telluric-like Gaussian.
pub const TELLURIC: [f64; 4] = [10830.0, 0.3, 0.5, 0.0];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Single chromosphere over `[10826, 10833]`, 150 points, `tau` free in
/// every cycle.
pub fn chromosphere(n_cycles: usize, restarts: usize) -> ModelConfig {
    let mut builder = ModelConfig::builder()
        .region(RegionConfig::new("spec1", 10826.0, 10833.0, 150, "ch1"))
        .atmosphere(
            AtmosphereConfig::chromosphere("ch1", "10830", 3.0, CHROMOSPHERE.to_vec()).free("tau", &[true]),
        )
        .restarts(restarts);
    for _ in 0..n_cycles {
        builder = builder.cycle(CycleConfig {
            max_iterations: 20,
            ..CycleConfig::default()
        });
    }
    builder.build().unwrap()
}

/// Single Gaussian line with center, width and depth free.
pub fn telluric(max_iterations: usize, tolerance: f64) -> ModelConfig {
    ModelConfig::builder()
        .region(RegionConfig::new("spec1", 10828.0, 10832.0, 150, "te1"))
        .atmosphere(
            AtmosphereConfig::parametric("te1", ProfileShape::Gaussian, TELLURIC.to_vec())
                .free("lambda0", &[true])
                .free("sigma", &[true])
                .free("depth", &[true]),
        )
        .cycle(CycleConfig {
            max_iterations,
            tolerance,
            ..CycleConfig::default()
        })
        .build()
        .unwrap()
}
