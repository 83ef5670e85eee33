//! Integration tests for the helio CLI subcommands
//!
//! Tests:
//! - test_check_mode: validates a model file and prints it back
//! - test_synth_then_invert: synthesizes observation files and inverts them
//! - test_synth_sigma_from_continuum: observation sigma estimated from the continuum
//! - test_invalid_model_fails: configuration errors exit non-zero

use std::fs;
use std::path::Path;
use std::process::Command;

use helio_io::NpzSource;
use ndarray::{Array2, Array3, Array5};

const MODEL: &str = r#"
[[regions]]
name = "spec1"
wavelength = { start = 10826.0, end = 10833.0, points = 150 }
topology = "ch1"
observation_file = "spec1.1d"

[[atmospheres]]
name = "ch1"
kind = "chromosphere"
line = "10830"
height = 3.0
parameters = [100.0, 100.0, 100.0, 0.5, 10.0, 8.0, 1.0, 0.0]
free = { tau = [1] }

[[inversion.cycle]]
max_iterations = 15
"#;

fn helio() -> Command {
    Command::new(env!("CARGO_BIN_EXE_helio"))
}

fn write_model(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("model.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_check_mode() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), MODEL);

    let output = helio().arg("check").arg("--config").arg(&model).output().unwrap();
    assert!(
        output.status.success(),
        "check failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("chromosphere"));
    assert!(stdout.contains("ch1"));
}

#[test]
fn test_synth_then_invert() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), MODEL);

    let synth = dir.path().join("synth.npz");
    let output = helio()
        .arg("synth")
        .arg("--config")
        .arg(&model)
        .arg("--output")
        .arg(&synth)
        .arg("--observation-dir")
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "synth failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(dir.path().join("spec1.1d").exists());
    assert!(dir.path().join("spec1.wavelength").exists());

    let stokes: Array2<f64> = NpzSource::open(&synth).unwrap().array("spec1/stokes").unwrap();
    assert_eq!(stokes.dim(), (4, 150));

    // weights written by synth are only picked up once the model names them
    let model = write_model(
        dir.path(),
        &MODEL.replace("observation_file", "weights_file = \"spec1.weights\"\nobservation_file"),
    );
    let results = dir.path().join("inversion.npz");
    let output = helio()
        .arg("invert")
        .arg("--config")
        .arg(&model)
        .arg("--output")
        .arg(&results)
        .arg("--parallel")
        .arg("--workers")
        .arg("2")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "invert failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let mut archive = NpzSource::open(&results).unwrap();
    let fitted: Array5<f64> = archive.array("spec1/stokes").unwrap();
    assert_eq!(fitted.dim(), (1, 1, 1, 4, 150));
    let chi2: Array3<f64> = archive.array("chi2").unwrap();
    assert!(chi2[[0, 0, 0]] < 1e-6, "chi2 = {}", chi2[[0, 0, 0]]);
}

#[test]
fn test_synth_sigma_from_continuum() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), MODEL);

    let output = helio()
        .arg("synth")
        .arg("--config")
        .arg(&model)
        .arg("--output")
        .arg(dir.path().join("synth.npz"))
        .arg("--observation-dir")
        .arg(dir.path())
        .arg("--noise")
        .arg("0.01")
        .arg("--sigma-from-continuum")
        .arg("20")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "synth failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let pixel = helio_io::read_single_pixel(dir.path().join("spec1.1d")).unwrap();
    let sigma = pixel.sigma[[0, 0]];
    assert!(pixel.sigma.iter().all(|&s| s == sigma));
    // estimated from 20 noisy continuum samples, not copied from --noise
    assert_ne!(sigma, 0.01);
    assert!((0.004..0.02).contains(&sigma), "sigma = {}", sigma);
}

#[test]
fn test_invalid_model_fails() {
    let dir = tempfile::tempdir().unwrap();
    let model = write_model(dir.path(), &MODEL.replace("topology = \"ch1\"", "topology = \"ch1->ch2\""));

    let output = helio().arg("check").arg("--config").arg(&model).output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ch2"));
}
