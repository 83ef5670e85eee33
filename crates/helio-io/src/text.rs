//! Plain-text observation files.
//!
//! All formats share the same lexical rules: lines starting with `#` are
//! headers, blank lines are ignored, values are whitespace separated.
//!
//! - wavelength file: one wavelength per line
//! - weights file: `WeightI WeightQ WeightU WeightV` per wavelength
//! - single-pixel file: LOS angles, then the boundary Stokes vector, then
//!   `SI SQ SU SV sigmaI sigmaQ sigmaU sigmaV` per wavelength

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use helio_core::{broadcast, HelioError, LineOfSight, ObservationPixel, Result, N_STOKES};
use ndarray::{Array1, Array2, ArrayView2};

/// One data line: its 1-based line number and parsed values.
type DataLine = (usize, Vec<f64>);

fn data_lines(path: &Path) -> Result<Vec<DataLine>> {
    let text = fs::read_to_string(path)?;
    let display = path.display().to_string();
    let mut lines = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let values = trimmed
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|_| {
                    HelioError::parse(&display, i + 1, format!("'{}' is not a number", token))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        lines.push((i + 1, values));
    }
    Ok(lines)
}

fn expect_columns(path: &Path, line: &DataLine, columns: usize) -> Result<()> {
    if line.1.len() != columns {
        return Err(HelioError::parse(
            path.display().to_string(),
            line.0,
            format!("expected {} columns, found {}", columns, line.1.len()),
        ));
    }
    Ok(())
}

/// Reads a wavelength axis.
pub fn read_wavelength(path: impl AsRef<Path>) -> Result<Array1<f64>> {
    let path = path.as_ref();
    let lines = data_lines(path)?;
    let mut wavelength = Vec::with_capacity(lines.len());
    for line in &lines {
        expect_columns(path, line, 1)?;
        wavelength.push(line.1[0]);
    }
    if wavelength.is_empty() {
        return Err(HelioError::config(format!(
            "{}: no wavelengths found",
            path.display()
        )));
    }
    log::debug!("Read {} wavelengths from {}", wavelength.len(), path.display());
    Ok(Array1::from(wavelength))
}

pub fn write_wavelength(path: impl AsRef<Path>, wavelength: &Array1<f64>) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    writeln!(out, "# lambda")?;
    for w in wavelength {
        writeln!(out, "{}", w)?;
    }
    out.flush()?;
    Ok(())
}

/// Reads per-wavelength Stokes weights, `[n_wvl, 4]`.
///
/// When `n_wvl` is given the row count must match it.
pub fn read_weights(path: impl AsRef<Path>, n_wvl: Option<usize>) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let lines = data_lines(path)?;
    let mut weights = Array2::zeros((lines.len(), N_STOKES));
    for (row, line) in lines.iter().enumerate() {
        expect_columns(path, line, N_STOKES)?;
        if line.1.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(HelioError::parse(
                path.display().to_string(),
                line.0,
                "weights must be finite and non-negative",
            ));
        }
        for (s, &w) in line.1.iter().enumerate() {
            weights[[row, s]] = w;
        }
    }
    if let Some(n) = n_wvl {
        if weights.nrows() != n {
            return Err(HelioError::config(format!(
                "{}: {} weight rows for {} wavelengths",
                path.display(),
                weights.nrows(),
                n
            )));
        }
    }
    Ok(weights)
}

pub fn write_weights(path: impl AsRef<Path>, weights: ArrayView2<'_, f64>) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    writeln!(out, "# WeightI WeightQ WeightU WeightV")?;
    for row in weights.rows() {
        writeln!(out, "{} {} {} {}", row[0], row[1], row[2], row[3])?;
    }
    out.flush()?;
    Ok(())
}

/// Reads a single-pixel observation.
pub fn read_single_pixel(path: impl AsRef<Path>) -> Result<ObservationPixel> {
    let path = path.as_ref();
    let lines = data_lines(path)?;
    if lines.len() < 3 {
        return Err(HelioError::config(format!(
            "{}: expected LOS, boundary and at least one Stokes row",
            path.display()
        )));
    }

    expect_columns(path, &lines[0], 3)?;
    let los = LineOfSight::from_slice(&lines[0].1)?;
    expect_columns(path, &lines[1], N_STOKES)?;
    let boundary = [lines[1].1[0], lines[1].1[1], lines[1].1[2], lines[1].1[3]];

    let rows = &lines[2..];
    let mut stokes = Array2::zeros((rows.len(), N_STOKES));
    let mut sigma = Array2::zeros((rows.len(), N_STOKES));
    for (i, line) in rows.iter().enumerate() {
        expect_columns(path, line, 2 * N_STOKES)?;
        for s in 0..N_STOKES {
            stokes[[i, s]] = line.1[s];
            sigma[[i, s]] = line.1[N_STOKES + s];
        }
    }
    log::debug!("Read single-pixel observation with {} wavelengths from {}", rows.len(), path.display());
    Ok(ObservationPixel::new(
        stokes,
        sigma,
        los,
        broadcast(boundary, rows.len()),
    ))
}

/// Writes a single-pixel observation.
///
/// The format stores one boundary vector, so the first boundary row is
/// written.
pub fn write_single_pixel(path: impl AsRef<Path>, pixel: &ObservationPixel) -> Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    writeln!(out, "# LOS theta_LOS, phi_LOS, gamma_LOS")?;
    let [theta, phi, gamma] = pixel.los.to_array();
    writeln!(out, "{} {} {}", theta, phi, gamma)?;
    writeln!(out)?;
    writeln!(out, "# Boundary condition I/Ic(mu=1), Q/Ic(mu=1), U/Ic(mu=1), V/Ic(mu=1)")?;
    let b = pixel.boundary.row(0);
    writeln!(out, "{} {} {} {}", b[0], b[1], b[2], b[3])?;
    writeln!(out)?;
    writeln!(out, "# SI SQ SU SV sigmaI sigmaQ sigmaU sigmaV")?;
    for (s, e) in pixel.stokes.rows().into_iter().zip(pixel.sigma.rows()) {
        writeln!(
            out,
            "{} {} {} {} {} {} {} {}",
            s[0], s[1], s[2], s[3], e[0], e[1], e[2], e[3]
        )?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_single_pixel_file_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("10830_example_stokes.1d");
        fs::write(
            &path,
            "# LOS theta_LOS, phi_LOS, gamma_LOS\n\
             0.0 0.0 90.0\n\
             \n\
             # Boundary condition I/Ic(mu=1), Q/Ic(mu=1), U/Ic(mu=1), V/Ic(mu=1)\n\
             1.0 0.0 0.0 0.0\n\
             \n\
             # SI SQ SU SV sigmaI sigmaQ sigmaU sigmaV\n\
             0.99 0.001 -0.002 0.003 1e-3 1e-3 1e-3 1e-3\n\
             0.95 0.000 0.000 -0.01 1e-3 1e-3 1e-3 1e-3\n",
        )
        .unwrap();

        let pixel = read_single_pixel(&path).unwrap();
        assert_eq!(pixel.n_wvl(), 2);
        assert_relative_eq!(pixel.los.gamma, 90.0);
        assert_relative_eq!(pixel.stokes[[1, 3]], -0.01);
        assert_relative_eq!(pixel.sigma[[0, 2]], 1e-3);
        assert_relative_eq!(pixel.boundary[[1, 0]], 1.0);
        pixel.validate("spec1", 2).unwrap();

        let copy = dir.path().join("copy.1d");
        write_single_pixel(&copy, &pixel).unwrap();
        assert_eq!(read_single_pixel(&copy).unwrap(), pixel);
    }

    #[test]
    fn test_wavelength_and_weights() {
        let dir = tempdir().unwrap();
        let wvl_path = dir.path().join("10830_example.wavelength");
        let wavelength = Array1::linspace(10826.0, 10833.0, 150);
        write_wavelength(&wvl_path, &wavelength).unwrap();
        assert_eq!(read_wavelength(&wvl_path).unwrap(), wavelength);

        let w_path = dir.path().join("10830_example.weights");
        fs::write(&w_path, "# WeightI WeightQ WeightU WeightV\n1.0 1.0 1.0 1.0\n1.0 0.0 0.0 2.0\n").unwrap();
        let weights = read_weights(&w_path, Some(2)).unwrap();
        assert_eq!(weights.dim(), (2, 4));
        assert_relative_eq!(weights[[1, 3]], 2.0);
        assert!(matches!(read_weights(&w_path, Some(3)), Err(HelioError::Configuration(_))));
    }

    #[test]
    fn test_malformed_lines_report_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.weights");
        fs::write(&path, "# WeightI WeightQ WeightU WeightV\n1 1 1 1\n1 x 1 1\n").unwrap();
        match read_weights(&path, None).unwrap_err() {
            HelioError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error {:?}", other),
        }

        fs::write(&path, "1 1 1\n").unwrap();
        assert!(matches!(read_weights(&path, None), Err(HelioError::Parse { line: 1, .. })));
    }
}
