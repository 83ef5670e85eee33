//! Result archives.
//!
//! Inversion archives hold, for `P` pixels, `R` restarts and `C` cycles:
//!
//! | key                       | shape               |
//! |---------------------------|---------------------|
//! | `<region>/wavelength`     | `[n_wvl]`           |
//! | `<region>/stokes`         | `[P, R, C, 4, n_wvl]` |
//! | `<region>/chi2`           | `[P, R, C]`         |
//! | `<component>/parameters`  | `[P, R, C, arity]`  |
//! | `chi2`, `reduced_chi2`    | `[P, R, C]`         |
//! | `status`, `converged`     | `[P, R, C]` (u8)    |
//! | `pixel_index`             | `[P]`               |
//!
//! `status` uses [`CycleStatus::code`]. Synthesis archives hold
//! `<region>/wavelength` and `<region>/stokes` `[4, n_wvl]`.

use std::path::{Path, PathBuf};

use helio_core::{HelioError, Result, Spectrum, N_STOKES};
use helio_io::NpzArchive;
use ndarray::{Array1, Array3, Array4, Array5};

use crate::inversion::{CycleStatus, PixelBatch};
use crate::model::Model;

/// Writes forward-synthesis spectra.
pub fn write_spectra(path: impl AsRef<Path>, spectra: &[Spectrum]) -> Result<PathBuf> {
    let mut archive = NpzArchive::create(path)?;
    for spectrum in spectra {
        archive.add(&format!("{}/wavelength", spectrum.region), &spectrum.wavelength)?;
        archive.add(&format!("{}/stokes", spectrum.region), &spectrum.stokes.t())?;
    }
    archive.finish()
}

/// Writes inversion results of `batches`, which must come from `model`.
pub fn write_results(path: impl AsRef<Path>, model: &Model, batches: &[PixelBatch]) -> Result<PathBuf> {
    let n_pix = batches.len();
    let n_rand = model.settings().restarts;
    let n_cycle = model.cycles().len();
    for batch in batches {
        if batch.n_restarts != n_rand || batch.n_cycles != n_cycle || batch.results.len() != n_rand * n_cycle {
            return Err(HelioError::internal(format!(
                "pixel {} has {} results for {} restarts x {} cycles",
                batch.pixel_index,
                batch.results.len(),
                n_rand,
                n_cycle
            )));
        }
    }
    let results = || {
        batches.iter().enumerate().flat_map(|(p, batch)| {
            batch
                .results
                .iter()
                .map(move |r| ((p, r.restart_index, r.cycle_index), r))
        })
    };

    let mut archive = NpzArchive::create(path)?;

    for (k, region) in model.regions().iter().enumerate() {
        let n_wvl = region.n_wvl();
        let mut stokes = Array5::<f64>::from_elem((n_pix, n_rand, n_cycle, N_STOKES, n_wvl), f64::NAN);
        let mut chi2 = Array3::<f64>::from_elem((n_pix, n_rand, n_cycle), f64::NAN);
        for ((p, r, c), result) in results() {
            if let Some(spectrum) = result.fitted_stokes.get(k) {
                stokes
                    .slice_mut(ndarray::s![p, r, c, .., ..])
                    .assign(&spectrum.stokes.t());
            }
            if let Some(&value) = result.region_chi_square.get(k) {
                chi2[[p, r, c]] = value;
            }
        }
        archive.add(&format!("{}/wavelength", region.name()), region.wavelength())?;
        archive.add(&format!("{}/stokes", region.name()), &stokes)?;
        archive.add(&format!("{}/chi2", region.name()), &chi2)?;
    }

    for (id, component) in model.components().iter().enumerate() {
        let mut parameters = Array4::<f64>::from_elem((n_pix, n_rand, n_cycle, component.arity()), f64::NAN);
        for ((p, r, c), result) in results() {
            let values = Array1::from(result.parameters.component(id).to_vec());
            parameters.slice_mut(ndarray::s![p, r, c, ..]).assign(&values);
        }
        archive.add(&format!("{}/parameters", component.name()), &parameters)?;
    }

    let mut chi2 = Array3::<f64>::zeros((n_pix, n_rand, n_cycle));
    let mut reduced = Array3::<f64>::zeros((n_pix, n_rand, n_cycle));
    let mut status = Array3::<u8>::from_elem((n_pix, n_rand, n_cycle), CycleStatus::Failed.code());
    let mut converged = Array3::<u8>::zeros((n_pix, n_rand, n_cycle));
    for ((p, r, c), result) in results() {
        chi2[[p, r, c]] = result.chi_square;
        reduced[[p, r, c]] = result.reduced_chi_square;
        status[[p, r, c]] = result.status.code();
        converged[[p, r, c]] = u8::from(result.converged);
    }
    archive.add("chi2", &chi2)?;
    archive.add("reduced_chi2", &reduced)?;
    archive.add("status", &status)?;
    archive.add("converged", &converged)?;
    let pixel_index: Array1<u64> = batches.iter().map(|b| b.pixel_index as u64).collect();
    archive.add("pixel_index", &pixel_index)?;

    let path = archive.finish()?;
    log::info!(
        "Wrote {} pixel(s) x {} restart(s) x {} cycle(s) to {}",
        n_pix,
        n_rand,
        n_cycle,
        path.display()
    );
    Ok(path)
}
