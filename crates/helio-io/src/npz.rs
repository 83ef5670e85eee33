//! Structured array archives (`.npz`).
//!
//! Multi-pixel observations are stored as four arrays: `stokes`
//! `[n_pix, n_wvl, 4]`, `sigma` `[n_pix, n_wvl, 4]`, `LOS` `[n_pix, 3]` and
//! `boundary` `[n_pix, n_wvl, 4]`. Result archives use `group/array` keys.

use std::fs::File;
use std::path::{Path, PathBuf};

use helio_core::{HelioError, LineOfSight, ObservationPixel, Result, N_STOKES};
use ndarray::{s, Array, Array2, Array3, ArrayBase, Data, Dimension, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadableElement, WritableElement};

/// Read access to an `.npz` archive.
pub struct NpzSource {
    path: PathBuf,
    reader: NpzReader<File>,
}

impl NpzSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = NpzReader::new(File::open(&path)?)
            .map_err(|e| HelioError::npz(format!("{}: {}", path.display(), e)))?;
        Ok(Self { path, reader })
    }

    /// Reads array `name`, accepting it with or without the `.npy` suffix.
    pub fn array<A, D>(&mut self, name: &str) -> Result<Array<A, D>>
    where
        A: ReadableElement,
        D: Dimension,
    {
        match self.reader.by_name::<OwnedRepr<A>, D>(name) {
            Ok(array) => Ok(array),
            Err(first) => self
                .reader
                .by_name::<OwnedRepr<A>, D>(&format!("{}.npy", name))
                .map_err(|_| {
                    HelioError::npz(format!(
                        "{}: cannot read array '{}': {}",
                        self.path.display(),
                        name,
                        first
                    ))
                }),
        }
    }
}

/// Write access to an `.npz` archive. Call [`NpzArchive::finish`] to flush.
pub struct NpzArchive {
    path: PathBuf,
    writer: NpzWriter<File>,
}

impl NpzArchive {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = NpzWriter::new(File::create(&path)?);
        Ok(Self { path, writer })
    }

    pub fn add<S, D>(&mut self, name: &str, array: &ArrayBase<S, D>) -> Result<()>
    where
        S: Data,
        S::Elem: WritableElement,
        D: Dimension,
    {
        self.writer
            .add_array(name, array)
            .map_err(|e| HelioError::npz(format!("{}: writing '{}': {}", self.path.display(), name, e)))
    }

    pub fn finish(self) -> Result<PathBuf> {
        self.writer
            .finish()
            .map_err(|e| HelioError::npz(format!("{}: {}", self.path.display(), e)))?;
        Ok(self.path)
    }
}

/// Reads a multi-pixel observation cube.
pub fn read_pixels(path: impl AsRef<Path>) -> Result<Vec<ObservationPixel>> {
    let mut source = NpzSource::open(path.as_ref())?;
    let stokes: Array3<f64> = source.array("stokes")?;
    let sigma: Array3<f64> = source.array("sigma")?;
    let los: Array2<f64> = source.array("LOS")?;
    let boundary: Array3<f64> = source.array("boundary")?;

    let (n_pix, n_wvl, n_stokes) = stokes.dim();
    if n_stokes != N_STOKES {
        return Err(HelioError::config(format!(
            "stokes cube has {} Stokes columns, expected {}",
            n_stokes, N_STOKES
        )));
    }
    if sigma.dim() != stokes.dim() || boundary.dim() != stokes.dim() {
        return Err(HelioError::config(format!(
            "stokes {:?}, sigma {:?} and boundary {:?} must share one shape",
            stokes.dim(),
            sigma.dim(),
            boundary.dim()
        )));
    }
    if los.dim() != (n_pix, 3) {
        return Err(HelioError::config(format!(
            "LOS has shape {:?}, expected ({}, 3)",
            los.dim(),
            n_pix
        )));
    }

    let pixels = (0..n_pix)
        .map(|p| {
            Ok(ObservationPixel::new(
                stokes.slice(s![p, .., ..]).to_owned(),
                sigma.slice(s![p, .., ..]).to_owned(),
                LineOfSight::from_slice(&los.row(p).to_vec())?,
                boundary.slice(s![p, .., ..]).to_owned(),
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    log::info!(
        "Read {} pixels x {} wavelengths from {}",
        n_pix,
        n_wvl,
        path.as_ref().display()
    );
    Ok(pixels)
}

/// Writes pixels sharing one wavelength grid as an observation cube.
pub fn write_pixels(path: impl AsRef<Path>, pixels: &[ObservationPixel]) -> Result<()> {
    let n_wvl = pixels.first().map(|p| p.n_wvl()).unwrap_or(0);
    let mut stokes = Array3::zeros((pixels.len(), n_wvl, N_STOKES));
    let mut sigma = Array3::zeros((pixels.len(), n_wvl, N_STOKES));
    let mut boundary = Array3::zeros((pixels.len(), n_wvl, N_STOKES));
    let mut los = Array2::zeros((pixels.len(), 3));
    for (p, pixel) in pixels.iter().enumerate() {
        pixel.validate("observation cube", n_wvl)?;
        stokes.slice_mut(s![p, .., ..]).assign(&pixel.stokes);
        sigma.slice_mut(s![p, .., ..]).assign(&pixel.sigma);
        boundary.slice_mut(s![p, .., ..]).assign(&pixel.boundary);
        los.row_mut(p).assign(&ndarray::aview1(&pixel.los.to_array()));
    }

    let mut archive = NpzArchive::create(path)?;
    archive.add("stokes", &stokes)?;
    archive.add("sigma", &sigma)?;
    archive.add("LOS", &los)?;
    archive.add("boundary", &boundary)?;
    archive.finish()?;
    Ok(())
}
