use ndarray::{s, Array3};

use crate::core::raster_ops::{clip, nan_median, nan_percentiles};
use crate::types::{BandStack, DetectionError, DetectResult, Raster, RasterValue, EPSILON};

/// Sentinel-2 scene classification codes treated as clear sky:
/// vegetation, non-vegetated, water, unclassified, snow
pub const CLEAR_SCL_CLASSES: [u8; 5] = [4, 5, 6, 7, 11];

/// Name of the scene classification band
pub const SCL_BAND: &str = "SCL";

/// Scale of L2A surface reflectance digital numbers
pub const REFLECTANCE_SCALE: f64 = 10_000.0;

/// Gamma applied to the display composite
const RGB_GAMMA: f64 = 0.85;

/// Spectral indices and composites derived from the optical stack
#[derive(Debug, Clone)]
pub struct OpticalProducts {
    pub ndvi: Raster,
    pub ndwi: Raster,
    pub ndbi: Raster,
    /// True-colour composite (row x col x rgb), stretched to [0, 1]
    pub rgb: Array3<RasterValue>,
}

/// True when an SCL code marks a clear observation
#[inline]
pub fn is_clear(scl: RasterValue) -> bool {
    scl.is_finite() && CLEAR_SCL_CLASSES.iter().any(|&c| scl.round() == c as RasterValue)
}

/// Cloud-masked temporal median of one reflectance band, scaled to [0, 1].
///
/// Observations whose SCL code is not clear are treated as missing.
pub fn masked_median(s2: &BandStack, band: &str) -> DetectResult<Raster> {
    let band_idx = s2.band_index(band)?;
    let scl_idx = s2.band_index(SCL_BAND)?;
    if s2.time_count() == 0 {
        return Err(DetectionError::NoScenes("optical stack".to_string()));
    }

    let values = s2.band(band_idx);
    let scl = s2.band(scl_idx);
    let (rows, cols) = s2.grid_shape();

    let mut composite = Raster::zeros((rows, cols));
    let mut samples = Vec::with_capacity(s2.time_count());
    for i in 0..rows {
        for j in 0..cols {
            samples.clear();
            let series = values.slice(s![.., i, j]);
            let classes = scl.slice(s![.., i, j]);
            for (&v, &c) in series.iter().zip(classes.iter()) {
                if is_clear(c) {
                    samples.push(v as f64);
                }
            }
            let median = nan_median(&mut samples);
            composite[[i, j]] = (median / REFLECTANCE_SCALE) as RasterValue;
        }
    }

    Ok(composite)
}

/// `(a - b) / (a + b)` clipped to [-1, 1]; a zero denominator becomes 1e-10
pub fn normalized_difference(a: &Raster, b: &Raster) -> Raster {
    let mut out = Raster::zeros(a.dim());
    ndarray::Zip::from(&mut out).and(a).and(b).for_each(|o, &a, &b| {
        let (a, b) = (a as f64, b as f64);
        let sum = a + b;
        let denom = if sum.abs() > 0.0 { sum } else { EPSILON };
        *o = clip((a - b) / denom, -1.0, 1.0) as RasterValue;
    });
    out
}

/// Cloud-mask the optical stack, composite it and derive NDVI, NDWI, NDBI
/// and the display composite.
pub fn compute_optical_products(s2: &BandStack) -> DetectResult<OpticalProducts> {
    let red = masked_median(s2, "B04")?;
    let green = masked_median(s2, "B03")?;
    let blue = masked_median(s2, "B02")?;
    let nir = masked_median(s2, "B08")?;
    let swir = masked_median(s2, "B11")?;

    let ndvi = normalized_difference(&nir, &red);
    let ndwi = normalized_difference(&green, &nir);
    let ndbi = normalized_difference(&swir, &nir);
    let rgb = true_colour_composite(&red, &green, &blue);

    let clear_px = ndvi.iter().filter(|v| v.is_finite()).count();
    log::debug!(
        "Optical composite from {} scenes: {}/{} pixels with a clear observation",
        s2.time_count(),
        clear_px,
        ndvi.len()
    );

    Ok(OpticalProducts { ndvi, ndwi, ndbi, rgb })
}

/// Percentile-stretched, gamma-corrected RGB composite; missing pixels are 0
pub fn true_colour_composite(red: &Raster, green: &Raster, blue: &Raster) -> Array3<RasterValue> {
    let p = nan_percentiles(red.iter().chain(green.iter()).chain(blue.iter()), &[2.0, 98.0]);
    let (p02, p98) = (p[0], p[1]);
    let span = (p98 - p02).max(1e-6);

    let (rows, cols) = red.dim();
    Array3::from_shape_fn((rows, cols, 3), |(i, j, c)| {
        let v = match c {
            0 => red[[i, j]],
            1 => green[[i, j]],
            _ => blue[[i, j]],
        } as f64;
        let stretched = clip((v - p02) / span, 0.0, 1.0).powf(RGB_GAMMA);
        if stretched.is_finite() {
            stretched as RasterValue
        } else {
            0.0
        }
    })
}

/// Optical structure indicator: high NDBI anomaly and low vegetation.
///
/// `clip(0.5 * anomaly(NDBI) + 0.5 * (1 - clip(NDVI, 0, 1)), 0, 1)`
pub fn optical_indicator(ndbi_anomaly: &Raster, ndvi: &Raster) -> Raster {
    let mut out = Raster::zeros(ndvi.dim());
    ndarray::Zip::from(&mut out)
        .and(ndbi_anomaly)
        .and(ndvi)
        .for_each(|o, &anomaly, &ndvi| {
            let inverse_veg = 1.0 - clip(ndvi as f64, 0.0, 1.0);
            *o = clip(0.5 * anomaly as f64 + 0.5 * inverse_veg, 0.0, 1.0) as RasterValue;
        });
    out
}
