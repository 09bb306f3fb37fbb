use chrono::{DateTime, Utc};
use ndarray::{s, Array2, Array3, ArrayView3};

use crate::core::raster_ops::{
    clip, fill_missing, gaussian_filter, guard_denominator, nan_mean, nan_mean_std, nan_percentiles,
    uniform_filter,
};
use crate::types::{BandStack, DetectionError, DetectResult, Raster, RasterValue, EPSILON};

/// Scene count below which temporal statistics are considered unreliable
pub const MIN_RECOMMENDED_SCENES: usize = 15;

/// Upper bound of the 8-bit range the texture proxy is computed on
const TEXTURE_SCALE: f64 = 255.0;

/// Per-pixel temporal statistics of the SAR stacks.
///
/// The full co/cross stacks are kept for the advanced indicators.
#[derive(Debug, Clone)]
pub struct TemporalSarStats {
    /// Co-polarized (VV) temporal mean, linear power
    pub co_mean: Raster,
    /// Co-polarized (VV) temporal standard deviation
    pub co_std: Raster,
    /// Cross-polarized (VH) temporal mean, linear power
    pub cross_mean: Raster,
    /// Co-polarized stack (time x row x col)
    pub co_stack: Array3<RasterValue>,
    /// Cross-polarized stack (time x row x col)
    pub cross_stack: Array3<RasterValue>,
    /// Acquisition time of every slice
    pub times: Vec<DateTime<Utc>>,
}

impl TemporalSarStats {
    pub fn scene_count(&self) -> usize {
        self.times.len()
    }

    /// Co-polarized temporal mean in decibels
    pub fn co_mean_db(&self) -> Raster {
        self.co_mean
            .mapv(|v| (10.0 * guard_denominator(v as f64).log10()) as RasterValue)
    }
}

/// Compute temporal mean/std of the co-polarized channel and the mean of the
/// cross-polarized channel, ignoring missing samples.
pub fn compute_temporal_stats(s1: &BandStack) -> DetectResult<TemporalSarStats> {
    let vv = s1.find_band_index("vv")?;
    let vh = s1.find_band_index("vh")?;

    let n_scenes = s1.time_count();
    if n_scenes == 0 {
        return Err(DetectionError::NoScenes("co-polarized SAR channel".to_string()));
    }
    if n_scenes < MIN_RECOMMENDED_SCENES {
        log::warn!(
            "Only {} SAR scenes available (recommended >= {}); stability will be less reliable",
            n_scenes,
            MIN_RECOMMENDED_SCENES
        );
    }

    let co_stack = s1.band(vv).to_owned();
    let cross_stack = s1.band(vh).to_owned();

    let (co_mean, co_std) = temporal_mean_std(co_stack.view());
    let (cross_mean, _) = temporal_mean_std(cross_stack.view());

    log::debug!(
        "Temporal statistics over {} scenes on a {:?} grid",
        n_scenes,
        co_mean.dim()
    );

    Ok(TemporalSarStats {
        co_mean,
        co_std,
        cross_mean,
        co_stack,
        cross_stack,
        times: s1.times.clone(),
    })
}

/// NaN-ignoring temporal mean and population std of a (time x row x col) stack
pub fn temporal_mean_std(stack: ArrayView3<'_, RasterValue>) -> (Raster, Raster) {
    let (_, rows, cols) = stack.dim();
    let mut mean = Raster::zeros((rows, cols));
    let mut std = Raster::zeros((rows, cols));

    for i in 0..rows {
        for j in 0..cols {
            let series = stack.slice(s![.., i, j]);
            let (m, sd) = nan_mean_std(series.iter().map(|&v| v as f64));
            mean[[i, j]] = m as RasterValue;
            std[[i, j]] = sd as RasterValue;
        }
    }

    (mean, std)
}

/// Temporal stability, `clip(1 - std/mean, floor, 1)`.
///
/// Persistent scatterers keep a low coefficient of variation; the floor keeps
/// noisy pixels from scoring exactly zero.
pub fn stability(co_mean: &Raster, co_std: &Raster, floor: f64) -> Raster {
    let mut out = Raster::zeros(co_mean.dim());
    ndarray::Zip::from(&mut out)
        .and(co_mean)
        .and(co_std)
        .for_each(|o, &mean, &std| {
            let cov = std as f64 / guard_denominator(mean as f64);
            let raw = 1.0 - clip(cov, 0.0, 1.0);
            *o = clip(raw, floor, 1.0) as RasterValue;
        });
    out
}

/// Cross/co ratio rescaled so `[ratio_min, ratio_max]` maps onto [0, 1]
pub fn polarimetric_ratio(
    co_mean: &Raster,
    cross_mean: &Raster,
    ratio_min: f64,
    ratio_max: f64,
) -> Raster {
    let mut out = Raster::zeros(co_mean.dim());
    ndarray::Zip::from(&mut out)
        .and(co_mean)
        .and(cross_mean)
        .for_each(|o, &co, &cross| {
            let ratio = cross as f64 / guard_denominator(co as f64);
            let scaled = (ratio - ratio_min) / (ratio_max - ratio_min + EPSILON);
            *o = clip(scaled, 0.0, 1.0) as RasterValue;
        });
    out
}

/// GLCM homogeneity proxy from local mean and variance.
///
/// The dB image is stretched to [0, 255] by its 2nd/98th percentiles, a
/// `(2r+1)` box window yields local mean/variance, and `mean / (var + 1)` is
/// percentile-normalized to [0, 1].
pub fn texture(co_mean_db: &Raster, kernel_radius: usize) -> Raster {
    let p = nan_percentiles(co_mean_db.iter(), &[2.0, 98.0]);
    let (p02, p98) = (p[0], p[1]);

    // Missing samples enter the window as zero
    let filled: Array2<f64> = co_mean_db.mapv(|v| {
        let scaled = clip(
            (v as f64 - p02) / (p98 - p02 + EPSILON) * TEXTURE_SCALE,
            0.0,
            TEXTURE_SCALE,
        );
        if scaled.is_finite() {
            scaled
        } else {
            0.0
        }
    });

    let size = 2 * kernel_radius + 1;
    let local_mean = uniform_filter(filled.view(), size);
    let local_sq = uniform_filter(filled.mapv(|v| v * v).view(), size);

    let mut homogeneity = Raster::zeros(filled.dim());
    ndarray::Zip::from(&mut homogeneity)
        .and(&local_mean)
        .and(&local_sq)
        .for_each(|h, &m, &sq| {
            let var = (sq - m * m).max(0.0);
            *h = (m / (var + 1.0)) as RasterValue;
        });

    normalize_by_percentiles(&homogeneity)
}

/// Stretch a raster by its own 2nd/98th percentiles and clip to [0, 1]
fn normalize_by_percentiles(image: &Raster) -> Raster {
    let p = nan_percentiles(image.iter(), &[2.0, 98.0]);
    let (lo, hi) = (p[0], p[1]);
    image.mapv(|v| clip((v as f64 - lo) / (hi - lo + EPSILON), 0.0, 1.0) as RasterValue)
}

/// Gaussian-residual anomaly score in [0, 1].
///
/// A Gaussian blur with `sigma = kernel_radius` estimates the local
/// background; the residual is turned into a z-score with
/// `sigma_scale * std(residual)` and z in [-3, 3] maps linearly to [0, 1].
/// Missing samples are replaced by the global mean first, so the output has
/// no NaN.
pub fn gaussian_anomaly(image: &Raster, kernel_radius: usize, sigma_scale: f64) -> Raster {
    let global_mean = nan_mean(image.iter().map(|&v| v as f64));
    let fill = if global_mean.is_finite() { global_mean } else { 0.0 };

    let filled: Array2<f64> = fill_missing(image, fill as RasterValue).mapv(|v| v as f64);
    let background = gaussian_filter(filled.view(), kernel_radius as f64);
    let residual = &filled - &background;

    let (_, r_std) = nan_mean_std(residual.iter().copied());
    let denom = sigma_scale * r_std + EPSILON;

    residual.mapv(|r| clip((r / denom + 3.0) / 6.0, 0.0, 1.0) as RasterValue)
}
