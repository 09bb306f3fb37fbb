//! Indicators computed from the full SAR time series rather than its mean.

use chrono::{DateTime, Datelike, Utc};
use ndarray::{Array3, ArrayView3, Axis};

use crate::core::raster_ops::{clip, guard_denominator, nan_mean_std};
use crate::core::sar_indicators::temporal_mean_std;
use crate::types::{Raster, RasterValue};

/// Neutral score returned when seasonal coverage is insufficient
pub const NEUTRAL_SEASONAL_SCORE: RasterValue = 0.5;

/// Minimum number of scenes for a quarter to contribute a mean
pub const MIN_SCENES_PER_QUARTER: usize = 3;

/// Meteorological quarters by calendar month
const QUARTERS: [[u32; 3]; 4] = [[12, 1, 2], [3, 4, 5], [6, 7, 8], [9, 10, 11]];

/// Temporal stability of the cross/co ratio.
///
/// Stable scattering mechanisms keep a low CV of the per-scene ratio, which
/// maps to a high score: `clip(1 - clip(cv, 0, 2) / 2, 0, 1)`.
pub fn cross_pol_stability(
    co_stack: ArrayView3<'_, RasterValue>,
    cross_stack: ArrayView3<'_, RasterValue>,
) -> Raster {
    let mut ratio = Array3::<RasterValue>::zeros(co_stack.dim());
    ndarray::Zip::from(&mut ratio)
        .and(co_stack)
        .and(cross_stack)
        .for_each(|r, &co, &cross| {
            *r = (cross as f64 / guard_denominator(co as f64)) as RasterValue;
        });

    let (mean, std) = temporal_mean_std(ratio.view());
    coefficient_score(&mean, &std, 2.0)
}

/// Amplitude dispersion index as a coherence proxy.
///
/// `D_A = std(sqrt(power)) / mean(sqrt(power))`; low dispersion marks a
/// persistent scatterer and scores high.
pub fn coherence_proxy(co_stack: ArrayView3<'_, RasterValue>) -> Raster {
    let amplitude = co_stack.mapv(|p| {
        if p.is_nan() {
            p
        } else {
            p.max(0.0).sqrt()
        }
    });
    let (mean, std) = temporal_mean_std(amplitude.view());
    coefficient_score(&mean, &std, 1.0)
}

/// Invariance of the backscatter across calendar quarters.
///
/// Quarters (DJF, MAM, JJA, SON) with at least three scenes contribute their
/// temporal mean; the CV across those means is inverted into a score. With
/// fewer than two usable quarters the raster is a neutral 0.5.
pub fn seasonal_invariance(
    co_stack: ArrayView3<'_, RasterValue>,
    times: &[DateTime<Utc>],
) -> Raster {
    let (_, rows, cols) = co_stack.dim();

    let quarter_means: Vec<Raster> = QUARTERS
        .iter()
        .filter_map(|months| {
            let members: Vec<usize> = times
                .iter()
                .enumerate()
                .filter(|(_, t)| months.contains(&t.month()))
                .map(|(idx, _)| idx)
                .collect();
            if members.len() < MIN_SCENES_PER_QUARTER {
                return None;
            }
            let subset = co_stack.select(Axis(0), &members);
            let (mean, _) = temporal_mean_std(subset.view());
            Some(mean)
        })
        .collect();

    if quarter_means.len() < 2 {
        log::warn!(
            "Only {} quarter(s) with >= {} scenes; seasonal invariance set to neutral {}",
            quarter_means.len(),
            MIN_SCENES_PER_QUARTER,
            NEUTRAL_SEASONAL_SCORE
        );
        return Raster::from_elem((rows, cols), NEUTRAL_SEASONAL_SCORE);
    }

    log::debug!("Seasonal invariance over {} quarters", quarter_means.len());

    let mut out = Raster::zeros((rows, cols));
    for i in 0..rows {
        for j in 0..cols {
            let (mean, std) = nan_mean_std(quarter_means.iter().map(|q| q[[i, j]] as f64));
            let cv = std / guard_denominator(mean);
            out[[i, j]] = clip(1.0 - clip(cv, 0.0, 1.0), 0.0, 1.0) as RasterValue;
        }
    }
    out
}

/// Invert a temporal coefficient of variation: `clip(1 - clip(cv, 0, c) / c, 0, 1)`
fn coefficient_score(mean: &Raster, std: &Raster, cv_ceiling: f64) -> Raster {
    let mut out = Raster::zeros(mean.dim());
    ndarray::Zip::from(&mut out)
        .and(mean)
        .and(std)
        .for_each(|o, &m, &sd| {
            let cv = sd as f64 / guard_denominator(m as f64);
            *o = clip(1.0 - clip(cv, 0.0, cv_ceiling) / cv_ceiling, 0.0, 1.0) as RasterValue;
        });
    out
}
