use ndarray::Array2;

use crate::core::masking::{binary_dilate, binary_erode};
use crate::core::params::FusionWeights;
use crate::types::{Mask, Raster, RasterValue};

/// Confidence tiers written to the confidence raster.
///
/// `Low` is never assigned: pixels below the medium threshold keep the
/// background code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ConfidenceZone {
    Background = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl ConfidenceZone {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Tier of a single probability value
    pub fn classify(probability: f64, thresh_medium: f64, thresh_high: f64) -> Self {
        if probability.is_nan() {
            ConfidenceZone::Background
        } else if probability >= thresh_high {
            ConfidenceZone::High
        } else if probability >= thresh_medium {
            ConfidenceZone::Medium
        } else {
            ConfidenceZone::Background
        }
    }
}

/// The eight indicator rasters in fusion order
#[derive(Debug, Clone, Copy)]
pub struct IndicatorSet<'a> {
    pub stability: &'a Raster,
    pub pol_ratio: &'a Raster,
    pub texture: &'a Raster,
    pub anomaly: &'a Raster,
    pub optical: &'a Raster,
    pub cross_pol: &'a Raster,
    pub coherence: &'a Raster,
    pub seasonal: &'a Raster,
}

impl<'a> IndicatorSet<'a> {
    fn as_array(&self) -> [&'a Raster; 8] {
        [
            self.stability,
            self.pol_ratio,
            self.texture,
            self.anomaly,
            self.optical,
            self.cross_pol,
            self.coherence,
            self.seasonal,
        ]
    }
}

/// Weighted linear fusion of the eight indicators.
///
/// Pixels outside `mask` are NaN, not zero. Weights are assumed validated.
pub fn fuse(indicators: &IndicatorSet<'_>, weights: &FusionWeights, mask: &Mask) -> Raster {
    let rasters = indicators.as_array();
    let weights = weights.as_array();

    Array2::from_shape_fn(mask.dim(), |(i, j)| {
        if !mask[[i, j]] {
            return RasterValue::NAN;
        }
        rasters
            .iter()
            .zip(weights.iter())
            .map(|(raster, w)| w * raster[[i, j]] as f64)
            .sum::<f64>() as RasterValue
    })
}

/// Confidence raster: 3 = high, 2 = medium, 0 = background or below medium
pub fn classify_confidence(probability: &Raster, thresh_medium: f64, thresh_high: f64) -> Array2<u8> {
    probability.mapv(|p| ConfidenceZone::classify(p as f64, thresh_medium, thresh_high).code())
}

/// Binarize at `threshold` (NaN counts as below)
pub fn threshold_mask(probability: &Raster, threshold: f64) -> Mask {
    probability.mapv(|p| !p.is_nan() && p as f64 >= threshold)
}

/// Morphological opening of the above-threshold mask with a 3x3 element.
///
/// Probability values are kept where the opened mask holds, NaN elsewhere.
pub fn morphological_open(probability: &Raster, threshold: f64, iterations: usize) -> Raster {
    let binary = threshold_mask(probability, threshold);
    let opened = binary_dilate(&binary_erode(&binary, iterations), iterations);

    let kept = opened.iter().filter(|m| **m).count();
    log::debug!(
        "Morphological opening kept {}/{} above-threshold pixels",
        kept,
        binary.iter().filter(|m| **m).count()
    );

    let mut cleaned = probability.clone();
    ndarray::Zip::from(&mut cleaned)
        .and(&opened)
        .for_each(|p, &keep| {
            if !keep {
                *p = RasterValue::NAN;
            }
        });
    cleaned
}
