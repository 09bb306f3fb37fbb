use serde::{Deserialize, Serialize};

use crate::types::{DetectionError, DetectResult};

/// Tolerance on the fusion/regularization weight sums
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// Weights of the eight fused indicators
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    /// SAR temporal stability
    pub stability: f64,
    /// Cross/co polarimetric ratio
    pub pol_ratio: f64,
    /// GLCM homogeneity proxy
    pub texture: f64,
    /// Gaussian residual z-score
    pub anomaly: f64,
    /// NDBI anomaly + inverse NDVI
    pub optical: f64,
    /// Cross-polarization stability
    pub cross_pol: f64,
    /// Amplitude dispersion coherence proxy
    pub coherence: f64,
    /// Seasonal invariance
    pub seasonal: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            stability: 0.18,
            pol_ratio: 0.12,
            texture: 0.12,
            anomaly: 0.13,
            optical: 0.10,
            cross_pol: 0.13,
            coherence: 0.12,
            seasonal: 0.10,
        }
    }
}

impl FusionWeights {
    pub fn sum(&self) -> f64 {
        self.stability
            + self.pol_ratio
            + self.texture
            + self.anomaly
            + self.optical
            + self.cross_pol
            + self.coherence
            + self.seasonal
    }

    /// Weights in fusion order
    pub fn as_array(&self) -> [f64; 8] {
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

/// Weights of the seven building-likeness components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegularizationWeights {
    pub rectangularity: f64,
    pub compactness: f64,
    pub solidity: f64,
    pub edge_sharpness: f64,
    pub size: f64,
    pub probability: f64,
    pub water: f64,
}

impl Default for RegularizationWeights {
    fn default() -> Self {
        Self {
            rectangularity: 0.18,
            compactness: 0.14,
            solidity: 0.14,
            edge_sharpness: 0.13,
            size: 0.13,
            probability: 0.12,
            water: 0.16,
        }
    }
}

impl RegularizationWeights {
    pub fn sum(&self) -> f64 {
        self.rectangularity
            + self.compactness
            + self.solidity
            + self.edge_sharpness
            + self.size
            + self.probability
            + self.water
    }
}

/// Pixel connectivity used when labelling footprint blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Edge neighbours only
    Four,
    /// Edge and corner neighbours
    Eight,
}

/// Complete parameter set of one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    pub forest_ndvi_threshold: f64,
    pub water_ndwi_threshold: f64,
    pub stability_floor: f64,
    /// Texture window half-size (pixels)
    pub texture_kernel_radius: usize,
    /// Gaussian sigma of the anomaly background (pixels)
    pub anomaly_kernel_radius: usize,
    pub anomaly_sigma: f64,
    pub weights: FusionWeights,
    pub thresh_high: f64,
    pub thresh_medium: f64,
    /// m^2
    pub min_footprint_area: f64,
    /// degrees
    pub slope_threshold: f64,
    pub pol_ratio_min: f64,
    pub pol_ratio_max: f64,
    /// Extra edge erosion of the validity mask (pixels)
    pub edge_erosion_px: usize,
    pub connectivity: Connectivity,

    // Building regularization
    /// Polsby-Popper floor
    pub min_compactness: f64,
    /// Area / MRR area needed for the rectangle geometry
    pub min_rectangularity: f64,
    /// MRR length / width ceiling
    pub max_aspect_ratio: f64,
    /// m^2, rejects large clearings
    pub max_footprint_area: f64,
    pub min_building_score: f64,
    /// Area / convex-hull area floor
    pub min_solidity: f64,
    pub regularization_weights: RegularizationWeights,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            forest_ndvi_threshold: 0.55,
            water_ndwi_threshold: 0.15,
            stability_floor: 0.70,
            texture_kernel_radius: 3,
            anomaly_kernel_radius: 15,
            anomaly_sigma: 1.5,
            weights: FusionWeights::default(),
            thresh_high: 0.65,
            thresh_medium: 0.45,
            min_footprint_area: 80.0,
            slope_threshold: 15.0,
            pol_ratio_min: 0.02,
            pol_ratio_max: 0.30,
            edge_erosion_px: 2,
            connectivity: Connectivity::Four,
            min_compactness: 0.15,
            min_rectangularity: 0.35,
            max_aspect_ratio: 10.0,
            max_footprint_area: 25_000.0,
            min_building_score: 0.35,
            min_solidity: 0.40,
            regularization_weights: RegularizationWeights::default(),
        }
    }
}

impl AnalysisParams {
    /// Check the invariants of the parameter set.
    ///
    /// The fusion weight sum is checked first so a bad weight set is always
    /// reported as such.
    pub fn validate(&self) -> DetectResult<()> {
        let total = self.weights.sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(DetectionError::InvalidWeights { total });
        }

        let reg_total = self.regularization_weights.sum();
        if (reg_total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(DetectionError::InvalidParameter(format!(
                "regularization weights must sum to 1.0 (got {:.4})",
                reg_total
            )));
        }

        if self.thresh_medium >= self.thresh_high {
            return Err(DetectionError::InvalidParameter(format!(
                "thresh_medium ({}) must be below thresh_high ({})",
                self.thresh_medium, self.thresh_high
            )));
        }

        if self.pol_ratio_max <= self.pol_ratio_min {
            return Err(DetectionError::InvalidParameter(format!(
                "pol_ratio_max ({}) must exceed pol_ratio_min ({})",
                self.pol_ratio_max, self.pol_ratio_min
            )));
        }

        if self.anomaly_kernel_radius == 0 {
            return Err(DetectionError::InvalidParameter(
                "anomaly_kernel_radius must be at least 1 pixel".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.stability_floor) {
            return Err(DetectionError::InvalidParameter(format!(
                "stability_floor must lie in [0, 1] (got {})",
                self.stability_floor
            )));
        }

        Ok(())
    }
}
