//! End-to-end sub-canopy detection run.
//!
//! [`SubCanopyAnalyser::new`] performs every precondition check (parameter
//! invariants, band presence, scene count, grid agreement) so that
//! [`SubCanopyAnalyser::run`] either returns a complete [`AnalysisResult`] or
//! fails before any array work.

use std::fmt;

use ndarray::{Array2, Array3};

use crate::core::advanced_indicators::{coherence_proxy, cross_pol_stability, seasonal_invariance};
use crate::core::fusion::{classify_confidence, fuse, morphological_open, ConfidenceZone, IndicatorSet};
use crate::core::masking::{align_dem, combine_masks, forest_mask, slope_degrees, slope_mask, validity_mask};
use crate::core::optical::{compute_optical_products, optical_indicator, SCL_BAND};
use crate::core::params::AnalysisParams;
use crate::core::regularize::{regularize_footprints, BuildingFootprint};
use crate::core::sar_indicators::{
    compute_temporal_stats, gaussian_anomaly, polarimetric_ratio, stability, texture,
};
use crate::core::vectorize::{extract_footprints, RawFootprint};
use crate::types::{
    AreaOfInterest, DetectionError, DetectResult, GeoTransform, ImageryData, Mask, Raster, RasterValue,
};

/// Optical bands the analysis reads
pub const OPTICAL_BANDS: [&str; 6] = ["B02", "B03", "B04", "B08", "B11", SCL_BAND];

/// Iterations of the 3x3 opening applied to the probability surface
const OPENING_ITERATIONS: usize = 1;

/// Everything one analysis run produces
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    /// Fused probability in [0, 1], NaN outside the combined mask
    pub probability: Raster,
    /// Codes of [`ConfidenceZone`]
    pub confidence: Array2<u8>,
    /// Probability after morphological opening
    pub cleaned_probability: Raster,

    pub stability: Raster,
    pub pol_ratio: Raster,
    pub texture: Raster,
    pub sar_anomaly: Raster,
    pub optical_indicator: Raster,
    pub cross_pol_stability: Raster,
    pub coherence_proxy: Raster,
    pub seasonal_invariance: Raster,

    pub validity_mask: Mask,
    pub forest_mask: Mask,
    pub slope_mask: Mask,

    pub ndvi: Raster,
    pub ndwi: Raster,
    pub ndbi: Raster,
    /// True-colour composite (row x col x rgb)
    pub rgb_composite: Array3<RasterValue>,

    pub footprints: Vec<RawFootprint>,
    /// Sorted by descending building score
    pub buildings: Vec<BuildingFootprint>,

    pub s1_scene_count: usize,
    pub transform: GeoTransform,
    pub crs_wkt: String,
    pub height: usize,
    pub width: usize,
    pub params: AnalysisParams,
}

/// Headline counts of one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionSummary {
    pub s1_scene_count: usize,
    pub high_confidence_pixels: usize,
    pub medium_confidence_pixels: usize,
    pub raw_footprints: usize,
    pub raw_footprint_area_m2: f64,
    pub buildings: usize,
    pub building_area_m2: f64,
    pub rejected: usize,
    pub mean_building_score: f64,
}

impl AnalysisResult {
    pub fn summary(&self) -> DetectionSummary {
        let count_zone = |zone: ConfidenceZone| self.confidence.iter().filter(|&&c| c == zone.code()).count();
        let buildings = self.buildings.len();
        let mean_building_score = if buildings > 0 {
            self.buildings.iter().map(|b| b.building_score).sum::<f64>() / buildings as f64
        } else {
            0.0
        };

        DetectionSummary {
            s1_scene_count: self.s1_scene_count,
            high_confidence_pixels: count_zone(ConfidenceZone::High),
            medium_confidence_pixels: count_zone(ConfidenceZone::Medium),
            raw_footprints: self.footprints.len(),
            raw_footprint_area_m2: self.footprints.iter().map(|f| f.area_m2).sum(),
            buildings,
            building_area_m2: self.buildings.iter().map(|b| b.area_m2).sum(),
            rejected: self.footprints.len().saturating_sub(buildings),
            mean_building_score,
        }
    }
}

impl fmt::Display for DetectionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Detection Summary ===")?;
        writeln!(f, "  S1 scenes used         : {}", self.s1_scene_count)?;
        writeln!(f, "  High-confidence pixels : {}", self.high_confidence_pixels)?;
        writeln!(f, "  Medium-confidence px   : {}", self.medium_confidence_pixels)?;
        writeln!(f, "  Raw footprints         : {}", self.raw_footprints)?;
        writeln!(f, "  Raw footprint area     : {:.0} m2", self.raw_footprint_area_m2)?;
        writeln!(f, "  Building footprints    : {}", self.buildings)?;
        writeln!(f, "  Building area          : {:.0} m2", self.building_area_m2)?;
        writeln!(f, "  Rejected as noise      : {}", self.rejected)?;
        write!(f, "  Avg building score     : {:.3}", self.mean_building_score)
    }
}

/// Runs the sub-canopy detection pipeline on one pre-aligned imagery bundle
#[derive(Debug, Clone)]
pub struct SubCanopyAnalyser {
    aoi: AreaOfInterest,
    imagery: ImageryData,
    params: AnalysisParams,
}

impl SubCanopyAnalyser {
    /// Validate parameters and inputs.
    ///
    /// Configuration errors (weights, thresholds) are reported before data
    /// errors (missing bands, empty stacks, mismatched grids).
    pub fn new(aoi: AreaOfInterest, imagery: ImageryData, params: AnalysisParams) -> DetectResult<Self> {
        params.validate()?;

        imagery.s1.find_band_index("vv")?;
        imagery.s1.find_band_index("vh")?;
        for band in OPTICAL_BANDS {
            imagery.s2.band_index(band)?;
        }

        if imagery.s1_count() == 0 {
            return Err(DetectionError::NoScenes("co-polarized SAR channel".to_string()));
        }
        if imagery.s2_count() == 0 {
            return Err(DetectionError::NoScenes("optical stack".to_string()));
        }

        let grid = imagery.s1.grid_shape();
        if imagery.s2.grid_shape() != grid {
            return Err(DetectionError::DimensionMismatch(format!(
                "optical grid {:?} differs from SAR grid {:?}",
                imagery.s2.grid_shape(),
                grid
            )));
        }

        log::debug!(
            "Analyser for '{}': {} SAR scenes, {} optical scenes, grid {:?}",
            aoi.label,
            imagery.s1_count(),
            imagery.s2_count(),
            grid
        );
        log::debug!("Parameters: {:?}", params);

        Ok(Self { aoi, imagery, params })
    }

    /// Analyser with default parameters
    pub fn with_defaults(aoi: AreaOfInterest, imagery: ImageryData) -> DetectResult<Self> {
        Self::new(aoi, imagery, AnalysisParams::default())
    }

    pub fn params(&self) -> &AnalysisParams {
        &self.params
    }

    pub fn aoi(&self) -> &AreaOfInterest {
        &self.aoi
    }

    /// Execute the nine pipeline stages
    pub fn run(&self) -> DetectResult<AnalysisResult> {
        let p = &self.params;
        let imagery = &self.imagery;

        log::info!("[1/9] Computing SAR temporal statistics");
        let stats = compute_temporal_stats(&imagery.s1)?;

        log::info!("[2/9] Deriving SAR indicators");
        let stability = stability(&stats.co_mean, &stats.co_std, p.stability_floor);
        let pol_ratio = polarimetric_ratio(&stats.co_mean, &stats.cross_mean, p.pol_ratio_min, p.pol_ratio_max);
        let co_mean_db = stats.co_mean_db();
        let texture = texture(&co_mean_db, p.texture_kernel_radius);
        let sar_anomaly = gaussian_anomaly(&co_mean_db, p.anomaly_kernel_radius, p.anomaly_sigma);
        let cross_pol = cross_pol_stability(stats.co_stack.view(), stats.cross_stack.view());
        let coherence = coherence_proxy(stats.co_stack.view());
        let seasonal = seasonal_invariance(stats.co_stack.view(), &stats.times);

        log::info!("[3/9] Cloud-masking optical stack and computing spectral indices");
        let optical = compute_optical_products(&imagery.s2)?;
        let ndbi_anomaly = gaussian_anomaly(&optical.ndbi, p.anomaly_kernel_radius, p.anomaly_sigma);
        let optical_ind = optical_indicator(&ndbi_anomaly, &optical.ndvi);

        log::info!("[4/9] Building validity, forest and terrain masks");
        let grid = stats.co_mean.dim();
        let validity = validity_mask(&stats.co_mean, &optical.ndvi, &imagery.dem, p.edge_erosion_px);
        let forest = forest_mask(&optical.ndvi, &optical.ndwi, p.forest_ndvi_threshold, p.water_ndwi_threshold);
        let (res_x, res_y) = imagery.pixel_spacing();
        let slope = slope_degrees(&align_dem(&imagery.dem, grid), (res_y, res_x));
        let gentle = slope_mask(&slope, p.slope_threshold);
        let combined = combine_masks(&validity, &forest, &gentle);
        log::debug!(
            "Mask coverage: validity {}, forest {}, slope {}, combined {} of {} pixels",
            count_set(&validity),
            count_set(&forest),
            count_set(&gentle),
            count_set(&combined),
            combined.len()
        );

        log::info!("[5/9] Fusing 8 indicators into probability");
        let indicators = IndicatorSet {
            stability: &stability,
            pol_ratio: &pol_ratio,
            texture: &texture,
            anomaly: &sar_anomaly,
            optical: &optical_ind,
            cross_pol: &cross_pol,
            coherence: &coherence,
            seasonal: &seasonal,
        };
        let probability = fuse(&indicators, &p.weights, &combined);

        log::info!("[6/9] Assigning confidence zones");
        let confidence = classify_confidence(&probability, p.thresh_medium, p.thresh_high);

        log::info!("[7/9] Morphological cleaning");
        let cleaned_probability = morphological_open(&probability, p.thresh_medium, OPENING_ITERATIONS);

        log::info!("[8/9] Extracting footprints");
        let transform = GeoTransform::from_coords(&imagery.x_coords, &imagery.y_coords, &self.aoi);
        let footprints = extract_footprints(
            &cleaned_probability,
            &transform,
            p.thresh_medium,
            p.min_footprint_area,
            p.connectivity,
        );

        log::info!("[9/9] Regularizing building footprints");
        let buildings = regularize_footprints(&footprints, &probability, &optical.ndwi, &transform, p);

        let (height, width) = grid;
        let result = AnalysisResult {
            probability,
            confidence,
            cleaned_probability,
            stability,
            pol_ratio,
            texture,
            sar_anomaly,
            optical_indicator: optical_ind,
            cross_pol_stability: cross_pol,
            coherence_proxy: coherence,
            seasonal_invariance: seasonal,
            validity_mask: validity,
            forest_mask: forest,
            slope_mask: gentle,
            ndvi: optical.ndvi,
            ndwi: optical.ndwi,
            ndbi: optical.ndbi,
            rgb_composite: optical.rgb,
            footprints,
            buildings,
            s1_scene_count: stats.scene_count(),
            transform,
            crs_wkt: self.aoi.crs_wkt.clone(),
            height,
            width,
            params: p.clone(),
        };

        log::info!("{}", result.summary());
        Ok(result)
    }
}

fn count_set(mask: &Mask) -> usize {
    mask.iter().filter(|m| **m).count()
}
