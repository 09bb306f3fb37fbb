//! Building-likeness scoring and geometry regularization of raw footprints.
//!
//! Each raw blob gets seven normalized component scores (rectangularity,
//! compactness, solidity, edge sharpness, size, detection probability and a
//! water penalty). Their weighted sum is the building score. Blobs that pass
//! the hard filters are replaced by their minimum rotated rectangle when
//! clearly rectangular, by their convex hull otherwise.

use geo::{Area, Centroid, ConvexHull, Coord, Euclidean, Length, MinimumRotatedRect, Polygon};
use ndarray::Array2;
use serde::Serialize;

use crate::core::params::{AnalysisParams, RegularizationWeights};
use crate::core::raster_ops::gradient_magnitude;
use crate::core::vectorize::{round_to, RawFootprint};
use crate::types::{GeoTransform, Raster, EPSILON};

/// Normalization ceilings of the shape and probability scores
const RECTANGULARITY_TARGET: f64 = 0.70;
const COMPACTNESS_TARGET: f64 = 0.50;
const SOLIDITY_TARGET: f64 = 0.75;
const EDGE_SCALE: f64 = 10.0;
const PROBABILITY_TARGET: f64 = 0.60;

/// Size appropriateness breakpoints (m^2)
const MIN_PLAUSIBLE_AREA: f64 = 30.0;
const TYPICAL_MAX_AREA: f64 = 5_000.0;
const SIZE_ZERO_AREA: f64 = 20_000.0;

/// Shape tests for the rectangle geometry beyond `min_rectangularity`
const RECT_MIN_COMPACTNESS: f64 = 0.20;
const RECT_MAX_ASPECT: f64 = 8.0;

/// Boundary points sampled for the water penalty
const NDWI_BOUNDARY_SAMPLES: usize = 8;
/// Minimum boundary points sampled for edge sharpness
const MIN_EDGE_SAMPLES: usize = 8;

/// A regularized building footprint with its scoring attributes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildingFootprint {
    /// Minimum rotated rectangle or convex hull, in map coordinates
    #[serde(skip)]
    pub polygon: Polygon<f64>,
    pub area_m2: f64,
    pub prob_mean: f64,
    pub prob_max: f64,
    pub compactness: f64,
    pub rectangularity: f64,
    pub solidity: f64,
    pub aspect_ratio: f64,
    pub edge_sharpness: f64,
    pub ndwi_mean: f64,
    pub building_score: f64,
    pub is_rectangular: bool,
}

/// Unrounded shape metrics and component scores of one raw footprint
#[derive(Debug, Clone)]
pub struct FootprintScore {
    /// Geometric polygon area (map units squared)
    pub area: f64,
    pub compactness: f64,
    pub rectangularity: f64,
    pub solidity: f64,
    pub aspect_ratio: f64,
    pub edge_sharpness: f64,
    pub ndwi_mean: f64,
    pub building_score: f64,
    pub min_rotated_rect: Polygon<f64>,
    pub convex_hull: Polygon<f64>,
}

/// Rasters sampled while scoring, prepared once per run
pub struct ScoringSurfaces {
    /// Gradient magnitude of the probability surface (NaN as 0)
    pub gradient: Array2<f64>,
    /// NDWI with NaN as 0
    pub ndwi: Array2<f64>,
}

impl ScoringSurfaces {
    pub fn new(probability: &Raster, ndwi: &Raster) -> Self {
        let prob = probability.mapv(|p| if p.is_nan() { 0.0 } else { p as f64 });
        let ndwi = ndwi.mapv(|w| if w.is_nan() { 0.0 } else { w as f64 });
        Self {
            gradient: gradient_magnitude(prob.view()),
            ndwi,
        }
    }
}

/// Arc-length walk along the exterior ring followed by the holes
struct BoundaryWalker {
    segments: Vec<(Coord<f64>, Coord<f64>, f64)>,
    total: f64,
}

impl BoundaryWalker {
    fn new(polygon: &Polygon<f64>) -> Self {
        let mut segments = Vec::new();
        let mut total = 0.0;
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            for line in ring.lines() {
                let len = (line.end.x - line.start.x).hypot(line.end.y - line.start.y);
                segments.push((line.start, line.end, len));
                total += len;
            }
        }
        Self { segments, total }
    }

    /// Point at `fraction` of the total boundary length
    fn point_at(&self, fraction: f64) -> Option<Coord<f64>> {
        let mut remaining = fraction.clamp(0.0, 1.0) * self.total;
        for &(start, end, len) in &self.segments {
            if remaining <= len && len > 0.0 {
                let t = remaining / len;
                return Some(Coord {
                    x: start.x + t * (end.x - start.x),
                    y: start.y + t * (end.y - start.y),
                });
            }
            remaining -= len;
        }
        self.segments.last().map(|&(_, end, _)| end)
    }

    /// `count` points evenly spaced from the start, end point excluded
    fn sample(&self, count: usize) -> Vec<Coord<f64>> {
        (0..count)
            .filter_map(|k| self.point_at(k as f64 / count as f64))
            .collect()
    }
}

/// Raster value at a map position, `None` outside the grid
fn sample_raster(raster: &Array2<f64>, transform: &GeoTransform, point: Coord<f64>) -> Option<f64> {
    let (col, row) = transform.map_to_pixel(point.x, point.y);
    let (rows, cols) = raster.dim();
    if row < 0 || col < 0 || row as usize >= rows || col as usize >= cols {
        return None;
    }
    Some(raster[[row as usize, col as usize]])
}

/// 0.1 below 30 m^2, 1.0 up to 5000 m^2, linear decay to 0 at 20000 m^2
pub fn size_score(area_m2: f64) -> f64 {
    if area_m2 < MIN_PLAUSIBLE_AREA {
        0.1
    } else if area_m2 <= TYPICAL_MAX_AREA {
        1.0
    } else if area_m2 <= SIZE_ZERO_AREA {
        (1.0 - (area_m2 - TYPICAL_MAX_AREA) / (SIZE_ZERO_AREA - TYPICAL_MAX_AREA)).max(0.0)
    } else {
        0.0
    }
}

/// `max(0, 1 - 5 * max(ndwi, 0))`
pub fn water_score(ndwi_mean: f64) -> f64 {
    (1.0 - ndwi_mean.max(0.0) * 5.0).max(0.0)
}

/// Longest over shortest edge of a rectangle
fn aspect_ratio(rect: &Polygon<f64>) -> f64 {
    let mut edges: Vec<f64> = rect
        .exterior()
        .lines()
        .map(|l| (l.end.x - l.start.x).hypot(l.end.y - l.start.y))
        .collect();
    if edges.is_empty() {
        return 1.0;
    }
    edges.sort_by(|a, b| a.total_cmp(b));
    edges[edges.len() - 1] / edges[0].max(0.01)
}

/// Score one raw footprint. Returns `None` for degenerate polygons.
pub fn score_footprint(
    raw: &RawFootprint,
    surfaces: &ScoringSurfaces,
    transform: &GeoTransform,
    weights: &RegularizationWeights,
) -> Option<FootprintScore> {
    let polygon = &raw.polygon;
    let area = polygon.unsigned_area();
    if area <= 0.0 {
        return None;
    }

    let perimeter = polygon.exterior().length::<Euclidean>()
        + polygon
            .interiors()
            .iter()
            .map(|ring| ring.length::<Euclidean>())
            .sum::<f64>();
    let compactness = if perimeter > 0.0 {
        4.0 * std::f64::consts::PI * area / (perimeter * perimeter)
    } else {
        0.0
    };

    let convex_hull = polygon.convex_hull();
    let solidity = area / convex_hull.unsigned_area().max(EPSILON);

    let min_rotated_rect = polygon.minimum_rotated_rect()?;
    let mrr_area = min_rotated_rect.unsigned_area();
    let rectangularity = area / if mrr_area > 0.0 { mrr_area } else { EPSILON };
    let aspect_ratio = aspect_ratio(&min_rotated_rect);

    let boundary = BoundaryWalker::new(polygon);
    let n_edge = ((boundary.total / transform.pixel_width.abs()) as usize).max(MIN_EDGE_SAMPLES);
    let gradients: Vec<f64> = boundary
        .sample(n_edge)
        .into_iter()
        .filter_map(|pt| sample_raster(&surfaces.gradient, transform, pt))
        .collect();
    let edge_sharpness = gradients.iter().sum::<f64>() / gradients.len().max(1) as f64;

    let water_points = polygon
        .centroid()
        .map(|c| c.0)
        .into_iter()
        .chain(boundary.sample(NDWI_BOUNDARY_SAMPLES));
    let ndwi_samples: Vec<f64> = water_points
        .filter_map(|pt| sample_raster(&surfaces.ndwi, transform, pt))
        .collect();
    let ndwi_mean = if ndwi_samples.is_empty() {
        0.0
    } else {
        ndwi_samples.iter().sum::<f64>() / ndwi_samples.len() as f64
    };

    let components = [
        (weights.rectangularity, (rectangularity / RECTANGULARITY_TARGET).min(1.0)),
        (weights.compactness, (compactness / COMPACTNESS_TARGET).min(1.0)),
        (weights.solidity, (solidity / SOLIDITY_TARGET).min(1.0)),
        (weights.edge_sharpness, (edge_sharpness * EDGE_SCALE).min(1.0)),
        (weights.size, size_score(raw.area_m2)),
        (weights.probability, (raw.prob_mean / PROBABILITY_TARGET).min(1.0)),
        (weights.water, water_score(ndwi_mean)),
    ];
    let building_score = components.iter().map(|(w, s)| w * s).sum::<f64>();

    Some(FootprintScore {
        area,
        compactness,
        rectangularity,
        solidity,
        aspect_ratio,
        edge_sharpness,
        ndwi_mean,
        building_score,
        min_rotated_rect,
        convex_hull,
    })
}

/// Apply the hard filters and pick the output geometry
fn regularize_one(
    raw: &RawFootprint,
    surfaces: &ScoringSurfaces,
    transform: &GeoTransform,
    params: &AnalysisParams,
) -> Option<BuildingFootprint> {
    let score = score_footprint(raw, surfaces, transform, &params.regularization_weights)?;

    let passes = score.area <= params.max_footprint_area
        && score.compactness >= params.min_compactness
        && score.aspect_ratio <= params.max_aspect_ratio
        && score.solidity >= params.min_solidity
        && score.building_score >= params.min_building_score;
    if !passes {
        log::trace!(
            "Rejected footprint: area {:.1}, compactness {:.3}, aspect {:.2}, solidity {:.3}, score {:.3}",
            score.area,
            score.compactness,
            score.aspect_ratio,
            score.solidity,
            score.building_score
        );
        return None;
    }

    let is_rectangular = score.rectangularity > params.min_rectangularity
        && score.compactness > RECT_MIN_COMPACTNESS
        && (1.0..=RECT_MAX_ASPECT).contains(&score.aspect_ratio);
    let polygon = if is_rectangular {
        score.min_rotated_rect
    } else {
        score.convex_hull
    };

    Some(BuildingFootprint {
        polygon,
        area_m2: raw.area_m2,
        prob_mean: raw.prob_mean,
        prob_max: raw.prob_max,
        compactness: round_to(score.compactness, 4),
        rectangularity: round_to(score.rectangularity, 4),
        solidity: round_to(score.solidity, 4),
        aspect_ratio: round_to(score.aspect_ratio, 2),
        edge_sharpness: round_to(score.edge_sharpness, 4),
        ndwi_mean: round_to(score.ndwi_mean, 4),
        building_score: round_to(score.building_score, 4),
        is_rectangular,
    })
}

/// Score, filter and regularize raw footprints.
///
/// Edge sharpness is measured on `probability`, the water penalty on `ndwi`.
/// The result is sorted by descending building score; an empty input gives
/// an empty output.
pub fn regularize_footprints(
    raw: &[RawFootprint],
    probability: &Raster,
    ndwi: &Raster,
    transform: &GeoTransform,
    params: &AnalysisParams,
) -> Vec<BuildingFootprint> {
    if raw.is_empty() {
        return Vec::new();
    }
    let surfaces = ScoringSurfaces::new(probability, ndwi);

    #[cfg(feature = "parallel")]
    let mut buildings: Vec<BuildingFootprint> = {
        use rayon::prelude::*;
        raw.par_iter()
            .filter_map(|fp| regularize_one(fp, &surfaces, transform, params))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let mut buildings: Vec<BuildingFootprint> = raw
        .iter()
        .filter_map(|fp| regularize_one(fp, &surfaces, transform, params))
        .collect();

    buildings.sort_by(|a, b| b.building_score.total_cmp(&a.building_score));

    log::debug!(
        "{} of {} raw footprints kept as buildings",
        buildings.len(),
        raw.len()
    );
    buildings
}
