use approx::assert_relative_eq;
use chrono::{TimeZone, Utc};
use geo::Area;
use ndarray::Array4;

use subcanopy::core::fusion::morphological_open;
use subcanopy::core::regularize::{regularize_footprints, score_footprint, ScoringSurfaces};
use subcanopy::core::sar_indicators::compute_temporal_stats;
use subcanopy::core::vectorize::extract_footprints;
use subcanopy::{AnalysisParams, BandStack, Connectivity, GeoTransform, Raster, RegularizationWeights};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn transform() -> GeoTransform {
    GeoTransform::from_origin(400_000.0, 2_000_500.0, 10.0, 10.0)
}

/// 20-scene 50 x 60 stack: dim 0.1 background with a bright 0.9 square at
/// rows 20..25, cols 30..35
fn bright_square_stack() -> BandStack {
    let data = Array4::from_shape_fn((20, 2, 50, 60), |(_, b, i, j)| {
        let inside = (20..25).contains(&i) && (30..35).contains(&j);
        match (b, inside) {
            (0, true) => 0.9,
            (0, false) => 0.1,
            _ => 0.02,
        }
    });
    let times = (0..20)
        .map(|t| Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap() + chrono::Duration::days(18 * t))
        .collect();
    BandStack::new(vec!["vv".to_string(), "vh".to_string()], data, times).unwrap()
}

#[test]
fn test_bright_square_yields_one_building() {
    init_logging();
    let stats = compute_temporal_stats(&bright_square_stack()).unwrap();
    let surface = stats.co_mean;
    let gt = transform();
    let params = AnalysisParams::default();

    let cleaned = morphological_open(&surface, 0.5, 1);
    let raw = extract_footprints(&cleaned, &gt, 0.5, params.min_footprint_area, Connectivity::Four);
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].pixel_count, 25);

    let ndwi = Raster::from_elem(surface.dim(), -0.2);
    let buildings = regularize_footprints(&raw, &surface, &ndwi, &gt, &params);
    assert_eq!(buildings.len(), 1);

    let building = &buildings[0];
    assert!(building.is_rectangular);
    assert!(building.rectangularity > 0.8);
    assert!((building.area_m2 - 2500.0).abs() <= gt.pixel_area());
    assert!((building.polygon.unsigned_area() - 2500.0).abs() <= gt.pixel_area());
    assert_relative_eq!(building.prob_mean, 0.9, epsilon = 1e-4);
    assert_relative_eq!(building.aspect_ratio, 1.0);

    // Covers the square: rows 20..25 and cols 30..35 of the grid
    let (x0, y0) = gt.pixel_to_map(30.0, 20.0);
    let (x1, y1) = gt.pixel_to_map(35.0, 25.0);
    for c in building.polygon.exterior().coords() {
        assert!(c.x >= x0 - 1e-6 && c.x <= x1 + 1e-6);
        assert!(c.y <= y0 + 1e-6 && c.y >= y1 - 1e-6);
    }
}

#[test]
fn test_wet_candidate_scores_strictly_lower() {
    init_logging();
    let stats = compute_temporal_stats(&bright_square_stack()).unwrap();
    let gt = transform();
    let raw = extract_footprints(&stats.co_mean, &gt, 0.5, 80.0, Connectivity::Four);
    assert_eq!(raw.len(), 1);

    let weights = RegularizationWeights::default();
    let dry_surfaces = ScoringSurfaces::new(&stats.co_mean, &Raster::from_elem((50, 60), -0.1));
    let wet_surfaces = ScoringSurfaces::new(&stats.co_mean, &Raster::from_elem((50, 60), 0.3));
    let dry = score_footprint(&raw[0], &dry_surfaces, &gt, &weights).unwrap();
    let wet = score_footprint(&raw[0], &wet_surfaces, &gt, &weights).unwrap();

    assert!(wet.building_score < dry.building_score);
    assert!(wet.ndwi_mean > 0.29 && dry.ndwi_mean < 0.0);
    assert_eq!(dry.rectangularity, wet.rectangularity);
}

#[test]
fn test_area_filter_threshold_property() {
    // 850 m^2 over 100 m^2 pixels: 8 pixels dropped, 9 kept
    let gt = transform();
    let min_area = 850.0;
    let n = (min_area / gt.pixel_area()).floor() as usize;

    let mut surface = Raster::from_elem((12, 30), f32::NAN);
    for j in 0..n {
        surface[[2, 1 + j]] = 0.8;
    }
    for j in 0..=n {
        surface[[8, 1 + j]] = 0.8;
    }

    let raw = extract_footprints(&surface, &gt, 0.45, min_area, Connectivity::Four);
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].pixel_count, n + 1);

    // Exactly on the boundary: 8 pixels at 800 m^2 are still excluded
    let raw = extract_footprints(&surface, &gt, 0.45, 800.0, Connectivity::Four);
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].pixel_count, 9);
}

#[test]
fn test_empty_surface_gives_empty_collections() {
    let surface = Raster::from_elem((20, 20), 0.2);
    let gt = transform();
    let raw = extract_footprints(&surface, &gt, 0.45, 80.0, Connectivity::Four);
    assert!(raw.is_empty());
    let buildings = regularize_footprints(&raw, &surface, &surface, &gt, &AnalysisParams::default());
    assert!(buildings.is_empty());
}
