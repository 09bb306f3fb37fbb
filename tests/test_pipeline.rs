use approx::assert_relative_eq;
use chrono::{Datelike, TimeZone, Utc};
use ndarray::{Array2, Array4};

use subcanopy::core::sar_indicators::{compute_temporal_stats, stability};
use subcanopy::{
    AnalysisParams, AreaOfInterest, BandStack, BoundingBox, ConfidenceZone, DetectionError, FusionWeights,
    ImageryData, Raster, SubCanopyAnalyser,
};

const ROWS: usize = 50;
const COLS: usize = 60;
const PIXEL: f64 = 10.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn aoi() -> AreaOfInterest {
    AreaOfInterest {
        label: "synthetic".to_string(),
        crs_wkt: "PROJCS[\"WGS 84 / UTM zone 16N\"]".to_string(),
        epsg: Some(32616),
        bbox_utm: BoundingBox {
            min_x: 300_000.0,
            min_y: 1_700_000.0,
            max_x: 300_000.0 + COLS as f64 * PIXEL,
            max_y: 1_700_000.0 + ROWS as f64 * PIXEL,
        },
    }
}

/// 20 scenes, one every 36 days, so every quarter holds at least 3 scenes
fn sar_stack(co_at: impl Fn(usize, usize, usize) -> f32) -> BandStack {
    let n_time = 20;
    let data = Array4::from_shape_fn((n_time, 2, ROWS, COLS), |(t, b, i, j)| {
        if b == 0 {
            co_at(t, i, j)
        } else {
            0.02
        }
    });
    let start = Utc.with_ymd_and_hms(2022, 1, 5, 11, 0, 0).unwrap();
    let times = (0..n_time)
        .map(|t| start + chrono::Duration::days(36 * t as i64))
        .collect();
    BandStack::new(vec!["VV".to_string(), "VH".to_string()], data, times).unwrap()
}

/// Dense tropical forest: NDVI around 0.8, negative NDWI, all scenes clear
fn optical_stack(rows: usize, cols: usize) -> BandStack {
    let names = ["B02", "B03", "B04", "B08", "B11", "SCL"];
    let data = Array4::from_shape_fn((3, names.len(), rows, cols), |(_, b, _, _)| match names[b] {
        "B02" => 250.0,
        "B03" => 450.0,
        "B04" => 300.0,
        "B08" => 3200.0,
        "B11" => 1400.0,
        _ => 4.0,
    });
    let times = (0..3)
        .map(|m| Utc.with_ymd_and_hms(2022, 2 + m, 10, 16, 0, 0).unwrap())
        .collect();
    BandStack::new(names.iter().map(|n| n.to_string()).collect(), data, times).unwrap()
}

fn imagery(s1: BandStack, dem: Raster) -> ImageryData {
    let bbox = aoi().bbox_utm;
    ImageryData {
        s1,
        s2: optical_stack(ROWS, COLS),
        dem,
        x_coords: (0..COLS).map(|j| bbox.min_x + PIXEL / 2.0 + j as f64 * PIXEL).collect(),
        y_coords: (0..ROWS).map(|i| bbox.max_y - PIXEL / 2.0 - i as f64 * PIXEL).collect(),
    }
}

fn assert_unit_range(name: &str, raster: &Raster) {
    for v in raster.iter().filter(|v| v.is_finite()) {
        assert!((0.0..=1.0).contains(v), "{} value {} outside [0, 1]", name, v);
    }
}

#[test]
fn test_uniform_stack_is_fully_stable() {
    init_logging();
    let s1 = sar_stack(|_, _, _| 0.1);
    let stats = compute_temporal_stats(&s1).unwrap();
    let stab = stability(&stats.co_mean, &stats.co_std, 0.7);
    assert_eq!(stab.dim(), (ROWS, COLS));
    for v in stab.iter() {
        assert_relative_eq!(*v, 1.0, epsilon = 1e-6);
    }
}

#[test]
fn test_full_run_on_uniform_forest() -> anyhow::Result<()> {
    init_logging();
    let data = imagery(sar_stack(|_, _, _| 0.1), Raster::from_elem((ROWS, COLS), 120.0));
    let analyser = SubCanopyAnalyser::new(aoi(), data, AnalysisParams::default())?;
    let result = analyser.run()?;

    assert_eq!((result.height, result.width), (ROWS, COLS));
    assert_eq!(result.s1_scene_count, 20);
    assert_eq!(result.rgb_composite.dim(), (ROWS, COLS, 3));
    assert_eq!(result.transform.top_left_x, 300_000.0);
    assert_eq!(result.transform.top_left_y, 1_700_500.0);
    assert_eq!(result.crs_wkt, aoi().crs_wkt);

    for (name, raster) in [
        ("stability", &result.stability),
        ("pol_ratio", &result.pol_ratio),
        ("texture", &result.texture),
        ("sar_anomaly", &result.sar_anomaly),
        ("optical", &result.optical_indicator),
        ("cross_pol", &result.cross_pol_stability),
        ("coherence", &result.coherence_proxy),
        ("seasonal", &result.seasonal_invariance),
        ("probability", &result.probability),
    ] {
        assert_unit_range(name, raster);
    }
    assert!(result.stability.iter().all(|v| *v >= 0.7));

    // Edge erosion of two pixels leaves the interior only
    assert!(!result.validity_mask[[1, 1]]);
    assert!(result.validity_mask[[2, 2]]);
    assert!(result.forest_mask.iter().all(|m| *m));
    assert!(result.slope_mask.iter().all(|m| *m));

    // Missing probability outside the mask, never zero
    assert!(result.probability[[0, 0]].is_nan());
    assert!(result.probability[[25, 30]].is_finite());
    assert_eq!(result.confidence[[0, 0]], ConfidenceZone::Background.code());

    let summary = result.summary();
    assert_eq!(summary.raw_footprints, result.footprints.len());
    assert_eq!(summary.buildings, result.buildings.len());
    assert_eq!(summary.rejected, result.footprints.len() - result.buildings.len());
    let high = result.confidence.iter().filter(|&&c| c == 3).count();
    assert_eq!(summary.high_confidence_pixels, high);
    assert!(summary.to_string().contains("S1 scenes used"));
    Ok(())
}

#[test]
fn test_confidence_zones_follow_probability() -> anyhow::Result<()> {
    init_logging();
    let data = imagery(
        sar_stack(|t, i, j| 0.05 + 0.001 * ((i * 7 + j * 3 + t) % 11) as f32),
        Raster::from_elem((ROWS, COLS), 80.0),
    );
    let result = SubCanopyAnalyser::new(aoi(), data, AnalysisParams::default())?.run()?;
    let p = &result.params;

    for (prob, code) in result.probability.iter().zip(result.confidence.iter()) {
        let expected = if prob.is_nan() {
            0
        } else if *prob as f64 >= p.thresh_high {
            3
        } else if *prob as f64 >= p.thresh_medium {
            2
        } else {
            0
        };
        assert_eq!(*code, expected);
    }

    let mut pairs: Vec<(f32, u8)> = result
        .probability
        .iter()
        .zip(result.confidence.iter())
        .filter(|(p, _)| p.is_finite())
        .map(|(p, c)| (*p, *c))
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    assert!(pairs.windows(2).all(|w| w[0].1 <= w[1].1));
    Ok(())
}

#[test]
fn test_bad_weights_fail_before_any_work() {
    init_logging();
    let params = AnalysisParams {
        weights: FusionWeights {
            stability: 0.15,
            ..FusionWeights::default()
        },
        ..AnalysisParams::default()
    };
    // The optical stack is also broken; the configuration error wins
    let mut data = imagery(sar_stack(|_, _, _| 0.1), Raster::from_elem((ROWS, COLS), 0.0));
    data.s2.band_names[5] = "CLOUD".to_string();

    let err = SubCanopyAnalyser::new(aoi(), data, params).unwrap_err();
    assert!(matches!(err, DetectionError::InvalidWeights { .. }));
    assert!(err.to_string().contains("weights must sum"));
}

#[test]
fn test_exact_weights_are_accepted() {
    let params = AnalysisParams {
        weights: FusionWeights {
            stability: 0.125,
            pol_ratio: 0.125,
            texture: 0.125,
            anomaly: 0.125,
            optical: 0.125,
            cross_pol: 0.125,
            coherence: 0.125,
            seasonal: 0.125,
        },
        ..AnalysisParams::default()
    };
    let data = imagery(sar_stack(|_, _, _| 0.1), Raster::from_elem((ROWS, COLS), 0.0));
    assert!(SubCanopyAnalyser::new(aoi(), data, params).is_ok());
}

#[test]
fn test_missing_band_is_a_data_error() {
    let mut data = imagery(sar_stack(|_, _, _| 0.1), Raster::from_elem((ROWS, COLS), 0.0));
    data.s2.band_names[1] = "B3".to_string();
    match SubCanopyAnalyser::with_defaults(aoi(), data) {
        Err(DetectionError::MissingBand { band, available }) => {
            assert_eq!(band, "B03");
            assert_eq!(available.len(), 6);
        }
        other => panic!("expected MissingBand, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_zero_scenes_is_fatal() {
    let empty = BandStack::new(
        vec!["VV".to_string(), "VH".to_string()],
        Array4::zeros((0, 2, ROWS, COLS)),
        vec![],
    )
    .unwrap();
    let data = imagery(empty, Raster::from_elem((ROWS, COLS), 0.0));
    assert!(matches!(
        SubCanopyAnalyser::with_defaults(aoi(), data),
        Err(DetectionError::NoScenes(_))
    ));
}

#[test]
fn test_mismatched_optical_grid_is_rejected() {
    let mut data = imagery(sar_stack(|_, _, _| 0.1), Raster::from_elem((ROWS, COLS), 0.0));
    data.s2 = optical_stack(ROWS - 1, COLS);
    assert!(matches!(
        SubCanopyAnalyser::with_defaults(aoi(), data),
        Err(DetectionError::DimensionMismatch(_))
    ));
}

#[test]
fn test_coarse_dem_is_resampled() -> anyhow::Result<()> {
    init_logging();
    let coarse = Raster::from_elem((ROWS / 2, COLS / 2), 35.0);
    let data = imagery(sar_stack(|_, _, _| 0.1), coarse);
    let result = SubCanopyAnalyser::with_defaults(aoi(), data)?.run()?;
    assert_eq!(result.slope_mask.dim(), (ROWS, COLS));
    assert!(result.slope_mask.iter().all(|m| *m));
    Ok(())
}

#[test]
fn test_steep_terrain_is_masked() -> anyhow::Result<()> {
    init_logging();
    // 3 m rise per 10 m column: about 16.7 degrees
    let ramp = Array2::from_shape_fn((ROWS, COLS), |(_, j)| 3.0 * j as f32);
    let data = imagery(sar_stack(|_, _, _| 0.1), ramp);
    let result = SubCanopyAnalyser::with_defaults(aoi(), data)?.run()?;
    assert!(result.slope_mask.iter().all(|m| !*m));
    assert!(result.probability.iter().all(|p| p.is_nan()));
    assert!(result.footprints.is_empty());
    assert!(result.buildings.is_empty());
    assert_eq!(result.summary().mean_building_score, 0.0);
    Ok(())
}

#[test]
fn test_sparse_season_coverage_is_neutral() -> anyhow::Result<()> {
    init_logging();
    let mut s1 = sar_stack(|t, _, _| 0.1 + 0.01 * t as f32);
    // Every scene in January
    s1.times = s1
        .times
        .iter()
        .enumerate()
        .map(|(t, _)| Utc.with_ymd_and_hms(2022, 1, 1 + t as u32, 0, 0, 0).unwrap())
        .collect();
    assert!(s1.times.iter().all(|t| t.month() == 1));
    let result = SubCanopyAnalyser::with_defaults(aoi(), imagery(s1, Raster::zeros((ROWS, COLS))))?.run()?;
    assert!(result.seasonal_invariance.iter().all(|v| *v == 0.5));
    Ok(())
}
