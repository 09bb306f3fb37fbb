//! subcanopy: sub-canopy structure detection from fused SAR, optical and
//! terrain rasters.
//!
//! Multi-temporal Sentinel-1 backscatter statistics, Sentinel-2 spectral
//! indices and terrain slope are fused into a per-pixel detection
//! probability. High-probability regions are vectorized and regularized into
//! building-like footprints.
//!
//! The crate performs no I/O: it consumes pre-aligned raster stacks and
//! returns an in-memory [`AnalysisResult`] for export collaborators.
//!
//! ```no_run
//! use subcanopy::{AnalysisParams, SubCanopyAnalyser};
//! # fn load() -> (subcanopy::AreaOfInterest, subcanopy::ImageryData) { unimplemented!() }
//!
//! let (aoi, imagery) = load();
//! let analyser = SubCanopyAnalyser::new(aoi, imagery, AnalysisParams::default())?;
//! let result = analyser.run()?;
//! println!("{}", result.summary());
//! # Ok::<(), subcanopy::DetectionError>(())
//! ```

pub mod types;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    AreaOfInterest, BandStack, BoundingBox, DetectResult, DetectionError, GeoTransform, ImageryData,
    Mask, Raster,
};

pub use crate::core::{
    AnalysisParams, AnalysisResult, BuildingFootprint, ConfidenceZone, Connectivity, DetectionSummary,
    FusionWeights, RawFootprint, RegularizationWeights, SubCanopyAnalyser,
};
