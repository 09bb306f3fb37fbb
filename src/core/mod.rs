//! Sub-canopy detection stages

pub mod params;
pub mod raster_ops;
pub mod sar_indicators;
pub mod advanced_indicators;
pub mod optical;
pub mod masking;
pub mod fusion;
pub mod vectorize;
pub mod regularize;
pub mod pipeline;

// Re-export main types
pub use params::{AnalysisParams, Connectivity, FusionWeights, RegularizationWeights};
pub use sar_indicators::{compute_temporal_stats, TemporalSarStats};
pub use optical::{compute_optical_products, OpticalProducts};
pub use fusion::{classify_confidence, fuse, morphological_open, ConfidenceZone, IndicatorSet};
pub use vectorize::{extract_footprints, label_components, RawFootprint};
pub use regularize::{regularize_footprints, score_footprint, BuildingFootprint, FootprintScore};
pub use pipeline::{AnalysisResult, DetectionSummary, SubCanopyAnalyser};
