use chrono::{DateTime, Utc};
use ndarray::{Array2, Array4, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

/// Real-valued raster sample (linear power, reflectance, index or score)
pub type RasterValue = f32;

/// 2D raster aligned to the analysis grid (row x col)
pub type Raster = Array2<RasterValue>;

/// 2D boolean mask aligned to the analysis grid
pub type Mask = Array2<bool>;

/// Epsilon used for every guarded denominator
pub const EPSILON: f64 = 1e-10;

/// Projected bounding box (map units, usually meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Resolved area of interest, as handed over by the AOI collaborator.
///
/// Only the CRS and bounds are consumed here; masking never uses the AOI
/// geometry itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaOfInterest {
    /// Human readable label (place name, file name, ...)
    pub label: String,
    /// Projected CRS as WKT
    pub crs_wkt: String,
    /// EPSG code of the projected CRS, when known
    pub epsg: Option<u32>,
    /// Bounding box in the projected CRS
    pub bbox_utm: BoundingBox,
}

/// Affine geotransform in GDAL order.
///
/// `x = top_left_x + col * pixel_width + row * rotation_x`
/// `y = top_left_y + col * rotation_y + row * pixel_height`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Default pixel size used when the grid has fewer than two coordinates
    pub const DEFAULT_PIXEL_SIZE: f64 = 10.0;

    /// North-up transform from the top-left corner and positive pixel sizes
    pub fn from_origin(x_min: f64, y_max: f64, res_x: f64, res_y: f64) -> Self {
        Self {
            top_left_x: x_min,
            pixel_width: res_x,
            rotation_x: 0.0,
            top_left_y: y_max,
            rotation_y: 0.0,
            pixel_height: -res_y,
        }
    }

    /// Derive the transform from pixel-centre coordinate vectors.
    ///
    /// Falls back to the AOI bounding box corner when the grid carries no
    /// coordinates at all.
    pub fn from_coords(x_coords: &[f64], y_coords: &[f64], aoi: &AreaOfInterest) -> Self {
        let res_x = if x_coords.len() > 1 {
            x_coords[1] - x_coords[0]
        } else {
            Self::DEFAULT_PIXEL_SIZE
        };
        let res_y = if y_coords.len() > 1 {
            y_coords[1] - y_coords[0]
        } else {
            -Self::DEFAULT_PIXEL_SIZE
        };

        let x_min = match x_coords.first() {
            Some(x0) => x0 - res_x / 2.0,
            None => aoi.bbox_utm.min_x,
        };
        // res_y is negative for north-up grids
        let y_max = match y_coords.first() {
            Some(y0) => y0 - res_y / 2.0,
            None => aoi.bbox_utm.max_y,
        };

        Self::from_origin(x_min, y_max, res_x.abs(), res_y.abs())
    }

    /// Ground area covered by one pixel
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height).abs()
    }

    /// Map coordinates of a pixel corner (fractional col/row allowed)
    pub fn pixel_to_map(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Pixel indices (col, row) containing a map position, truncated toward zero
    pub fn map_to_pixel(&self, x: f64, y: f64) -> (isize, isize) {
        let col = ((x - self.top_left_x) / self.pixel_width) as isize;
        let row = ((y - self.top_left_y) / self.pixel_height) as isize;
        (col, row)
    }

    /// GDAL-ordered coefficient array
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// Temporal multi-band stack (time x band x row x col) with one timestamp
/// per time slice. Missing samples are NaN.
#[derive(Debug, Clone)]
pub struct BandStack {
    pub band_names: Vec<String>,
    pub data: Array4<RasterValue>,
    pub times: Vec<DateTime<Utc>>,
}

impl BandStack {
    pub fn new(
        band_names: Vec<String>,
        data: Array4<RasterValue>,
        times: Vec<DateTime<Utc>>,
    ) -> DetectResult<Self> {
        let (n_time, n_band, _, _) = data.dim();
        if n_band != band_names.len() {
            return Err(DetectionError::DimensionMismatch(format!(
                "stack has {} bands but {} band names were given",
                n_band,
                band_names.len()
            )));
        }
        if n_time != times.len() {
            return Err(DetectionError::DimensionMismatch(format!(
                "stack has {} time slices but {} timestamps were given",
                n_time,
                times.len()
            )));
        }
        Ok(Self { band_names, data, times })
    }

    pub fn time_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// Spatial shape (rows, cols)
    pub fn grid_shape(&self) -> (usize, usize) {
        let (_, _, rows, cols) = self.data.dim();
        (rows, cols)
    }

    /// Band index by exact name
    pub fn band_index(&self, name: &str) -> DetectResult<usize> {
        self.band_names
            .iter()
            .position(|b| b == name)
            .ok_or_else(|| self.missing(name))
    }

    /// Band index by case-insensitive substring, e.g. "vv" matches "VV" or "vv_gamma0"
    pub fn find_band_index(&self, pattern: &str) -> DetectResult<usize> {
        let needle = pattern.to_lowercase();
        self.band_names
            .iter()
            .position(|b| b.to_lowercase().contains(&needle))
            .ok_or_else(|| self.missing(pattern))
    }

    /// Temporal stack of one band (time x row x col)
    pub fn band(&self, index: usize) -> ArrayView3<'_, RasterValue> {
        self.data.index_axis(Axis(1), index)
    }

    fn missing(&self, name: &str) -> DetectionError {
        DetectionError::MissingBand {
            band: name.to_string(),
            available: self.band_names.clone(),
        }
    }
}

/// Pre-aligned imagery bundle produced by the fetch/harmonize collaborator.
///
/// All rasters share the SAR master grid; the elevation raster may still
/// differ in shape and is then resampled on the fly.
#[derive(Debug, Clone)]
pub struct ImageryData {
    /// Sentinel-1 RTC gamma0, linear power, bands containing "vv" and "vh"
    pub s1: BandStack,
    /// Sentinel-2 L2A reflectance (0-10000) plus the SCL class band
    pub s2: BandStack,
    /// Elevation in meters
    pub dem: Raster,
    /// Pixel-centre x coordinates of the master grid
    pub x_coords: Vec<f64>,
    /// Pixel-centre y coordinates of the master grid
    pub y_coords: Vec<f64>,
}

impl ImageryData {
    pub fn s1_count(&self) -> usize {
        self.s1.time_count()
    }

    pub fn s2_count(&self) -> usize {
        self.s2.time_count()
    }

    /// Absolute pixel spacing (x, y) taken from the coordinate vectors
    pub fn pixel_spacing(&self) -> (f64, f64) {
        let res_x = if self.x_coords.len() > 1 {
            (self.x_coords[1] - self.x_coords[0]).abs()
        } else {
            GeoTransform::DEFAULT_PIXEL_SIZE
        };
        let res_y = if self.y_coords.len() > 1 {
            (self.y_coords[1] - self.y_coords[0]).abs()
        } else {
            GeoTransform::DEFAULT_PIXEL_SIZE
        };
        (res_x, res_y)
    }
}

/// Error types for sub-canopy detection
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("Fusion weights must sum to 1.0 (got {total:.4}). Adjust w_stability ... w_seasonal.")]
    InvalidWeights { total: f64 },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No temporal scenes available for {0}")]
    NoScenes(String),

    #[error("Expected band '{band}' in input stack; got {available:?}")]
    MissingBand { band: String, available: Vec<String> },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for detection operations
pub type DetectResult<T> = Result<T, DetectionError>;
