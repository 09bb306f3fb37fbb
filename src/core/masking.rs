use ndarray::Array2;

use crate::core::raster_ops::{gradient, resample_bilinear};
use crate::types::{Mask, Raster, RasterValue};

/// Binary erosion with a 3x3 square structuring element.
///
/// Pixels outside the grid count as unset, so the mask shrinks away from the
/// raster border as well.
pub fn binary_erode(mask: &Mask, iterations: usize) -> Mask {
    let mut result = mask.clone();
    let (height, width) = result.dim();

    for _ in 0..iterations {
        let mut next = result.clone();
        for i in 0..height {
            for j in 0..width {
                if !result[[i, j]] {
                    continue;
                }
                let mut all_set = true;
                'window: for di in -1isize..=1 {
                    for dj in -1isize..=1 {
                        let ni = i as isize + di;
                        let nj = j as isize + dj;
                        if ni < 0
                            || nj < 0
                            || ni >= height as isize
                            || nj >= width as isize
                            || !result[[ni as usize, nj as usize]]
                        {
                            all_set = false;
                            break 'window;
                        }
                    }
                }
                if !all_set {
                    next[[i, j]] = false;
                }
            }
        }
        result = next;
    }

    result
}

/// Binary dilation with a 3x3 square structuring element
pub fn binary_dilate(mask: &Mask, iterations: usize) -> Mask {
    let mut result = mask.clone();
    let (height, width) = result.dim();

    for _ in 0..iterations {
        let mut next = result.clone();
        for i in 0..height {
            for j in 0..width {
                if result[[i, j]] {
                    continue;
                }
                let i0 = i.saturating_sub(1);
                let j0 = j.saturating_sub(1);
                let i1 = (i + 1).min(height - 1);
                let j1 = (j + 1).min(width - 1);
                let mut any_set = false;
                'window: for ni in i0..=i1 {
                    for nj in j0..=j1 {
                        if result[[ni, nj]] {
                            any_set = true;
                            break 'window;
                        }
                    }
                }
                if any_set {
                    next[[i, j]] = true;
                }
            }
        }
        result = next;
    }

    result
}

/// Pixels where every sensor has data, eroded inward by `edge_erosion_px`.
///
/// An elevation raster on a different grid is checked later through the
/// slope mask and counts as valid here.
pub fn validity_mask(co_mean: &Raster, ndvi: &Raster, dem: &Raster, edge_erosion_px: usize) -> Mask {
    let dem_on_grid = dem.dim() == co_mean.dim();
    let mask = Array2::from_shape_fn(co_mean.dim(), |(i, j)| {
        co_mean[[i, j]].is_finite()
            && ndvi[[i, j]].is_finite()
            && (!dem_on_grid || dem[[i, j]].is_finite())
    });

    if edge_erosion_px > 0 {
        binary_erode(&mask, edge_erosion_px)
    } else {
        mask
    }
}

/// Vegetated, non-water pixels: `ndvi >= ndvi_threshold && ndwi < ndwi_threshold`
pub fn forest_mask(ndvi: &Raster, ndwi: &Raster, ndvi_threshold: f64, ndwi_threshold: f64) -> Mask {
    let mut mask = Mask::from_elem(ndvi.dim(), false);
    ndarray::Zip::from(&mut mask)
        .and(ndvi)
        .and(ndwi)
        .for_each(|m, &veg, &water| {
            *m = (veg as f64) >= ndvi_threshold && (water as f64) < ndwi_threshold;
        });
    mask
}

/// Bring the elevation raster onto the analysis grid.
///
/// A mismatched grid is resampled bilinearly with a warning rather than
/// rejected.
pub fn align_dem(dem: &Raster, shape: (usize, usize)) -> Raster {
    if dem.dim() == shape {
        return dem.clone();
    }
    log::warn!(
        "Elevation grid {:?} differs from analysis grid {:?}; resampling bilinearly",
        dem.dim(),
        shape
    );
    resample_bilinear(dem, shape)
}

/// Terrain slope in degrees.
///
/// `spacing` is the (row, col) pixel size in meters. Missing elevations are
/// propagated as missing slope.
pub fn slope_degrees(dem: &Raster, spacing: (f64, f64)) -> Raster {
    let elevation = dem.mapv(|v| v as f64);
    let (dz_dy, dz_dx) = gradient(elevation.view(), spacing);

    let mut slope = Raster::zeros(dem.dim());
    ndarray::Zip::from(&mut slope)
        .and(&dz_dy)
        .and(&dz_dx)
        .for_each(|s, &gy, &gx| {
            *s = (gx * gx + gy * gy).sqrt().atan().to_degrees() as RasterValue;
        });
    slope
}

/// Gentle terrain: `slope < slope_threshold` (missing slope is excluded)
pub fn slope_mask(slope: &Raster, slope_threshold: f64) -> Mask {
    slope.mapv(|s| (s as f64) < slope_threshold)
}

/// Logical AND of the three masks
pub fn combine_masks(validity: &Mask, forest: &Mask, slope: &Mask) -> Mask {
    let mut combined = validity.clone();
    ndarray::Zip::from(&mut combined)
        .and(forest)
        .and(slope)
        .for_each(|c, &f, &s| *c = *c && f && s);
    combined
}
