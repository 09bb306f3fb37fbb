//! Numeric kernels shared by the indicator, masking and regularization stages.
//!
//! Every routine works on finite samples only: NaN marks missing data and is
//! skipped by the statistics, never propagated through a filter window.

use ndarray::{Array2, ArrayView2, Axis};

use crate::types::{Raster, RasterValue, EPSILON};

/// Mean and population standard deviation of the finite samples.
///
/// Returns `(NaN, NaN)` when no sample is finite.
pub fn nan_mean_std<I>(values: I) -> (f64, f64)
where
    I: IntoIterator<Item = f64>,
{
    let finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return (f64::NAN, f64::NAN);
    }

    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let variance = finite.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Mean of the finite samples, NaN when there are none
pub fn nan_mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values.into_iter().filter(|v| v.is_finite()) {
        sum += v;
        count += 1;
    }
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Median of the finite samples; even counts average the two middle values
pub fn nan_median(values: &mut Vec<f64>) -> f64 {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

/// Percentiles of the finite samples with linear interpolation between ranks.
///
/// `percentiles` are in [0, 100]; every entry is NaN when no sample is finite.
pub fn nan_percentiles<'a, I>(values: I, percentiles: &[f64]) -> Vec<f64>
where
    I: IntoIterator<Item = &'a RasterValue>,
{
    let mut finite: Vec<f64> = values
        .into_iter()
        .filter(|v| v.is_finite())
        .map(|&v| v as f64)
        .collect();
    if finite.is_empty() {
        return vec![f64::NAN; percentiles.len()];
    }
    finite.sort_by(|a, b| a.total_cmp(b));

    let last = (finite.len() - 1) as f64;
    percentiles
        .iter()
        .map(|p| {
            let rank = (p / 100.0).clamp(0.0, 1.0) * last;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            finite[lo] + (finite[hi] - finite[lo]) * frac
        })
        .collect()
}

/// Clip that keeps NaN as NaN
#[inline]
pub fn clip(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        value
    } else {
        value.max(lo).min(hi)
    }
}

/// `max(value, EPSILON)` that keeps NaN as NaN
#[inline]
pub fn guard_denominator(value: f64) -> f64 {
    if value.is_nan() {
        value
    } else {
        value.max(EPSILON)
    }
}

/// Replace non-finite samples with `fill`
pub fn fill_missing(image: &Raster, fill: RasterValue) -> Raster {
    image.mapv(|v| if v.is_finite() { v } else { fill })
}

/// Mirror an out-of-range index back into `0..len` (d c b a | a b c d | d c b a)
#[inline]
fn reflect_index(index: isize, len: usize) -> usize {
    let n = len as isize;
    if n == 1 {
        return 0;
    }
    let period = 2 * n;
    let mut i = index.rem_euclid(period);
    if i >= n {
        i = period - 1 - i;
    }
    i as usize
}

/// Separable 1D correlation along one axis with mirrored borders
fn correlate_axis(image: &Array2<f64>, kernel: &[f64], axis: Axis) -> Array2<f64> {
    let (rows, cols) = image.dim();
    let half = (kernel.len() / 2) as isize;
    let mut out = Array2::<f64>::zeros((rows, cols));

    for i in 0..rows {
        for j in 0..cols {
            let mut acc = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let offset = k as isize - half;
                let value = if axis == Axis(0) {
                    image[[reflect_index(i as isize + offset, rows), j]]
                } else {
                    image[[i, reflect_index(j as isize + offset, cols)]]
                };
                acc += w * value;
            }
            out[[i, j]] = acc;
        }
    }

    out
}

/// Box (moving average) filter of odd width `size` with mirrored borders
pub fn uniform_filter(image: ArrayView2<'_, f64>, size: usize) -> Array2<f64> {
    let size = size.max(1);
    let kernel = vec![1.0 / size as f64; size];
    let rows_done = correlate_axis(&image.to_owned(), &kernel, Axis(0));
    correlate_axis(&rows_done, &kernel, Axis(1))
}

/// Normalized 1D Gaussian kernel truncated at `truncate * sigma`
pub fn gaussian_kernel(sigma: f64, truncate: f64) -> Vec<f64> {
    let radius = (truncate * sigma + 0.5) as isize;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-((x * x) as f64) / denom).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|w| *w /= total);
    kernel
}

/// Gaussian smoothing (truncate = 4 sigma) with mirrored borders
pub fn gaussian_filter(image: ArrayView2<'_, f64>, sigma: f64) -> Array2<f64> {
    if sigma <= 0.0 {
        return image.to_owned();
    }
    let kernel = gaussian_kernel(sigma, 4.0);
    let rows_done = correlate_axis(&image.to_owned(), &kernel, Axis(0));
    correlate_axis(&rows_done, &kernel, Axis(1))
}

/// Gradient along (rows, cols) with central differences in the interior and
/// one-sided differences on the border. `spacing` is (row spacing, col spacing).
pub fn gradient(image: ArrayView2<'_, f64>, spacing: (f64, f64)) -> (Array2<f64>, Array2<f64>) {
    let (rows, cols) = image.dim();
    let (dy_step, dx_step) = spacing;
    let mut dy = Array2::<f64>::zeros((rows, cols));
    let mut dx = Array2::<f64>::zeros((rows, cols));

    if rows > 1 {
        for j in 0..cols {
            dy[[0, j]] = (image[[1, j]] - image[[0, j]]) / dy_step;
            dy[[rows - 1, j]] = (image[[rows - 1, j]] - image[[rows - 2, j]]) / dy_step;
            for i in 1..rows - 1 {
                dy[[i, j]] = (image[[i + 1, j]] - image[[i - 1, j]]) / (2.0 * dy_step);
            }
        }
    }

    if cols > 1 {
        for i in 0..rows {
            dx[[i, 0]] = (image[[i, 1]] - image[[i, 0]]) / dx_step;
            dx[[i, cols - 1]] = (image[[i, cols - 1]] - image[[i, cols - 2]]) / dx_step;
            for j in 1..cols - 1 {
                dx[[i, j]] = (image[[i, j + 1]] - image[[i, j - 1]]) / (2.0 * dx_step);
            }
        }
    }

    (dy, dx)
}

/// Gradient magnitude on a unit pixel grid
pub fn gradient_magnitude(image: ArrayView2<'_, f64>) -> Array2<f64> {
    let (dy, dx) = gradient(image, (1.0, 1.0));
    let mut magnitude = dy;
    magnitude.zip_mut_with(&dx, |gy, &gx| *gy = (*gy * *gy + gx * gx).sqrt());
    magnitude
}

/// Bilinear resampling onto `shape` with corner-aligned grids
pub fn resample_bilinear(image: &Raster, shape: (usize, usize)) -> Raster {
    let (in_rows, in_cols) = image.dim();
    let (out_rows, out_cols) = shape;
    if in_rows == 0 || in_cols == 0 {
        return Raster::from_elem(shape, RasterValue::NAN);
    }

    let scale = |out_len: usize, in_len: usize| {
        if out_len > 1 {
            (in_len as f64 - 1.0) / (out_len as f64 - 1.0)
        } else {
            0.0
        }
    };
    let row_scale = scale(out_rows, in_rows);
    let col_scale = scale(out_cols, in_cols);

    Raster::from_shape_fn(shape, |(i, j)| {
        let y = i as f64 * row_scale;
        let x = j as f64 * col_scale;
        let y0 = (y.floor() as usize).min(in_rows - 1);
        let x0 = (x.floor() as usize).min(in_cols - 1);
        let y1 = (y0 + 1).min(in_rows - 1);
        let x1 = (x0 + 1).min(in_cols - 1);
        let fy = y - y0 as f64;
        let fx = x - x0 as f64;

        let v00 = image[[y0, x0]] as f64;
        let v01 = image[[y0, x1]] as f64;
        let v10 = image[[y1, x0]] as f64;
        let v11 = image[[y1, x1]] as f64;

        let top = v00 * (1.0 - fx) + v01 * fx;
        let bottom = v10 * (1.0 - fx) + v11 * fx;
        (top * (1.0 - fy) + bottom * fy) as RasterValue
    })
}
