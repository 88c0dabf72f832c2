//! Hampel filter and sample trimming for the high-watermark strategy.

use crate::detectors::stats::median;
use crate::detectors::DetectorError;

/// Scale factor turning a median absolute deviation into a
/// Gaussian-equivalent standard deviation.
pub const MAD_SCALE: f64 = 1.4826;

/// Minimum number of points the filter accepts.
pub const MIN_HAMPEL_SAMPLE: usize = 30;

/// Fraction trimmed from each end of the sample before filtering.
pub const TRIM_FRACTION: f64 = 0.05;

/// Output of [`hampel_filter`].
#[derive(Debug, Clone, PartialEq)]
pub struct Filtered {
    /// The input with every outlier replaced by its window median.
    pub values: Vec<f64>,
    /// Indices of the replaced points.
    pub outliers: Vec<usize>,
}

/// Replace outliers with the median of their centred window.
///
/// For each index `i` with a full `2 * window_size + 1` window, a point is an
/// outlier when `|x[i] - median| > n_sigma * 1.4826 * MAD`. Indices closer
/// than `window_size` to either end are never modified.
pub fn hampel_filter(input: &[f64], window_size: usize, n_sigma: f64) -> Result<Filtered, DetectorError> {
    if input.len() < MIN_HAMPEL_SAMPLE {
        return Err(DetectorError::InsufficientSample("thirty elements"));
    }

    let n = input.len();
    let mut values = input.to_vec();
    let mut outliers = Vec::new();

    if n < 2 * window_size + 1 {
        return Ok(Filtered { values, outliers });
    }

    for i in window_size..(n - window_size) {
        let window = &input[(i - window_size)..=(i + window_size)];
        let x0 = median(window);
        let deviations: Vec<f64> = window.iter().map(|x| (x - x0).abs()).collect();
        let s0 = MAD_SCALE * median(&deviations);
        if (input[i] - x0).abs() > n_sigma * s0 {
            values[i] = x0;
            outliers.push(i);
        }
    }

    Ok(Filtered { values, outliers })
}

/// Drop `floor(len * 5%)` points from each end of the sample.
pub fn trim(sample: &[f64]) -> &[f64] {
    let cut = (sample.len() as f64 * TRIM_FRACTION).floor() as usize;
    &sample[cut..sample.len() - cut]
}
