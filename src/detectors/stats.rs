use crate::detectors::DetectorError;

/// A cleaned numeric sample ready for threshold calculation.
///
/// Missing and non-finite points are dropped on construction, so every
/// statistic below operates on real values only.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    values: Vec<f64>,
}

impl Sample {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values: values.into_iter().filter(|v| v.is_finite()).collect(),
        }
    }

    /// Build a sample from a raw series that may contain gaps.
    pub fn from_points(points: &[Option<f64>]) -> Self {
        Self::new(points.iter().flatten().copied().collect())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn mean(&self) -> f64 {
        mean(&self.values)
    }

    pub fn sigma(&self) -> Result<f64, DetectorError> {
        sigma(&self.values)
    }

    pub fn quartiles(&self) -> Quartiles {
        quartiles(&self.values)
    }
}

/// Arithmetic mean. An empty sample has a mean of zero.
pub fn mean(sample: &[f64]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    sample.iter().sum::<f64>() / sample.len() as f64
}

/// Sample standard deviation with Bessel's correction (ddof = 1).
pub fn sigma(sample: &[f64]) -> Result<f64, DetectorError> {
    if sample.len() < 2 {
        return Err(DetectorError::InsufficientSample("two elements"));
    }
    let mean = mean(sample);
    let sum_sq_diff: f64 = sample.iter().map(|&x| (x - mean).powi(2)).sum();
    Ok((sum_sq_diff / (sample.len() - 1) as f64).sqrt())
}

/// 25th, 50th and 75th percentiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quartiles {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
}

impl Quartiles {
    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }
}

/// Quartiles using midpoint interpolation: a fractional rank resolves to
/// the average of its two neighbouring ranks.
///
/// An empty sample yields NaN for every quartile.
pub fn quartiles(sample: &[f64]) -> Quartiles {
    let mut sorted = sample.to_vec();
    sorted.sort_by(f64::total_cmp);
    Quartiles {
        q1: percentile_midpoint(&sorted, 25.0),
        median: percentile_midpoint(&sorted, 50.0),
        q3: percentile_midpoint(&sorted, 75.0),
    }
}

/// Percentile of an already sorted slice, midpoint interpolation.
pub fn percentile_midpoint(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        (sorted[lower] + sorted[upper]) / 2.0
    }
}

/// Median of an unsorted slice (NaN when empty).
pub fn median(sample: &[f64]) -> f64 {
    let mut sorted = sample.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_midpoint(&sorted, 50.0)
}

/// Upper and lower bound pair for one severity level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub upper: f64,
    pub lower: f64,
}

/// `mean ± sigma * multiplier`, with an independent multiplier per tail.
pub fn sigma_thresholds(mean: f64, sigma: f64, upper_multiplier: f64, lower_multiplier: f64) -> Bounds {
    Bounds {
        upper: mean + sigma * upper_multiplier,
        lower: mean - sigma * lower_multiplier,
    }
}

/// `q3 + iqr * upper_multiplier` and `q1 - iqr * lower_multiplier`.
pub fn quartile_thresholds(q: &Quartiles, upper_multiplier: f64, lower_multiplier: f64) -> Bounds {
    let iqr = q.iqr();
    Bounds {
        upper: q.q3 + iqr * upper_multiplier,
        lower: q.q1 - iqr * lower_multiplier,
    }
}
