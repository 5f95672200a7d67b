//! Gaussian breach estimation over bucketed moment aggregates

use super::record::AggregateRecord;

/// Which side of the threshold counts as a breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Above,
    Below,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Above => "above",
            Direction::Below => "below",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "above" => Some(Direction::Above),
            "below" => Some(Direction::Below),
            _ => None,
        }
    }
}

/// Estimates how many raw samples in a bucket fell on the breaching side of
/// the threshold, from the bucket's `count`/`total`/`sumOfSquares` moments.
///
/// The spread is taken as `sqrt(sumOfSquares / count)` - the root mean
/// square about zero, not the centered standard deviation. This matches the
/// historical series this tool replaces and is kept for comparability; see
/// DESIGN.md. Pure and deterministic, no I/O.
pub struct BreachEstimator {
    threshold: f64,
    direction: Direction,
}

impl BreachEstimator {
    pub fn new(threshold: f64, direction: Direction) -> Self {
        Self {
            threshold,
            direction,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Estimated breach count for one bucket, always in `[0, count]`.
    ///
    /// Empty buckets and buckets with a zero mean (degenerate or missing
    /// signal) estimate to zero.
    pub fn estimate(&self, record: &AggregateRecord) -> f64 {
        if record.count <= 0.0 {
            return 0.0;
        }
        let mean = record.total / record.count;
        if mean == 0.0 {
            return 0.0;
        }

        let std = (record.sum_of_squares / record.count).sqrt();
        let zscore = (self.threshold - mean) / std;

        // Past four sigmas the tail mass is below float noise; clamp
        // instead of evaluating the polynomial out of its fitted range.
        let below_fraction = if zscore > 4.0 {
            1.0
        } else {
            normal_cdf(zscore)
        };

        let fraction = match self.direction {
            Direction::Below => below_fraction,
            Direction::Above => 1.0 - below_fraction,
        };

        (fraction * record.count).max(0.0)
    }
}

/// Standard-normal CDF via the Abramowitz-Stegun 7.1.26 polynomial
/// approximation of erf (absolute error < 1.5e-7).
fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    const P: f64 = 0.327_591_1;
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;

    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}
