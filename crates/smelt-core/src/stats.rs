//! Quantiles, medians and histograms of timing samples.
//!
//! Every timing experiment in smelt produces a slice of raw counter deltas.
//! Negative readings are measurement artifacts and are discarded before any
//! statistic is computed.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::util::TERMINAL_WIDTH;

/// Errors of statistical summaries.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatsError {
    /// No valid (non-negative) sample was given
    #[error("no valid samples")]
    Empty,
    /// A distribution needs at least one quantile step
    #[error("quantile count must be positive")]
    NoQuantiles,
    /// Histogram bins must have a width
    #[error("histogram granularity must be positive")]
    NoGranularity,
    /// The fast distribution reaches into the slow one
    #[error("quantiles overlap: lower bound {lower} >= upper bound {upper}")]
    QuantilesOverlap {
        /// Second-highest quantile of the fast distribution
        lower: i64,
        /// Lowest quantile of the slow distribution
        upper: i64,
    },
}

/// Result type for statistics.
pub type Result<T> = std::result::Result<T, StatsError>;

/// One entry of a quantile table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Quantile {
    /// Fraction in `[0, 1]`
    pub fraction: f64,
    /// Interpolated sample value at `fraction`
    pub value: f64,
}

/// Summary of a sample set.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Distribution {
    #[serde(skip_serializing)]
    samples: Vec<i64>,
    quantiles: Vec<Quantile>,
    median: f64,
    sample_size: usize,
}

impl Distribution {
    /// The valid samples in ascending order.
    pub fn samples(&self) -> &[i64] {
        &self.samples
    }

    /// Quantile table, `quantile_count + 1` entries from fraction 0 to 1.
    pub fn quantiles(&self) -> &[Quantile] {
        &self.quantiles
    }

    /// Median of the valid samples.
    pub fn median(&self) -> f64 {
        self.median
    }

    /// Number of valid samples.
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Smallest valid sample.
    pub fn min(&self) -> i64 {
        self.samples[0]
    }

    /// Largest valid sample.
    pub fn max(&self) -> i64 {
        self.samples[self.samples.len() - 1]
    }
}

/// Linear interpolation between the order statistics around `fraction`.
fn quantile_from_sorted(sorted: &[i64], fraction: f64) -> f64 {
    let delta = (sorted.len() - 1) as f64 * fraction;
    let i = delta.floor() as usize;
    if i + 1 < sorted.len() {
        let weight = delta - i as f64;
        (1.0 - weight) * sorted[i] as f64 + weight * sorted[i + 1] as f64
    } else {
        sorted[i] as f64
    }
}

fn median_from_sorted(sorted: &[i64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2] as f64
    } else {
        (sorted[n / 2 - 1] as f64 + sorted[n / 2] as f64) / 2.0
    }
}

/// Summarizes `samples` into a distribution with `quantile_count + 1` quantiles.
///
/// Negative samples are discarded. Quantile `i` sits at fraction
/// `i / quantile_count`.
///
/// # Errors
///
/// Fails if `quantile_count` is zero or no valid sample remains.
///
/// # Examples
///
/// ```
/// use smelt_core::stats::summarize;
///
/// let d = summarize(&[1, 2, 3, 4, -7], 2).unwrap();
/// assert_eq!(d.sample_size(), 4);
/// assert_eq!(d.median(), 2.5);
/// assert_eq!(d.quantiles()[1].value, 2.5);
/// ```
pub fn summarize(samples: &[i64], quantile_count: usize) -> Result<Distribution> {
    if quantile_count == 0 {
        return Err(StatsError::NoQuantiles);
    }
    let mut sorted: Vec<i64> = samples.iter().copied().filter(|&s| s >= 0).collect();
    if sorted.is_empty() {
        return Err(StatsError::Empty);
    }
    sorted.sort_unstable();
    let quantiles = (0..=quantile_count)
        .map(|i| {
            let fraction = i as f64 / quantile_count as f64;
            Quantile {
                fraction,
                value: quantile_from_sorted(&sorted, fraction),
            }
        })
        .collect();
    let median = median_from_sorted(&sorted);
    let sample_size = sorted.len();
    Ok(Distribution {
        samples: sorted,
        quantiles,
        median,
        sample_size,
    })
}

/// Threshold separating a fast distribution from a slow one.
///
/// Takes the midpoint between the second-highest quantile of `lower` and
/// the lowest quantile of `upper`, rounded up. The highest quantile of
/// `lower` is ignored since it usually holds an interrupted sample.
///
/// # Errors
///
/// [`StatsError::QuantilesOverlap`] if the two bounds do not separate.
///
/// # Examples
///
/// ```
/// use smelt_core::stats::{estimate_threshold, summarize};
///
/// let hits = summarize(&[40, 41, 42, 43, 900], 4).unwrap();
/// let misses = summarize(&[200, 210, 220, 230], 4).unwrap();
/// assert_eq!(estimate_threshold(&hits, &misses).unwrap(), 122);
/// ```
pub fn estimate_threshold(lower: &Distribution, upper: &Distribution) -> Result<i64> {
    let n = lower.quantiles.len();
    let l = lower.quantiles[n.saturating_sub(2)].value as i64;
    let u = upper.quantiles[0].value as i64;
    if l >= u {
        return Err(StatsError::QuantilesOverlap { lower: l, upper: u });
    }
    Ok((u + l + 1) / 2)
}

const BOUNDS: usize = 4;

fn write_quantile(f: &mut fmt::Formatter<'_>, fraction: f64, value: f64) -> fmt::Result {
    write!(f, "({:4.2}):[{:6.1}]  ", fraction, value)
}

impl fmt::Display for Distribution {
    /// Four lowest quantiles, the median, four highest quantiles.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.quantiles.len();
        if n < 2 * BOUNDS + 1 {
            for q in &self.quantiles {
                write_quantile(f, q.fraction, q.value)?;
            }
            return Ok(());
        }
        for q in &self.quantiles[..BOUNDS] {
            write_quantile(f, q.fraction, q.value)?;
        }
        write_quantile(f, 0.5, self.median)?;
        for q in &self.quantiles[n - BOUNDS..] {
            write_quantile(f, q.fraction, q.value)?;
        }
        Ok(())
    }
}

/// A histogram with fixed-width bins starting at the smallest valid sample.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Histogram {
    min: i64,
    granularity: u64,
    counts: BTreeMap<u64, usize>,
    total: usize,
}

/// Builds a histogram of `samples` with bins `granularity` wide.
///
/// # Errors
///
/// Fails if `granularity` is zero or no valid sample exists.
pub fn histogram(samples: &[i64], granularity: u64) -> Result<Histogram> {
    if granularity == 0 {
        return Err(StatsError::NoGranularity);
    }
    let valid = || samples.iter().copied().filter(|&s| s >= 0);
    let min = valid().min().ok_or(StatsError::Empty)?;
    let mut counts = BTreeMap::new();
    for s in valid() {
        *counts.entry((s - min) as u64 / granularity).or_insert(0) += 1;
    }
    let total = counts.values().sum();
    Ok(Histogram {
        min,
        granularity,
        counts,
        total,
    })
}

impl Histogram {
    /// Non-empty bins as `(lower bound, count)`.
    pub fn bins(&self) -> impl Iterator<Item = (i64, usize)> + '_ {
        self.counts
            .iter()
            .map(|(&bin, &c)| (self.min + (bin * self.granularity) as i64, c))
    }

    /// Number of samples counted.
    pub fn total(&self) -> usize {
        self.total
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut prev: Option<i64> = None;
        for (lower, count) in self.bins() {
            if prev.is_some_and(|prev| (lower - prev) as u64 > self.granularity) {
                writeln!(f)?;
            }
            writeln!(
                f,
                "{:.2} {} {:.2}",
                lower as f64,
                "-".repeat(count.min(TERMINAL_WIDTH)),
                100.0 * count as f64 / self.total as f64
            )?;
            prev = Some(lower);
        }
        Ok(())
    }
}
