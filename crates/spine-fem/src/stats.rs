//! Aggregate statistics and histograms over scalar field values.
//!
//! Summaries are derived data: they are never stored next to a field and are
//! recomputed from the values on every request.
//!
//! Only finite values take part. NaN entries (no data) and infinities
//! (e.g. the edge ratio of an element with a zero-length edge) are counted in
//! [`StatisticsSummary::undefined_count`] instead.
//!
//! Reductions run on fixed-size chunks in parallel and the per-chunk partials
//! are merged in chunk order, so a summary is bit-identical across runs and
//! thread counts.

use rayon::prelude::*;

use crate::field::ScalarField;

/// Values per parallel reduction chunk.
const CHUNK_SIZE: usize = 8192;

/// Parameters for statistics computation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StatisticsParams {
    /// Number of equal-width histogram bins over [min, max].
    /// Default: 20. A value of 0 is treated as 1.
    pub bin_count: usize,
}

impl Default for StatisticsParams {
    fn default() -> Self {
        Self { bin_count: 20 }
    }
}

impl StatisticsParams {
    /// Params with a specific bin count.
    pub fn with_bins(bin_count: usize) -> Self {
        Self { bin_count }
    }
}

/// One histogram bin. Bins are half-open `[lower, upper)` except the last,
/// which also includes `upper`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HistogramBin {
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_float::value"))]
    pub lower: f64,
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_float::value"))]
    pub upper: f64,
    pub count: usize,
}

/// Summary of one field.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatisticsSummary {
    /// Number of finite values.
    pub count: usize,

    /// Number of NaN or infinite values.
    pub undefined_count: usize,

    /// Minimum finite value, NaN if `count == 0`.
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_float::value"))]
    pub min: f64,

    /// Maximum finite value, NaN if `count == 0`.
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_float::value"))]
    pub max: f64,

    /// Arithmetic mean, NaN if `count == 0`.
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_float::value"))]
    pub mean: f64,

    /// Population standard deviation, NaN if `count == 0`.
    #[cfg_attr(feature = "serde", serde(with = "crate::serde_float::value"))]
    pub std_dev: f64,

    /// Equal-width bins covering [min, max]. Empty if `count == 0`.
    pub histogram: Vec<HistogramBin>,
}

impl StatisticsSummary {
    fn empty(undefined_count: usize) -> Self {
        Self {
            count: 0,
            undefined_count,
            min: f64::NAN,
            max: f64::NAN,
            mean: f64::NAN,
            std_dev: f64::NAN,
            histogram: Vec::new(),
        }
    }

    /// Whether no finite value was summarized.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total number of entries, finite or not.
    pub fn total(&self) -> usize {
        self.count + self.undefined_count
    }
}

impl std::fmt::Display for StatisticsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(
                f,
                "no defined values ({} undefined)",
                self.undefined_count
            );
        }
        write!(
            f,
            "n={} min={:.4} max={:.4} mean={:.4} std={:.4}",
            self.count, self.min, self.max, self.mean, self.std_dev
        )?;
        if self.undefined_count > 0 {
            write!(f, " ({} undefined)", self.undefined_count)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Partial {
    count: usize,
    undefined: usize,
    min: f64,
    max: f64,
    sum: f64,
}

impl Partial {
    fn of(chunk: &[f64]) -> Self {
        let mut p = Partial {
            count: 0,
            undefined: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        };
        for &v in chunk {
            if v.is_finite() {
                p.count += 1;
                p.min = p.min.min(v);
                p.max = p.max.max(v);
                p.sum += v;
            } else {
                p.undefined += 1;
            }
        }
        p
    }

    fn merge(self, other: Partial) -> Partial {
        Partial {
            count: self.count + other.count,
            undefined: self.undefined + other.undefined,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
        }
    }
}

/// Compute the summary of `values`.
///
/// # Example
/// ```
/// use spine_fem::stats::{compute_statistics, StatisticsParams};
///
/// let stats = compute_statistics(&[1.0, 2.0, 3.0, f64::NAN], &StatisticsParams::default());
/// assert_eq!(stats.count, 3);
/// assert_eq!(stats.undefined_count, 1);
/// assert_eq!(stats.mean, 2.0);
/// ```
pub fn compute_statistics(values: &[f64], params: &StatisticsParams) -> StatisticsSummary {
    let partials: Vec<Partial> = values.par_chunks(CHUNK_SIZE).map(Partial::of).collect();
    let Some(total) = partials.into_iter().reduce(Partial::merge) else {
        return StatisticsSummary::empty(0);
    };

    if total.count == 0 {
        return StatisticsSummary::empty(total.undefined);
    }

    let (min, max) = (total.min, total.max);

    if min == max {
        return StatisticsSummary {
            count: total.count,
            undefined_count: total.undefined,
            min,
            max,
            mean: min,
            std_dev: 0.0,
            histogram: vec![HistogramBin {
                lower: min,
                upper: max,
                count: total.count,
            }],
        };
    }

    let n = total.count as f64;
    let mut mean = total.sum / n;
    if !mean.is_finite() {
        // The plain sum overflowed; average pre-divided values instead
        mean = ordered_sum(values, |v| v / n);
    }

    let mut std_dev = (ordered_sum(values, |v| (v - mean) * (v - mean)) / n).sqrt();
    if !std_dev.is_finite() {
        let scale = min.abs().max(max.abs());
        let scaled_mean = mean / scale;
        let sq = ordered_sum(values, |v| {
            let d = v / scale - scaled_mean;
            d * d
        });
        std_dev = (sq / n).sqrt() * scale;
    }

    StatisticsSummary {
        count: total.count,
        undefined_count: total.undefined,
        min,
        max,
        mean,
        std_dev,
        histogram: histogram(values, min, max, params.bin_count.max(1)),
    }
}

/// Sum of `f` over the finite values, reduced chunk by chunk in order.
fn ordered_sum<F>(values: &[f64], f: F) -> f64
where
    F: Fn(f64) -> f64 + Sync,
{
    values
        .par_chunks(CHUNK_SIZE)
        .map(|chunk| chunk.iter().filter(|v| v.is_finite()).map(|&v| f(v)).sum::<f64>())
        .collect::<Vec<_>>()
        .into_iter()
        .sum()
}

fn histogram(values: &[f64], min: f64, max: f64, bins: usize) -> Vec<HistogramBin> {
    // Work on halved values so `max - min` cannot overflow
    let (half_min, half_max) = (min / 2.0, max / 2.0);
    let half_width = (half_max - half_min) / bins as f64;
    let last = bins - 1;
    let bound = |i: usize| (2.0 * (half_min + half_width * i as f64)).clamp(min, max);

    let counts = values
        .par_chunks(CHUNK_SIZE)
        .map(|chunk| {
            let mut counts = vec![0usize; bins];
            for &v in chunk.iter().filter(|v| v.is_finite()) {
                let idx = ((v / 2.0 - half_min) / half_width).floor();
                let idx = if idx >= last as f64 { last } else { idx as usize };
                counts[idx] += 1;
            }
            counts
        })
        .collect::<Vec<_>>()
        .into_iter()
        .fold(vec![0usize; bins], |mut acc, part| {
            for (a, p) in acc.iter_mut().zip(part) {
                *a += p;
            }
            acc
        });

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: bound(i),
            upper: if i == last { max } else { bound(i + 1) },
            count,
        })
        .collect()
}

/// Summarize a field. Same as [`ScalarField::statistics`].
pub fn get_statistics(field: &ScalarField, params: &StatisticsParams) -> StatisticsSummary {
    compute_statistics(&field.values, params)
}
