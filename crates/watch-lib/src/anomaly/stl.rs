//! Seasonal-trend decomposition using LOESS (STL)
//!
//! Implements Cleveland et al. (1990): an inner loop alternating
//! cycle-subseries smoothing, a low-pass filter and trend smoothing, and an
//! optional outer loop computing bisquare robustness weights so that
//! outliers stay in the residual instead of bending trend and season.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchError};

/// Default seasonal smoother span
pub const DEFAULT_SEASONAL_SPAN: usize = 7;

const ROBUST_INNER_ITERATIONS: usize = 2;
const ROBUST_OUTER_ITERATIONS: usize = 15;
const INNER_ITERATIONS: usize = 5;

/// Decomposed time series components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decomposition {
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub residual: Vec<f64>,
    /// Final robustness weights, all 1.0 when not robust except for
    /// excluded points
    pub weights: Vec<f64>,
}

/// STL decomposer
#[derive(Debug, Clone)]
pub struct Stl {
    period: usize,
    seasonal: usize,
    trend: usize,
    low_pass: usize,
    robust: bool,
}

impl Stl {
    /// Create a robust decomposer for the given period
    pub fn new(period: usize) -> Self {
        let seasonal = DEFAULT_SEASONAL_SPAN;
        Self {
            period,
            seasonal,
            trend: trend_span(period, seasonal),
            low_pass: make_odd(period + 1),
            robust: true,
        }
    }

    /// Set the seasonal smoother span (odd, at least 3)
    pub fn with_seasonal_span(mut self, span: usize) -> Self {
        self.seasonal = make_odd(span.max(3));
        self.trend = trend_span(self.period, self.seasonal);
        self
    }

    /// Enable or disable the robustness loop
    pub fn with_robust(mut self, robust: bool) -> Self {
        self.robust = robust;
        self
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn trend_span(&self) -> usize {
        self.trend
    }

    pub fn low_pass_span(&self) -> usize {
        self.low_pass
    }

    /// Decompose `y` into trend, seasonal and residual components
    pub fn decompose(&self, y: &[f64]) -> Result<Decomposition> {
        self.fit(y, None)
    }

    /// Decompose `y` with the points at `excluded` left out of every smoother
    ///
    /// Excluded points get zero weight throughout, so their residuals measure
    /// how far each sits from a fit built without it.
    pub fn decompose_excluding(&self, y: &[f64], excluded: &[usize]) -> Result<Decomposition> {
        let mut prior = vec![1.0; y.len()];
        for &i in excluded {
            let slot = prior.get_mut(i).ok_or_else(|| {
                WatchError::Decomposition(format!(
                    "excluded index {} outside series of {} points",
                    i,
                    y.len()
                ))
            })?;
            *slot = 0.0;
        }
        self.fit(y, Some(prior))
    }

    fn fit(&self, y: &[f64], prior: Option<Vec<f64>>) -> Result<Decomposition> {
        let n = y.len();
        let np = self.period;

        if np < 2 {
            return Err(WatchError::Decomposition(format!(
                "period must be at least 2, got {}",
                np
            )));
        }
        if n < 2 * np {
            return Err(WatchError::Decomposition(format!(
                "need at least two full periods ({} points), got {}",
                2 * np,
                n
            )));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(WatchError::Decomposition(
                "series contains non-finite values".to_string(),
            ));
        }

        let (inner, outer) = if self.robust {
            (ROBUST_INNER_ITERATIONS, ROBUST_OUTER_ITERATIONS)
        } else {
            (INNER_ITERATIONS, 0)
        };

        let mut trend = vec![0.0; n];
        let mut seasonal = vec![0.0; n];
        let mut weights = vec![1.0; n];
        let mut use_weights = false;

        for pass in 0..=outer {
            let rw = if use_weights {
                Some(weights.as_slice())
            } else {
                prior.as_deref()
            };
            self.inner_loop(y, rw, inner, &mut seasonal, &mut trend);

            if pass == outer {
                break;
            }
            let fit: Vec<f64> = seasonal.iter().zip(&trend).map(|(s, t)| s + t).collect();
            weights = robustness_weights(y, &fit);
            if let Some(prior) = &prior {
                for (w, p) in weights.iter_mut().zip(prior) {
                    *w *= p;
                }
            }
            use_weights = true;
        }

        if !self.robust {
            weights = prior.unwrap_or_else(|| vec![1.0; n]);
        }

        let residual = y
            .iter()
            .zip(&seasonal)
            .zip(&trend)
            .map(|((v, s), t)| v - s - t)
            .collect();

        Ok(Decomposition {
            trend,
            seasonal,
            residual,
            weights,
        })
    }

    fn inner_loop(
        &self,
        y: &[f64],
        rw: Option<&[f64]>,
        iterations: usize,
        seasonal: &mut [f64],
        trend: &mut [f64],
    ) {
        let n = y.len();
        let np = self.period;

        for _ in 0..iterations {
            let detrended: Vec<f64> = y.iter().zip(trend.iter()).map(|(v, t)| v - t).collect();

            let cycle = self.cycle_subseries(&detrended, rw);
            let low = self.low_pass_filter(&cycle);

            for i in 0..n {
                seasonal[i] = cycle[np + i] - low[i];
            }

            let deseasonalized: Vec<f64> =
                y.iter().zip(seasonal.iter()).map(|(v, s)| v - s).collect();
            let smoothed = loess_smooth(&deseasonalized, self.trend, rw);
            trend.copy_from_slice(&smoothed);
        }
    }

    /// Smooth each cycle-subseries and extend it by one point on each side
    ///
    /// Returns `n + 2 * period` values.
    fn cycle_subseries(&self, detrended: &[f64], rw: Option<&[f64]>) -> Vec<f64> {
        let n = detrended.len();
        let np = self.period;
        let mut cycle = vec![0.0; n + 2 * np];

        for phase in 0..np {
            let series: Vec<f64> = detrended.iter().skip(phase).step_by(np).copied().collect();
            let weights: Option<Vec<f64>> =
                rw.map(|w| w.iter().skip(phase).step_by(np).copied().collect());
            let weights = weights.as_deref();
            let k = series.len();

            let smoothed = loess_smooth(&series, self.seasonal, weights);

            let right_edge = self.seasonal.min(k);
            let before = loess_estimate(&series, self.seasonal, 0.0, 1, right_edge, weights)
                .unwrap_or(smoothed[0]);

            let left_edge = (k + 1).saturating_sub(self.seasonal).max(1);
            let after = loess_estimate(
                &series,
                self.seasonal,
                (k + 1) as f64,
                left_edge,
                k,
                weights,
            )
            .unwrap_or(smoothed[k - 1]);

            cycle[phase] = before;
            for (m, value) in smoothed.iter().enumerate() {
                cycle[phase + (m + 1) * np] = *value;
            }
            cycle[phase + (k + 1) * np] = after;
        }

        cycle
    }

    /// Moving averages of length period, period, 3 followed by LOESS
    fn low_pass_filter(&self, cycle: &[f64]) -> Vec<f64> {
        let np = self.period;
        let first = moving_average(cycle, np);
        let second = moving_average(&first, np);
        let third = moving_average(&second, 3);
        loess_smooth(&third, self.low_pass, None)
    }
}

/// Smallest odd trend span recommended for the period and seasonal span
fn trend_span(period: usize, seasonal: usize) -> usize {
    let span = (1.5 * period as f64 / (1.0 - 1.5 / seasonal as f64)).ceil() as usize;
    make_odd(span)
}

fn make_odd(value: usize) -> usize {
    if value % 2 == 0 {
        value + 1
    } else {
        value
    }
}

fn moving_average(x: &[f64], len: usize) -> Vec<f64> {
    if len == 0 || x.len() < len {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(x.len() - len + 1);
    let mut sum: f64 = x[..len].iter().sum();
    out.push(sum / len as f64);
    for i in len..x.len() {
        sum += x[i] - x[i - len];
        out.push(sum / len as f64);
    }
    out
}

/// LOESS smoothing of a whole series evaluated at every position
fn loess_smooth(y: &[f64], span: usize, rw: Option<&[f64]>) -> Vec<f64> {
    let n = y.len();
    if n < 2 {
        return y.to_vec();
    }

    let mut out = vec![0.0; n];

    if span >= n {
        for (i, value) in out.iter_mut().enumerate() {
            *value = loess_estimate(y, span, (i + 1) as f64, 1, n, rw).unwrap_or(y[i]);
        }
        return out;
    }

    let half = (span + 1) / 2;
    let mut left = 1;
    let mut right = span;
    for i in 1..=n {
        if i > half && right != n {
            left += 1;
            right += 1;
        }
        out[i - 1] = loess_estimate(y, span, i as f64, left, right, rw).unwrap_or(y[i - 1]);
    }
    out
}

/// Locally weighted linear fit of `y` evaluated at position `x`
///
/// Positions are 1-based; the neighbourhood is `[left, right]` inclusive.
/// Returns `None` when every neighbour has zero weight.
fn loess_estimate(
    y: &[f64],
    span: usize,
    x: f64,
    left: usize,
    right: usize,
    rw: Option<&[f64]>,
) -> Option<f64> {
    let n = y.len();
    let range = n as f64 - 1.0;

    let mut h = (x - left as f64).max(right as f64 - x);
    if span > n {
        h += ((span - n) / 2) as f64;
    }
    let upper = 0.999 * h;
    let lower = 0.001 * h;

    let mut weights = vec![0.0; right - left + 1];
    let mut total = 0.0;
    for (offset, j) in (left..=right).enumerate() {
        let r = (j as f64 - x).abs();
        if r <= upper {
            let mut w = if r <= lower {
                1.0
            } else {
                (1.0 - (r / h).powi(3)).powi(3)
            };
            if let Some(rw) = rw {
                w *= rw[j - 1];
            }
            weights[offset] = w;
            total += w;
        }
    }

    if total <= 0.0 {
        return None;
    }
    for w in weights.iter_mut() {
        *w /= total;
    }

    if h > 0.0 {
        let center: f64 = (left..=right)
            .zip(&weights)
            .map(|(j, w)| w * j as f64)
            .sum();
        let spread: f64 = (left..=right)
            .zip(&weights)
            .map(|(j, w)| w * (j as f64 - center).powi(2))
            .sum();
        if spread.sqrt() > 0.001 * range {
            let slope = (x - center) / spread;
            for (j, w) in (left..=right).zip(weights.iter_mut()) {
                *w *= slope * (j as f64 - center) + 1.0;
            }
        }
    }

    Some(
        (left..=right)
            .zip(&weights)
            .map(|(j, w)| w * y[j - 1])
            .sum(),
    )
}

/// Bisquare weights on residuals scaled by six median absolute residuals
fn robustness_weights(y: &[f64], fit: &[f64]) -> Vec<f64> {
    let abs_residuals: Vec<f64> = y.iter().zip(fit).map(|(v, f)| (v - f).abs()).collect();
    let scale = 6.0 * median(&abs_residuals);
    let upper = 0.999 * scale;
    let lower = 0.001 * scale;

    abs_residuals
        .iter()
        .map(|&r| {
            if r <= lower {
                1.0
            } else if r <= upper {
                (1.0 - (r / scale).powi(2)).powi(2)
            } else {
                0.0
            }
        })
        .collect()
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
