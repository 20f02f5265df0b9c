//! Ratio spike detection
//!
//! Decomposes the ratio history with STL and scores the newest point by how
//! far it sits from trend + season, in units of the typical held-out residual.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::stl::{Stl, DEFAULT_SEASONAL_SPAN};

/// Default daily period for hourly polls
pub const DEFAULT_PERIOD: usize = 24;

/// Residual spread, relative to the series magnitude, treated as zero
const FLAT_RESIDUAL_TOLERANCE: f64 = 1e-9;

/// Fewest held-out residuals used to scale the score
const MIN_REFERENCE_POINTS: usize = 8;

/// Detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Score above which a point is anomalous
    pub threshold: f64,
    /// Seasonal period in samples
    pub period: usize,
    /// Seasonal smoother span
    pub seasonal_span: usize,
    /// Use robustness weights when decomposing
    pub robust: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            period: DEFAULT_PERIOD,
            seasonal_span: DEFAULT_SEASONAL_SPAN,
            robust: true,
        }
    }
}

/// Scores the latest point of a ratio series
pub struct AnomalyDetector {
    config: DetectorConfig,
    stl: Stl,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let stl = Stl::new(config.period)
            .with_seasonal_span(config.seasonal_span)
            .with_robust(config.robust);
        Self { config, stl }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Samples needed before the detector produces a score
    pub fn min_samples(&self) -> usize {
        2 * self.config.period
    }

    /// Score the last value of `series`
    ///
    /// The newest point is compared with a fit that leaves it out. Its
    /// residual is scaled by the held-out residuals of the rest of the latest
    /// cycle, each from a fit that also leaves out the newest point, so a
    /// spike never bends the curve it is measured against.
    ///
    /// # Returns
    /// * `Some(Detection)` with the score and verdict for the latest point
    /// * `None` if there is too little history or the residuals are flat
    pub fn detect(&self, series: &[f64]) -> Option<Detection> {
        if series.len() < self.min_samples() {
            return None;
        }
        let last = series.len() - 1;

        let newest = match self.stl.decompose_excluding(series, &[last]) {
            Ok(d) => d,
            Err(e) => {
                debug!(error = %e, samples = series.len(), "Decomposition failed");
                return None;
            }
        };
        let residual = newest.residual[last];
        let expected = newest.trend[last] + newest.seasonal[last];

        let reference_len = self.config.period.saturating_sub(1).max(MIN_REFERENCE_POINTS);
        let mut reference = Vec::with_capacity(reference_len);
        for i in last.saturating_sub(reference_len)..last {
            match self.stl.decompose_excluding(series, &[i, last]) {
                Ok(d) => reference.push(d.residual[i]),
                Err(e) => {
                    debug!(error = %e, index = i, "Reference decomposition failed");
                    return None;
                }
            }
        }

        // A perfectly predictable history scores any real deviation as huge
        let scale = series.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
        let floor = FLAT_RESIDUAL_TOLERANCE * scale;
        let residual_std = root_mean_square(&reference);
        if residual_std <= floor && residual.abs() <= floor {
            return None;
        }
        let residual_std = residual_std.max(floor);

        let score = residual.abs() / residual_std;

        Some(Detection {
            value: series[last],
            expected,
            residual,
            residual_std,
            score,
            threshold: self.config.threshold,
            anomalous: score > self.config.threshold,
            samples: series.len(),
        })
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

fn root_mean_square(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

/// Detection result for the latest observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Observed ratio
    pub value: f64,
    /// Trend plus seasonal component at the latest point
    pub expected: f64,
    pub residual: f64,
    /// Root mean square of the held-out residuals in the latest cycle
    pub residual_std: f64,
    /// Absolute residual in units of `residual_std`
    pub score: f64,
    pub threshold: f64,
    pub anomalous: bool,
    pub samples: usize,
}

impl Detection {
    /// Percentage above the expected ratio
    pub fn percentage_above_expected(&self) -> f64 {
        if self.expected.abs() < f64::EPSILON {
            return 0.0;
        }
        ((self.value - self.expected) / self.expected) * 100.0
    }

    /// Severity level based on score
    pub fn severity(&self) -> Severity {
        if self.score >= 5.0 {
            Severity::Critical
        } else if self.score >= 4.0 {
            Severity::High
        } else {
            Severity::Warning
        }
    }
}

/// Severity levels for ratio spikes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}
