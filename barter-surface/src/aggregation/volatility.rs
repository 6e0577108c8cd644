//! Recursive EWMA variance of log returns (RiskMetrics style).

use crate::snapshot::{VolTrend, VolatilitySummary};

/// Relative sigma change below which the trend is reported as stable
const TREND_BAND: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct EwmaVolatility {
    lambda: f64,
    variance: Option<f64>,
    last_price: Option<f64>,
    samples: u64,
    /// Sigma at the previous `summary()` call, for trend detection
    reported_sigma: Option<f64>,
}

impl EwmaVolatility {
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda,
            variance: None,
            last_price: None,
            samples: 0,
            reported_sigma: None,
        }
    }

    /// Fold a new in-order price. Returns the log return when one could be computed.
    pub fn update(&mut self, price: f64) -> Option<f64> {
        if !(price.is_finite() && price > 0.0) {
            return None;
        }

        let previous = self.last_price.replace(price)?;
        let log_return = (price / previous).ln();
        if !log_return.is_finite() {
            return None;
        }
        let squared = log_return * log_return;

        self.variance = Some(match self.variance {
            None => squared,
            Some(variance) => self.lambda * variance + (1.0 - self.lambda) * squared,
        });
        self.samples += 1;
        Some(log_return)
    }

    pub fn sigma(&self) -> f64 {
        self.variance.map(f64::sqrt).unwrap_or(0.0)
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Current estimate plus the trend since the previous summary.
    pub fn summary(&mut self) -> VolatilitySummary {
        let sigma = self.sigma();
        let trend = match self.reported_sigma {
            Some(previous) if previous > 0.0 => {
                let change = (sigma - previous) / previous;
                if change > TREND_BAND {
                    VolTrend::Expanding
                } else if change < -TREND_BAND {
                    VolTrend::Contracting
                } else {
                    VolTrend::Stable
                }
            }
            _ => VolTrend::Stable,
        };
        self.reported_sigma = Some(sigma);

        VolatilitySummary {
            sigma,
            sigma_bps: sigma * 10_000.0,
            trend,
            samples: self.samples,
        }
    }
}
