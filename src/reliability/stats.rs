use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One probe. `value_ms` is `None` when the connect failed or timed out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySample {
    pub value_ms: Option<f64>,
    pub taken_at: DateTime<Utc>,
}

impl LatencySample {
    pub fn success(value_ms: f64, taken_at: DateTime<Utc>) -> Self {
        Self {
            value_ms: Some(value_ms),
            taken_at,
        }
    }

    pub fn failure(taken_at: DateTime<Utc>) -> Self {
        Self {
            value_ms: None,
            taken_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Rating {
    Excellent,
    Good,
    Fair,
    Poor,
    Unreliable,
}

impl Rating {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Rating::Excellent
        } else if score >= 75.0 {
            Rating::Good
        } else if score >= 60.0 {
            Rating::Fair
        } else if score >= 40.0 {
            Rating::Poor
        } else {
            Rating::Unreliable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Excellent => "Excellent",
            Rating::Good => "Good",
            Rating::Fair => "Fair",
            Rating::Poor => "Poor",
            Rating::Unreliable => "Unreliable",
        }
    }
}

/// Summary of a sample window. Latency figures cover successful probes only
/// and are zero when there were none. `failure_rate` is a percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReliabilityStats {
    pub count: usize,
    pub failures: usize,
    pub failure_rate: f64,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub median: f64,
    pub stddev: f64,
    pub score: f64,
    pub rating: Rating,
}

impl ReliabilityStats {
    pub fn compute<'a>(samples: impl IntoIterator<Item = &'a LatencySample>) -> Self {
        let mut count = 0usize;
        let mut values: Vec<f64> = Vec::new();
        for sample in samples {
            count += 1;
            if let Some(value) = sample.value_ms {
                values.push(value);
            }
        }
        let failures = count - values.len();
        let failure_rate = if count == 0 {
            0.0
        } else {
            failures as f64 * 100.0 / count as f64
        };

        if values.is_empty() {
            return Self {
                count,
                failures,
                failure_rate,
                min: 0.0,
                max: 0.0,
                average: 0.0,
                median: 0.0,
                stddev: 0.0,
                score: 0.0,
                rating: Rating::Unreliable,
            };
        }

        values.sort_by(f64::total_cmp);
        let n = values.len() as f64;
        let average = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - average).powi(2)).sum::<f64>() / n;
        let stddev = variance.sqrt();
        let mid = values.len() / 2;
        let median = if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        };

        let score = reliability_score(failure_rate, average, stddev);
        Self {
            count,
            failures,
            failure_rate,
            min: values[0],
            max: values[values.len() - 1],
            average,
            median,
            stddev,
            score,
            rating: Rating::from_score(score),
        }
    }

    /// Relative spread of successful latencies, used to pace sampling.
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.average > 0.0 {
            self.stddev / self.average
        } else {
            0.0
        }
    }

    pub fn is_responsive(&self, thresholds: &ResponsivenessThresholds) -> bool {
        if self.count == 0 {
            return true;
        }
        self.failure_rate <= thresholds.max_failure_rate
            && self.average <= thresholds.max_average_ms
            && self.stddev <= thresholds.max_stddev_ms
            && self.score >= thresholds.min_score
    }
}

pub fn reliability_score(failure_rate: f64, average: f64, stddev: f64) -> f64 {
    let score = 100.0 - 0.5 * failure_rate - 0.05 * average.min(1000.0) - 0.1 * stddev.min(300.0);
    score.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponsivenessThresholds {
    pub max_failure_rate: f64,
    pub max_average_ms: f64,
    pub max_stddev_ms: f64,
    pub min_score: f64,
}

impl Default for ResponsivenessThresholds {
    fn default() -> Self {
        Self {
            max_failure_rate: 20.0,
            max_average_ms: 500.0,
            max_stddev_ms: 200.0,
            min_score: 60.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(values: &[Option<f64>]) -> Vec<LatencySample> {
        let now = Utc::now();
        values
            .iter()
            .map(|value| LatencySample {
                value_ms: *value,
                taken_at: now,
            })
            .collect()
    }

    #[test]
    fn all_failures_score_zero() {
        let stats = ReliabilityStats::compute(&samples(&[None, None, None]));
        assert_eq!(stats.count, 3);
        assert_eq!(stats.failure_rate, 100.0);
        assert_eq!(stats.score, 0.0);
        assert_eq!(stats.rating, Rating::Unreliable);
    }

    #[test]
    fn summarizes_successful_latencies() {
        let stats = ReliabilityStats::compute(&samples(&[Some(10.0), Some(20.0), Some(30.0), None]));
        assert_eq!(stats.failure_rate, 25.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.average, 20.0);
        assert_eq!(stats.median, 20.0);
        assert!((stats.stddev - 8.1650).abs() < 1e-3);
        // 100 - 12.5 - 1.0 - 0.8165
        assert!((stats.score - 85.6835).abs() < 1e-3);
        assert_eq!(stats.rating, Rating::Good);
    }

    #[test]
    fn score_caps_large_latency_terms() {
        assert_eq!(reliability_score(0.0, 5_000.0, 1_000.0), 20.0);
        assert_eq!(reliability_score(100.0, 5_000.0, 1_000.0), 0.0);
        assert_eq!(reliability_score(0.0, 0.0, 0.0), 100.0);
    }

    #[test]
    fn rating_boundaries() {
        assert_eq!(Rating::from_score(90.0), Rating::Excellent);
        assert_eq!(Rating::from_score(89.9), Rating::Good);
        assert_eq!(Rating::from_score(75.0), Rating::Good);
        assert_eq!(Rating::from_score(60.0), Rating::Fair);
        assert_eq!(Rating::from_score(40.0), Rating::Poor);
        assert_eq!(Rating::from_score(39.9), Rating::Unreliable);
    }

    #[test]
    fn no_data_counts_as_responsive() {
        let thresholds = ResponsivenessThresholds::default();
        assert!(ReliabilityStats::compute(&[]).is_responsive(&thresholds));
        assert!(!ReliabilityStats::compute(&samples(&[None, None])).is_responsive(&thresholds));
        assert!(ReliabilityStats::compute(&samples(&[Some(30.0), Some(35.0)])).is_responsive(&thresholds));
    }
}
