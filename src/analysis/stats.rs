use serde::{Deserialize, Serialize};

use crate::telemetry::{KpiReading, Metric};

/// Per-metric maximum over a UE's normal history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub max: KpiReading,
    pub sample_count: usize,
}

impl Baseline {
    /// `None` when there is no history to compare against.
    pub fn from_readings(readings: &[KpiReading]) -> Option<Self> {
        let (first, rest) = readings.split_first()?;
        let max = rest.iter().fold(*first, |acc, r| KpiReading {
            throughput: acc.throughput.max(r.throughput),
            rsrp: acc.rsrp.max(r.rsrp),
            rsrq: acc.rsrq.max(r.rsrq),
        });
        Some(Self {
            max,
            sample_count: readings.len(),
        })
    }

    pub fn max_of(&self, metric: Metric) -> f64 {
        self.max.get(metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(throughput: f64, rsrp: f64, rsrq: f64) -> KpiReading {
        KpiReading {
            throughput,
            rsrp,
            rsrq,
        }
    }

    #[test]
    fn test_baseline_takes_columnwise_max() {
        let baseline = Baseline::from_readings(&[
            reading(80.0, -85.0, -12.0),
            reading(100.0, -95.0, -9.0),
            reading(60.0, -80.0, -15.0),
        ])
        .unwrap();

        assert_eq!(baseline.sample_count, 3);
        assert_eq!(baseline.max_of(Metric::Throughput), 100.0);
        assert_eq!(baseline.max_of(Metric::Rsrp), -80.0);
        assert_eq!(baseline.max_of(Metric::Rsrq), -9.0);
    }

    #[test]
    fn test_empty_history_has_no_baseline() {
        assert!(Baseline::from_readings(&[]).is_none());
    }
}
