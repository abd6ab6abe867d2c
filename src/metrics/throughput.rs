//! Throughput estimate from a finished sample series
//!
//! This is a per-tick approximation, not a time-weighted rate: it assumes
//! samples were taken at a roughly uniform poll interval.

use std::time::Duration;

use super::series::SampleSeries;
use crate::error::ThroughputError;

/// Interior samples needed once the edges are trimmed
const MIN_INTERIOR_SAMPLES: usize = 2;

/// Counter increase per tick for `plugin_id`/`counter`.
///
/// Zero readings are dropped (the worker has not produced anything yet, or
/// has already shut down), then the first and last remaining readings are
/// trimmed. The rate is `(last - first) / (n - 1)` over the `n` interior
/// readings.
pub fn compute(series: &SampleSeries, plugin_id: &str, counter: &str) -> Result<f64, ThroughputError> {
    let usable: Vec<f64> = series
        .counter_values(plugin_id, counter)
        .into_iter()
        .flatten()
        .filter(|v| *v != 0.0)
        .collect();

    let required = MIN_INTERIOR_SAMPLES + 2;
    if usable.len() < required {
        return Err(ThroughputError::InsufficientData {
            usable: usable.len(),
            required,
        });
    }

    let interior = &usable[1..usable.len() - 1];
    let first = interior[0];
    let last = interior[interior.len() - 1];
    Ok((last - first) / (interior.len() - 1) as f64)
}

/// Convert a per-tick rate to a per-second rate
pub fn per_second(rate_per_tick: f64, poll_interval: Duration) -> f64 {
    let secs = poll_interval.as_secs_f64();
    if secs == 0.0 {
        return rate_per_tick;
    }
    rate_per_tick / secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::series::{Counters, MetricsSample, RssReading};
    use std::collections::BTreeMap;

    fn series_of(values: &[f64]) -> SampleSeries {
        let mut series = SampleSeries::new();
        for v in values {
            let mut counters = Counters::new();
            counters.insert("emit_records".to_string(), *v);
            let mut plugins = BTreeMap::new();
            plugins.insert("tail".to_string(), counters);
            series.push(MetricsSample::new(plugins), RssReading::Unavailable);
        }
        series
    }

    #[test]
    fn test_trims_zeros_and_edges() {
        let series = series_of(&[0.0, 0.0, 100.0, 200.0, 300.0, 400.0, 0.0]);
        let rate = compute(&series, "tail", "emit_records").unwrap();
        assert_eq!(rate, 100.0);
    }

    #[test]
    fn test_uneven_growth() {
        let series = series_of(&[0.0, 50.0, 150.0, 450.0, 750.0, 800.0]);
        // interior: 150, 450, 750
        let rate = compute(&series, "tail", "emit_records").unwrap();
        assert_eq!(rate, 300.0);
    }

    #[test]
    fn test_insufficient_data() {
        let series = series_of(&[0.0, 100.0, 200.0, 300.0, 0.0]);
        let err = compute(&series, "tail", "emit_records").unwrap_err();
        assert_eq!(err, ThroughputError::InsufficientData { usable: 3, required: 4 });

        let empty = SampleSeries::new();
        assert!(compute(&empty, "tail", "emit_records").is_err());
    }

    #[test]
    fn test_unknown_plugin_has_no_data() {
        let series = series_of(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let err = compute(&series, "other", "emit_records").unwrap_err();
        assert_eq!(err, ThroughputError::InsufficientData { usable: 0, required: 4 });
    }

    #[test]
    fn test_per_second() {
        assert_eq!(per_second(100.0, Duration::from_millis(500)), 200.0);
        assert_eq!(per_second(100.0, Duration::from_secs(1)), 100.0);
        assert_eq!(per_second(100.0, Duration::ZERO), 100.0);
    }
}
