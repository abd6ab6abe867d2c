//! Sample series - ordered metrics and resource readings for one run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::SampleError;

/// Named numeric counters of one plugin
pub type Counters = BTreeMap<String, f64>;

/// One snapshot of the worker's plugin metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub sampled_at: DateTime<Utc>,
    pub plugins: BTreeMap<String, Counters>,
}

impl MetricsSample {
    pub fn new(plugins: BTreeMap<String, Counters>) -> Self {
        Self {
            sampled_at: Utc::now(),
            plugins,
        }
    }

    /// Parse a `{"plugins": [{"plugin_id": ..., <counter>: <number>, ...}]}` document.
    ///
    /// Non-numeric fields are ignored, entries without a `plugin_id` are
    /// skipped and a repeated `plugin_id` keeps its first entry.
    pub fn from_document(doc: &serde_json::Value) -> Result<Self, SampleError> {
        let entries = doc
            .get("plugins")
            .and_then(|p| p.as_array())
            .ok_or_else(|| SampleError::Shape("missing \"plugins\" array".to_string()))?;

        let mut plugins = BTreeMap::new();
        for entry in entries {
            let Some(object) = entry.as_object() else {
                continue;
            };
            let Some(plugin_id) = object.get("plugin_id").and_then(|id| id.as_str()) else {
                continue;
            };
            if plugins.contains_key(plugin_id) {
                continue;
            }
            let counters: Counters = object
                .iter()
                .filter_map(|(name, value)| value.as_f64().map(|v| (name.clone(), v)))
                .collect();
            plugins.insert(plugin_id.to_string(), counters);
        }

        Ok(Self::new(plugins))
    }

    pub fn counter(&self, plugin_id: &str, name: &str) -> Option<f64> {
        self.plugins.get(plugin_id)?.get(name).copied()
    }
}

/// Resident memory of the worker at one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RssReading {
    Kilobytes(u64),
    /// No worker pid known, or the platform cannot report RSS
    Unavailable,
}

impl RssReading {
    pub fn kilobytes(&self) -> Option<u64> {
        match self {
            RssReading::Kilobytes(kb) => Some(*kb),
            RssReading::Unavailable => None,
        }
    }
}

/// Append-only series of samples in tick order.
///
/// `samples[i]` and `rss[i]` always belong to the same tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSeries {
    samples: Vec<MetricsSample>,
    rss: Vec<RssReading>,
}

impl SampleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: MetricsSample, rss: RssReading) {
        self.samples.push(sample);
        self.rss.push(rss);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[MetricsSample] {
        &self.samples
    }

    pub fn rss(&self) -> &[RssReading] {
        &self.rss
    }

    pub fn last(&self) -> Option<&MetricsSample> {
        self.samples.last()
    }

    pub fn last_rss(&self) -> Option<RssReading> {
        self.rss.last().copied()
    }

    /// Counter value per sample; `None` where the plugin or counter is absent
    pub fn counter_values(&self, plugin_id: &str, name: &str) -> Vec<Option<f64>> {
        self.samples.iter().map(|s| s.counter(plugin_id, name)).collect()
    }

    /// Latest value of a counter, 0 before any sample has it
    pub fn last_counter(&self, plugin_id: &str, name: &str) -> f64 {
        self.last().and_then(|s| s.counter(plugin_id, name)).unwrap_or(0.0)
    }

    pub fn peak_rss(&self) -> Option<u64> {
        self.rss.iter().filter_map(|r| r.kilobytes()).max()
    }
}
