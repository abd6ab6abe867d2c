//! Metrics sampler - fetches the worker's plugin metrics over HTTP

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::series::MetricsSample;
use crate::error::SampleError;

/// Monitor endpoint exposed by the worker
pub const DEFAULT_METRICS_URL: &str = "http://localhost:24220/api/plugins.json";

/// Source of metrics samples.
///
/// A single call makes a single attempt; retrying is up to the caller.
#[async_trait]
pub trait MetricsSource: Send {
    async fn sample(&mut self) -> Result<MetricsSample, SampleError>;
}

/// GETs the plugins document from a fixed URL
#[derive(Debug, Clone)]
pub struct HttpMetricsSampler {
    client: Client,
    url: String,
}

impl HttpMetricsSampler {
    /// `timeout` bounds each request; with `None` only the overall run
    /// timeout limits a hung endpoint.
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, SampleError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSampler {
    async fn sample(&mut self) -> Result<MetricsSample, SampleError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(SampleError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let doc: serde_json::Value = serde_json::from_str(&body)?;
        let sample = MetricsSample::from_document(&doc)?;
        debug!(url = %self.url, plugins = sample.plugins.len(), "Metrics sampled");
        Ok(sample)
    }
}
