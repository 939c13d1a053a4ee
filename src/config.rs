use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::util::{is_local_endpoint_url, parse_env_u64};

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_BATCH_DELAY_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the adjudication agent service.
    pub api_url: String,
    /// Pause between subjects in a batch run.
    pub batch_delay: Duration,
    /// Abandon a stream when no chunk arrives for this long.
    pub stream_idle_timeout: Option<Duration>,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
            stream_idle_timeout: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Reads the environment, loading a `.env` file first when one exists.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_url = std::env::var("SENTINEL_API_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let batch_delay_ms = parse_env_u64("SENTINEL_BATCH_DELAY_MS")
            .context("SENTINEL_BATCH_DELAY_MS must be a whole number of milliseconds")?
            .unwrap_or(DEFAULT_BATCH_DELAY_MS);
        let idle_timeout_secs = parse_env_u64("SENTINEL_STREAM_IDLE_TIMEOUT_SECS")
            .context("SENTINEL_STREAM_IDLE_TIMEOUT_SECS must be a whole number of seconds")?;
        let request_timeout_secs = parse_env_u64("SENTINEL_REQUEST_TIMEOUT_SECS")
            .context("SENTINEL_REQUEST_TIMEOUT_SECS must be a whole number of seconds")?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        Ok(Self {
            api_url,
            batch_delay: Duration::from_millis(batch_delay_ms),
            stream_idle_timeout: idle_timeout_secs.map(Duration::from_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            bail!(
                "Invalid SENTINEL_API_URL '{}': expected http:// or https:// URL",
                self.api_url
            );
        }

        if self.stream_idle_timeout == Some(Duration::ZERO) {
            bail!("SENTINEL_STREAM_IDLE_TIMEOUT_SECS must be greater than zero when set");
        }

        if self.request_timeout.is_zero() {
            bail!("SENTINEL_REQUEST_TIMEOUT_SECS must be greater than zero");
        }

        if self.api_url.starts_with("http://") && !self.is_local_endpoint() {
            tracing::warn!(url = %self.api_url, "agent service reached over plain http");
        }

        Ok(())
    }

    pub fn is_local_endpoint(&self) -> bool {
        is_local_endpoint_url(&self.api_url)
    }
}
