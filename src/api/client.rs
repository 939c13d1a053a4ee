use crate::config::Config;
use crate::profile::ClientProfile;
use crate::util::{is_local_endpoint_url, join_url};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Source of adjudication streams, one per subject.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn open_adjudication(&self, subject_id: &str) -> Result<ByteStream>;
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_url: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
        })
    }

    pub fn is_local_endpoint(&self) -> bool {
        is_local_endpoint_url(&self.api_url)
    }

    pub async fn fetch_customers(&self) -> Result<Vec<ClientProfile>> {
        let request_url = join_url(&self.api_url, "customers");
        self.get_json(&request_url).await
    }

    pub async fn fetch_customer(&self, customer_id: &str) -> Result<ClientProfile> {
        let request_url = join_url(&self.api_url, &format!("customers/{customer_id}"));
        self.get_json(&request_url).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, request_url: &str) -> Result<T> {
        let response = self
            .http
            .get(request_url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|error| map_api_request_error(error, request_url))?
            .error_for_status()
            .map_err(|error| map_api_request_error(error, request_url))?;

        response
            .json::<T>()
            .await
            .map_err(|error| anyhow!("unexpected response from '{}': {}", request_url, error))
    }
}

#[async_trait]
impl AgentTransport for ApiClient {
    async fn open_adjudication(&self, subject_id: &str) -> Result<ByteStream> {
        let request_url = join_url(&self.api_url, &format!("adjudicate/{subject_id}"));
        tracing::info!(subject_id, url = %request_url, "opening adjudication stream");

        let response = self
            .http
            .get(&request_url)
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|error| map_api_request_error(error, &request_url))?
            .error_for_status()
            .map_err(|error| map_api_request_error(error, &request_url))?;

        let request_url_for_stream = request_url.clone();
        let stream = response.bytes_stream().map(move |item| {
            item.map_err(|error| map_api_request_error(error, &request_url_for_stream))
        });
        Ok(Box::pin(stream))
    }
}

fn map_api_request_error(error: reqwest::Error, request_url: &str) -> anyhow::Error {
    if error.is_connect() && is_local_endpoint_url(request_url) {
        return anyhow!(
            "cannot reach local agent service '{}': {}. Start the service or update SENTINEL_API_URL.",
            request_url,
            error
        );
    }
    if error.is_connect() {
        return anyhow!("cannot reach agent service '{}': {}", request_url, error);
    }
    if error.is_timeout() {
        return anyhow!("request to '{}' timed out: {}", request_url, error);
    }
    if let Some(status) = error.status() {
        return anyhow!(
            "agent service '{}' returned HTTP {}: {}",
            request_url,
            status,
            error
        );
    }
    anyhow!("request to '{}' failed: {}", request_url, error)
}
