//! reqwest-backed network capability.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{CachedResponse, HeaderList, Request};
use crate::runtime::{FetchError, Network};

use super::error::InfraError;

const USER_AGENT: &str = concat!("offline-cache/", env!("CARGO_PKG_VERSION"));

pub struct HttpNetwork {
    client: reqwest::Client,
    request_timeout: Option<Duration>,
}

impl HttpNetwork {
    pub fn new(request_timeout: Option<Duration>) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| InfraError::network(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            request_timeout,
        })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<CachedResponse, FetchError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|err| FetchError::transport(format!("invalid method: {err}")))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|err| map_error(err, self.request_timeout))?;
        let status = response.status().as_u16();
        let headers: HeaderList = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|err| map_error(err, self.request_timeout))?;

        debug!(url = %request.url, status, bytes = body.len(), "network fetch complete");

        Ok(CachedResponse::new(status, headers, body))
    }
}

fn map_error(err: reqwest::Error, timeout: Option<Duration>) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
        }
    } else {
        FetchError::transport(err.to_string())
    }
}
