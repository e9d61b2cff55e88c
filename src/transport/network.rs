//! Real network transport

use std::time::Duration;

use tracing::debug;

use crate::config::ShimConfig;
use crate::{Result, ShimError};

use super::{HttpRequest, HttpResponse, Transport};

/// Sends requests over the network with certificate verification on
///
/// This is the data-plane sender. Relaxed TLS settings of the proxy
/// control channel never apply here.
#[derive(Debug, Clone)]
pub struct NetworkTransport {
    client: reqwest::Client,
}

impl NetworkTransport {
    /// Create a transport with an optional per-request timeout
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| ShimError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Create a transport using the configured timeout
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &ShimConfig) -> Result<Self> {
        Self::new(config.timeout())
    }

    /// Wrap an existing client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for NetworkTransport {
    type Error = reqwest::Error;

    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, Self::Error> {
        debug!("Sending {} {}", request.method(), request.uri());

        let request = reqwest::Request::try_from(request)?;
        let response = self.client.execute(request).await?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        let mut out = HttpResponse::new(body);
        *out.status_mut() = status;
        *out.version_mut() = version;
        *out.headers_mut() = headers;
        Ok(out)
    }
}
