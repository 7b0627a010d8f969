//! HTTP fetch capability: every GET issued by the engine goes through `HttpFetcher`.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use tracing::{debug, trace};
use url::Url;

use crate::config::HttpConfig;
use crate::error::ClipError;

/// A completed GET with its body fully buffered.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Issue a GET and read the whole body.
    ///
    /// Transport and body-read failures are reported as [`ClipError::Network`];
    /// non-2xx statuses are returned to the caller untouched.
    async fn get(&self, url: &Url) -> Result<HttpResponse, ClipError>;
}

fn invalid_header(reason: String) -> ClipError {
    ClipError::Configuration { reason }
}

/// Build the shared client used for playlists and segments.
pub fn create_client(config: &HttpConfig) -> Result<Client, ClipError> {
    let mut headers = HeaderMap::new();
    headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid_header(format!("invalid header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| invalid_header(format!("invalid value for header `{name}`: {e}")))?;
        headers.insert(name, value);
    }

    let mut builder = Client::builder()
        .pool_max_idle_per_host(10)
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        builder = builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        builder = builder.connect_timeout(config.connect_timeout);
    }

    builder.build().map_err(|e| ClipError::Configuration {
        reason: format!("failed to build HTTP client: {e}"),
    })
}

/// [`HttpFetcher`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &HttpConfig) -> Result<Self, ClipError> {
        create_client(config).map(Self::new)
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &Url) -> Result<HttpResponse, ClipError> {
        trace!(%url, "GET");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ClipError::network(url.as_str(), e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ClipError::network(url.as_str(), format!("failed to read body: {e}")))?;

        debug!(%url, status = status.as_u16(), bytes = body.len(), "GET completed");
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_client_rejects_invalid_header() {
        let mut config = HttpConfig::default();
        config
            .headers
            .insert("bad header".to_string(), "value".to_string());
        let err = create_client(&config).unwrap_err();
        assert!(matches!(err, ClipError::Configuration { .. }));
    }

    #[test]
    fn create_client_accepts_custom_headers() {
        let mut config = HttpConfig::default();
        config
            .headers
            .insert("Referer".to_string(), "https://example.com".to_string());
        assert!(ReqwestFetcher::from_config(&config).is_ok());
    }
}
