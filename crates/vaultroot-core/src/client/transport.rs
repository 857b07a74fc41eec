//! HTTP transport seam.
//!
//! The transport only moves bytes: it reports the status code and body and leaves
//! status classification to the client. A failure to get any response at all
//! (DNS, refused connection, timeout) is a `Network` error.

use crate::config::Config;
use crate::error::{Result, VaultRootError};
use crate::stream::StreamMerger;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::Client;
use std::time::Duration;

/// One GET request
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub accept: Option<&'static str>,
    pub timeout: Duration,
}

/// Raw response
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl TransportResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: String::new(),
        }
    }
}

/// Transport trait - anything that can perform a GET against the store
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
    api_key: Option<String>,
    merger: StreamMerger,
}

impl HttpTransport {
    /// Build the HTTP client from configuration.
    ///
    /// Self-signed certificates are accepted only when
    /// `remote.accept_invalid_certs` is set, and doing so is logged.
    pub fn new(config: &Config) -> Result<Self> {
        if config.remote.accept_invalid_certs {
            tracing::warn!(
                "TLS certificate verification disabled for {} (remote.accept_invalid_certs)",
                config.remote.url
            );
        }

        let client = Client::builder()
            .user_agent(concat!("vaultroot/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.timeouts.connect())
            .danger_accept_invalid_certs(config.remote.accept_invalid_certs)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            api_key: config.remote.api_key.clone(),
            merger: StreamMerger::new(
                config.remote.max_body_bytes,
                config.timeouts.stream_chunk(),
            ),
        })
    }

    /// Create a transport with custom client
    pub fn with_client(client: Client, api_key: Option<String>, merger: StreamMerger) -> Self {
        Self {
            client,
            api_key,
            merger,
        }
    }
}

fn network_error(url: &str, e: reqwest::Error) -> VaultRootError {
    if e.is_timeout() {
        VaultRootError::Network(format!("Request timeout fetching {}", url))
    } else if e.is_connect() {
        VaultRootError::Network(format!("Connection error fetching {}: {}", url, e))
    } else {
        VaultRootError::Network(format!("Failed to fetch {}: {}", url, e))
    }
}

/// Parse a `Retry-After` header given in seconds
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: TransportRequest) -> Result<TransportResponse> {
        let mut req = self.client.get(&request.url).timeout(request.timeout);

        if let Some(accept) = request.accept {
            req = req.header(ACCEPT, accept);
        }
        if let Some(ref api_key) = self.api_key {
            req = req.header(AUTHORIZATION, format!("Bearer {}", api_key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| network_error(&request.url, e))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let merged = self
            .merger
            .merge(Box::pin(response.bytes_stream()))
            .await
            .map_err(|e| match e {
                VaultRootError::Http(e) => network_error(&request.url, e),
                other => other,
            })?;

        if merged.timed_out {
            return Err(VaultRootError::Network(format!(
                "Body of {} stalled after {} bytes",
                request.url, merged.bytes
            )));
        }

        Ok(TransportResponse {
            status,
            retry_after,
            body: merged.text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_builds_with_insecure_tls() {
        let mut config = Config::default();
        config.remote.accept_invalid_certs = true;
        assert!(HttpTransport::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let transport = HttpTransport::new(&Config::default()).unwrap();
        let result = transport
            .get(TransportRequest {
                url: "http://thisurldoesnotexist12345.invalid/vault/".to_string(),
                accept: None,
                timeout: Duration::from_secs(5),
            })
            .await;
        assert!(matches!(result, Err(VaultRootError::Network(_))));
    }
}
