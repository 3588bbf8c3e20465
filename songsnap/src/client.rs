use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};

/// HTTP client for the recognition service's detect endpoint.
///
/// Built once per [`crate::Recognizer`] and shared by every invocation; the
/// credential comes from [`Config`] and is sent as a sensitive header.
#[derive(Debug, Clone)]
pub struct RecognitionClient {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl RecognitionClient {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("API key not set".into()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            header_name(&config.host_header)?,
            header_value(&config.api_host, "API host")?,
        );
        let mut credential = header_value(api_key, "API key")?;
        credential.set_sensitive(true);
        headers.insert(header_name(&config.credential_header)?, credential);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.resolve_endpoint(),
            timeout: config.request_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST the base64 payload and return the raw response body.
    ///
    /// Exactly one request, no retries. 413 maps to [`Error::PayloadTooLarge`],
    /// any other non-2xx to [`Error::Service`], an exceeded budget to
    /// [`Error::Timeout`].
    pub async fn recognize(&self, payload: String, cancel: &CancellationToken) -> Result<String> {
        info!(endpoint = %self.endpoint, bytes = payload.len(), "submitting clip for recognition");

        let exchange = async {
            let response = self
                .client
                .post(&self.endpoint)
                .body(payload)
                .send()
                .await
                .map_err(|e| self.classify(e))?;

            let status = response.status();
            if status == StatusCode::PAYLOAD_TOO_LARGE {
                return Err(Error::PayloadTooLarge);
            }

            let body = response.text().await.map_err(|e| self.classify(e))?;
            debug!(status = status.as_u16(), bytes = body.len(), "recognition response");

            if !status.is_success() {
                return Err(Error::service(status.as_u16(), &body));
            }
            Ok(body)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = exchange => result,
        }
    }

    fn classify(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::Http(e)
        }
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::Config(format!("invalid header name {name:?}: {e}")))
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value.trim())
        .map_err(|e| Error::Config(format!("invalid {what} header value: {e}")))
}
