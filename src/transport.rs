//! HTTP transport seam.
//!
//! [`Transport`] sends one fully-built request and buffers the whole response.
//! [`ReqwestTransport`] is the production implementation; tests substitute their own.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Certificate, Client, Method};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::codec::JsonCodec;
use crate::config::ClientConfig;
use crate::error::{PrestoError, Result};

/// A request ready to hit the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_json(&self) -> bool {
        self.header(CONTENT_TYPE.as_str())
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }

    /// Parses the body with `codec`, failing with a protocol error carrying the body.
    ///
    /// An empty body parses to `Value::Null`. The content type is not enforced, since
    /// some proxies strip it.
    pub fn json(&self, codec: &dyn JsonCodec) -> Result<Value> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        codec.parse(&self.body).map_err(|e| {
            let message = if self.is_json() {
                format!("invalid JSON body: {e}")
            } else {
                let content_type = self.header(CONTENT_TYPE.as_str()).unwrap_or("none");
                format!("expected a JSON body, got content-type {content_type}: {e}")
            };
            PrestoError::protocol(self.status, message, self.body.clone())
        })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` once. Status codes are not interpreted here.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// `reqwest` backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: Client,
}

impl ReqwestTransport {
    /// Builds the underlying HTTP client from the TLS settings in `config`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(tls) = &config.tls {
            if let Some(pem) = &tls.ca_certificate_pem {
                builder = builder.add_root_certificate(Certificate::from_pem(pem)?);
            }
            builder = builder.danger_accept_invalid_certs(tls.accept_invalid_certs);
        }
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http_client: builder.build()?,
        })
    }

    pub fn from_client(http_client: Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .http_client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await?;

        // Capture status and headers before consuming the body
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.text().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

const RETRY_MIN_MS: u64 = 50;
const RETRY_MAX_MS: u64 = 100;

/// Random delay before resending after a 503.
pub(crate) fn retry_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(RETRY_MIN_MS..=RETRY_MAX_MS))
}

/// Sends `request`, resending it after a jittered delay for as long as the server
/// answers 503.
pub(crate) async fn send_with_retry(
    transport: &dyn Transport,
    request: HttpRequest,
) -> Result<HttpResponse> {
    let mut attempt = 0u32;
    loop {
        debug!(method = %request.method, url = %request.url, "Sending request");
        let response = transport.send(request.clone()).await?;
        if response.status != 503 {
            debug!(status = response.status, url = %request.url, "Received response");
            return Ok(response);
        }

        attempt += 1;
        let backoff = retry_delay();
        warn!(
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            url = %request.url,
            "Server unavailable (503), retrying"
        );
        sleep(backoff).await;
    }
}
