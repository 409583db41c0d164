//! HTTP client implementation

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::request::Request;
use super::response::Response;
use crate::config::HttpConfig;

/// Blocking HTTP client wrapper
///
/// Transport-level retries live here: the fuzzing engine never retries a
/// task, it only accounts the final outcome.
pub struct HttpClient {
    /// Inner reqwest client
    client: reqwest::blocking::Client,

    /// Transport-level retries per send
    retries_on_io_error: u32,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: &HttpConfig, retries_on_io_error: u32) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(config.max_redirects)
            } else {
                reqwest::redirect::Policy::none()
            })
            .user_agent(&config.user_agent)
            .cookie_store(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            retries_on_io_error,
        })
    }

    /// Execute a request, retrying transport-level failures
    pub fn execute(&self, request: &Request) -> Result<Response> {
        let method = reqwest::Method::from_str(&request.method)
            .with_context(|| format!("Invalid HTTP method '{}'", request.method))?;

        let url = request.full_url();

        let mut headers = HeaderMap::new();
        for (key, value) in &request.headers {
            if let (Ok(name), Ok(val)) = (HeaderName::from_str(key), HeaderValue::from_str(value)) {
                headers.insert(name, val);
            }
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;

            let mut builder = self.client.request(method.clone(), &url).headers(headers.clone());

            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            if let Some(timeout) = request.timeout {
                builder = builder.timeout(Duration::from_secs(timeout));
            }

            let start = Instant::now();
            match builder.send() {
                Ok(response) => return build_response(response, start.elapsed()),
                Err(e) if attempts <= self.retries_on_io_error => {
                    tracing::debug!(attempt = attempts, error = %e, "Transport error, retrying");
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Request failed after {} attempt(s)", attempts));
                }
            }
        }
    }
}

/// Build a response model from a reqwest response
fn build_response(response: reqwest::blocking::Response, duration: Duration) -> Result<Response> {
    let status = response.status().as_u16();
    let status_text = response
        .status()
        .canonical_reason()
        .unwrap_or("")
        .to_string();

    let mut headers = BTreeMap::new();
    for (key, value) in response.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(key.as_str().to_string(), v.to_string());
        }
    }

    let body = response.bytes().context("Failed to read response body")?;
    let size = body.len();

    Ok(Response {
        status,
        status_text,
        headers,
        body: body.to_vec(),
        duration_ms: duration.as_millis() as u64,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let config = HttpConfig::default();
        let client = HttpClient::new(&config, 3);
        assert!(client.is_ok());
    }

    #[test]
    fn test_invalid_method_rejected() {
        let config = HttpConfig::default();
        let client = HttpClient::new(&config, 0).unwrap();

        let mut request = Request::new("GET", "http://127.0.0.1:1/");
        request.method = "NOT A METHOD".to_string();
        assert!(client.execute(&request).is_err());
    }
}
