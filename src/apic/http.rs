//! HTTP transport for APIC REST calls

use crate::error::CollectError;
use reqwest::{header, Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Default request timeout. Large class queries can take minutes on busy fabrics.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Error text the APIC puts in `imdata.0.error.attributes.text` when a query
/// would return more objects than it is willing to serialize at once.
const OVERSIZED_MARKER: &str = "result dataset is too big";

/// Name of the cookie carrying the session token
const TOKEN_COOKIE: &str = "APIC-cookie";

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Status and raw body of a completed call
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Parse the body as JSON
    pub fn json(&self) -> Result<Value, CollectError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Text of the first `imdata` error object, if the controller sent one
    pub fn error_text(&self) -> Option<String> {
        let value: Value = serde_json::from_slice(&self.body).ok()?;
        value
            .pointer("/imdata/0/error/attributes/text")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// Turn a non-success response into a typed error.
    ///
    /// This is the only place that inspects the controller's error wording;
    /// everything downstream works with [`CollectError::Oversized`].
    pub fn into_result(self, path: &str) -> Result<RawResponse, CollectError> {
        if self.status == StatusCode::BAD_REQUEST {
            if let Some(text) = self.error_text() {
                if text.contains(OVERSIZED_MARKER) {
                    return Err(CollectError::Oversized {
                        resource: path.to_string(),
                    });
                }
            }
        }

        if !self.status.is_success() {
            tracing::error!(
                "API error: {} - {}",
                self.status,
                sanitize_for_log(&String::from_utf8_lossy(&self.body))
            );
            return Err(CollectError::Status {
                status: self.status,
                path: path.to_string(),
            });
        }

        Ok(self)
    }
}

/// HTTP client wrapper for APIC API calls
#[derive(Clone)]
pub struct ApicHttpClient {
    client: Client,
}

impl ApicHttpClient {
    /// Create a new HTTP client.
    ///
    /// Certificate verification is disabled on purpose: APICs are on-prem
    /// appliances that almost always serve a self-signed certificate, and the
    /// operator points the collector at a controller they already trust.
    pub fn new(timeout: Duration) -> Result<Self, CollectError> {
        let client = Client::builder()
            .user_agent(concat!("aci-collector/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self { client })
    }

    /// Send one request and collect the full body
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        token: Option<&str>,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<RawResponse, CollectError> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, url);

        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = token {
            request = request.header(header::COOKIE, format!("{}={}", TOKEN_COOKIE, token));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: StatusCode, body: Value) -> RawResponse {
        RawResponse {
            status,
            body: serde_json::to_vec(&body).unwrap(),
        }
    }

    #[test]
    fn test_oversized_body_is_classified() {
        let res = response(
            StatusCode::BAD_REQUEST,
            json!({"imdata": [{"error": {"attributes": {
                "code": "400",
                "text": "Unable to process the query, result dataset is too big"
            }}}]}),
        );
        let err = res.into_result("/api/class/faultInst").unwrap_err();
        assert!(err.is_oversized());
    }

    #[test]
    fn test_plain_400_is_a_status_error() {
        let res = response(
            StatusCode::BAD_REQUEST,
            json!({"imdata": [{"error": {"attributes": {"text": "invalid class"}}}]}),
        );
        let err = res.into_result("/api/class/nope").unwrap_err();
        assert!(matches!(
            err,
            CollectError::Status { status: StatusCode::BAD_REQUEST, .. }
        ));
    }

    #[test]
    fn test_success_passes_through() {
        let res = response(StatusCode::OK, json!({"imdata": [], "totalCount": "0"}));
        let ok = res.into_result("/api/class/fvTenant").unwrap();
        assert_eq!(ok.json().unwrap()["totalCount"], "0");
    }

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let long = "x".repeat(500);
        let out = sanitize_for_log(&long);
        assert!(out.starts_with(&"x".repeat(MAX_LOG_BODY_LENGTH)));
        assert!(out.contains("500 bytes total"));
    }

    #[test]
    fn test_sanitize_handles_multibyte_boundary() {
        let body = format!("{}é{}", "a".repeat(MAX_LOG_BODY_LENGTH - 1), "b".repeat(10));
        let out = sanitize_for_log(&body);
        assert!(out.contains("truncated"));
    }
}
