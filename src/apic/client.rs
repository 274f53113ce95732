//! APIC Client
//!
//! Main client for one controller, combining the session token and the HTTP
//! transport. Cloning is cheap and clones share the same session.

use super::auth::{Credentials, SessionToken, TOKEN_TTL};
use super::http::{ApicHttpClient, RawResponse, DEFAULT_TIMEOUT};
use crate::error::CollectError;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

/// Main APIC client
#[derive(Clone)]
pub struct ApicClient {
    http: ApicHttpClient,
    base_url: Url,
    credentials: Credentials,
    session: Arc<RwLock<Option<SessionToken>>>,
    token_ttl: Duration,
}

/// Add a scheme to bare host names; explicit schemes are kept as given
pub fn normalize_url(host: &str) -> Result<Url, CollectError> {
    let host = host.trim();
    let with_scheme = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    };

    Url::parse(&with_scheme).map_err(|e| CollectError::InvalidUrl {
        url: host.to_string(),
        reason: e.to_string(),
    })
}

impl ApicClient {
    /// Create a new client. No network traffic until [`authenticate`](Self::authenticate).
    pub fn new(host: &str, credentials: Credentials) -> Result<Self, CollectError> {
        Ok(Self {
            http: ApicHttpClient::new(DEFAULT_TIMEOUT)?,
            base_url: normalize_url(host)?,
            credentials,
            session: Arc::new(RwLock::new(None)),
            token_ttl: TOKEN_TTL,
        })
    }

    /// Override how long a token is used before it is refreshed
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build the full URL for an API path, e.g. `/api/class/fvTenant`
    fn url_for(&self, path: &str) -> String {
        format!("{}{}.json", self.base_url.as_str().trim_end_matches('/'), path)
    }

    /// Log in and store the session token
    pub async fn authenticate(&self) -> Result<(), CollectError> {
        tracing::info!(
            host = %self.base_url,
            user = %self.credentials.username,
            "Authenticating to the APIC"
        );

        let body = json!({
            "aaaUser": {
                "attributes": {
                    "name": self.credentials.username,
                    "pwd": self.credentials.password,
                }
            }
        });

        let res = self
            .http
            .send(Method::POST, &self.url_for("/api/aaaLogin"), None, &[], Some(&body))
            .await
            .map_err(|e| CollectError::Auth(e.to_string()))?;

        let token = extract_token(&res, "aaaLogin")?;
        *self.session.write().await = Some(SessionToken::new(token));

        tracing::debug!("Login succeeded, token valid for {}s", self.token_ttl.as_secs());
        Ok(())
    }

    /// Refresh the token if it is older than the TTL.
    ///
    /// Concurrent callers that all see a stale token queue on the write lock;
    /// only the first one talks to the controller.
    pub async fn ensure_fresh(&self) -> Result<(), CollectError> {
        {
            let session = self.session.read().await;
            match session.as_ref() {
                Some(token) if token.is_fresh(self.token_ttl) => return Ok(()),
                Some(_) => {}
                None => return Err(CollectError::Auth("not logged in".to_string())),
            }
        }

        let mut session = self.session.write().await;
        if let Some(token) = session.as_ref() {
            if token.is_fresh(self.token_ttl) {
                return Ok(());
            }
        }

        tracing::debug!("Token is stale, refreshing");
        let current = session.as_ref().map(|t| t.token.clone());

        // Bypasses ensure_fresh; we already hold the session lock
        let res = self
            .http
            .send(
                Method::GET,
                &self.url_for("/api/aaaRefresh"),
                current.as_deref(),
                &[],
                None,
            )
            .await
            .map_err(|e| CollectError::Auth(e.to_string()))?;

        let token = extract_token(&res, "aaaRefresh")?;
        *session = Some(SessionToken::new(token));
        Ok(())
    }

    /// Issue an API call with the current token, refreshing it first if needed
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<RawResponse, CollectError> {
        self.ensure_fresh().await?;

        let token = self.session.read().await.as_ref().map(|t| t.token.clone());
        let res = self
            .http
            .send(method, &self.url_for(path), token.as_deref(), query, body)
            .await?;

        res.into_result(path)
    }

    /// GET a managed-object class, e.g. `fvTenant`
    pub async fn get_class(
        &self,
        class: &str,
        query: &[(String, String)],
    ) -> Result<RawResponse, CollectError> {
        self.request(Method::GET, &class_path(class), query, None).await
    }
}

/// API path for a class query
pub fn class_path(class: &str) -> String {
    format!("/api/class/{}", class)
}

/// Pull the token out of an `aaaLogin`/`aaaRefresh` reply
fn extract_token(res: &RawResponse, kind: &str) -> Result<String, CollectError> {
    if let Some(text) = res.error_text() {
        return Err(CollectError::Auth(text));
    }
    if !res.status.is_success() {
        return Err(CollectError::Auth(format!("received HTTP status {}", res.status)));
    }

    let value = res
        .json()
        .map_err(|e| CollectError::Auth(e.to_string()))?;

    value
        .pointer(&format!("/imdata/0/{}/attributes/token", kind))
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .ok_or_else(|| CollectError::Auth(format!("no token in {} response", kind)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_normalize_bare_host() {
        let url = normalize_url("10.0.0.1").unwrap();
        assert_eq!(url.as_str(), "https://10.0.0.1/");
    }

    #[test]
    fn test_normalize_keeps_scheme() {
        let url = normalize_url("http://127.0.0.1:8080").unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn test_url_for_appends_json() {
        let client = ApicClient::new("apic.example.com", Credentials::new("u", "p")).unwrap();
        assert_eq!(
            client.url_for("/api/class/fvTenant"),
            "https://apic.example.com/api/class/fvTenant.json"
        );
    }

    #[test]
    fn test_extract_token_reads_login_reply() {
        let res = RawResponse {
            status: StatusCode::OK,
            body: br#"{"imdata":[{"aaaLogin":{"attributes":{"token":"tok-1"}}}]}"#.to_vec(),
        };
        assert_eq!(extract_token(&res, "aaaLogin").unwrap(), "tok-1");
    }

    #[test]
    fn test_extract_token_error_field_is_auth_error() {
        let res = RawResponse {
            status: StatusCode::OK,
            body: br#"{"imdata":[{"error":{"attributes":{"text":"bad password"}}}]}"#.to_vec(),
        };
        let err = extract_token(&res, "aaaLogin").unwrap_err();
        assert!(err.is_auth());
        assert!(err.to_string().contains("bad password"));
    }

    #[tokio::test]
    async fn test_ensure_fresh_requires_login() {
        let client = ApicClient::new("apic", Credentials::new("u", "p")).unwrap();
        let err = client.ensure_fresh().await.unwrap_err();
        assert!(err.is_auth());
    }
}
