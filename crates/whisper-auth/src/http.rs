//! Authenticated request gateway.
//!
//! Every remote call goes through [`ApiClient::request`], which attaches the
//! session's Authorization header unless the path belongs to the
//! credential-acquisition flow (`auth/...`).

use anyhow::{Context, Result};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;
use whisper_core::{ApiConfig, ClientError, ClientResult, FieldErrors, ReqwestErrorExt};

use crate::session::SessionManager;

/// Paths under this prefix never get automatic credential injection.
pub const AUTH_PREFIX: &str = "auth/";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether a request to `path` should carry the session credential.
pub fn requires_credential(path: &str) -> bool {
    !path.trim_start_matches('/').starts_with(AUTH_PREFIX)
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    session: Arc<SessionManager>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, session: Arc<SessionManager>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Self::from_parts(client, &config.base_url, session)
    }

    /// Client against an arbitrary base URL with the default timeout.
    pub fn with_base_url(base_url: &str, session: Arc<SessionManager>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Self::from_parts(client, base_url, session)
    }

    fn from_parts(client: Client, base_url: &str, session: Arc<SessionManager>) -> Result<Self> {
        // Url::join drops the last segment unless the base ends with a slash
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).context("Invalid API base URL")?;

        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Start a request to `path`, relative to the base URL.
    pub fn request(&self, method: Method, path: &str) -> ClientResult<RequestBuilder> {
        let relative = path.trim_start_matches('/');
        let url = self
            .base_url
            .join(relative)
            .map_err(|e| ClientError::server(0, format!("Invalid request path {}: {}", path, e)))?;

        let mut builder = self.client.request(method.clone(), url);
        let header = requires_credential(relative)
            .then(|| self.session.auth_header_value())
            .flatten();

        debug!(%method, path = relative, authorized = header.is_some(), "Dispatching request");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        Ok(builder)
    }

    /// Send and decode a JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = self.dispatch(request).await?;
        response.json().await.map_err(|e| e.into_client_error())
    }

    /// Send, discarding the response body.
    pub async fn send_empty(&self, request: RequestBuilder) -> ClientResult<()> {
        self.dispatch(request).await.map(drop)
    }

    async fn dispatch(&self, request: RequestBuilder) -> ClientResult<Response> {
        let response = request.send().await.map_err(|e| e.into_client_error())?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

async fn error_from_response(response: Response) -> ClientError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    let (message, fields) = parse_error_body(&text).unwrap_or_else(|| {
        let message = if text.trim().is_empty() {
            status.canonical_reason().unwrap_or("Request failed").to_string()
        } else {
            text.trim().to_string()
        };
        (message, FieldErrors::new())
    });

    debug!(status = status.as_u16(), %message, "Request rejected");
    ClientError::from_status(status.as_u16(), message, fields)
}

/// Extract a message and per-field errors from an error body.
///
/// Understands `{"detail": "..."}`, validation lists
/// `{"detail": [{"loc": [..., field], "msg": "..."}]}` and `{"message": "..."}`.
pub(crate) fn parse_error_body(body: &str) -> Option<(String, FieldErrors)> {
    let value: Value = serde_json::from_str(body).ok()?;

    match value.get("detail") {
        Some(Value::String(detail)) => return Some((detail.clone(), FieldErrors::new())),
        Some(Value::Array(entries)) => {
            let mut fields = FieldErrors::new();
            let mut messages = Vec::new();

            for entry in entries {
                let Some(msg) = entry.get("msg").and_then(Value::as_str) else {
                    continue;
                };
                messages.push(msg.to_string());

                let field = entry
                    .get("loc")
                    .and_then(Value::as_array)
                    .and_then(|loc| loc.iter().rev().find_map(Value::as_str));
                if let Some(field) = field {
                    fields.entry(field.to_string()).or_insert_with(|| msg.to_string());
                }
            }

            if !messages.is_empty() {
                return Some((messages.join("; "), fields));
            }
        }
        _ => {}
    }

    value
        .get("message")
        .and_then(Value::as_str)
        .map(|m| (m.to_string(), FieldErrors::new()))
}
