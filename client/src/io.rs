//! HTTP transport abstraction for testability

use crate::errors::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Outbound API call, relative to the configured base URL
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub bearer: Option<String>,
    /// Set once the request has been replayed after a refresh, or for calls
    /// that must never trigger one (the auth endpoints themselves).
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn without_refresh(mut self) -> Self {
        self.retried = true;
        self
    }
}

/// HTTP response from a request
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstraction over HTTP client for dependency injection
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<HttpResponse>;
}

/// Production HTTP client using reqwest.
///
/// The cookie store keeps the HttpOnly refresh cookie the server sets on
/// login, so refresh and logout calls are credentialed.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: &ApiRequest) -> Result<HttpResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!(
            "{} {} (auth: {})",
            request.method,
            url,
            request.bearer.is_some()
        );

        let mut builder = self.client.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        debug!("{} {} -> {} ({} bytes)", request.method, url, status, body.len());
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    /// Port 1 is reserved and unbound, so connections are always refused
    const UNREACHABLE_BASE: &str = "http://127.0.0.1:1/api";

    #[test]
    fn test_builder_helpers() {
        let request = ApiRequest::get("/telemetry/d1")
            .query("field", "temp")
            .query("limit", "100");
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.query.len(), 2);
        assert!(!request.retried);
        assert!(ApiRequest::post("/auth/login").without_refresh().retried);
    }

    #[test]
    fn test_json_body() {
        let request = ApiRequest::post("/mqtt/sendcommand")
            .json(&serde_json::json!({"topic": "t", "command": "on"}))
            .unwrap();
        assert_eq!(request.body.unwrap()["command"], "on");
    }

    #[tokio::test]
    async fn test_connection_refused_returns_http_error() {
        let client = ReqwestHttpClient::new(UNREACHABLE_BASE, Duration::from_secs(2)).unwrap();
        let err = client.send(&ApiRequest::get("/devices")).await.unwrap_err();
        assert!(matches!(err, Error::Http(_)), "{err:?}");
    }
}
