//! Authenticated API client with a single refresh-and-retry on 401

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::io::{ApiRequest, HttpClient, HttpResponse, ReqwestHttpClient};
use crate::metrics::{
    HTTP_FAILURES_TOTAL, HTTP_REQUESTS_TOTAL, TOKEN_REFRESH_FAILURES_TOTAL, TOKEN_REFRESH_TOTAL,
};
use crate::model::{LoginRequest, TokenResponse};
use crate::token::TokenStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh-token";
pub const LOGOUT_PATH: &str = "/auth/logout";

#[derive(Clone)]
pub struct ApiClient {
    http: Arc<dyn HttpClient>,
    tokens: TokenStore,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("has_token", &self.tokens.has_token())
            .finish()
    }
}

impl ApiClient {
    pub fn new(config: &Config, tokens: TokenStore) -> Result<Self> {
        let http = ReqwestHttpClient::new(&config.api_base_url, config.request_timeout)?;
        Ok(Self::with_http(Arc::new(http), tokens))
    }

    pub fn with_http(http: Arc<dyn HttpClient>, tokens: TokenStore) -> Self {
        Self { http, tokens }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Sends `request` with the current bearer token.
    ///
    /// A 401 on a request that has not been retried yet triggers exactly one
    /// refresh; on success the request is replayed once with the new token.
    /// If the refresh fails the original 401 is returned. A 401 on the replay
    /// is returned as [`Error::Unauthorized`] without another refresh.
    /// Requests sent without a token are never refreshed, and a refreshed
    /// token is only installed while the store still holds one.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<HttpResponse> {
        request.bearer = self.tokens.access_token();
        let response = self.dispatch(&request).await?;

        if response.status != 401 || request.retried {
            return check_status(&request, response);
        }
        if request.bearer.is_none() {
            debug!(
                "{} {} returned 401 without a session, not refreshing",
                request.method, request.path
            );
            return check_status(&request, response);
        }

        info!("{} {} returned 401, refreshing token", request.method, request.path);
        request.retried = true;
        match self.request_refresh().await {
            Ok(refreshed) => {
                if !self.tokens.replace_if_present(refreshed.access_token.clone()) {
                    warn!("Session ended during token refresh, not replaying {}", request.path);
                    return check_status(&request, response);
                }
                request.bearer = Some(refreshed.access_token);
                let replay = self.dispatch(&request).await?;
                if replay.status == 401 {
                    warn!("{} {} still unauthorized after refresh", request.method, request.path);
                    HTTP_FAILURES_TOTAL.inc();
                    return Err(Error::Unauthorized);
                }
                check_status(&request, replay)
            }
            Err(e) => {
                warn!("Token refresh failed, propagating original error: {}", e);
                check_status(&request, response)
            }
        }
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<HttpResponse> {
        HTTP_REQUESTS_TOTAL.inc();
        self.http.send(request).await.map_err(|e| {
            HTTP_FAILURES_TOTAL.inc();
            e
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.execute(request).await?;
        Ok(serde_json::from_str(&response.body)?)
    }

    pub async fn send_json<B, T>(&self, request: ApiRequest, body: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let response = self.execute(request.json(body)?).await?;
        Ok(serde_json::from_str(&response.body)?)
    }

    pub async fn send_empty(&self, request: ApiRequest) -> Result<()> {
        self.execute(request).await.map(|_| ())
    }

    /// `POST /auth/login`. Does not touch the token store; the session does.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<TokenResponse> {
        let request = ApiRequest::post(LOGIN_PATH)
            .without_refresh()
            .json(credentials)?;
        let response = self.execute(request).await?;
        Ok(serde_json::from_str(&response.body)?)
    }

    /// Exchanges the refresh cookie for a new access token and installs it.
    pub async fn refresh(&self) -> Result<TokenResponse> {
        let refreshed = self.request_refresh().await?;
        self.tokens
            .set_access_token(Some(refreshed.access_token.clone()));
        Ok(refreshed)
    }

    async fn request_refresh(&self) -> Result<TokenResponse> {
        TOKEN_REFRESH_TOTAL.inc();
        let request = ApiRequest::post(REFRESH_PATH).without_refresh();

        let outcome = match self.dispatch(&request).await {
            Ok(response) if response.is_success() => {
                serde_json::from_str::<TokenResponse>(&response.body).map_err(Error::from)
            }
            Ok(response) => Err(Error::RefreshFailed(format!(
                "status {}: {}",
                response.status,
                error_message(&response)
            ))),
            Err(e) => Err(Error::RefreshFailed(e.to_string())),
        };

        match outcome {
            Ok(refreshed) => {
                debug!("Access token refreshed");
                Ok(refreshed)
            }
            Err(e) => {
                TOKEN_REFRESH_FAILURES_TOTAL.inc();
                Err(e)
            }
        }
    }

    /// `POST /auth/logout`, invalidating the refresh cookie server-side.
    pub async fn logout(&self) -> Result<()> {
        self.send_empty(ApiRequest::post(LOGOUT_PATH).without_refresh())
            .await
    }
}

fn check_status(request: &ApiRequest, response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }
    HTTP_FAILURES_TOTAL.inc();
    debug!(
        "{} {} failed with status {}",
        request.method, request.path, response.status
    );
    Err(Error::Status {
        status: response.status,
        message: error_message(&response),
    })
}

/// Server error text from a `message` or `error` field, else the raw body.
fn error_message(response: &HttpResponse) -> String {
    serde_json::from_str::<serde_json::Value>(&response.body)
        .ok()
        .and_then(|body| {
            ["message", "error"]
                .iter()
                .find_map(|key| body.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| response.body.clone())
}
