use crate::errors::{Error, Result};
use std::env;
use std::time::Duration;
use url::Url;

const DEFAULT_API_BASE_URL: &str = "http://localhost:3001/api";
const DEFAULT_TELEMETRY_LIMIT: usize = 100;
const DEFAULT_POLL_SECS: u64 = 10;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Endpoints and tunables for the dashboard client
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub stream_url: String,
    pub oauth_client_id: Option<String>,
    pub oauth_redirect_uri: String,
    pub telemetry_limit: usize,
    pub telemetry_poll: Duration,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_base_url(DEFAULT_API_BASE_URL)
    }
}

impl Config {
    /// Config pointing at `api_base_url`, everything else derived or defaulted.
    pub fn with_base_url(api_base_url: &str) -> Self {
        let api_base_url = api_base_url.trim_end_matches('/').to_string();
        Self {
            stream_url: derive_stream_url(&api_base_url),
            oauth_redirect_uri: format!("{}/auth/google", api_base_url),
            api_base_url,
            oauth_client_id: None,
            telemetry_limit: DEFAULT_TELEMETRY_LIMIT,
            telemetry_poll: Duration::from_secs(DEFAULT_POLL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_env_with_base(None)
    }

    /// Like [`Self::from_env`], but `api_base_url` wins over `API_BASE_URL`
    /// when given. Every other variable is still read.
    pub fn from_env_with_base(api_base_url: Option<&str>) -> Result<Self> {
        let api_base_url = match api_base_url {
            Some(url) => url.to_string(),
            None => env::var("API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
        };
        let mut config = Self::with_base_url(&api_base_url);

        if let Ok(stream_url) = env::var("STREAM_URL") {
            config.stream_url = stream_url;
        }
        config.oauth_client_id = env::var("OAUTH_CLIENT_ID").ok();
        if let Ok(redirect) = env::var("OAUTH_REDIRECT_URI") {
            config.oauth_redirect_uri = redirect;
        }
        config.telemetry_limit = env::var("TELEMETRY_LIMIT")
            .unwrap_or_else(|_| DEFAULT_TELEMETRY_LIMIT.to_string())
            .parse()
            .unwrap_or(DEFAULT_TELEMETRY_LIMIT);
        config.telemetry_poll = Duration::from_secs(
            env::var("TELEMETRY_POLL_SECS")
                .unwrap_or_else(|_| DEFAULT_POLL_SECS.to_string())
                .parse()
                .unwrap_or(DEFAULT_POLL_SECS),
        );
        config.request_timeout = Duration::from_secs(
            env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| DEFAULT_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let api = Url::parse(&self.api_base_url)?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "API base URL must be http(s), got {}",
                self.api_base_url
            )));
        }

        let stream = Url::parse(&self.stream_url)?;
        if !matches!(stream.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "Stream URL must be ws(s), got {}",
                self.stream_url
            )));
        }

        if self.telemetry_limit == 0 {
            return Err(Error::Config(
                "Telemetry limit must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// `http://host/api` becomes `ws://host`, `https` maps to `wss`.
fn derive_stream_url(api_base_url: &str) -> String {
    let stripped = api_base_url.trim_end_matches("/api");
    if let Some(rest) = stripped.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = stripped.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        stripped.to_string()
    }
}
