//! Google sign-in: authorization URL and the token-bearing redirect

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::router::{Navigator, LANDING_PATH};
use crate::session::Session;
use tracing::info;
use url::Url;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const SCOPE: &str = "profile email";

pub fn authorization_url(config: &Config) -> Result<Url> {
    let client_id = config
        .oauth_client_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Config("OAUTH_CLIENT_ID is not set".to_string()))?;

    let mut url = Url::parse(GOOGLE_AUTH_URL)?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", &config.oauth_redirect_uri)
        .append_pair("scope", SCOPE)
        .append_pair("response_type", "code");
    Ok(url)
}

/// Access token carried by a redirect URL, if any.
pub fn token_from_redirect(redirect: &str) -> Result<Option<String>> {
    let url = Url::parse(redirect)?;
    Ok(url
        .query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty()))
}

/// Logs in with the token from `redirect` and resets the last path to the landing page.
///
/// Returns false when the redirect carries no token.
pub fn complete_redirect(session: &Session, navigator: &Navigator, redirect: &str) -> Result<bool> {
    let Some(token) = token_from_redirect(redirect)? else {
        return Ok(false);
    };
    session.sign_in_with_oauth_token(&token);
    navigator.go_home();
    info!("Signed in through OAuth redirect");
    Ok(true)
}
