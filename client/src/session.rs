//! Session context: the single owner of login state

use crate::api::ApiClient;
use crate::errors::Result;
use crate::model::{LoginRequest, User};
use crate::token::TokenStore;
use crate::validate;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Observable view of the session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub is_logged_in: bool,
    pub user: Option<User>,
}

/// Session context handed to every component that needs auth.
///
/// `login`, `logout` and `invalidate` are the only mutators. The token store
/// and the observable [`AuthState`] always change together, so `is_logged_in`
/// holds exactly when an access token is present.
#[derive(Debug, Clone)]
pub struct Session {
    api: ApiClient,
    state: Arc<watch::Sender<AuthState>>,
}

impl Session {
    pub fn new(api: ApiClient) -> Self {
        let (state, _) = watch::channel(AuthState::default());
        Self {
            api,
            state: Arc::new(state),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn tokens(&self) -> &TokenStore {
        self.api.tokens()
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens().access_token()
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.borrow().is_logged_in
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    /// Receiver notified on every login/logout transition.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn login(&self, token: String, user: Option<User>) {
        self.tokens().set_access_token(Some(token));
        info!(
            "Logged in{}",
            user.as_ref()
                .and_then(|u| u.email.as_deref())
                .map(|email| format!(" as {}", email))
                .unwrap_or_default()
        );
        self.state.send_replace(AuthState {
            is_logged_in: true,
            user,
        });
    }

    /// Validates credentials, calls the login endpoint and installs the token.
    pub async fn sign_in(&self, credentials: &LoginRequest) -> Result<()> {
        validate::login(credentials)?;
        let response = self.api.login(credentials).await?;
        self.login(response.access_token, response.user);
        Ok(())
    }

    /// Logs in with a token delivered on the OAuth redirect.
    pub fn sign_in_with_oauth_token(&self, token: &str) {
        self.login(token.to_string(), None);
    }

    /// Clears local state without contacting the server.
    pub fn invalidate(&self) {
        self.tokens().clear();
        self.state.send_replace(AuthState::default());
    }

    /// Calls the logout endpoint, then clears local state.
    ///
    /// Local state is cleared whatever the server says; the returned result
    /// only reports whether the remote call succeeded.
    pub async fn logout(&self) -> Result<()> {
        let remote = self.api.logout().await;
        if let Err(e) = &remote {
            warn!("Logout request failed, clearing session anyway: {}", e);
        }
        self.invalidate();
        info!("Logged out");
        remote
    }
}
