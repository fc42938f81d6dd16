use std::sync::{Arc, RwLock};

/// In-memory holder for the short-lived access token.
///
/// Cloning yields another handle to the same slot. Nothing is persisted; after
/// a restart the token is recovered through the refresh cookie.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<Option<String>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_access_token(&self, token: Option<String>) {
        let mut slot = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = token;
    }

    /// Replaces the token only while one is held. Returns false, leaving the
    /// store empty, when the session was cleared in the meantime.
    pub fn replace_if_present(&self, token: String) -> bool {
        let mut slot = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            return false;
        }
        *slot = Some(token);
        true
    }

    pub fn access_token(&self) -> Option<String> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        self.set_access_token(None);
    }

    pub fn has_token(&self) -> bool {
        self.access_token().is_some()
    }
}
