//! Silent session recovery on startup

use crate::router::{Access, Navigator, LANDING_PATH, LOGIN_PATH};
use crate::session::Session;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Refresh succeeded; `restored` is where navigation resumed, if anywhere.
    LoggedIn { restored: Option<Access> },
    Anonymous,
}

/// Attempts a silent refresh through the refresh cookie.
///
/// Runs once. Until it settles the navigator answers [`Access::Pending`].
/// A failed refresh is the ordinary "not logged in yet" case and is only
/// logged at debug level.
pub async fn bootstrap(session: &Session, navigator: &Navigator) -> BootstrapOutcome {
    let outcome = match session.api().refresh().await {
        Ok(refreshed) => {
            session.login(refreshed.access_token, refreshed.user);
            navigator.mark_ready();

            let restored = navigator
                .last_path()
                .filter(|path| {
                    !path.eq_ignore_ascii_case(LOGIN_PATH) && path.as_str() != LANDING_PATH
                })
                .map(|path| {
                    info!("Restoring last visited path {}", path);
                    navigator.navigate(session, &path)
                });
            BootstrapOutcome::LoggedIn { restored }
        }
        Err(e) => {
            debug!("Not logged in or refresh token expired: {}", e);
            session.invalidate();
            BootstrapOutcome::Anonymous
        }
    };

    navigator.mark_ready();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::io::{HttpResponse, MockHttpClient};
    use crate::router::Route;
    use crate::token::TokenStore;
    use std::sync::Arc;

    fn session_with_refresh(status: u16, body: &'static str) -> Session {
        let mut mock = MockHttpClient::new();
        mock.expect_send()
            .withf(|r| r.path == "/auth/refresh-token")
            .times(1)
            .returning(move |_| {
                Box::pin(async move {
                    Ok(HttpResponse {
                        status,
                        body: body.to_string(),
                    })
                })
            });
        Session::new(ApiClient::with_http(Arc::new(mock), TokenStore::new()))
    }

    #[tokio::test]
    async fn test_refresh_restores_session_and_path() {
        let session = session_with_refresh(
            200,
            r#"{"accessToken":"fresh","user":{"_id":"u1","email":"a@b.com"}}"#,
        );
        let nav = Navigator::new();
        nav.record("/Dashboard");

        let outcome = bootstrap(&session, &nav).await;

        assert_eq!(
            outcome,
            BootstrapOutcome::LoggedIn {
                restored: Some(Access::Render(Route::Dashboard))
            }
        );
        assert!(session.is_logged_in());
        assert_eq!(session.access_token().as_deref(), Some("fresh"));
        assert_eq!(session.user().unwrap().email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_no_cookie_is_silent_anonymous() {
        tokio_test::block_on(async {
            let session = session_with_refresh(401, r#"{"message":"No refresh token"}"#);
            let nav = Navigator::new();
            assert_eq!(nav.navigate(&session, "/dashboard"), Access::Pending);

            assert_eq!(bootstrap(&session, &nav).await, BootstrapOutcome::Anonymous);
            assert!(!session.is_logged_in());
            assert!(nav.is_ready());
            assert_eq!(
                nav.navigate(&session, "/dashboard"),
                Access::Redirect(Route::Home)
            );
        });
    }

    #[test]
    fn test_no_last_path_stays_put() {
        tokio_test::block_on(async {
            let session = session_with_refresh(200, r#"{"accessToken":"fresh"}"#);
            let nav = Navigator::new();

            assert_eq!(
                bootstrap(&session, &nav).await,
                BootstrapOutcome::LoggedIn { restored: None }
            );
        });
    }
}
