//! Views, the binary route guard and navigation history

use crate::session::Session;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const LANDING_PATH: &str = "/";
pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Home,
    Login,
    Register,
    Devices,
    Dashboard,
    Charts,
    Alerts,
    Buttons,
    Documentation,
}

impl Route {
    const ALL: [Route; 9] = [
        Route::Home,
        Route::Login,
        Route::Register,
        Route::Devices,
        Route::Dashboard,
        Route::Charts,
        Route::Alerts,
        Route::Buttons,
        Route::Documentation,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Route::Home => LANDING_PATH,
            Route::Login => LOGIN_PATH,
            Route::Register => "/register",
            Route::Devices => "/devicelist",
            Route::Dashboard => "/dashboard",
            Route::Charts => "/charts",
            Route::Alerts => "/alerts",
            Route::Buttons => "/buttons",
            Route::Documentation => "/document",
        }
    }

    /// Paths compare case-insensitively; `/DeviceList` and `/devicelist` are the same view.
    pub fn from_path(path: &str) -> Option<Route> {
        let normalized = normalize(path);
        Route::ALL
            .into_iter()
            .find(|route| route.path() == normalized)
    }

    pub fn is_protected(&self) -> bool {
        !matches!(
            self,
            Route::Home | Route::Login | Route::Register | Route::Documentation
        )
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        LANDING_PATH.to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// Result of resolving a navigation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Render(Route),
    Redirect(Route),
    /// Session bootstrap has not finished; nothing resolves yet.
    Pending,
    NotFound,
}

/// Renders protected views only for a logged-in session.
pub fn guard(session: &Session, route: Route) -> Access {
    if route.is_protected() && !session.is_logged_in() {
        debug!("Redirecting {} to landing, not logged in", route);
        Access::Redirect(Route::Home)
    } else {
        Access::Render(route)
    }
}

#[derive(Debug, Default)]
struct NavState {
    ready: bool,
    current: Option<Route>,
    last_path: Option<String>,
}

/// Tracks the current view and the last visited path for this process.
#[derive(Debug, Clone, Default)]
pub struct Navigator {
    inner: Arc<Mutex<NavState>>,
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut NavState) -> T) -> T {
        let mut state = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    /// Releases route resolution once bootstrap has settled.
    pub fn mark_ready(&self) {
        self.with_state(|s| s.ready = true);
    }

    pub fn is_ready(&self) -> bool {
        self.with_state(|s| s.ready)
    }

    pub fn current(&self) -> Option<Route> {
        self.with_state(|s| s.current)
    }

    pub fn last_path(&self) -> Option<String> {
        self.with_state(|s| s.last_path.clone())
    }

    /// Records `path` as the last visited path unless it is the landing or login page.
    pub fn record(&self, path: &str) {
        let normalized = normalize(path);
        if normalized == LANDING_PATH || normalized == LOGIN_PATH {
            return;
        }
        self.with_state(|s| s.last_path = Some(normalized));
    }

    /// The home action resets the last path to the landing page.
    pub fn go_home(&self) -> Access {
        self.with_state(|s| {
            s.last_path = Some(LANDING_PATH.to_string());
            s.current = Some(Route::Home);
        });
        Access::Render(Route::Home)
    }

    pub fn navigate(&self, session: &Session, path: &str) -> Access {
        if !self.is_ready() {
            return Access::Pending;
        }
        let Some(route) = Route::from_path(path) else {
            return Access::NotFound;
        };

        let access = guard(session, route);
        let landed = match access {
            Access::Render(route) | Access::Redirect(route) => route,
            _ => return access,
        };
        self.record(landed.path());
        self.with_state(|s| s.current = Some(landed));
        access
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::io::MockHttpClient;
    use crate::token::TokenStore;

    fn session() -> Session {
        Session::new(ApiClient::with_http(
            Arc::new(MockHttpClient::new()),
            TokenStore::new(),
        ))
    }

    #[test]
    fn test_route_lookup_is_case_insensitive() {
        assert_eq!(Route::from_path("/DeviceList"), Some(Route::Devices));
        assert_eq!(Route::from_path("/Dashboard/"), Some(Route::Dashboard));
        assert_eq!(Route::from_path(""), Some(Route::Home));
        assert_eq!(Route::from_path("/nope"), None);
    }

    #[test]
    fn test_guard_redirects_anonymous() {
        let session = session();
        assert_eq!(
            guard(&session, Route::Dashboard),
            Access::Redirect(Route::Home)
        );
        assert_eq!(guard(&session, Route::Login), Access::Render(Route::Login));

        session.login("tok".to_string(), None);
        assert_eq!(
            guard(&session, Route::Dashboard),
            Access::Render(Route::Dashboard)
        );
    }

    #[test]
    fn test_navigation_pending_until_ready() {
        let session = session();
        let nav = Navigator::new();
        assert_eq!(nav.navigate(&session, "/login"), Access::Pending);

        nav.mark_ready();
        assert_eq!(nav.navigate(&session, "/login"), Access::Render(Route::Login));
        assert_eq!(nav.current(), Some(Route::Login));
    }

    #[test]
    fn test_last_path_excludes_landing_and_login() {
        let session = session();
        session.login("tok".to_string(), None);
        let nav = Navigator::new();
        nav.mark_ready();

        nav.navigate(&session, "/Charts");
        nav.navigate(&session, "/Login");
        nav.navigate(&session, "/");
        assert_eq!(nav.last_path().as_deref(), Some("/charts"));

        nav.go_home();
        assert_eq!(nav.last_path().as_deref(), Some("/"));
    }
}
