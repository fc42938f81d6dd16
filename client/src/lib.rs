//! Client core for the IoT dashboard: auth, REST resources, realtime stream
//! and the telemetry chart view-model.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod io;
pub mod metrics;
pub mod model;
pub mod oauth;
pub mod resources;
pub mod router;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod token;
pub mod validate;

pub use api::ApiClient;
pub use bootstrap::{bootstrap, BootstrapOutcome};
pub use config::Config;
pub use dashboard::Dashboard;
pub use errors::{Error, Result};
pub use router::{Access, Navigator, Route};
pub use session::{AuthState, Session};
pub use stream::{ConnectionState, StreamBinding, StreamEvent, WsTransport};
pub use telemetry::{ChartFrame, ChartView, TelemetryView};
pub use token::TokenStore;

use std::sync::Arc;

/// Everything one running dashboard shares: a session, its navigator and the stream.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: Config,
    pub session: Session,
    pub navigator: Navigator,
    pub stream: StreamBinding,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        metrics::init_metrics();

        let api = ApiClient::new(&config, TokenStore::new())?;
        let transport = WsTransport::new(&config.stream_url)?;
        Ok(Self {
            session: Session::new(api),
            navigator: Navigator::new(),
            stream: StreamBinding::new(Arc::new(transport)),
            config,
        })
    }

    /// Silent refresh on startup. See [`bootstrap()`].
    pub async fn bootstrap(&self) -> BootstrapOutcome {
        bootstrap::bootstrap(&self.session, &self.navigator).await
    }

    /// Mounts a dashboard bound to this context's session and stream.
    pub fn mount_dashboard(&self) -> Dashboard {
        Dashboard::mount(
            self.session.clone(),
            self.stream.clone(),
            self.config.telemetry_limit,
        )
    }
}
