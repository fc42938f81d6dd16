//! Dashboard controller tying the session, the stream and the telemetry view together

use crate::errors::{Error, Result};
use crate::model::Chart;
use crate::session::Session;
use crate::stream::{ConnectionState, StreamBinding, StreamEvent, Subscription};
use crate::telemetry::{ChartView, FetchTicket, TelemetryView};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type SharedView = Arc<Mutex<TelemetryView>>;

fn lock(view: &Mutex<TelemetryView>) -> MutexGuard<'_, TelemetryView> {
    match view.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Keeps the stream connected exactly while the session is logged in.
///
/// Every transition into the logged-in state opens a fresh connection with
/// the current token; a logout closes it.
pub async fn supervise_stream(session: Session, stream: StreamBinding) {
    let mut auth = session.subscribe();
    loop {
        let logged_in = auth.borrow_and_update().is_logged_in;
        match (logged_in, session.access_token()) {
            (true, Some(token)) => {
                match stream.connect(&token).await {
                    Ok(()) => {}
                    Err(Error::Superseded) => debug!("Stream connect superseded"),
                    Err(e) => error!("Realtime stream unavailable: {}", e),
                }
            }
            (true, None) => warn!("Logged in without an access token, not connecting"),
            (false, _) => {
                if stream.state() != ConnectionState::Disconnected {
                    stream.disconnect();
                }
            }
        }

        if auth.changed().await.is_err() {
            debug!("Session dropped, stopping stream supervisor");
            stream.disconnect();
            return;
        }
    }
}

/// A mounted dashboard view.
///
/// Owns the stream until it is unmounted or a later mount on the same
/// binding takes it over. Unmounting only closes the connection while this
/// dashboard is still the owner.
pub struct Dashboard {
    session: Session,
    stream: StreamBinding,
    view: SharedView,
    supervisor: JoinHandle<()>,
    owner: u64,
    device_listener: Option<Subscription>,
    _alert_listener: Subscription,
    alerts: Option<mpsc::UnboundedReceiver<Value>>,
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("stream", &self.stream)
            .field("selection", &lock(&self.view).selection())
            .finish()
    }
}

impl Dashboard {
    pub fn mount(session: Session, stream: StreamBinding, sample_limit: usize) -> Self {
        let (alert_tx, alerts) = mpsc::unbounded_channel();
        let alert_listener = stream.on_alert(move |event| {
            if let StreamEvent::AlertNotification(payload) = event {
                info!("Alert notification: {}", payload);
                let _ = alert_tx.send(payload.clone());
            }
        });
        let supervisor = tokio::spawn(supervise_stream(session.clone(), stream.clone()));
        let owner = stream.claim(supervisor.abort_handle());

        Self {
            session,
            stream,
            view: Arc::new(Mutex::new(TelemetryView::new(sample_limit))),
            supervisor,
            owner,
            device_listener: None,
            _alert_listener: alert_listener,
            alerts: Some(alerts),
        }
    }

    pub fn stream(&self) -> &StreamBinding {
        &self.stream
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn view(&self) -> ChartView {
        lock(&self.view).view()
    }

    pub fn sample_count(&self) -> usize {
        lock(&self.view).len()
    }

    /// Switches the displayed chart and rebinds the live listener to it.
    ///
    /// Returns the ticket for the history fetch; pass it to [`Self::load_history`].
    pub fn begin_select(&mut self, chart: &Chart) -> FetchTicket {
        let ticket = lock(&self.view).select(chart);

        let view = self.view.clone();
        // Replaces the previous chart's listener in its slot; the view drops
        // readings for other devices.
        self.device_listener = Some(self.stream.on_device_data(move |event| {
            if let StreamEvent::DeviceData(data) = event {
                lock(&view).ingest(data);
            }
        }));
        info!("Selected chart {} ({})", chart.name, chart.id);
        ticket
    }

    /// Fetches history for `ticket` and applies it only if the ticket is still current.
    pub async fn load_history(&self, ticket: &FetchTicket) -> Result<bool> {
        let records = self.session.api().telemetry(&ticket.query).await?;
        let applied = lock(&self.view).apply_history(ticket, &records);
        if applied {
            debug!(
                "Applied {} historical records for {}/{}",
                records.len(),
                ticket.query.device_id,
                ticket.query.field
            );
        }
        Ok(applied)
    }

    pub async fn select_chart(&mut self, chart: &Chart) -> Result<bool> {
        let ticket = self.begin_select(chart);
        self.load_history(&ticket).await
    }

    pub async fn set_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let ticket = lock(&self.view).set_range(start, end)?;
        self.load_history(&ticket).await
    }

    /// Re-fetches history for the current selection and range.
    pub async fn refresh_history(&self) -> Result<bool> {
        let ticket = lock(&self.view).refresh_ticket();
        match ticket {
            Some(ticket) => self.load_history(&ticket).await,
            None => Ok(false),
        }
    }

    /// Clears the filter and samples, then reloads the latest history.
    pub async fn reset_to_live(&self) -> Result<bool> {
        lock(&self.view).reset_to_live();
        self.refresh_history().await
    }

    /// Alert notifications pushed over the stream. Can be taken once.
    pub fn take_alerts(&mut self) -> Option<mpsc::UnboundedReceiver<Value>> {
        self.alerts.take()
    }

    /// Refreshes history on `interval` until `stop` resolves. Failures are logged and retried
    /// on the next tick.
    pub async fn poll_history<F>(&self, interval: Duration, stop: F)
    where
        F: std::future::Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_history().await {
                        warn!("Failed to refresh telemetry: {}", e);
                    }
                }
                _ = &mut stop => break,
            }
        }
    }

    /// Releases the stream and the view's listeners. Same as dropping the dashboard.
    pub fn unmount(self) {
        drop(self);
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.supervisor.abort();
        self.device_listener.take();
        if !self.stream.release(self.owner) {
            debug!("Stream owned by a newer dashboard, leaving it connected");
        }
        info!("Dashboard unmounted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::errors::Error;
    use crate::io::{HttpResponse, MockHttpClient};
    use crate::model::{ChartKind, DeviceRef};
    use crate::stream::{FramePipe, StreamTransport};
    use crate::token::TokenStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OneShotTransport {
        pipe: Mutex<Option<FramePipe>>,
        opened: AtomicUsize,
    }

    #[async_trait]
    impl StreamTransport for OneShotTransport {
        async fn open(&self, _token: &str) -> crate::errors::Result<FramePipe> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.pipe.lock().unwrap().take().ok_or(Error::NotConnected)
        }
    }

    /// Opens a new in-memory pipe per connect and keeps the server ends alive
    #[derive(Default)]
    struct FreshTransport {
        servers: Mutex<Vec<(mpsc::Sender<crate::errors::Result<String>>, mpsc::Receiver<String>)>>,
    }

    impl FreshTransport {
        fn opened(&self) -> usize {
            self.servers.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl StreamTransport for FreshTransport {
        async fn open(&self, _token: &str) -> crate::errors::Result<FramePipe> {
            let (pipe, server_tx, server_rx) = FramePipe::in_memory(8);
            self.servers.lock().unwrap().push((server_tx, server_rx));
            Ok(pipe)
        }
    }

    fn chart(id: &str, device: &str, field: &str) -> Chart {
        Chart {
            id: id.to_string(),
            name: id.to_string(),
            device: DeviceRef::Id(device.to_string()),
            field: field.to_string(),
            kind: ChartKind::Line,
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_stream_follows_session() {
        let (pipe, server_tx, _server_rx) = FramePipe::in_memory(8);
        let transport = Arc::new(OneShotTransport {
            pipe: Mutex::new(Some(pipe)),
            opened: AtomicUsize::new(0),
        });
        let mut mock = MockHttpClient::new();
        mock.expect_send()
            .withf(|r| r.path == "/auth/logout")
            .returning(|_| {
                Box::pin(async {
                    Ok(HttpResponse {
                        status: 200,
                        body: "{}".to_string(),
                    })
                })
            });
        let session = Session::new(ApiClient::with_http(Arc::new(mock), TokenStore::new()));
        let stream = StreamBinding::new(transport.clone());
        let mut dashboard = Dashboard::mount(session.clone(), stream.clone(), 100);
        dashboard.begin_select(&chart("a", "d1", "temp"));

        session.login("tok".to_string(), None);
        eventually(|| transport.opened.load(Ordering::SeqCst) == 1).await;
        eventually(|| stream.state() == ConnectionState::Connecting).await;

        server_tx
            .send(Ok(
                r#"{"event":"device_data","data":{"deviceId":"d1","timestamp":"2024-05-01T08:00:00Z","data":{"temp":{"value":20}}}}"#
                    .to_string(),
            ))
            .await
            .unwrap();
        eventually(|| dashboard.sample_count() == 1).await;

        session.logout().await.unwrap();
        eventually(|| stream.state() == ConnectionState::Disconnected).await;

        let _ = server_tx
            .send(Ok(
                r#"{"event":"device_data","data":{"deviceId":"d1","timestamp":"2024-05-01T08:00:01Z","data":{"temp":21}}}"#
                    .to_string(),
            ))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dashboard.sample_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_history_not_applied() {
        let mut mock = MockHttpClient::new();
        mock.expect_send()
            .withf(|r| r.path == "/telemetry/D1")
            .returning(|_| {
                Box::pin(async {
                    Ok(HttpResponse {
                        status: 200,
                        body: r#"{"data":[{"timestamp":"2024-05-01T08:00:00Z","data":{"temp":21}}]}"#
                            .to_string(),
                    })
                })
            });
        mock.expect_send()
            .withf(|r| r.path == "/telemetry/D2")
            .returning(|_| {
                Box::pin(async {
                    Ok(HttpResponse {
                        status: 200,
                        body: r#"{"data":[{"timestamp":"2024-05-01T08:00:00Z","data":{"humidity":{"value":40}}}]}"#
                            .to_string(),
                    })
                })
            });
        let session = Session::new(ApiClient::with_http(Arc::new(mock), TokenStore::new()));
        let transport = Arc::new(OneShotTransport {
            pipe: Mutex::new(None),
            opened: AtomicUsize::new(0),
        });
        let mut dashboard = Dashboard::mount(session, StreamBinding::new(transport), 100);

        let ticket_a = dashboard.begin_select(&chart("A", "D1", "temp"));
        let ticket_b = dashboard.begin_select(&chart("B", "D2", "humidity"));

        assert!(!dashboard.load_history(&ticket_a).await.unwrap());
        assert_eq!(dashboard.view(), ChartView::Waiting);

        assert!(dashboard.load_history(&ticket_b).await.unwrap());
        match dashboard.view() {
            ChartView::Chart(frame) => {
                assert_eq!(frame.label, "B (humidity)");
                assert_eq!(frame.values, vec![Some(40.0)]);
            }
            ChartView::Waiting => panic!("expected chart B"),
        }
    }

    #[tokio::test]
    async fn test_alerts_forwarded() {
        let (pipe, server_tx, _server_rx) = FramePipe::in_memory(8);
        let transport = Arc::new(OneShotTransport {
            pipe: Mutex::new(Some(pipe)),
            opened: AtomicUsize::new(0),
        });
        let session = Session::new(ApiClient::with_http(
            Arc::new(MockHttpClient::new()),
            TokenStore::new(),
        ));
        let stream = StreamBinding::new(transport);
        let mut dashboard = Dashboard::mount(session.clone(), stream.clone(), 100);
        let mut alerts = dashboard.take_alerts().unwrap();
        assert!(dashboard.take_alerts().is_none());

        session.login("tok".to_string(), None);
        eventually(|| stream.state() == ConnectionState::Connecting).await;
        server_tx
            .send(Ok(
                r#"{"event":"alert_notification","data":{"alertName":"Too hot"}}"#.to_string(),
            ))
            .await
            .unwrap();

        let alert = tokio::time::timeout(Duration::from_secs(1), alerts.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert["alertName"], "Too hot");
    }

    #[tokio::test]
    async fn test_dropping_replaced_mount_keeps_stream() {
        let transport = Arc::new(FreshTransport::default());
        let session = Session::new(ApiClient::with_http(
            Arc::new(MockHttpClient::new()),
            TokenStore::new(),
        ));
        let stream = StreamBinding::new(transport.clone());
        session.login("tok".to_string(), None);

        let first = Dashboard::mount(session.clone(), stream.clone(), 100);
        eventually(|| transport.opened() == 1).await;
        let second = Dashboard::mount(session.clone(), stream.clone(), 100);
        eventually(|| transport.opened() == 2).await;

        drop(first);
        assert_eq!(stream.state(), ConnectionState::Connecting);
        // The second mount's alert listener is untouched.
        assert_eq!(stream.listener_count(), 1);

        // Only the second supervisor still follows the session.
        session.login("tok2".to_string(), None);
        eventually(|| transport.opened() == 3).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.opened(), 3);

        second.unmount();
        assert_eq!(stream.state(), ConnectionState::Disconnected);
        assert_eq!(stream.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_reselect_keeps_single_listener() {
        let session = Session::new(ApiClient::with_http(
            Arc::new(MockHttpClient::new()),
            TokenStore::new(),
        ));
        let transport = Arc::new(OneShotTransport {
            pipe: Mutex::new(None),
            opened: AtomicUsize::new(0),
        });
        let stream = StreamBinding::new(transport);
        let mut dashboard = Dashboard::mount(session, stream.clone(), 100);

        dashboard.begin_select(&chart("a", "d1", "temp"));
        dashboard.begin_select(&chart("b", "d2", "temp"));
        dashboard.begin_select(&chart("c", "d3", "temp"));
        // one device_data slot plus the alert slot
        assert_eq!(stream.listener_count(), 2);

        drop(dashboard);
        assert_eq!(stream.listener_count(), 0);
        assert_eq!(stream.state(), ConnectionState::Disconnected);
    }
}
