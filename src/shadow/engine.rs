//! ==============================================================================
//! shadow/engine.rs - ShadowSyncEngine
//! ==============================================================================
//!
//! purpose:
//!     keeps the device shadow in sync with the latest measurement snapshot
//!     and feeds inbound deltas to the ui.
//!
//! lifecycle:
//!
//!     Disconnected --network ready--> Connecting --ok--> Connected
//!                                         │                 │   ^
//!                                       error          lost │   │ back
//!                                         v                 v   │
//!                                  EngineError        ReconnectPending
//!
//!     ShuttingDown is entered from anywhere on shutdown and is terminal.
//!
//! single flight:
//!     at most one update is unacknowledged at a time. while one is in flight
//!     ticks keep servicing the transport (so deltas still land) but do not
//!     encode or send anything. an accepted, rejected or timed-out ack clears
//!     the flag.
//!
//! errors:
//!     startup failures (identity, first connect) are returned as EngineError
//!     and end the engine. everything after that is logged and retried on
//!     the next tick.
//!
//! ==============================================================================

use super::codec::{self, CodecError};
use super::delta::{DeltaField, DeltaRegistry};
use super::transport::{AckStatus, ConnectParams, ShadowTransport, TransportError, TransportEvent};
use super::ConnectionState;
use crate::aggregator::SnapshotSlot;
use crate::domain::{MeasurementSnapshot, Notifications};
use crate::identity::{ClientId, IdentityError, IdentityProvider};
use crate::network::NetworkReady;
use crate::ui::UiSink;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// every variant is unrecoverable for the sync subsystem
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to retrieve device identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("shadow connect failed: {0}")]
    Connect(#[source] TransportError),

    #[error("unable to set auto-reconnect: {0}")]
    AutoReconnect(#[source] TransportError),
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// bound on each transport service step
    pub yield_timeout: Duration,
    /// in-flight updates older than this count as timed out
    pub ack_timeout: Duration,
    /// pause after each transmitted update
    pub publish_interval: Duration,
    /// pause between subscription registration and the first tick
    pub settle_delay: Duration,
    pub auto_reconnect: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            yield_timeout: Duration::from_secs(1),
            ack_timeout: Duration::from_secs(5),
            publish_interval: Duration::from_secs(5),
            settle_delay: Duration::from_secs(2),
            auto_reconnect: true,
        }
    }
}

/// what a single tick ended up doing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// an update was sent and is now in flight
    Published { client_token: String },
    /// previous update still unacknowledged, nothing sent
    InFlight,
    /// waiting for the transport to come back
    Reconnecting,
    /// the aggregator has not produced a snapshot yet
    NoSnapshot,
    /// encoding or publishing failed, retry next tick
    Skipped,
    /// engine not started or already shut down
    NotRunning,
}

struct InFlight {
    client_token: String,
    sent_at: Instant,
}

pub struct ShadowSyncEngine<T> {
    transport: T,
    settings: EngineSettings,
    snapshots: Arc<SnapshotSlot>,
    ui: Arc<dyn UiSink>,
    identity: Arc<dyn IdentityProvider>,
    network: NetworkReady,

    state: ConnectionState,
    client_id: Option<ClientId>,
    registry: DeltaRegistry,
    notifications: Notifications,
    in_flight: Option<InFlight>,
    sequence: u64,
    published: u64,
}

impl<T: ShadowTransport> ShadowSyncEngine<T> {
    pub fn new(
        transport: T,
        settings: EngineSettings,
        snapshots: Arc<SnapshotSlot>,
        ui: Arc<dyn UiSink>,
        identity: Arc<dyn IdentityProvider>,
        network: NetworkReady,
    ) -> Self {
        Self {
            transport,
            settings,
            snapshots,
            ui,
            identity,
            network,
            state: ConnectionState::Disconnected,
            client_id: None,
            registry: DeltaRegistry::new(),
            notifications: Notifications::default(),
            in_flight: None,
            sequence: 0,
            published: 0,
        }
    }

    #[cfg(test)]
    fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    fn in_flight_token(&self) -> Option<&str> {
        self.in_flight.as_ref().map(|f| f.client_token.as_str())
    }

    #[cfg(test)]
    fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    #[cfg(test)]
    fn published_count(&self) -> u64 {
        self.published
    }

    #[cfg(test)]
    fn transport(&self) -> &T {
        &self.transport
    }

    // ==========================================================================
    // startup
    // ==========================================================================

    /// identity, network wait, connect, subscriptions. any error here is fatal.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        let client_id = match self.identity.client_id() {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("[SHADOW] Failed to retrieve device serial: {}", e);
                return Err(EngineError::Identity(e));
            }
        };
        self.ui.add_status_line(&format!("\nDevice client Id:\n>> {} <<\n", client_id));

        if !self.network.is_ready() {
            tracing::info!("[SHADOW] Waiting for the network...");
        }
        self.network.wait_ready().await;

        self.state = ConnectionState::Connecting;
        tracing::info!("[SHADOW] Initializing shadow device connection as {}", client_id);
        let params = ConnectParams::for_device(&client_id);
        if let Err(e) = self.transport.connect(&params).await {
            tracing::error!("[SHADOW] Shadow connect returned error: {}", e);
            self.state = ConnectionState::Disconnected;
            return Err(EngineError::Connect(e));
        }
        self.ui.add_status_line("\nConnected to the device shadow\n");

        if let Err(e) = self.transport.set_auto_reconnect(self.settings.auto_reconnect).await {
            tracing::error!("[SHADOW] Unable to set auto-reconnect: {}", e);
            self.state = ConnectionState::Disconnected;
            return Err(EngineError::AutoReconnect(e));
        }

        for field in DeltaField::ALL {
            if !self.registry.register(field) {
                tracing::error!("[SHADOW] Unable to register delta callback for '{}'", field.key());
            }
        }
        tracing::info!("[SHADOW] {} delta subscription(s) registered", self.registry.len());

        self.client_id = Some(client_id);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    // ==========================================================================
    // steady state
    // ==========================================================================

    /// one loop iteration: reconnect if needed, service the transport, then
    /// publish unless an update is already in flight
    pub async fn tick(&mut self) -> TickOutcome {
        if !matches!(self.state, ConnectionState::Connected | ConnectionState::ReconnectPending) {
            return TickOutcome::NotRunning;
        }

        if self.state == ConnectionState::ReconnectPending {
            self.try_reconnect().await;
        }

        match self.transport.yield_once(self.settings.yield_timeout).await {
            Ok(events) => {
                for event in events {
                    self.handle_event(event);
                }
            }
            Err(e) => {
                tracing::warn!("[SHADOW] yield failed: {}", e);
                self.enter_reconnect_pending();
            }
        }

        self.expire_in_flight();

        if self.state != ConnectionState::Connected {
            return TickOutcome::Reconnecting;
        }
        if self.in_flight.is_some() {
            return TickOutcome::InFlight;
        }
        let Some(snapshot) = self.snapshots.latest() else {
            return TickOutcome::NoSnapshot;
        };
        self.publish_snapshot(snapshot).await
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Delta(bytes) => match codec::decode_delta(&bytes) {
                Ok(delta) => {
                    self.registry.dispatch(&delta, &mut self.notifications, self.ui.as_ref());
                }
                Err(e) => tracing::warn!("[SHADOW] unreadable delta: {}", e),
            },
            TransportEvent::Ack { client_token, status } => self.handle_ack(&client_token, status),
            TransportEvent::Disconnected => self.enter_reconnect_pending(),
            TransportEvent::Reconnected => self.enter_connected(),
        }
    }

    fn handle_ack(&mut self, client_token: &str, status: AckStatus) {
        let matches = self.in_flight.as_ref().is_some_and(|f| f.client_token == client_token);
        if !matches {
            tracing::debug!("[SHADOW] ack for unknown update {}", client_token);
            return;
        }
        self.in_flight = None;
        match status {
            AckStatus::Accepted => tracing::info!("[SHADOW] Shadow update {} accepted", client_token),
            AckStatus::Rejected => tracing::error!("[SHADOW] Shadow update {} rejected", client_token),
            AckStatus::Timeout => tracing::warn!("[SHADOW] Shadow update {} timeout", client_token),
        }
    }

    fn expire_in_flight(&mut self) {
        let expired = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.sent_at.elapsed() >= self.settings.ack_timeout);
        if expired {
            if let Some(f) = self.in_flight.take() {
                tracing::warn!("[SHADOW] Shadow update {} timeout, no ack received", f.client_token);
            }
        }
    }

    fn enter_reconnect_pending(&mut self) {
        if self.state == ConnectionState::Connected {
            tracing::warn!("[SHADOW] Disconnected from the device shadow");
            self.ui.add_status_line("Disconnected from the device shadow...");
            self.state = ConnectionState::ReconnectPending;
        }
    }

    fn enter_connected(&mut self) {
        if self.state == ConnectionState::ReconnectPending {
            tracing::info!("[SHADOW] Reconnected to the device shadow");
            self.ui.add_status_line("\nReconnected to the device shadow\n");
            self.state = ConnectionState::Connected;
        }
    }

    async fn try_reconnect(&mut self) {
        if self.transport.is_auto_reconnect_enabled() {
            if self.transport.is_connected() {
                self.enter_connected();
            } else {
                tracing::info!("[SHADOW] Attempting automatic reconnect.");
            }
            return;
        }

        tracing::warn!("[SHADOW] Manually attempting a reconnection.");
        match self.transport.attempt_reconnect().await {
            Ok(()) => {
                tracing::info!("[SHADOW] Manual reconnect was successful.");
                self.enter_connected();
            }
            Err(e) => tracing::warn!("[SHADOW] Manual reconnect failed: {}", e),
        }
    }

    async fn publish_snapshot(&mut self, snapshot: MeasurementSnapshot) -> TickOutcome {
        let Some(client_id) = &self.client_id else {
            return TickOutcome::NotRunning;
        };
        self.sequence += 1;
        let token = format!("{}-{}", client_id, self.sequence);

        let document = match codec::encode(
            &snapshot,
            self.notifications.text.as_str(),
            self.notifications.count,
            &token,
        ) {
            Ok(doc) => doc,
            Err(e @ CodecError::EncodingOverflow { .. }) => {
                tracing::warn!("[SHADOW] skipping this cycle: {}", e);
                return TickOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!("[SHADOW] Unable to build shadow document: {}", e);
                return TickOutcome::Skipped;
            }
        };

        match self.transport.publish(&document).await {
            Ok(()) => {
                tracing::info!("[SHADOW] Updating shadow device: {}", document.as_str());
                self.in_flight = Some(InFlight { client_token: token.clone(), sent_at: Instant::now() });
                self.published += 1;
                TickOutcome::Published { client_token: token }
            }
            Err(e) => {
                tracing::error!("[SHADOW] Shadow update failed to send: {}", e);
                TickOutcome::Skipped
            }
        }
    }

    // ==========================================================================
    // run / shutdown
    // ==========================================================================

    /// start, then tick until `shutdown` turns true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        let started = tokio::select! {
            r = self.start() => Some(r),
            _ = wait_for_shutdown(&mut shutdown) => None,
        };
        match started {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(e),
            None => {
                self.shutdown().await;
                return Ok(());
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(self.settings.settle_delay) => {}
            _ = wait_for_shutdown(&mut shutdown) => {}
        }

        while !*shutdown.borrow() {
            let tick_started = Instant::now();
            let outcome = tokio::select! {
                outcome = self.tick() => outcome,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };
            let pause = self.pause_after(&outcome, tick_started);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// publish_interval after a transmit, otherwise whatever is left of
    /// yield_timeout; a tick never repeats faster than that
    fn pause_after(&self, outcome: &TickOutcome, tick_started: Instant) -> Duration {
        match outcome {
            TickOutcome::Published { .. } => self.settings.publish_interval,
            _ => self.settings.yield_timeout.saturating_sub(tick_started.elapsed()),
        }
    }

    pub async fn shutdown(&mut self) {
        if self.state == ConnectionState::ShuttingDown {
            return;
        }
        self.state = ConnectionState::ShuttingDown;
        self.in_flight = None;
        match self.transport.disconnect().await {
            Ok(()) => tracing::info!("[SHADOW] Successfully disconnected after {} update(s).", self.published),
            Err(e) => tracing::error!("[SHADOW] Disconnect error: {}", e),
        }
    }
}

/// resolves when the flag turns true; never if the sender goes away first
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SerialIdentity;
    use crate::network::{readiness, NetworkSignal};
    use crate::shadow::codec::{encode_delta, ShadowDocument};
    use crate::ui::test_support::RecordingUi;
    use crate::ui::UiEvent;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const SERIAL: &str = "0123C4D5E6F7A8B9EE";

    // ==========================================================================
    // scripted transport
    // ==========================================================================

    #[derive(Default)]
    struct Inner {
        fail_connect: bool,
        connect_calls: usize,
        connected: bool,
        auto_reconnect: bool,
        reconnect_ok: bool,
        reconnect_attempts: usize,
        pending: VecDeque<TransportEvent>,
        published: Vec<ShadowDocument>,
        disconnected: bool,
        fail_yield: bool,
        yield_calls: usize,
    }

    #[derive(Clone, Default)]
    struct ScriptedTransport {
        inner: Arc<Mutex<Inner>>,
    }

    impl ScriptedTransport {
        fn inject(&self, event: TransportEvent) {
            let mut inner = self.inner.lock().unwrap();
            if event == TransportEvent::Disconnected {
                inner.connected = false;
            }
            inner.pending.push_back(event);
        }

        fn ack_last(&self, status: AckStatus) {
            let token = self.published().last().unwrap().client_token.clone();
            self.inject(TransportEvent::Ack { client_token: token, status });
        }

        fn published(&self) -> Vec<ShadowDocument> {
            self.inner.lock().unwrap().published.clone()
        }

        fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
            f(&mut self.inner.lock().unwrap())
        }
    }

    impl ShadowTransport for ScriptedTransport {
        async fn connect(&mut self, _params: &ConnectParams) -> Result<(), TransportError> {
            self.with(|i| {
                i.connect_calls += 1;
                if i.fail_connect {
                    return Err(TransportError::Auth("bad credentials".into()));
                }
                i.connected = true;
                Ok(())
            })
        }

        async fn set_auto_reconnect(&mut self, enabled: bool) -> Result<(), TransportError> {
            self.with(|i| i.auto_reconnect = enabled);
            Ok(())
        }

        fn is_auto_reconnect_enabled(&self) -> bool {
            self.with(|i| i.auto_reconnect)
        }

        async fn yield_once(&mut self, _timeout: Duration) -> Result<Vec<TransportEvent>, TransportError> {
            self.with(|i| {
                i.yield_calls += 1;
                if i.fail_yield {
                    i.connected = false;
                    return Err(TransportError::Network("socket reset".into()));
                }
                Ok(i.pending.drain(..).collect())
            })
        }

        async fn publish(&mut self, document: &ShadowDocument) -> Result<(), TransportError> {
            self.with(|i| {
                if !i.connected {
                    return Err(TransportError::NotConnected);
                }
                i.published.push(document.clone());
                Ok(())
            })
        }

        async fn attempt_reconnect(&mut self) -> Result<(), TransportError> {
            self.with(|i| {
                i.reconnect_attempts += 1;
                if i.reconnect_ok {
                    i.connected = true;
                    Ok(())
                } else {
                    Err(TransportError::Network("still down".into()))
                }
            })
        }

        fn is_connected(&self) -> bool {
            self.with(|i| i.connected)
        }

        async fn disconnect(&mut self) -> Result<(), TransportError> {
            self.with(|i| {
                i.connected = false;
                i.disconnected = true;
            });
            Ok(())
        }
    }

    // ==========================================================================
    // fixtures
    // ==========================================================================

    struct Fixture {
        engine: ShadowSyncEngine<ScriptedTransport>,
        transport: ScriptedTransport,
        slot: Arc<SnapshotSlot>,
        ui: Arc<RecordingUi>,
        _signal: NetworkSignal,
    }

    fn fixture(serial: Option<&str>, settings: EngineSettings) -> Fixture {
        let transport = ScriptedTransport::default();
        let slot = Arc::new(SnapshotSlot::new());
        let ui = Arc::new(RecordingUi::default());
        let (signal, ready) = readiness();
        signal.set_ready(true);
        let engine = ShadowSyncEngine::new(
            transport.clone(),
            settings,
            slot.clone(),
            ui.clone(),
            Arc::new(SerialIdentity::new(serial.map(str::to_string))),
            ready,
        );
        Fixture { engine, transport, slot, ui, _signal: signal }
    }

    fn snapshot(temperature: f32) -> MeasurementSnapshot {
        MeasurementSnapshot { temperature, noise_level: 10, light_intensity: 400, tvoc: 20, eco2: 450 }
    }

    async fn started(settings: EngineSettings) -> Fixture {
        let mut f = fixture(Some(SERIAL), settings);
        f.engine.start().await.unwrap();
        assert_eq!(f.engine.state(), ConnectionState::Connected);
        f
    }

    // ==========================================================================
    // startup
    // ==========================================================================

    #[tokio::test]
    async fn test_identity_failure_is_fatal_before_connecting() {
        let mut f = fixture(None, EngineSettings::default());
        f.slot.store(snapshot(70.0));

        let err = f.engine.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Identity(_)));
        assert_eq!(f.engine.state(), ConnectionState::Disconnected);
        assert_eq!(f.transport.with(|i| i.connect_calls), 0);

        assert_eq!(f.engine.tick().await, TickOutcome::NotRunning);
        assert!(f.transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_initial_connect_failure_is_fatal() {
        let mut f = fixture(Some(SERIAL), EngineSettings::default());
        f.transport.with(|i| i.fail_connect = true);
        f.slot.store(snapshot(70.0));

        assert!(matches!(f.engine.start().await, Err(EngineError::Connect(TransportError::Auth(_)))));
        assert_eq!(f.engine.tick().await, TickOutcome::NotRunning);
        assert!(f.transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_waits_for_network_before_connecting() {
        let transport = ScriptedTransport::default();
        let (signal, ready) = readiness();
        let mut engine = ShadowSyncEngine::new(
            transport.clone(),
            EngineSettings::default(),
            Arc::new(SnapshotSlot::new()),
            Arc::new(RecordingUi::default()),
            Arc::new(SerialIdentity::new(Some(SERIAL.to_string()))),
            ready,
        );

        let handle = tokio::spawn(async move {
            engine.start().await.map(|_| engine.state())
        });
        tokio::task::yield_now().await;
        assert_eq!(transport.with(|i| i.connect_calls), 0);

        signal.set_ready(true);
        assert_eq!(handle.await.unwrap().unwrap(), ConnectionState::Connected);
        assert_eq!(transport.with(|i| i.connect_calls), 1);
    }

    #[tokio::test]
    async fn test_start_surfaces_identity_and_connection() {
        let f = started(EngineSettings::default()).await;
        let events = f.ui.events();
        assert!(matches!(&events[0], UiEvent::StatusLine(s) if s.contains(SERIAL)));
        assert!(matches!(&events[1], UiEvent::StatusLine(s) if s.contains("Connected")));
        assert!(f.engine.transport().is_auto_reconnect_enabled());
    }

    // ==========================================================================
    // single flight
    // ==========================================================================

    #[tokio::test]
    async fn test_single_flight_until_ack() {
        let mut f = started(EngineSettings::default()).await;
        assert_eq!(f.engine.tick().await, TickOutcome::NoSnapshot);

        f.slot.store(snapshot(72.5));
        let first = f.engine.tick().await;
        assert!(matches!(first, TickOutcome::Published { .. }));

        // aggregator keeps producing while the ack is outstanding
        for t in 0..5 {
            f.slot.store(snapshot(73.0 + t as f32));
            assert_eq!(f.engine.tick().await, TickOutcome::InFlight);
            assert_eq!(f.transport.published().len(), 1);
        }

        // an ack for somebody else's update changes nothing
        f.transport.inject(TransportEvent::Ack {
            client_token: "other-1".into(),
            status: AckStatus::Accepted,
        });
        assert_eq!(f.engine.tick().await, TickOutcome::InFlight);

        f.transport.ack_last(AckStatus::Accepted);
        assert!(matches!(f.engine.tick().await, TickOutcome::Published { .. }));
        assert_eq!(f.transport.published().len(), 2);
        assert_eq!(f.engine.published_count(), 2);

        // second document carries the newest snapshot
        let (reported, token) = codec::decode_reported(&f.transport.published()[1].bytes).unwrap();
        assert_eq!(reported.temperature, 77.0);
        assert_eq!(token, format!("{}-2", SERIAL));
    }

    #[tokio::test]
    async fn test_rejected_ack_clears_flag_without_state_change() {
        let mut f = started(EngineSettings::default()).await;
        f.slot.store(snapshot(72.5));
        f.engine.tick().await;

        f.transport.ack_last(AckStatus::Rejected);
        assert!(matches!(f.engine.tick().await, TickOutcome::Published { .. }));
        assert_eq!(f.engine.state(), ConnectionState::Connected);

        f.transport.ack_last(AckStatus::Timeout);
        assert!(matches!(f.engine.tick().await, TickOutcome::Published { .. }));
        assert_eq!(f.engine.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_ack_times_out_locally() {
        let settings = EngineSettings { ack_timeout: Duration::from_secs(5), ..Default::default() };
        let mut f = started(settings).await;
        f.slot.store(snapshot(72.5));
        f.engine.tick().await;
        assert!(f.engine.in_flight_token().is_some());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(f.engine.tick().await, TickOutcome::InFlight);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(matches!(f.engine.tick().await, TickOutcome::Published { .. }));
        assert_eq!(f.transport.published().len(), 2);
    }

    #[tokio::test]
    async fn test_encoding_overflow_skips_cycle() {
        let mut f = started(EngineSettings::default()).await;
        // 200 quote characters fit the notification slot but double when escaped
        let mut state = serde_json::Map::new();
        state.insert("notifications".into(), serde_json::json!("\"".repeat(200)));
        f.transport.inject(TransportEvent::Delta(encode_delta(1, state)));
        f.slot.store(snapshot(72.5));

        assert_eq!(f.engine.tick().await, TickOutcome::Skipped);
        assert!(f.transport.published().is_empty());
        assert!(f.engine.in_flight_token().is_none());
        assert_eq!(f.engine.state(), ConnectionState::Connected);
    }

    // ==========================================================================
    // deltas
    // ==========================================================================

    #[tokio::test]
    async fn test_delta_applied_while_update_in_flight() {
        let mut f = started(EngineSettings::default()).await;
        f.slot.store(snapshot(85.0));
        f.engine.tick().await;

        let mut state = serde_json::Map::new();
        state.insert("notifications".into(), serde_json::json!("Its a little warm in here."));
        state.insert("notificationCount".into(), serde_json::json!(1));
        state.insert("unrelated".into(), serde_json::json!(true));
        f.transport.inject(TransportEvent::Delta(encode_delta(2, state)));

        assert_eq!(f.engine.tick().await, TickOutcome::InFlight);
        assert_eq!(f.engine.notifications().count, 1);
        assert_eq!(f.engine.notifications().text.as_str(), "Its a little warm in here.");

        let ui_calls: Vec<_> = f
            .ui
            .events()
            .into_iter()
            .filter(|e| matches!(e, UiEvent::NotificationText(_) | UiEvent::NotificationCount(_)))
            .collect();
        assert_eq!(ui_calls.len(), 2);

        // the next update reports the new notification state
        f.transport.ack_last(AckStatus::Accepted);
        f.engine.tick().await;
        let (reported, _) = codec::decode_reported(&f.transport.published()[1].bytes).unwrap();
        assert_eq!(reported.notification_count, 1);
        assert_eq!(reported.notifications, "Its a little warm in here.");
    }

    // ==========================================================================
    // reconnection
    // ==========================================================================

    #[tokio::test]
    async fn test_disconnect_then_manual_reconnect_next_tick() {
        let settings = EngineSettings { auto_reconnect: false, ..Default::default() };
        let mut f = started(settings).await;
        f.slot.store(snapshot(72.5));

        f.transport.inject(TransportEvent::Disconnected);
        assert_eq!(f.engine.tick().await, TickOutcome::Reconnecting);
        assert_eq!(f.engine.state(), ConnectionState::ReconnectPending);
        assert_eq!(f.transport.with(|i| i.reconnect_attempts), 0);
        assert!(f.transport.published().is_empty());

        // still down: keeps retrying, one attempt per tick
        assert_eq!(f.engine.tick().await, TickOutcome::Reconnecting);
        assert_eq!(f.transport.with(|i| i.reconnect_attempts), 1);

        f.transport.with(|i| i.reconnect_ok = true);
        assert!(matches!(f.engine.tick().await, TickOutcome::Published { .. }));
        assert_eq!(f.engine.state(), ConnectionState::Connected);
        assert_eq!(f.transport.with(|i| i.reconnect_attempts), 2);
        assert!(f
            .ui
            .events()
            .iter()
            .any(|e| matches!(e, UiEvent::StatusLine(s) if s.contains("Disconnected"))));
    }

    #[tokio::test]
    async fn test_auto_reconnect_waits_for_transport() {
        let mut f = started(EngineSettings::default()).await;
        f.slot.store(snapshot(72.5));

        f.transport.inject(TransportEvent::Disconnected);
        assert_eq!(f.engine.tick().await, TickOutcome::Reconnecting);
        assert_eq!(f.engine.tick().await, TickOutcome::Reconnecting);
        assert_eq!(f.transport.with(|i| i.reconnect_attempts), 0, "no manual attempts");

        f.transport.with(|i| i.connected = true);
        f.transport.inject(TransportEvent::Reconnected);
        assert!(matches!(f.engine.tick().await, TickOutcome::Published { .. }));
    }

    #[tokio::test]
    async fn test_yield_error_enters_reconnect_pending() {
        let settings = EngineSettings { auto_reconnect: false, ..Default::default() };
        let mut f = started(settings).await;
        f.slot.store(snapshot(72.5));

        f.transport.with(|i| i.fail_yield = true);
        assert_eq!(f.engine.tick().await, TickOutcome::Reconnecting);
        assert_eq!(f.engine.state(), ConnectionState::ReconnectPending);
        assert!(f.transport.published().is_empty());

        f.transport.with(|i| {
            i.fail_yield = false;
            i.reconnect_ok = true;
        });
        assert!(matches!(f.engine.tick().await, TickOutcome::Published { .. }));
        assert_eq!(f.engine.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_in_flight_update_lost_on_disconnect_times_out() {
        let settings = EngineSettings { ack_timeout: Duration::ZERO, ..Default::default() };
        let mut f = started(settings).await;
        f.slot.store(snapshot(72.5));
        f.engine.tick().await;

        f.transport.inject(TransportEvent::Disconnected);
        assert_eq!(f.engine.tick().await, TickOutcome::Reconnecting);
        assert!(f.engine.in_flight_token().is_none());
    }

    // ==========================================================================
    // run / shutdown
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let f = fixture(Some(SERIAL), EngineSettings::default());
        f.slot.store(snapshot(72.5));
        let transport = f.transport.clone();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(f.engine.run(stop_rx));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(transport.published().len(), 1);

        stop_tx.send_replace(true);
        handle.await.unwrap().unwrap();
        assert!(transport.with(|i| i.disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_paces_ticks_while_reconnecting() {
        let settings = EngineSettings {
            auto_reconnect: false,
            settle_delay: Duration::ZERO,
            yield_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let f = fixture(Some(SERIAL), settings);
        let transport = f.transport.clone();
        transport.inject(TransportEvent::Disconnected);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(f.engine.run(stop_rx));
        tokio::time::sleep(Duration::from_millis(5_500)).await;

        // one tick per yield_timeout: t = 0, 1, 2, 3, 4, 5
        let (yields, attempts) = transport.with(|i| (i.yield_calls, i.reconnect_attempts));
        assert!((5..=7).contains(&yields), "{} yields in 5.5s", yields);
        assert!(attempts <= yields, "{} reconnect attempts", attempts);
        assert!(transport.published().is_empty());

        stop_tx.send_replace(true);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_paces_ticks_while_waiting_for_snapshot() {
        let settings = EngineSettings { settle_delay: Duration::ZERO, ..Default::default() };
        let f = fixture(Some(SERIAL), settings);
        let transport = f.transport.clone();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(f.engine.run(stop_rx));
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(transport.with(|i| i.yield_calls) <= 4);

        stop_tx.send_replace(true);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_returns_fatal_error() {
        let f = fixture(None, EngineSettings::default());
        let (_stop_tx, stop_rx) = watch::channel(false);
        assert!(matches!(f.engine.run(stop_rx).await, Err(EngineError::Identity(_))));
    }
}
