//! ==============================================================================
//! ui.rs - ui sink boundary and the ui refresh activity
//! ==============================================================================
//!
//! purpose:
//!     the core never talks to the display directly. it calls a UiSink,
//!     which must return immediately. UiHandle does that by queueing a
//!     UiEvent; UiStore::run drains the queue into the state the dashboard
//!     renders.
//!
//!     ┌────────────┐  try_send   ┌──────────────┐  write   ┌──────────┐
//!     │ aggregator │ ──────────> │ mpsc (bound) │ ───────> │ UiState  │
//!     │ sync engine│             └──────────────┘          └────┬─────┘
//!     └────────────┘                                            │ read
//!                                                          dashboard.rs
//!
//! ==============================================================================

use crate::domain::MeasurementSnapshot;

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// max characters kept in the status area before the oldest are pruned
pub const MAX_STATUS_LEN: usize = 1024;

/// fire-and-forget calls into the display layer
pub trait UiSink: Send + Sync {
    fn update_measurements(&self, snapshot: MeasurementSnapshot);
    fn update_notification_text(&self, text: &str);
    fn update_notification_count(&self, count: u8);
    fn add_status_line(&self, line: &str);
}

#[derive(Clone, Debug, PartialEq)]
pub enum UiEvent {
    Measurements(MeasurementSnapshot),
    NotificationText(String),
    NotificationCount(u8),
    StatusLine(String),
}

/// non-blocking UiSink backed by a bounded queue
#[derive(Clone)]
pub struct UiHandle {
    tx: mpsc::Sender<UiEvent>,
}

impl UiHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<UiEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    fn send(&self, event: UiEvent) {
        if let Err(e) = self.tx.try_send(event) {
            // queue full or refresh task gone
            tracing::debug!("[UI] dropped event: {}", e);
        }
    }
}

impl UiSink for UiHandle {
    fn update_measurements(&self, snapshot: MeasurementSnapshot) {
        self.send(UiEvent::Measurements(snapshot));
    }

    fn update_notification_text(&self, text: &str) {
        self.send(UiEvent::NotificationText(text.to_string()));
    }

    fn update_notification_count(&self, count: u8) {
        self.send(UiEvent::NotificationCount(count));
    }

    fn add_status_line(&self, line: &str) {
        self.send(UiEvent::StatusLine(line.to_string()));
    }
}

// ==============================================================================
// ui state - what the dashboard renders
// ==============================================================================

#[derive(Clone, Debug, Default, Serialize)]
pub struct UiState {
    /// status page text (connectivity, identity)
    pub status: String,
    /// measurements page
    pub measurements: Option<MeasurementSnapshot>,
    /// recommendations page
    pub notifications: String,
    /// recommendations footer, e.g. "3!"
    pub notification_badge: String,
}

impl UiState {
    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Measurements(m) => self.measurements = Some(m),
            UiEvent::NotificationText(t) => self.notifications = t,
            UiEvent::NotificationCount(n) => self.notification_badge = format!("{}!", n),
            UiEvent::StatusLine(line) => self.push_status(&line),
        }
    }

    fn push_status(&mut self, line: &str) {
        let incoming = line.chars().count();
        if incoming >= MAX_STATUS_LEN {
            self.status.clear();
            self.status.extend(line.chars().skip(incoming + 1 - MAX_STATUS_LEN));
            return;
        }
        let current = self.status.chars().count();
        if current + incoming >= MAX_STATUS_LEN {
            let excess = (current + incoming + 1 - MAX_STATUS_LEN).min(current);
            let cut = self
                .status
                .char_indices()
                .nth(excess)
                .map(|(i, _)| i)
                .unwrap_or(self.status.len());
            self.status.drain(..cut);
        }
        self.status.push_str(line);
    }
}

#[derive(Clone, Default)]
pub struct UiStore {
    state: Arc<RwLock<UiState>>,
}

impl UiStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> UiState {
        self.state.read().await.clone()
    }

    /// ui refresh activity: applies queued events until every sender is gone
    pub async fn run(self, mut rx: mpsc::Receiver<UiEvent>) {
        while let Some(event) = rx.recv().await {
            self.state.write().await.apply(event);
        }
        tracing::debug!("[UI] all senders dropped, refresh task exiting");
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// records every call in order
    #[derive(Default)]
    pub struct RecordingUi {
        events: Mutex<Vec<UiEvent>>,
    }

    impl RecordingUi {
        pub fn events(&self) -> Vec<UiEvent> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, e: UiEvent) {
            self.events.lock().unwrap().push(e);
        }
    }

    impl UiSink for RecordingUi {
        fn update_measurements(&self, snapshot: MeasurementSnapshot) {
            self.push(UiEvent::Measurements(snapshot));
        }
        fn update_notification_text(&self, text: &str) {
            self.push(UiEvent::NotificationText(text.to_string()));
        }
        fn update_notification_count(&self, count: u8) {
            self.push(UiEvent::NotificationCount(count));
        }
        fn add_status_line(&self, line: &str) {
            self.push(UiEvent::StatusLine(line.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_area_prunes_oldest() {
        let mut state = UiState::default();
        state.apply(UiEvent::StatusLine("a".repeat(1000)));
        state.apply(UiEvent::StatusLine("b".repeat(100)));

        assert!(state.status.chars().count() < MAX_STATUS_LEN);
        assert!(state.status.ends_with(&"b".repeat(100)));
        assert!(state.status.starts_with('a'));
    }

    #[test]
    fn test_oversized_status_line_keeps_its_tail() {
        let mut state = UiState::default();
        state.apply(UiEvent::StatusLine("boot\n".to_string()));
        let line = format!("{}end", "é".repeat(MAX_STATUS_LEN));
        state.apply(UiEvent::StatusLine(line));

        assert_eq!(state.status.chars().count(), MAX_STATUS_LEN - 1);
        assert!(state.status.ends_with("éend"));
        assert!(!state.status.contains("boot"));
    }

    #[test]
    fn test_notification_badge() {
        let mut state = UiState::default();
        state.apply(UiEvent::NotificationCount(3));
        assert_eq!(state.notification_badge, "3!");
    }

    #[tokio::test]
    async fn test_handle_never_blocks_when_full() {
        let (ui, rx) = UiHandle::channel(1);
        ui.add_status_line("first");
        // queue is full, these are dropped instead of blocking
        ui.add_status_line("second");
        ui.update_notification_count(9);

        let store = UiStore::new();
        drop(ui);
        store.clone().run(rx).await;
        let state = store.snapshot().await;
        assert_eq!(state.status, "first");
        assert_eq!(state.notification_badge, "");
    }
}
