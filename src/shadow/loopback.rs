//! ==============================================================================
//! shadow/loopback.rs - in-process shadow service
//! ==============================================================================
//!
//! purpose:
//!     stands in for the cloud side when no endpoint is configured. every
//!     published update is acknowledged on the next yield; the reported
//!     measurements are run through the recommendation rule and, when the
//!     resulting notifications differ from the last desired state, a delta
//!     is queued right behind the ack.
//!
//! ==============================================================================

use super::codec::{self, ShadowDocument, KEY_NOTIFICATIONS, KEY_NOTIFICATION_COUNT};
use super::transport::{AckStatus, ConnectParams, ShadowTransport, TransportError, TransportEvent};
use crate::domain::MeasurementSnapshot;
use crate::recommendations::recommend;

use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct LoopbackTransport {
    connected: bool,
    auto_reconnect: bool,
    thing_name: Option<String>,
    pending: VecDeque<TransportEvent>,
    version: u64,
    desired: Option<(String, usize)>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// simulate losing the link; shows up as a Disconnected event
    #[cfg(test)]
    pub fn drop_link(&mut self) {
        if self.connected {
            self.connected = false;
            self.pending.push_back(TransportEvent::Disconnected);
        }
    }

    fn evaluate(&mut self, document: &ShadowDocument) {
        let (reported, token) = match codec::decode_reported(&document.bytes) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("[LOOPBACK] rejecting update {}: {}", document.client_token, e);
                self.pending.push_back(TransportEvent::Ack {
                    client_token: document.client_token.clone(),
                    status: AckStatus::Rejected,
                });
                return;
            }
        };
        self.pending.push_back(TransportEvent::Ack { client_token: token, status: AckStatus::Accepted });

        let snapshot = MeasurementSnapshot {
            temperature: reported.temperature,
            noise_level: reported.noise_level,
            light_intensity: reported.light_intensity,
            tvoc: reported.tvoc,
            eco2: reported.eco2,
        };
        let notes = recommend(&snapshot);
        let desired = (notes.join("\n"), notes.len());

        let unchanged = reported.notifications == desired.0
            && usize::from(reported.notification_count) == desired.1;
        if unchanged || self.desired.as_ref() == Some(&desired) {
            return;
        }

        self.version += 1;
        let mut state = serde_json::Map::new();
        state.insert(KEY_NOTIFICATIONS.to_string(), serde_json::json!(desired.0));
        state.insert(KEY_NOTIFICATION_COUNT.to_string(), serde_json::json!(desired.1));
        tracing::debug!("[LOOPBACK] desired state v{}: {} notification(s)", self.version, desired.1);
        self.pending.push_back(TransportEvent::Delta(codec::encode_delta(self.version, state)));
        self.desired = Some(desired);
    }
}

impl ShadowTransport for LoopbackTransport {
    async fn connect(&mut self, params: &ConnectParams) -> Result<(), TransportError> {
        tracing::info!("[LOOPBACK] shadow session opened for {} as {}", params.thing_name, params.client_id);
        self.thing_name = Some(params.thing_name.clone());
        self.connected = true;
        Ok(())
    }

    async fn set_auto_reconnect(&mut self, enabled: bool) -> Result<(), TransportError> {
        self.auto_reconnect = enabled;
        Ok(())
    }

    fn is_auto_reconnect_enabled(&self) -> bool {
        self.auto_reconnect
    }

    async fn yield_once(&mut self, _timeout: Duration) -> Result<Vec<TransportEvent>, TransportError> {
        // auto-reconnect brings a dropped link straight back
        if !self.connected && self.auto_reconnect && self.thing_name.is_some() {
            self.connected = true;
            self.pending.push_back(TransportEvent::Reconnected);
        }
        Ok(self.pending.drain(..).collect())
    }

    async fn publish(&mut self, document: &ShadowDocument) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.evaluate(document);
        Ok(())
    }

    async fn attempt_reconnect(&mut self) -> Result<(), TransportError> {
        if self.thing_name.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.thing_name = None;
        self.pending.clear();
        Ok(())
    }
}
