//! transport boundary for the shadow sync engine

use super::codec::ShadowDocument;
use crate::identity::ClientId;

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("not connected")]
    NotConnected,
}

/// outcome of a published update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckStatus {
    Accepted,
    Rejected,
    Timeout,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// partial document with the desired-vs-reported difference
    Delta(Vec<u8>),
    Ack { client_token: String, status: AckStatus },
    Disconnected,
    Reconnected,
}

#[derive(Clone, Debug)]
pub struct ConnectParams {
    pub client_id: ClientId,
    pub thing_name: String,
}

impl ConnectParams {
    /// the device's client id doubles as its thing name
    pub fn for_device(client_id: &ClientId) -> Self {
        Self { client_id: client_id.clone(), thing_name: client_id.as_str().to_string() }
    }
}

#[allow(async_fn_in_trait)]
pub trait ShadowTransport {
    /// establish the transport, authenticate and open the shadow session
    async fn connect(&mut self, params: &ConnectParams) -> Result<(), TransportError>;

    async fn set_auto_reconnect(&mut self, enabled: bool) -> Result<(), TransportError>;

    fn is_auto_reconnect_enabled(&self) -> bool;

    /// service pending i/o for at most `timeout` and return what arrived
    async fn yield_once(&mut self, timeout: Duration) -> Result<Vec<TransportEvent>, TransportError>;

    /// send an update; its outcome arrives later as an `Ack` event
    async fn publish(&mut self, document: &ShadowDocument) -> Result<(), TransportError>;

    /// explicit reconnect for transports without auto-reconnect
    async fn attempt_reconnect(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
