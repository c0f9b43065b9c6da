//! ==============================================================================
//! shadow - device shadow synchronisation
//! ==============================================================================
//!
//! layout:
//!     - codec.rs: update documents out, deltas in
//!     - delta.rs: key -> field registration table
//!     - transport.rs: the transport boundary (connect, yield, publish, ...)
//!     - engine.rs: the ShadowSyncEngine state machine
//!     - http.rs / loopback.rs: transport implementations
//!
//! ==============================================================================

pub mod codec;
pub mod delta;
pub mod engine;
pub mod http;
pub mod loopback;
pub mod transport;

pub use engine::{EngineSettings, ShadowSyncEngine};
pub use transport::ShadowTransport;

/// owned by the engine, changed only on its own task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectPending,
    ShuttingDown,
}
