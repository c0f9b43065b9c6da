//! ==============================================================================
//! domain.rs - measurement and notification value types
//! ==============================================================================
//!
//! purpose:
//!     the plain value types that flow between the activities:
//!     - MeasurementSnapshot: one aggregation cycle's worth of readings
//!     - Notifications: the remotely-writable recommendation state
//!     - BoundedText: a capacity-checked string (no silent truncation)
//!
//! relationships:
//!     - produced by: aggregator.rs (snapshots), shadow/delta.rs (notifications)
//!     - consumed by: ui.rs, shadow/codec.rs, shadow/engine.rs
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// maximum length of the notification text, in bytes
pub const MAX_NOTIFICATION_LEN: usize = 200;

pub const DEFAULT_NOTIFICATION_TEXT: &str = "No current notifications";

/// latest readings of every sensor, as seen by one aggregation cycle.
///
/// fields are NOT sampled at the same instant: each one is whatever its
/// channel held when the aggregator visited it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSnapshot {
    /// temperature in device units (°F, offset-corrected)
    pub temperature: f32,
    /// peak spectral magnitude, 0-255
    pub noise_level: u8,
    /// light sensor output in millivolts
    pub light_intensity: u32,
    /// volatile organic compound index
    pub tvoc: u8,
    /// equivalent co2 index
    pub eco2: u16,
}

/// tvoc and eco2 come out of the same gas sensor read
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GasReadout {
    pub tvoc: u8,
    pub eco2: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("text of {len} bytes exceeds capacity of {capacity} bytes")]
pub struct TextOverflow {
    pub len: usize,
    pub capacity: usize,
}

/// string with a fixed byte capacity `N`
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct BoundedText<const N: usize>(String);

impl<const N: usize> BoundedText<N> {
    pub fn try_from_str(s: &str) -> Result<Self, TextOverflow> {
        if s.len() > N {
            return Err(TextOverflow { len: s.len(), capacity: N });
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> fmt::Display for BoundedText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type NotificationText = BoundedText<MAX_NOTIFICATION_LEN>;

/// recommendation state pushed down from the cloud via deltas
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notifications {
    pub text: NotificationText,
    pub count: u8,
}

impl Default for Notifications {
    fn default() -> Self {
        Self {
            text: BoundedText(DEFAULT_NOTIFICATION_TEXT.to_string()),
            count: 0,
        }
    }
}
