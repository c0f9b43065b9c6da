//! ==============================================================================
//! shadow/delta.rs - delta subscriptions
//! ==============================================================================
//!
//! purpose:
//!     the registration table consulted while the engine services the
//!     transport. each remotely-writable field is registered once after the
//!     first connection and stays registered for the engine's lifetime.
//!
//! dispatch contract:
//!     - unmatched key: dropped, nothing changes, no ui call
//!     - matched key with a usable value: its slot is updated, then exactly
//!       one ui call with the decoded value
//!     - matched key with a wrongly typed value: logged, nothing changes
//!
//! ==============================================================================

use super::codec::{Delta, KEY_NOTIFICATIONS, KEY_NOTIFICATION_COUNT};
use crate::domain::{NotificationText, Notifications};
use crate::ui::UiSink;

use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaField {
    NotificationText,
    NotificationCount,
}

impl DeltaField {
    pub const ALL: [DeltaField; 2] = [DeltaField::NotificationText, DeltaField::NotificationCount];

    pub fn key(self) -> &'static str {
        match self {
            DeltaField::NotificationText => KEY_NOTIFICATIONS,
            DeltaField::NotificationCount => KEY_NOTIFICATION_COUNT,
        }
    }

    /// apply `value` to this field's slot. returns false if the value does
    /// not decode, in which case nothing was touched.
    fn apply(self, value: &serde_json::Value, slots: &mut Notifications, ui: &dyn UiSink) -> bool {
        match self {
            DeltaField::NotificationText => {
                let Some(text) = value.as_str() else {
                    tracing::warn!("[SHADOW] delta '{}' is not a string: {}", self.key(), value);
                    return false;
                };
                let text = match NotificationText::try_from_str(text) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("[SHADOW] delta '{}' rejected: {}", self.key(), e);
                        return false;
                    }
                };
                tracing::info!("Updating recommendations with: {}", text);
                ui.update_notification_text(text.as_str());
                slots.text = text;
                true
            }
            DeltaField::NotificationCount => {
                let Some(count) = value.as_u64().and_then(|n| u8::try_from(n).ok()) else {
                    tracing::warn!("[SHADOW] delta '{}' is not a count: {}", self.key(), value);
                    return false;
                };
                tracing::info!("Update recommendations count to {}", count);
                slots.count = count;
                ui.update_notification_count(count);
                true
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct DeltaRegistry {
    table: BTreeMap<&'static str, DeltaField>,
}

impl DeltaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// returns false if the field was already registered
    pub fn register(&mut self, field: DeltaField) -> bool {
        self.table.insert(field.key(), field).is_none()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// apply every matching entry in order; returns how many were applied
    pub fn dispatch(&self, delta: &Delta, slots: &mut Notifications, ui: &dyn UiSink) -> usize {
        let mut applied = 0;
        for entry in &delta.entries {
            match self.table.get(entry.key.as_str()) {
                Some(field) => {
                    if field.apply(&entry.value, slots, ui) {
                        applied += 1;
                    }
                }
                None => tracing::debug!("[SHADOW] ignoring delta key '{}'", entry.key),
            }
        }
        applied
    }
}
