//! ==============================================================================
//! shadow/codec.rs - shadow document encoding and delta decoding
//! ==============================================================================
//!
//! wire format (update):
//!
//!     {"state":{"reported":{"temperature":72.5,"noiseLevel":10,
//!       "lightIntensity":400,"tvoc":20,"eCO2":450,
//!       "notifications":"...","notificationCount":0}},
//!      "clientToken":"<client id>-<sequence>"}
//!
//! wire format (delta):
//!
//!     {"version":12,"timestamp":1700000000,"state":{"notifications":"...",
//!       "notificationCount":2},"metadata":{...}}
//!
//! documents are capped at DOCUMENT_CAPACITY bytes; overflowing is an error,
//! never a truncation.
//!
//! ==============================================================================

use crate::domain::{MeasurementSnapshot, MAX_NOTIFICATION_LEN};

use serde::{Deserialize, Serialize};

pub const DOCUMENT_CAPACITY: usize = 400;
pub const NOTIFICATION_CAPACITY: usize = MAX_NOTIFICATION_LEN;

pub const KEY_NOTIFICATIONS: &str = "notifications";
pub const KEY_NOTIFICATION_COUNT: &str = "notificationCount";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("document of {len} bytes exceeds buffer capacity of {capacity} bytes")]
    EncodingOverflow { len: usize, capacity: usize },

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// the "reported" section, keyed the way the cloud side expects
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reported {
    pub temperature: f32,
    #[serde(rename = "noiseLevel")]
    pub noise_level: u8,
    #[serde(rename = "lightIntensity")]
    pub light_intensity: u32,
    pub tvoc: u8,
    #[serde(rename = "eCO2")]
    pub eco2: u16,
    pub notifications: String,
    #[serde(rename = "notificationCount")]
    pub notification_count: u8,
}

#[derive(Serialize, Deserialize)]
struct ReportedState {
    reported: Reported,
}

#[derive(Serialize, Deserialize)]
struct UpdateDocument {
    state: ReportedState,
    #[serde(rename = "clientToken")]
    client_token: String,
}

/// encoded update, ready for the transport
#[derive(Clone, Debug, PartialEq)]
pub struct ShadowDocument {
    pub client_token: String,
    pub bytes: Vec<u8>,
}

impl ShadowDocument {
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("<non-utf8>")
    }
}

pub fn encode(
    snapshot: &MeasurementSnapshot,
    notification_text: &str,
    notification_count: u8,
    client_token: &str,
) -> Result<ShadowDocument, CodecError> {
    if notification_text.len() > NOTIFICATION_CAPACITY {
        return Err(CodecError::EncodingOverflow {
            len: notification_text.len(),
            capacity: NOTIFICATION_CAPACITY,
        });
    }

    let doc = UpdateDocument {
        state: ReportedState {
            reported: Reported {
                temperature: snapshot.temperature,
                noise_level: snapshot.noise_level,
                light_intensity: snapshot.light_intensity,
                tvoc: snapshot.tvoc,
                eco2: snapshot.eco2,
                notifications: notification_text.to_string(),
                notification_count,
            },
        },
        client_token: client_token.to_string(),
    };

    let bytes = serde_json::to_vec(&doc)?;
    if bytes.len() > DOCUMENT_CAPACITY {
        return Err(CodecError::EncodingOverflow { len: bytes.len(), capacity: DOCUMENT_CAPACITY });
    }
    Ok(ShadowDocument { client_token: doc.client_token, bytes })
}

/// parse the reported section back out of an update document
pub fn decode_reported(bytes: &[u8]) -> Result<(Reported, String), CodecError> {
    let doc: UpdateDocument = serde_json::from_slice(bytes)?;
    Ok((doc.state.reported, doc.client_token))
}

/// one changed field of a delta
#[derive(Clone, Debug, PartialEq)]
pub struct DeltaEntry {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Delta {
    pub version: Option<u64>,
    pub entries: Vec<DeltaEntry>,
}

/// parse an inbound delta. only top-level scalar fields of `state` are
/// yielded; nested objects, arrays and nulls are skipped.
pub fn decode_delta(bytes: &[u8]) -> Result<Delta, CodecError> {
    let doc: serde_json::Value = serde_json::from_slice(bytes)?;
    let state = doc
        .get("state")
        .and_then(|s| s.as_object())
        .ok_or_else(|| CodecError::Malformed("missing state object".to_string()))?;

    let entries = state
        .iter()
        .filter(|(_, v)| v.is_string() || v.is_number() || v.is_boolean())
        .map(|(k, v)| DeltaEntry { key: k.clone(), value: v.clone() })
        .collect();

    Ok(Delta { version: doc.get("version").and_then(|v| v.as_u64()), entries })
}

/// build a delta document, the shape the cloud sends
pub fn encode_delta(version: u64, state: serde_json::Map<String, serde_json::Value>) -> Vec<u8> {
    serde_json::json!({ "version": version, "state": state }).to_string().into_bytes()
}
