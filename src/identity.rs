//! ==============================================================================
//! identity.rs - device client id from the secure-element serial
//! ==============================================================================
//!
//! the 9-byte secure-element serial, hex encoded, is both the connection's
//! client id and the shadow's thing name. it is derived once at startup;
//! without it the sync engine cannot run.
//!
//! ==============================================================================

use std::fmt;
use std::path::PathBuf;

/// serial number length of the secure element, in bytes
pub const SERIAL_LEN: usize = 9;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("no device serial configured")]
    NotConfigured,

    #[error("failed to read serial from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serial is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("serial must be {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientId(String);

impl ClientId {
    pub fn from_serial(serial: &[u8]) -> Result<Self, IdentityError> {
        if serial.len() != SERIAL_LEN {
            return Err(IdentityError::WrongLength { expected: SERIAL_LEN, actual: serial.len() });
        }
        Ok(Self(hex::encode_upper(serial)))
    }

    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(s.trim())?;
        Self::from_serial(&bytes)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait IdentityProvider: Send + Sync {
    fn client_id(&self) -> Result<ClientId, IdentityError>;
}

/// serial given directly in the config file
pub struct SerialIdentity {
    serial: Option<String>,
}

impl SerialIdentity {
    pub fn new(serial: Option<String>) -> Self {
        Self { serial }
    }
}

impl IdentityProvider for SerialIdentity {
    fn client_id(&self) -> Result<ClientId, IdentityError> {
        let serial = self.serial.as_deref().ok_or(IdentityError::NotConfigured)?;
        ClientId::from_hex(serial)
    }
}

/// serial exported by the secure element into a file
pub struct SerialFileIdentity {
    path: PathBuf,
}

impl SerialFileIdentity {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentityProvider for SerialFileIdentity {
    fn client_id(&self) -> Result<ClientId, IdentityError> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|source| IdentityError::Read { path: self.path.clone(), source })?;
        ClientId::from_hex(&content)
    }
}
