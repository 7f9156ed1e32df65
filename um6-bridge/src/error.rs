//! Error types for the bridge.

use thiserror::Error;
use um6::Um6Error;

/// Errors raised while connecting to, configuring or commanding the UM6.
///
/// Every variant except [`BridgeError::CommandFailure`] ends the current
/// connection: the supervisor closes the transport, waits and reconnects.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The transport could not be opened (device absent, permissions, etc.).
    #[error("Failed to open transport: {0}")]
    TransportOpenFailure(String),

    /// The device rejected or never acknowledged a configuration write.
    #[error("Device rejected configuration: {0}")]
    ConfigurationRejected(String),

    /// A configuration value has no device encoding.
    #[error("Invalid configuration value: {0}")]
    InvalidConfigurationValue(String),

    /// Read or write on an open transport failed, including receive timeouts.
    #[error("Transport I/O error: {0}")]
    TransportIo(#[source] Um6Error),

    /// A reset command went unacknowledged. Reported to the requester only.
    #[error("Command not acknowledged: {0}")]
    CommandFailure(String),

    /// The settings file could not be read or parsed.
    #[error("Settings error: {0}")]
    Settings(String),
}

impl From<Um6Error> for BridgeError {
    fn from(err: Um6Error) -> Self {
        match err {
            Um6Error::OpenFailed { port, reason } => {
                Self::TransportOpenFailure(format!("{port}: {reason}"))
            }
            other => Self::TransportIo(other),
        }
    }
}

impl BridgeError {
    /// Whether the connection must be torn down after this error.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, Self::CommandFailure(_))
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
