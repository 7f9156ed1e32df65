//! Error types for UM6 communication.

use thiserror::Error;

/// Errors that can occur while talking to a UM6.
///
/// [`Um6Error::Timeout`] and [`Um6Error::BadChecksum`] are recoverable at the
/// packet level (the comms layer retries or skips); everything else, and a
/// long run of bad checksums, means the channel should be considered broken.
#[derive(Error, Debug)]
pub enum Um6Error {
    /// Low-level I/O error (serial read/write failure, device unplugged).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to open the port.
    #[error("Failed to open {port}: {reason}")]
    OpenFailed {
        /// Port path or device description
        port: String,
        /// Underlying cause
        reason: String,
    },

    /// Operation attempted on a transport that is not open.
    #[error("Transport is not open")]
    NotOpen,

    /// No complete packet arrived within the read timeout.
    #[error("Timeout waiting for packet")]
    Timeout,

    /// Packet checksum did not match its contents.
    #[error("Bad checksum: computed {computed:#06x}, transmitted {transmitted:#06x}")]
    BadChecksum {
        /// Checksum computed over the received bytes
        computed: u16,
        /// Checksum carried by the packet
        transmitted: u16,
    },

    /// Batch length outside what the packet type field can express.
    #[error("Invalid batch size: {0} registers")]
    InvalidBatchSize(usize),

    /// Packet bytes did not follow the UM6 framing rules.
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
}

/// Result type for UM6 operations.
pub type Um6Result<T> = Result<T, Um6Error>;
