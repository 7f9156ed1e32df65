//! UM6 telemetry bridge.
//!
//! Keeps a UM6 connected and configured, and republishes its telemetry in
//! the east-north-up convention on an in-process topic bus. The bus is
//! exposed over HTTP as Server-Sent Events, together with a reset endpoint
//! and connection status.
//!
//! # Components
//!
//! - [`supervisor`] - reconnect state machine; owns the transport
//! - [`sequencer`] - pushes [`config::DeviceSettings`] to the device on every connection
//! - [`transform`] / [`publisher`] - register snapshot to messages, subscriber aware
//! - [`reset`] - on-demand gyro zeroing, EKF reset and reference latching
//! - [`bus`] / [`server`] - topic registry and HTTP surface
//!
//! # Features
//!
//! - `serial` (default) - real serial ports via `um6/serial`; without it only
//!   the simulated device is available

pub mod bus;
pub mod config;
pub mod error;
pub mod messages;
pub mod publisher;
pub mod reset;
pub mod sequencer;
pub mod server;
pub mod supervisor;
pub mod transform;

#[cfg(test)]
mod test_util;

pub use bus::{Bus, Topic};
pub use config::{ConnectionArgs, DeviceSettings, FileSettings, SettingsSource, StaticSettings};
pub use error::{BridgeError, BridgeResult};
pub use reset::{reset_channel, ResetClient, ResetRequest, ResetResponse, ResetService};
pub use supervisor::{ConnectionState, StepOutcome, Supervisor, SupervisorConfig, SupervisorStatus};
