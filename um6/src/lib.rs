//! CH Robotics UM6 orientation sensor protocol.
//!
//! This crate provides packet framing, the register map and a transport
//! layer for talking to a UM6 over a serial link. A simulated device is
//! included so higher layers can be exercised without hardware.
//!
//! # Layers
//!
//! - [`packet`] / [`checksum`] - `snp` wire framing
//! - [`registers`] - register map, typed field accessors and flag words
//! - [`comms`] - header search, register updates, write acknowledgement
//! - [`transport`] - open/close lifecycle behind the [`Transport`] trait
//! - [`sim`] - in-process UM6 that acknowledges writes and broadcasts data
//!
//! # Features
//!
//! - `serial` (default) - [`transport::SerialTransport`] over the `serialport` crate

pub mod checksum;
pub mod comms;
pub mod error;
pub mod packet;
pub mod registers;
pub mod sim;
pub mod transport;

pub use checksum::{compute_checksum, verify_checksum};
pub use comms::Comms;
pub use error::{Um6Error, Um6Result};
pub use packet::{Packet, PacketType};
pub use registers::{
    address, fields, Accessor, CommunicationFlags, GpsSummary, MiscConfigFlags, Registers,
};
pub use sim::{SimTransport, SimulatedDevice};
#[cfg(feature = "serial")]
pub use transport::SerialTransport;
pub use transport::{PortOpener, Transport, Um6Transport};
