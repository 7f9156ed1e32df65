//! Transport lifecycle: opening a port and exposing the UM6 request/response
//! and streaming primitives over it.
//!
//! [`Transport`] is the seam the bridge depends on. [`Um6Transport`] is the
//! concrete implementation, generic over how the byte stream is obtained
//! ([`PortOpener`]), so the same protocol code runs over a real serial port
//! and over the simulated device.

use std::io::{Read, Write};
#[cfg(feature = "serial")]
use std::time::Duration;

use tracing::debug;

use crate::comms::Comms;
use crate::error::{Um6Error, Um6Result};
use crate::packet::Packet;
use crate::registers::Registers;

/// A channel to a UM6 that can be opened, closed and reopened.
pub trait Transport: Send {
    /// Open the channel. Opening an already open transport is a no-op.
    fn open(&mut self) -> Um6Result<()>;

    /// Close the channel, discarding any buffered input.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Send a register write or command and wait for its acknowledgement.
    ///
    /// Returns `Ok(false)` if the device rejected or never acknowledged it.
    fn send_wait_ack(&mut self, packet: &Packet) -> Um6Result<bool>;

    /// Block until the next packet arrives, store its data and return its address.
    fn receive(&mut self, registers: &mut Registers) -> Um6Result<u8>;

    /// Human-readable description of the endpoint (e.g. the port path).
    fn describe(&self) -> String;
}

/// Source of byte streams for [`Um6Transport`].
pub trait PortOpener: Send {
    type Port: Read + Write + Send;

    fn open(&mut self) -> Um6Result<Self::Port>;

    fn describe(&self) -> String;
}

/// UM6 transport over any openable byte stream.
pub struct Um6Transport<O: PortOpener> {
    opener: O,
    comms: Option<Comms<O::Port>>,
}

impl<O: PortOpener> Um6Transport<O> {
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            comms: None,
        }
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    fn comms(&mut self) -> Um6Result<&mut Comms<O::Port>> {
        self.comms.as_mut().ok_or(Um6Error::NotOpen)
    }
}

impl<O: PortOpener> Transport for Um6Transport<O> {
    fn open(&mut self) -> Um6Result<()> {
        if self.comms.is_none() {
            let port = self.opener.open()?;
            debug!("Opened {}", self.opener.describe());
            self.comms = Some(Comms::new(port));
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.comms.take().is_some() {
            debug!("Closed {}", self.opener.describe());
        }
    }

    fn is_open(&self) -> bool {
        self.comms.is_some()
    }

    fn send_wait_ack(&mut self, packet: &Packet) -> Um6Result<bool> {
        self.comms()?.send_wait_ack(packet)
    }

    fn receive(&mut self, registers: &mut Registers) -> Um6Result<u8> {
        self.comms()?.receive(registers)
    }

    fn describe(&self) -> String {
        self.opener.describe()
    }
}

/// Opens a serial port with fixed settings (8N1, no flow control).
#[cfg(feature = "serial")]
#[derive(Debug, Clone)]
pub struct SerialOpener {
    pub path: String,
    pub baud: u32,
    /// Per-read timeout; bounds every blocking receive.
    pub timeout: Duration,
}

#[cfg(feature = "serial")]
impl PortOpener for SerialOpener {
    type Port = Box<dyn serialport::SerialPort>;

    fn open(&mut self) -> Um6Result<Self::Port> {
        serialport::new(&self.path, self.baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.timeout)
            .open()
            .map_err(|e| Um6Error::OpenFailed {
                port: self.path.clone(),
                reason: e.to_string(),
            })
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud)
    }
}

/// Transport over a physical serial port.
#[cfg(feature = "serial")]
pub type SerialTransport = Um6Transport<SerialOpener>;

#[cfg(feature = "serial")]
impl Um6Transport<SerialOpener> {
    /// Serial transport for `path`; nothing is opened until [`Transport::open`].
    pub fn serial(path: impl Into<String>, baud: u32, timeout: Duration) -> Self {
        Self::new(SerialOpener {
            path: path.into(),
            baud,
            timeout,
        })
    }
}
