//! Scripted transport for unit tests.

use std::collections::{HashSet, VecDeque};

use um6::{Packet, Registers, Transport, Um6Error, Um6Result};

/// Transport that acknowledges everything unless told otherwise and plays
/// back a queue of incoming packets.
#[derive(Default)]
pub struct ScriptedTransport {
    pub is_open: bool,
    /// Number of upcoming `open` calls that fail.
    pub open_failures: usize,
    pub opens: usize,
    pub closes: usize,
    pub sent: Vec<Packet>,
    pub(crate) nacked: HashSet<u8>,
    pub(crate) broken: HashSet<u8>,
    pub incoming: VecDeque<Um6Result<Packet>>,
}

impl ScriptedTransport {
    /// An already open transport.
    pub fn opened() -> Self {
        Self {
            is_open: true,
            ..Default::default()
        }
    }

    /// Answer writes to `address` with no acknowledgement.
    pub fn nack(&mut self, address: u8) {
        self.nacked.insert(address);
    }

    /// Fail writes to `address` with an I/O error.
    pub fn break_on(&mut self, address: u8) {
        self.broken.insert(address);
    }

    pub fn sent_addresses(&self) -> Vec<u8> {
        self.sent.iter().map(|p| p.address).collect()
    }

    /// Queue a data packet for `receive`.
    pub fn push_packet(&mut self, address: u8, data: Vec<u8>) {
        let packet = Packet::new(address, data).expect("test packet");
        self.incoming.push_back(Ok(packet));
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self) -> Um6Result<()> {
        self.opens += 1;
        if self.open_failures > 0 {
            self.open_failures -= 1;
            return Err(Um6Error::OpenFailed {
                port: "scripted".into(),
                reason: "not present".into(),
            });
        }
        self.is_open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.closes += 1;
        self.is_open = false;
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn send_wait_ack(&mut self, packet: &Packet) -> Um6Result<bool> {
        if !self.is_open {
            return Err(Um6Error::NotOpen);
        }
        self.sent.push(packet.clone());
        if self.broken.contains(&packet.address) {
            return Err(Um6Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "unplugged",
            )));
        }
        Ok(!self.nacked.contains(&packet.address))
    }

    fn receive(&mut self, registers: &mut Registers) -> Um6Result<u8> {
        if !self.is_open {
            return Err(Um6Error::NotOpen);
        }
        match self.incoming.pop_front() {
            Some(Ok(packet)) => {
                registers.store(packet.address, &packet.data)?;
                Ok(packet.address)
            }
            Some(Err(e)) => Err(e),
            None => Err(Um6Error::Timeout),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
