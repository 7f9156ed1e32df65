//! Simulated UM6 for tests and hardware-free runs.
//!
//! [`SimulatedDevice`] keeps a register map, acknowledges writes and commands
//! the way the sensor does, and once broadcast output is enabled through the
//! COMMUNICATION register it emits one broadcast group per read of an empty
//! port. The group always ends with the temperature register.
//!
//! Handles are cheap clones sharing one device, so a test can keep a handle
//! to script failures and inspect traffic while the transport owns another.

use std::collections::{HashSet, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{Um6Error, Um6Result};
use crate::packet::{Packet, PacketType, CHECKSUM_LEN, HEADER, PREFIX_LEN};
use crate::registers::{address, fields, CommunicationFlags, GpsSummary, Registers};
use crate::transport::{PortOpener, Um6Transport};

/// Register blocks in broadcast order: (first register, register count).
const IMU_GROUP: &[(u8, usize)] = &[
    (address::GYRO_PROC_XY, 2),
    (address::ACCEL_PROC_XY, 2),
    (address::MAG_PROC_XY, 2),
    (address::EULER_PHI_THETA, 2),
    (address::QUAT_AB, 2),
    (address::ERROR_COV_00, 8),
    (address::ERROR_COV_00 + 8, 8),
];

const GPS_GROUP: &[(u8, usize)] = &[
    (address::GPS_LONGITUDE, 3),
    (address::GPS_POSITION_N, 3),
    (address::GPS_COURSE_SPEED, 1),
    (address::GPS_SAT_SUMMARY, 1),
];

struct DeviceState {
    registers: Registers,
    present: bool,
    open_attempts: usize,
    rejected: HashSet<u8>,
    ignored: HashSet<u8>,
    received: Vec<u8>,
    cycles: usize,
    disconnect_after: Option<usize>,
    unplugged: bool,
    interval: Duration,
    last_broadcast: Option<Instant>,
}

/// Shared handle to a simulated UM6.
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    /// A present device at rest: identity orientation, 25 °C, no GPS fix.
    pub fn new() -> Self {
        let mut registers = Registers::new();
        fields::QUAT.set_scaled(&mut registers, 0, 1.0);
        fields::ACCEL.set_scaled(&mut registers, 2, 1.0);
        fields::TEMPERATURE.set(&mut registers, 0, 25.0);

        Self {
            state: Arc::new(Mutex::new(DeviceState {
                registers,
                present: true,
                open_attempts: 0,
                rejected: HashSet::new(),
                ignored: HashSet::new(),
                received: Vec::new(),
                cycles: 0,
                disconnect_after: None,
                unplugged: false,
                interval: Duration::ZERO,
                last_broadcast: None,
            })),
        }
    }

    /// Pace broadcast groups at `hz`; zero means as fast as they are read.
    pub fn with_rate(self, hz: f64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.interval = if hz > 0.0 {
                Duration::from_secs_f64(1.0 / hz)
            } else {
                Duration::ZERO
            };
        }
        self
    }

    /// Plug or unplug the device. Opening an absent device fails.
    pub fn set_present(&self, present: bool) {
        self.state.lock().unwrap().present = present;
    }

    /// Answer writes to `address` with the command-failed flag.
    pub fn reject(&self, address: u8) {
        self.state.lock().unwrap().rejected.insert(address);
    }

    /// Never answer writes to `address`.
    pub fn ignore(&self, address: u8) {
        self.state.lock().unwrap().ignored.insert(address);
    }

    /// Undo any [`reject`](Self::reject) or [`ignore`](Self::ignore) scripting.
    pub fn accept_all(&self) {
        let mut state = self.state.lock().unwrap();
        state.rejected.clear();
        state.ignored.clear();
    }

    /// Simulate the cable being pulled after `cycles` more broadcast groups.
    pub fn disconnect_after(&self, cycles: usize) {
        let mut state = self.state.lock().unwrap();
        state.disconnect_after = Some(state.cycles + cycles);
    }

    /// Addresses of every packet the device has received, in order.
    pub fn received(&self) -> Vec<u8> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn open_attempts(&self) -> usize {
        self.state.lock().unwrap().open_attempts
    }

    /// Broadcast groups emitted so far.
    pub fn cycles(&self) -> usize {
        self.state.lock().unwrap().cycles
    }

    /// Inspect or modify the device's register map.
    pub fn with_registers<R>(&self, f: impl FnOnce(&mut Registers) -> R) -> R {
        f(&mut self.state.lock().unwrap().registers)
    }

    /// Set the GPS satellite summary register.
    pub fn set_gps_summary(&self, summary: GpsSummary) {
        self.with_registers(|r| fields::GPS_SAT_SUMMARY.set(r, 0, summary.to_word()));
    }

    /// Open a new port to the device.
    ///
    /// # Errors
    /// Returns [`Um6Error::OpenFailed`] while the device is absent.
    pub fn open_port(&self) -> Um6Result<SimulatedPort> {
        let mut state = self.state.lock().unwrap();
        state.open_attempts += 1;
        if !state.present {
            return Err(Um6Error::OpenFailed {
                port: "simulated UM6".to_string(),
                reason: "device not present".to_string(),
            });
        }
        state.unplugged = false;
        Ok(SimulatedPort {
            device: self.clone(),
            inbox: Vec::new(),
            outbox: VecDeque::new(),
        })
    }

    /// Handle one complete packet written by the host.
    fn handle(&self, packet: &Packet, outbox: &mut VecDeque<u8>) {
        let mut state = self.state.lock().unwrap();
        state.received.push(packet.address);
        trace!("Simulated UM6 received {:02x}", packet.address);

        if state.ignored.contains(&packet.address) {
            return;
        }
        if state.rejected.contains(&packet.address) {
            outbox.extend(Packet::command_failed(packet.address).encode());
            return;
        }
        if packet.packet_type.has_data()
            && state.registers.store(packet.address, &packet.data).is_err()
        {
            outbox.extend(Packet::command(address::INVALID_BATCH_SIZE).encode());
            return;
        }
        outbox.extend(Packet::command(packet.address).encode());
    }

    /// Queue the next broadcast group, if broadcasting is enabled.
    fn broadcast(&self, outbox: &mut VecDeque<u8>) -> io::Result<()> {
        let wait = {
            let state = self.state.lock().unwrap();
            match state.last_broadcast {
                Some(last) if !state.interval.is_zero() => {
                    state.interval.saturating_sub(last.elapsed())
                }
                _ => Duration::ZERO,
            }
        };
        if !wait.is_zero() {
            thread::sleep(wait);
        }

        let mut state = self.state.lock().unwrap();
        if state.unplugged {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "device unplugged"));
        }
        if state.disconnect_after.is_some_and(|limit| state.cycles >= limit) {
            state.unplugged = true;
            state.disconnect_after = None;
            return Err(io::Error::new(ErrorKind::BrokenPipe, "device unplugged"));
        }

        let flags = CommunicationFlags::from_bits_truncate(
            fields::COMMUNICATION.get(&state.registers, 0),
        );
        if !flags.contains(CommunicationFlags::BROADCAST) {
            return Ok(());
        }

        let mut blocks: Vec<(u8, usize)> = IMU_GROUP.to_vec();
        if flags.contains(CommunicationFlags::GPS_POSITION) {
            blocks.extend_from_slice(GPS_GROUP);
        }
        blocks.push((address::TEMPERATURE, 1));

        for (start, count) in blocks {
            let data = state
                .registers
                .bytes(start, count)
                .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?
                .to_vec();
            let packet = Packet::new(start, data)
                .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
            outbox.extend(packet.encode());
        }
        state.cycles += 1;
        state.last_broadcast = Some(Instant::now());
        Ok(())
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte-stream end of a [`SimulatedDevice`].
pub struct SimulatedPort {
    device: SimulatedDevice,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
}

impl SimulatedPort {
    /// Parse and answer every complete packet in the inbox.
    fn process_inbox(&mut self) {
        loop {
            let Some(start) = self.inbox.windows(3).position(|w| w == HEADER) else {
                // Keep a possible partial header.
                let keep = self.inbox.len().min(2);
                self.inbox.drain(..self.inbox.len() - keep);
                return;
            };
            self.inbox.drain(..start);
            if self.inbox.len() < PREFIX_LEN {
                return;
            }
            let len = PREFIX_LEN + PacketType::from_byte(self.inbox[3]).data_len() + CHECKSUM_LEN;
            if self.inbox.len() < len {
                return;
            }
            let frame: Vec<u8> = self.inbox.drain(..len).collect();
            match Packet::decode(&frame) {
                Ok(packet) => self.device.handle(&packet, &mut self.outbox),
                Err(_) => self
                    .outbox
                    .extend(Packet::command(address::BAD_CHECKSUM).encode()),
            }
        }
    }
}

impl Read for SimulatedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.outbox.is_empty() {
            self.device.broadcast(&mut self.outbox)?;
        }
        if self.outbox.is_empty() {
            return Err(io::Error::new(ErrorKind::TimedOut, "no data from device"));
        }
        let n = buf.len().min(self.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inbox.extend_from_slice(buf);
        self.process_inbox();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Opens ports on a shared [`SimulatedDevice`].
#[derive(Clone)]
pub struct SimOpener {
    pub device: SimulatedDevice,
}

impl PortOpener for SimOpener {
    type Port = SimulatedPort;

    fn open(&mut self) -> Um6Result<SimulatedPort> {
        self.device.open_port()
    }

    fn describe(&self) -> String {
        "simulated UM6".to_string()
    }
}

/// Transport talking to a [`SimulatedDevice`].
pub type SimTransport = Um6Transport<SimOpener>;

impl Um6Transport<SimOpener> {
    pub fn simulated(device: SimulatedDevice) -> Self {
        Self::new(SimOpener { device })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::Comms;

    fn enable_broadcast(comms: &mut Comms<SimulatedPort>, extra: CommunicationFlags) {
        let mut registers = Registers::new();
        fields::COMMUNICATION.set(
            &mut registers,
            0,
            (CommunicationFlags::BROADCAST | extra).bits(),
        );
        let packet = fields::COMMUNICATION.write_packet(&registers).unwrap();
        assert!(comms.send_wait_ack(&packet).unwrap());
    }

    #[test]
    fn test_absent_device_fails_to_open() {
        let device = SimulatedDevice::new();
        device.set_present(false);
        assert!(device.open_port().is_err());
        assert_eq!(device.open_attempts(), 1);
    }

    #[test]
    fn test_silent_until_broadcast_enabled() {
        let device = SimulatedDevice::new();
        let mut comms = Comms::new(device.open_port().unwrap());
        assert!(matches!(
            comms.receive(&mut Registers::new()),
            Err(Um6Error::Timeout)
        ));
    }

    #[test]
    fn test_broadcast_group_ends_with_temperature() {
        let device = SimulatedDevice::new();
        let mut comms = Comms::new(device.open_port().unwrap());
        enable_broadcast(&mut comms, CommunicationFlags::empty());

        let mut registers = Registers::new();
        let mut addresses = Vec::new();
        loop {
            let addr = comms.receive(&mut registers).unwrap();
            addresses.push(addr);
            if addr == address::TEMPERATURE {
                break;
            }
        }

        assert_eq!(addresses.len(), IMU_GROUP.len() + 1);
        assert_eq!(addresses[0], address::GYRO_PROC_XY);
        assert_eq!(fields::TEMPERATURE.get(&registers, 0), 25.0);
        assert_eq!(fields::QUAT.get(&registers, 0), (1.0 / fields::QUAT.scale()).round() as i16);
        assert_eq!(device.cycles(), 1);
    }

    #[test]
    fn test_gps_registers_precede_trigger() {
        let device = SimulatedDevice::new();
        let mut comms = Comms::new(device.open_port().unwrap());
        enable_broadcast(&mut comms, CommunicationFlags::GPS_POSITION);

        let mut registers = Registers::new();
        let mut addresses = Vec::new();
        while addresses.last() != Some(&address::TEMPERATURE) {
            addresses.push(comms.receive(&mut registers).unwrap());
        }
        assert!(addresses.contains(&address::GPS_SAT_SUMMARY));
        assert_eq!(addresses.len(), IMU_GROUP.len() + GPS_GROUP.len() + 1);
    }

    #[test]
    fn test_rejected_and_ignored_writes() {
        let device = SimulatedDevice::new();
        device.reject(address::RESET_EKF);
        device.ignore(address::ZERO_GYROS);
        let mut comms = Comms::new(device.open_port().unwrap());

        assert!(!comms
            .send_wait_ack(&Packet::command(address::RESET_EKF))
            .unwrap());
        assert!(!comms
            .send_wait_ack(&Packet::command(address::ZERO_GYROS))
            .unwrap());
        assert!(comms
            .send_wait_ack(&Packet::command(address::SET_MAG_REF))
            .unwrap());

        let received = device.received();
        assert_eq!(received[0], address::RESET_EKF);
        assert_eq!(
            received
                .iter()
                .filter(|&&a| a == address::ZERO_GYROS)
                .count(),
            crate::comms::ACK_RETRIES
        );
    }

    #[test]
    fn test_writes_update_device_registers() {
        let device = SimulatedDevice::new();
        let mut comms = Comms::new(device.open_port().unwrap());

        let mut registers = Registers::new();
        fields::MAG_REF.set(&mut registers, 1, 0.25);
        let packet = fields::MAG_REF.write_packet(&registers).unwrap();
        assert!(comms.send_wait_ack(&packet).unwrap());

        assert_eq!(device.with_registers(|r| fields::MAG_REF.get(r, 1)), 0.25);
    }

    #[test]
    fn test_disconnect_after_cycles() {
        let device = SimulatedDevice::new();
        let mut comms = Comms::new(device.open_port().unwrap());
        enable_broadcast(&mut comms, CommunicationFlags::empty());
        device.disconnect_after(1);

        let mut registers = Registers::new();
        let result = loop {
            match comms.receive(&mut registers) {
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert!(matches!(result, Um6Error::Io(_)));
        assert_eq!(device.cycles(), 1);
    }
}
