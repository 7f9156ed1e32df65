//! UM6 binary packet framing
//!
//! Every packet on the wire has the layout:
//!
//! ```text
//! 's' 'n' 'p' | PT | ADDR | DATA (0..60 bytes) | CHK_HI | CHK_LO
//! ```
//!
//! The packet type byte (PT) encodes whether data is present, whether the
//! data spans several consecutive registers (a batch) and the batch length.
//! Replies from the sensor also carry a command-failed bit.
//!
//! ```text
//! bit 7     has data
//! bit 6     is batch
//! bits 5..2 batch length (registers)
//! bit 0     command failed
//! ```

use crate::checksum::compute_checksum;
use crate::error::{Um6Error, Um6Result};

/// Start-of-packet marker.
pub const HEADER: &[u8; 3] = b"snp";

/// Bytes before the data section (header, packet type, address).
pub const PREFIX_LEN: usize = 5;

/// Trailing checksum length.
pub const CHECKSUM_LEN: usize = 2;

/// Largest batch the 4-bit length field can describe.
pub const MAX_BATCH_REGISTERS: usize = 15;

/// Decoded packet type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketType(u8);

impl PacketType {
    const HAS_DATA: u8 = 1 << 7;
    const IS_BATCH: u8 = 1 << 6;
    const BATCH_LENGTH_OFFSET: u8 = 2;
    const BATCH_LENGTH_MASK: u8 = 0x0F;
    const COMMAND_FAILED: u8 = 1 << 0;

    /// Wrap a raw packet type byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Packet type describing `registers` registers of payload.
    pub fn for_registers(registers: usize) -> Um6Result<Self> {
        match registers {
            0 => Ok(Self(0)),
            1 => Ok(Self(Self::HAS_DATA)),
            n if n <= MAX_BATCH_REGISTERS => Ok(Self(
                Self::HAS_DATA | Self::IS_BATCH | ((n as u8) << Self::BATCH_LENGTH_OFFSET),
            )),
            n => Err(Um6Error::InvalidBatchSize(n)),
        }
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn has_data(&self) -> bool {
        self.0 & Self::HAS_DATA != 0
    }

    pub fn is_batch(&self) -> bool {
        self.0 & Self::IS_BATCH != 0
    }

    pub fn batch_length(&self) -> usize {
        ((self.0 >> Self::BATCH_LENGTH_OFFSET) & Self::BATCH_LENGTH_MASK) as usize
    }

    /// Set by the sensor when it could not execute a command or write.
    pub fn command_failed(&self) -> bool {
        self.0 & Self::COMMAND_FAILED != 0
    }

    /// Number of registers carried in the data section.
    pub fn register_count(&self) -> usize {
        match (self.has_data(), self.is_batch()) {
            (false, _) => 0,
            (true, false) => 1,
            (true, true) => self.batch_length(),
        }
    }

    /// Number of bytes in the data section.
    pub fn data_len(&self) -> usize {
        self.register_count() * 4
    }

    /// Same packet type with the command-failed bit raised.
    pub fn with_command_failed(self) -> Self {
        Self(self.0 | Self::COMMAND_FAILED)
    }
}

/// A single UM6 packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub address: u8,
    /// Register contents in wire (big-endian) order.
    pub data: Vec<u8>,
}

impl Packet {
    /// Build a packet writing `data` into consecutive registers starting at `address`.
    ///
    /// # Errors
    /// Returns [`Um6Error::MalformedPacket`] if `data` is not a whole number of
    /// registers and [`Um6Error::InvalidBatchSize`] if it spans more than
    /// [`MAX_BATCH_REGISTERS`].
    pub fn new(address: u8, data: Vec<u8>) -> Um6Result<Self> {
        if data.len() % 4 != 0 {
            return Err(Um6Error::MalformedPacket(format!(
                "data length {} is not a multiple of 4",
                data.len()
            )));
        }
        let packet_type = PacketType::for_registers(data.len() / 4)?;
        Ok(Self {
            packet_type,
            address,
            data,
        })
    }

    /// Data-less packet, used for commands and for reading a register back.
    pub fn command(address: u8) -> Self {
        Self {
            packet_type: PacketType::from_byte(0),
            address,
            data: Vec::new(),
        }
    }

    /// Data-less reply flagging a failed command.
    pub fn command_failed(address: u8) -> Self {
        Self {
            packet_type: PacketType::from_byte(0).with_command_failed(),
            address,
            data: Vec::new(),
        }
    }

    pub fn register_count(&self) -> usize {
        self.data.len() / 4
    }

    /// Total size of this packet on the wire.
    pub fn frame_len(&self) -> usize {
        PREFIX_LEN + self.data.len() + CHECKSUM_LEN
    }

    /// Serialize to wire bytes, including header and checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.frame_len());
        out.extend_from_slice(HEADER);
        out.push(self.packet_type.bits());
        out.push(self.address);
        out.extend_from_slice(&self.data);
        let checksum = compute_checksum(&out);
        out.extend_from_slice(&checksum.to_be_bytes());
        out
    }

    /// Parse a complete frame (header through checksum).
    ///
    /// # Errors
    /// - [`Um6Error::MalformedPacket`] if the header is missing or the frame
    ///   length disagrees with the packet type
    /// - [`Um6Error::BadChecksum`] if the checksum does not match
    pub fn decode(frame: &[u8]) -> Um6Result<Self> {
        if frame.len() < PREFIX_LEN + CHECKSUM_LEN || &frame[..3] != HEADER {
            return Err(Um6Error::MalformedPacket(
                "frame does not start with snp header".to_string(),
            ));
        }

        let packet_type = PacketType::from_byte(frame[3]);
        let expected = PREFIX_LEN + packet_type.data_len() + CHECKSUM_LEN;
        if frame.len() != expected {
            return Err(Um6Error::MalformedPacket(format!(
                "frame is {} bytes, packet type {:#04x} requires {expected}",
                frame.len(),
                packet_type.bits()
            )));
        }

        let data_end = expected - CHECKSUM_LEN;
        let computed = compute_checksum(&frame[..data_end]);
        let transmitted = u16::from_be_bytes([frame[data_end], frame[data_end + 1]]);
        if computed != transmitted {
            return Err(Um6Error::BadChecksum {
                computed,
                transmitted,
            });
        }

        Ok(Self {
            packet_type,
            address: frame[4],
            data: frame[PREFIX_LEN..data_end].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_register_packet_type() {
        let packet = Packet::new(0x5A, vec![1, 2, 3, 4]).unwrap();
        assert!(packet.packet_type.has_data());
        assert!(!packet.packet_type.is_batch());
        assert_eq!(packet.packet_type.bits(), 0x80);
        assert_eq!(packet.frame_len(), 11);
    }

    #[test]
    fn test_batch_packet_type() {
        let packet = Packet::new(0x58, vec![5, 6, 7, 8, 9, 10, 0, 0]).unwrap();
        assert!(packet.packet_type.is_batch());
        assert_eq!(packet.packet_type.batch_length(), 2);
        assert_eq!(packet.packet_type.bits(), 0x80 | 0x40 | (2 << 2));
        assert_eq!(packet.packet_type.data_len(), 8);
    }

    #[test]
    fn test_command_packet_has_no_data() {
        let packet = Packet::command(0xAC);
        assert_eq!(packet.encode().len(), 7);
        assert_eq!(packet.packet_type.register_count(), 0);
        assert!(!packet.packet_type.command_failed());
    }

    #[test]
    fn test_encode_layout() {
        let bytes = Packet::new(0x76, vec![0x42, 0x28, 0x00, 0x00])
            .unwrap()
            .encode();
        assert_eq!(&bytes[..3], b"snp");
        assert_eq!(bytes[3], 0x80);
        assert_eq!(bytes[4], 0x76);
        assert_eq!(&bytes[5..9], &[0x42, 0x28, 0x00, 0x00]);
        let checksum = compute_checksum(&bytes[..9]);
        assert_eq!(&bytes[9..], &checksum.to_be_bytes());
    }

    #[test]
    fn test_decode_recovers_batch_packet() {
        let original = Packet::new(0x64, vec![0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        let decoded = Packet::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_flags_command_failure() {
        let decoded = Packet::decode(&Packet::command_failed(0xAD).encode()).unwrap();
        assert_eq!(decoded.address, 0xAD);
        assert!(decoded.packet_type.command_failed());
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let mut bytes = Packet::new(0x76, vec![1, 2, 3, 4]).unwrap().encode();
        bytes[6] ^= 0xFF;
        assert!(matches!(
            Packet::decode(&bytes),
            Err(Um6Error::BadChecksum { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut bytes = Packet::new(0x76, vec![1, 2, 3, 4]).unwrap().encode();
        bytes.pop();
        assert!(matches!(
            Packet::decode(&bytes),
            Err(Um6Error::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_oversized_batch_rejected() {
        assert!(matches!(
            Packet::new(0x66, vec![0; 16 * 4]),
            Err(Um6Error::InvalidBatchSize(16))
        ));
        assert!(matches!(
            Packet::new(0x66, vec![0; 3]),
            Err(Um6Error::MalformedPacket(_))
        ));
    }
}
