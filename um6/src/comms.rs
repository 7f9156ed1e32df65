//! Packet-level communication with a UM6 over any byte stream.
//!
//! [`Comms`] wraps a `Read + Write` port (a serial port, the simulated
//! device, or an in-memory buffer in tests) and implements:
//!
//! - Header search with junk-byte resynchronisation
//! - Frame decoding with checksum validation (bad packets are skipped)
//! - Register updates from received data packets
//! - Write/command acknowledgement with retransmission
//!
//! Reads are bounded by the underlying port's timeout. A read that returns
//! no bytes, or fails with `TimedOut`/`WouldBlock`, is reported as
//! [`Um6Error::Timeout`].

use std::io::{BufReader, ErrorKind, Read, Write};

use tracing::{debug, trace, warn};

use crate::error::{Um6Error, Um6Result};
use crate::packet::{Packet, PacketType, CHECKSUM_LEN, HEADER, PREFIX_LEN};
use crate::registers::Registers;

/// Number of times a write is transmitted before giving up on an ack.
pub const ACK_RETRIES: usize = 5;

/// Packets inspected per transmission while waiting for an ack.
pub const ACK_LISTENS: usize = 20;

/// Consecutive bad-checksum packets `receive` skips before giving up.
pub const MAX_BAD_CHECKSUMS: usize = ACK_LISTENS;

/// Bytes scanned for a header before the stream is declared unusable.
pub const MAX_HEADER_SEARCH: usize = 512;

/// UM6 protocol endpoint over a byte stream.
pub struct Comms<P: Read + Write> {
    port: BufReader<P>,
    first_packet: bool,
}

impl<P: Read + Write> Comms<P> {
    pub fn new(port: P) -> Self {
        Self {
            port: BufReader::new(port),
            first_packet: true,
        }
    }

    /// Access the underlying port.
    pub fn get_ref(&self) -> &P {
        self.port.get_ref()
    }

    /// Consume and return the underlying port. Buffered input is discarded.
    pub fn into_inner(self) -> P {
        self.port.into_inner()
    }

    /// Transmit a packet without waiting for a reply.
    pub fn send(&mut self, packet: &Packet) -> Um6Result<()> {
        let bytes = packet.encode();
        trace!("UM6 send: {:02x?}", bytes);
        let port = self.port.get_mut();
        port.write_all(&bytes)?;
        port.flush()?;
        Ok(())
    }

    /// Read the next well-framed packet from the stream.
    ///
    /// # Errors
    /// - [`Um6Error::Timeout`] if the port runs dry mid-search or mid-packet
    /// - [`Um6Error::BadChecksum`] if a packet arrived but failed validation
    /// - [`Um6Error::MalformedPacket`] if no header was found within
    ///   [`MAX_HEADER_SEARCH`] bytes
    pub fn read_packet(&mut self) -> Um6Result<Packet> {
        let junk = self.find_header()?;
        if junk > 0 && !self.first_packet {
            warn!("Discarded {} junk byte(s) preceding packet.", junk);
        }
        self.first_packet = false;

        let mut frame = Vec::with_capacity(PREFIX_LEN + 64);
        frame.extend_from_slice(HEADER);

        let mut type_address = [0u8; 2];
        self.read_exact(&mut type_address)?;
        frame.extend_from_slice(&type_address);

        let packet_type = PacketType::from_byte(type_address[0]);
        let mut rest = vec![0u8; packet_type.data_len() + CHECKSUM_LEN];
        self.read_exact(&mut rest)?;
        frame.extend_from_slice(&rest);

        let packet = Packet::decode(&frame)?;
        if packet.packet_type.is_batch() {
            trace!(
                "Received packet {:02x} with batched ({}) data.",
                packet.address,
                packet.packet_type.batch_length()
            );
        } else {
            trace!("Received packet {:02x}.", packet.address);
        }
        Ok(packet)
    }

    /// Block until a valid packet arrives, store its data and return its address.
    ///
    /// Packets with bad checksums are logged and skipped, up to
    /// [`MAX_BAD_CHECKSUMS`] in a row; the last checksum error is returned
    /// after that so a noisy line cannot hold the caller indefinitely.
    pub fn receive(&mut self, registers: &mut Registers) -> Um6Result<u8> {
        let mut bad_checksums = 0;
        loop {
            match self.read_packet() {
                Ok(packet) => {
                    if packet.packet_type.command_failed() {
                        warn!("Device reported failure for register {:#04x}", packet.address);
                    }
                    if packet.packet_type.has_data() {
                        registers.store(packet.address, &packet.data)?;
                    }
                    return Ok(packet.address);
                }
                Err(Um6Error::BadChecksum {
                    computed,
                    transmitted,
                }) => {
                    bad_checksums += 1;
                    if bad_checksums >= MAX_BAD_CHECKSUMS {
                        warn!("{bad_checksums} consecutive packets failed their checksum.");
                        return Err(Um6Error::BadChecksum {
                            computed,
                            transmitted,
                        });
                    }
                    warn!("Discarding packet due to bad checksum.");
                    debug!(
                        "Computed checksum: {:04x}  Transmitted checksum: {:04x}",
                        computed, transmitted
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a write or command and wait for the device to acknowledge it.
    ///
    /// The packet is retransmitted up to [`ACK_RETRIES`] times whenever the
    /// read times out. Returns `Ok(false)` if the device flags the command as
    /// failed or never acknowledges it. Broadcast packets arriving while
    /// waiting are discarded.
    ///
    /// # Errors
    /// Only unrecoverable port errors are returned; timeouts and corrupt
    /// packets are absorbed by the retry loop.
    pub fn send_wait_ack(&mut self, packet: &Packet) -> Um6Result<bool> {
        for attempt in 0..ACK_RETRIES {
            self.send(packet)?;

            for _ in 0..ACK_LISTENS {
                match self.read_packet() {
                    Ok(reply) if reply.address == packet.address => {
                        if reply.packet_type.command_failed() {
                            warn!("Device rejected register {:#04x}", packet.address);
                            return Ok(false);
                        }
                        debug!("Message {:02x} ack received.", packet.address);
                        return Ok(true);
                    }
                    Ok(reply) => {
                        trace!(
                            "Ignoring packet {:02x} while waiting for {:02x} ack",
                            reply.address,
                            packet.address
                        );
                    }
                    Err(Um6Error::Timeout) => {
                        debug!(
                            "Serial read timed out waiting for ack (attempt {}). Retransmitting.",
                            attempt + 1
                        );
                        break;
                    }
                    Err(e @ (Um6Error::BadChecksum { .. } | Um6Error::MalformedPacket(_))) => {
                        debug!("Skipping unreadable packet while waiting for ack: {e}");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(false)
    }

    /// Scan forward to just past the next `snp` marker.
    ///
    /// Returns the number of bytes discarded before the marker.
    fn find_header(&mut self) -> Um6Result<usize> {
        let mut window = [0u8; 3];
        let mut seen = 0usize;

        loop {
            window = [window[1], window[2], self.read_byte()?];
            seen += 1;
            if seen >= HEADER.len() && &window == HEADER {
                return Ok(seen - HEADER.len());
            }
            if seen > MAX_HEADER_SEARCH {
                return Err(Um6Error::MalformedPacket(format!(
                    "no packet header within {MAX_HEADER_SEARCH} bytes"
                )));
            }
        }
    }

    fn read_byte(&mut self) -> Um6Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Um6Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Err(Um6Error::Timeout),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::TimedOut => return Err(Um6Error::Timeout),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Err(Um6Error::Timeout),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
