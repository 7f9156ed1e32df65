//! Checksum computation for UM6 packets
//!
//! The checksum is the 16-bit sum of every byte in the packet, starting with
//! the `s` of the `snp` header and ending with the last data byte, truncated
//! on overflow. It is transmitted MSB first after the data.

/// Compute the checksum over a byte slice.
///
/// Returns the wrapping sum of all bytes.
pub fn compute_checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, &byte| acc.wrapping_add(u16::from(byte)))
}

/// Verify that a complete frame's checksum is valid.
///
/// The frame should include all bytes up to and including the checksum.
/// For a frame of N bytes:
/// - Computes the sum of bytes 0..N-2
/// - Compares against the big-endian value stored in bytes N-2..N
pub fn verify_checksum(frame: &[u8]) -> bool {
    if frame.len() < 7 {
        return false;
    }

    let data_end = frame.len() - 2;
    let computed = compute_checksum(&frame[..data_end]);
    let stored = u16::from_be_bytes([frame[data_end], frame[data_end + 1]]);

    computed == stored
}
