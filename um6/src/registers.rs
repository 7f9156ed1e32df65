//! UM6 register map and typed field accessors
//!
//! The UM6 exposes 256 addressable 32-bit registers: configuration registers
//! (0x00-0x54), data registers (0x55-0xA9) and command addresses (0xAA+).
//! Sensor vectors are packed as big-endian `i16` pairs (`XY` in one register,
//! `Z` in the upper half of the next), while references, covariance,
//! temperature and GPS values are IEEE `f32`.
//!
//! [`Registers`] holds the raw bytes exactly as received on the wire, and an
//! [`Accessor`] describes where a field lives and how to scale it into
//! physical units. Byte-order handling happens at access time.

use std::fmt;
use std::marker::PhantomData;

use bitflags::bitflags;

use crate::error::{Um6Error, Um6Result};
use crate::packet::Packet;

/// Number of addressable registers (including command addresses).
pub const REGISTER_COUNT: usize = 256;

const TO_RADIANS: f64 = std::f64::consts::PI / 180.0;

/// Register addresses from the UM6 datasheet.
pub mod address {
    // Configuration registers
    pub const COMMUNICATION: u8 = 0x00;
    pub const MISC_CONFIG: u8 = 0x01;
    pub const MAG_REF_X: u8 = 0x02;
    pub const ACCEL_REF_X: u8 = 0x05;
    pub const EKF_MAG_VARIANCE: u8 = 0x08;
    pub const EKF_ACCEL_VARIANCE: u8 = 0x09;
    pub const EKF_PROCESS_VARIANCE: u8 = 0x0A;
    pub const GYRO_BIAS_XY: u8 = 0x0B;
    pub const ACCEL_BIAS_XY: u8 = 0x0D;
    pub const MAG_BIAS_XY: u8 = 0x0F;
    pub const GPS_HOME_LAT: u8 = 0x38;

    // Data registers
    pub const STATUS: u8 = 0x55;
    pub const GYRO_RAW_XY: u8 = 0x56;
    pub const ACCEL_RAW_XY: u8 = 0x58;
    pub const MAG_RAW_XY: u8 = 0x5A;
    pub const GYRO_PROC_XY: u8 = 0x5C;
    pub const ACCEL_PROC_XY: u8 = 0x5E;
    pub const MAG_PROC_XY: u8 = 0x60;
    pub const EULER_PHI_THETA: u8 = 0x62;
    pub const QUAT_AB: u8 = 0x64;
    pub const ERROR_COV_00: u8 = 0x66;
    pub const TEMPERATURE: u8 = 0x76;
    pub const GPS_LONGITUDE: u8 = 0x77;
    pub const GPS_POSITION_N: u8 = 0x7A;
    pub const GPS_COURSE_SPEED: u8 = 0x7D;
    pub const GPS_SAT_SUMMARY: u8 = 0x7E;

    // Commands
    pub const GET_FW_VERSION: u8 = 0xAA;
    pub const FLASH_COMMIT: u8 = 0xAB;
    pub const ZERO_GYROS: u8 = 0xAC;
    pub const RESET_EKF: u8 = 0xAD;
    pub const GET_DATA: u8 = 0xAE;
    pub const SET_ACCEL_REF: u8 = 0xAF;
    pub const SET_MAG_REF: u8 = 0xB0;
    pub const RESET_TO_FACTORY: u8 = 0xB1;
    pub const GPS_SET_HOME_POSITION: u8 = 0xB3;

    // Error replies
    pub const BAD_CHECKSUM: u8 = 0xFD;
    pub const UNKNOWN_ADDRESS: u8 = 0xFE;
    pub const INVALID_BATCH_SIZE: u8 = 0xFF;
}

bitflags! {
    /// Output enable bits of the COMMUNICATION register.
    ///
    /// Bits 0..7 hold the broadcast rate, bits 8..10 the serial baud code
    /// and bits 11..13 the GPS baud code; see [`COMM_BAUD_START_BIT`] and
    /// [`COMM_GPS_BAUD_START_BIT`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommunicationFlags: u32 {
        const BROADCAST = 1 << 30;
        const GYROS_RAW = 1 << 29;
        const ACCELS_RAW = 1 << 28;
        const MAG_RAW = 1 << 27;
        const GYROS_PROC = 1 << 26;
        const ACCELS_PROC = 1 << 25;
        const MAG_PROC = 1 << 24;
        const QUAT = 1 << 23;
        const EULER = 1 << 22;
        const COV = 1 << 21;
        const TEMPERATURE = 1 << 20;
        const GPS_POSITION = 1 << 19;
        const GPS_REL_POSITION = 1 << 18;
        const GPS_COURSE_SPEED = 1 << 17;
        const GPS_SAT_SUMMARY = 1 << 16;
        const GPS_SAT_DATA = 1 << 15;
    }
}

/// First bit of the serial baud code in the COMMUNICATION register.
pub const COMM_BAUD_START_BIT: u32 = 8;
/// First bit of the GPS baud code in the COMMUNICATION register.
pub const COMM_GPS_BAUD_START_BIT: u32 = 11;
/// Mask of the broadcast rate field in the COMMUNICATION register.
pub const COMM_BROADCAST_RATE_MASK: u32 = 0xFF;

/// Baud rates the UM6 supports, indexed by their register code.
pub const SUPPORTED_BAUD_RATES: [u32; 6] = [9600, 14400, 19200, 38400, 57600, 115200];

/// Register code for a baud rate, shared by the serial and GPS baud fields.
pub fn baud_code(baud: u32) -> Option<u32> {
    SUPPORTED_BAUD_RATES
        .iter()
        .position(|&rate| rate == baud)
        .map(|code| code as u32)
}

bitflags! {
    /// Bits of the MISC_CONFIG register controlling the on-board EKF.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MiscConfigFlags: u32 {
        const MAG_UPDATE = 1 << 31;
        const ACCEL_UPDATE = 1 << 30;
        const GYRO_STARTUP_CAL = 1 << 29;
        const QUAT_ESTIMATE = 1 << 28;
    }
}

/// Bit positions inside the GPS_SAT_SUMMARY register.
pub mod gps_summary {
    pub const MODE_START_BIT: u32 = 30;
    pub const MODE_MASK: u32 = 0x3;
    pub const SAT_COUNT_START_BIT: u32 = 26;
    pub const SAT_COUNT_MASK: u32 = 0xF;
    pub const HDOP_START_BIT: u32 = 16;
    pub const HDOP_MASK: u32 = 0x3FF;
    pub const VDOP_START_BIT: u32 = 6;
    pub const VDOP_MASK: u32 = 0x3FF;
}

/// Decoded GPS_SAT_SUMMARY register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpsSummary {
    /// Fix mode: 0 no GPS, 1 no fix, 2 2D fix, 3 3D fix
    pub mode: u8,
    pub satellites: u8,
    pub hdop: u16,
    pub vdop: u16,
}

impl GpsSummary {
    pub fn from_word(word: u32) -> Self {
        use gps_summary::*;
        Self {
            mode: ((word >> MODE_START_BIT) & MODE_MASK) as u8,
            satellites: ((word >> SAT_COUNT_START_BIT) & SAT_COUNT_MASK) as u8,
            hdop: ((word >> HDOP_START_BIT) & HDOP_MASK) as u16,
            vdop: ((word >> VDOP_START_BIT) & VDOP_MASK) as u16,
        }
    }

    pub fn to_word(&self) -> u32 {
        use gps_summary::*;
        ((u32::from(self.mode) & MODE_MASK) << MODE_START_BIT)
            | ((u32::from(self.satellites) & SAT_COUNT_MASK) << SAT_COUNT_START_BIT)
            | ((u32::from(self.hdop) & HDOP_MASK) << HDOP_START_BIT)
            | ((u32::from(self.vdop) & VDOP_MASK) << VDOP_START_BIT)
    }
}

/// A value type that can live inside UM6 registers.
pub trait RegisterValue: Copy + fmt::Debug + 'static {
    /// Size in bytes on the wire.
    const SIZE: usize;

    /// Decode from exactly `SIZE` big-endian bytes.
    fn from_be_slice(bytes: &[u8]) -> Self;

    /// Encode into exactly `SIZE` big-endian bytes.
    fn write_be(self, out: &mut [u8]);

    fn to_f64(self) -> f64;

    /// Convert from a physical value, rounding integers to nearest.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_register_value {
    ($ty:ty, $size:expr, $from_f64:expr) => {
        impl RegisterValue for $ty {
            const SIZE: usize = $size;

            fn from_be_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $size];
                buf.copy_from_slice(bytes);
                <$ty>::from_be_bytes(buf)
            }

            fn write_be(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_be_bytes());
            }

            fn to_f64(self) -> f64 {
                f64::from(self)
            }

            fn from_f64(value: f64) -> Self {
                $from_f64(value)
            }
        }
    };
}

impl_register_value!(i16, 2, |v: f64| v.round() as i16);
impl_register_value!(u16, 2, |v: f64| v.round() as u16);
impl_register_value!(i32, 4, |v: f64| v.round() as i32);
impl_register_value!(u32, 4, |v: f64| v.round() as u32);
impl_register_value!(f32, 4, |v: f64| v as f32);

/// Raw register contents, stored in wire byte order.
#[derive(Clone, PartialEq, Eq)]
pub struct Registers {
    raw: [u8; REGISTER_COUNT * 4],
}

impl Registers {
    /// All registers zeroed.
    pub fn new() -> Self {
        Self {
            raw: [0; REGISTER_COUNT * 4],
        }
    }

    /// Bytes of `count` consecutive registers starting at `address`.
    ///
    /// # Errors
    /// Returns [`Um6Error::MalformedPacket`] if the span runs past the last register.
    pub fn bytes(&self, address: u8, count: usize) -> Um6Result<&[u8]> {
        let (start, end) = Self::span(address, count)?;
        Ok(&self.raw[start..end])
    }

    /// Overwrite registers starting at `address` with wire-order `data`.
    ///
    /// # Errors
    /// Returns [`Um6Error::MalformedPacket`] if the data is not register
    /// aligned or runs past the last register.
    pub fn store(&mut self, address: u8, data: &[u8]) -> Um6Result<()> {
        if data.len() % 4 != 0 {
            return Err(Um6Error::MalformedPacket(format!(
                "register data of {} bytes is not register aligned",
                data.len()
            )));
        }
        let (start, end) = Self::span(address, data.len() / 4)?;
        self.raw[start..end].copy_from_slice(data);
        Ok(())
    }

    fn span(address: u8, count: usize) -> Um6Result<(usize, usize)> {
        let start = usize::from(address) * 4;
        let end = start + count * 4;
        if end > REGISTER_COUNT * 4 {
            return Err(Um6Error::MalformedPacket(format!(
                "{count} registers at {address:#04x} exceed the register map"
            )));
        }
        Ok((start, end))
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nonzero = self
            .raw
            .chunks_exact(4)
            .filter(|r| r.iter().any(|&b| b != 0))
            .count();
        f.debug_struct("Registers")
            .field("nonzero_registers", &nonzero)
            .finish()
    }
}

/// Location, width and scale of a field spanning one or more registers.
///
/// Fields are packed back to back starting at the high bytes of register
/// `index`, so three `i16` values occupy two registers (XY, Z) and four
/// occupy two (AB, CD).
#[derive(Debug, Clone, Copy)]
pub struct Accessor<T> {
    index: u8,
    length: u16,
    scale: f64,
    _value: PhantomData<fn() -> T>,
}

impl<T: RegisterValue> Accessor<T> {
    pub const fn new(index: u8, length: u16, scale: f64) -> Self {
        Self {
            index,
            length,
            scale,
            _value: PhantomData,
        }
    }

    /// Address of the first register.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        usize::from(self.length)
    }

    /// Command accessors have no fields.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Number of 32-bit registers the fields occupy.
    pub fn register_count(&self) -> usize {
        (self.len() * T::SIZE).div_ceil(4)
    }

    fn offset(&self, field: usize) -> usize {
        assert!(
            field < self.len(),
            "field {field} out of range for accessor at {:#04x} with {} fields",
            self.index,
            self.length
        );
        usize::from(self.index) * 4 + field * T::SIZE
    }

    /// Raw value of `field`.
    pub fn get(&self, registers: &Registers, field: usize) -> T {
        let offset = self.offset(field);
        T::from_be_slice(&registers.raw[offset..offset + T::SIZE])
    }

    /// Value of `field` in physical units.
    pub fn get_scaled(&self, registers: &Registers, field: usize) -> f64 {
        self.get(registers, field).to_f64() * self.scale
    }

    pub fn set(&self, registers: &mut Registers, field: usize, value: T) {
        let offset = self.offset(field);
        value.write_be(&mut registers.raw[offset..offset + T::SIZE]);
    }

    /// Store a physical value, inverting the scale factor.
    pub fn set_scaled(&self, registers: &mut Registers, field: usize, value: f64) {
        self.set(registers, field, T::from_f64(value / self.scale));
    }

    /// Packet writing this field's registers to the device, or a bare
    /// command packet for zero-width accessors.
    ///
    /// # Errors
    /// Returns an error if the field spans more registers than one packet can carry.
    pub fn write_packet(&self, registers: &Registers) -> Um6Result<Packet> {
        if self.is_empty() {
            return Ok(Packet::command(self.index));
        }
        let data = registers.bytes(self.index, self.register_count())?;
        Packet::new(self.index, data.to_vec())
    }
}

/// Named fields of the UM6 register map.
pub mod fields {
    use super::{address, Accessor, TO_RADIANS};

    // Configuration
    pub const COMMUNICATION: Accessor<u32> = Accessor::new(address::COMMUNICATION, 1, 1.0);
    pub const MISC_CONFIG: Accessor<u32> = Accessor::new(address::MISC_CONFIG, 1, 1.0);
    pub const MAG_REF: Accessor<f32> = Accessor::new(address::MAG_REF_X, 3, 1.0);
    pub const ACCEL_REF: Accessor<f32> = Accessor::new(address::ACCEL_REF_X, 3, 1.0);
    pub const GYRO_BIAS: Accessor<i16> = Accessor::new(address::GYRO_BIAS_XY, 3, 1.0);
    pub const ACCEL_BIAS: Accessor<i16> = Accessor::new(address::ACCEL_BIAS_XY, 3, 1.0);
    pub const MAG_BIAS: Accessor<i16> = Accessor::new(address::MAG_BIAS_XY, 3, 1.0);
    pub const GPS_HOME: Accessor<f32> = Accessor::new(address::GPS_HOME_LAT, 3, 1.0);

    // Data
    pub const STATUS: Accessor<u32> = Accessor::new(address::STATUS, 1, 1.0);
    pub const GYRO_RAW: Accessor<i16> = Accessor::new(address::GYRO_RAW_XY, 3, 1.0);
    pub const ACCEL_RAW: Accessor<i16> = Accessor::new(address::ACCEL_RAW_XY, 3, 1.0);
    pub const MAG_RAW: Accessor<i16> = Accessor::new(address::MAG_RAW_XY, 3, 1.0);
    /// Processed gyro rates, rad/s
    pub const GYRO: Accessor<i16> = Accessor::new(address::GYRO_PROC_XY, 3, 0.0610352 * TO_RADIANS);
    /// Processed acceleration, g
    pub const ACCEL: Accessor<i16> = Accessor::new(address::ACCEL_PROC_XY, 3, 0.000183105);
    /// Processed magnetic field, normalized
    pub const MAG: Accessor<i16> = Accessor::new(address::MAG_PROC_XY, 3, 0.000305176);
    /// Roll, pitch, yaw in radians
    pub const EULER: Accessor<i16> =
        Accessor::new(address::EULER_PHI_THETA, 3, 0.0109863 * TO_RADIANS);
    /// Orientation quaternion, [w, x, y, z]
    pub const QUAT: Accessor<i16> = Accessor::new(address::QUAT_AB, 4, 0.0000335693);
    /// 4x4 EKF error covariance, row major
    pub const COVARIANCE: Accessor<f32> = Accessor::new(address::ERROR_COV_00, 16, 1.0);
    /// Temperature, degrees Celsius
    pub const TEMPERATURE: Accessor<f32> = Accessor::new(address::TEMPERATURE, 1, 1.0);
    /// Longitude, latitude, altitude
    pub const GPS_ABS: Accessor<f32> = Accessor::new(address::GPS_LONGITUDE, 3, 1.0);
    /// North, east, height relative to home
    pub const GPS_REL: Accessor<f32> = Accessor::new(address::GPS_POSITION_N, 3, 1.0);
    /// Course (hundredths of a degree), speed (cm/s)
    pub const GPS_COURSE_SPEED: Accessor<u16> = Accessor::new(address::GPS_COURSE_SPEED, 2, 1.0);
    pub const GPS_SAT_SUMMARY: Accessor<u32> = Accessor::new(address::GPS_SAT_SUMMARY, 1, 1.0);

    // Commands
    pub const CMD_GET_FW_VERSION: Accessor<u32> = Accessor::new(address::GET_FW_VERSION, 0, 1.0);
    pub const CMD_ZERO_GYROS: Accessor<u32> = Accessor::new(address::ZERO_GYROS, 0, 1.0);
    pub const CMD_RESET_EKF: Accessor<u32> = Accessor::new(address::RESET_EKF, 0, 1.0);
    pub const CMD_SET_ACCEL_REF: Accessor<u32> = Accessor::new(address::SET_ACCEL_REF, 0, 1.0);
    pub const CMD_SET_MAG_REF: Accessor<u32> = Accessor::new(address::SET_MAG_REF, 0, 1.0);
}
