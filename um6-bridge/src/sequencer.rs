//! Pushes [`DeviceSettings`] to a freshly opened UM6.
//!
//! Every write must be acknowledged before the next is sent. The first
//! rejection aborts the sequence with [`BridgeError::ConfigurationRejected`]
//! and the caller treats the connection as failed; the bridge never streams
//! from a device whose configuration was not confirmed.
//!
//! Order:
//! 1. COMMUNICATION (output enables, baud codes, broadcast rate)
//! 2. MISC_CONFIG (EKF update sources, quaternion estimation)
//! 3. Zero gyros, if requested
//! 4. Reference and bias vectors, then GPS home when GPS is enabled

use tracing::{info, warn};
use um6::registers::{
    baud_code, RegisterValue, COMM_BAUD_START_BIT, COMM_BROADCAST_RATE_MASK,
    COMM_GPS_BAUD_START_BIT,
};
use um6::{fields, Accessor, CommunicationFlags, MiscConfigFlags, Packet, Registers, Transport};

use crate::config::{DeviceSettings, Vector3Setting};
use crate::error::{BridgeError, BridgeResult};

/// Outputs the bridge always needs.
const REQUIRED_OUTPUTS: CommunicationFlags = CommunicationFlags::BROADCAST
    .union(CommunicationFlags::GYROS_PROC)
    .union(CommunicationFlags::ACCELS_PROC)
    .union(CommunicationFlags::MAG_PROC)
    .union(CommunicationFlags::QUAT)
    .union(CommunicationFlags::EULER)
    .union(CommunicationFlags::COV)
    .union(CommunicationFlags::TEMPERATURE);

const GPS_OUTPUTS: CommunicationFlags = CommunicationFlags::GPS_POSITION
    .union(CommunicationFlags::GPS_REL_POSITION)
    .union(CommunicationFlags::GPS_COURSE_SPEED)
    .union(CommunicationFlags::GPS_SAT_SUMMARY)
    .union(CommunicationFlags::GPS_SAT_DATA);

/// Register code for a baud rate.
///
/// # Errors
/// Returns [`BridgeError::InvalidConfigurationValue`] for rates the UM6
/// cannot use.
pub fn baud_to_bits(baud: u32) -> BridgeResult<u32> {
    baud_code(baud)
        .ok_or_else(|| BridgeError::InvalidConfigurationValue(format!("invalid baud rate {baud}")))
}

/// COMMUNICATION register value for these settings and serial baud rate.
pub fn communication_word(settings: &DeviceSettings, serial_baud: u32) -> BridgeResult<u32> {
    let mut flags = REQUIRED_OUTPUTS;
    if settings.gps_enable {
        flags |= GPS_OUTPUTS;
    }

    Ok(flags.bits()
        | (baud_to_bits(serial_baud)? << COMM_BAUD_START_BIT)
        | (baud_to_bits(settings.gps_baud)? << COMM_GPS_BAUD_START_BIT)
        | (u32::from(settings.broadcast_rate) & COMM_BROADCAST_RATE_MASK))
}

/// MISC_CONFIG register value. Quaternion estimation is always on.
pub fn misc_config_word(settings: &DeviceSettings) -> u32 {
    let mut flags = MiscConfigFlags::QUAT_ESTIMATE;
    if settings.mag_updates {
        flags |= MiscConfigFlags::MAG_UPDATE;
    } else {
        warn!("Excluding magnetometer updates from EKF.");
    }
    if settings.accel_updates {
        flags |= MiscConfigFlags::ACCEL_UPDATE;
    } else {
        warn!("Excluding accelerometer updates from EKF.");
    }
    flags.bits()
}

fn require_ack<T: Transport + ?Sized>(
    transport: &mut T,
    packet: &Packet,
    what: &str,
) -> BridgeResult<()> {
    if transport.send_wait_ack(packet)? {
        Ok(())
    } else {
        Err(BridgeError::ConfigurationRejected(what.to_string()))
    }
}

/// Write a three-component vector, or do nothing if `value` is absent.
///
/// # Errors
/// - [`BridgeError::InvalidConfigurationValue`] if the accessor is not three wide
/// - [`BridgeError::ConfigurationRejected`] if the write is not acknowledged
pub fn configure_vector3<T, V>(
    transport: &mut T,
    registers: &mut Registers,
    accessor: &Accessor<V>,
    value: Option<&Vector3Setting>,
    name: &str,
) -> BridgeResult<()>
where
    T: Transport + ?Sized,
    V: RegisterValue,
{
    if accessor.len() != 3 {
        return Err(BridgeError::InvalidConfigurationValue(format!(
            "{name} register has {} fields, expected 3",
            accessor.len()
        )));
    }
    let Some(value) = value else {
        return Ok(());
    };

    info!(
        "Configuring {name} to ({}, {}, {})",
        value.x, value.y, value.z
    );
    for (i, component) in value.components().into_iter().enumerate() {
        accessor.set_scaled(registers, i, component);
    }
    let packet = accessor.write_packet(registers)?;
    require_ack(transport, &packet, name)
}

/// Run the full configuration sequence.
pub fn configure<T: Transport + ?Sized>(
    transport: &mut T,
    settings: &DeviceSettings,
    serial_baud: u32,
) -> BridgeResult<()> {
    let mut registers = Registers::new();

    let comm = communication_word(settings, serial_baud)?;
    if settings.gps_enable {
        info!("GPS enabled");
    }
    fields::COMMUNICATION.set(&mut registers, 0, comm);
    require_ack(
        transport,
        &fields::COMMUNICATION.write_packet(&registers)?,
        "communication register",
    )?;

    fields::MISC_CONFIG.set(&mut registers, 0, misc_config_word(settings));
    require_ack(
        transport,
        &fields::MISC_CONFIG.write_packet(&registers)?,
        "misc config register",
    )?;

    if settings.zero_gyros {
        info!("Sending command: zero gyroscopes");
        require_ack(
            transport,
            &fields::CMD_ZERO_GYROS.write_packet(&registers)?,
            "zero gyroscopes",
        )?;
    }

    configure_vector3(
        transport,
        &mut registers,
        &fields::MAG_REF,
        settings.mag_ref.as_ref(),
        "magnetic reference vector",
    )?;
    configure_vector3(
        transport,
        &mut registers,
        &fields::ACCEL_REF,
        settings.accel_ref.as_ref(),
        "accelerometer reference vector",
    )?;
    configure_vector3(
        transport,
        &mut registers,
        &fields::MAG_BIAS,
        settings.mag_bias.as_ref(),
        "magnetic bias vector",
    )?;
    configure_vector3(
        transport,
        &mut registers,
        &fields::ACCEL_BIAS,
        settings.accel_bias.as_ref(),
        "accelerometer bias vector",
    )?;
    configure_vector3(
        transport,
        &mut registers,
        &fields::GYRO_BIAS,
        settings.gyro_bias.as_ref(),
        "gyroscope bias vector",
    )?;
    if settings.gps_enable {
        configure_vector3(
            transport,
            &mut registers,
            &fields::GPS_HOME,
            settings.gps_home.as_ref(),
            "gps home position vector",
        )?;
    }

    info!("Configuration complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::ScriptedTransport;
    use um6::address;

    #[test]
    fn test_baud_codes() {
        assert_eq!(baud_to_bits(9600).unwrap(), 0);
        assert_eq!(baud_to_bits(14400).unwrap(), 1);
        assert_eq!(baud_to_bits(19200).unwrap(), 2);
        assert_eq!(baud_to_bits(38400).unwrap(), 3);
        assert_eq!(baud_to_bits(57600).unwrap(), 4);
        assert_eq!(baud_to_bits(115200).unwrap(), 5);
        assert!(matches!(
            baud_to_bits(4800),
            Err(BridgeError::InvalidConfigurationValue(_))
        ));
    }

    #[test]
    fn test_communication_word_without_gps() {
        let word = communication_word(&DeviceSettings::default(), 115200).unwrap();
        let flags = CommunicationFlags::from_bits_truncate(word);
        assert!(flags.contains(REQUIRED_OUTPUTS));
        assert!(!flags.intersects(GPS_OUTPUTS));
        assert_eq!((word >> COMM_BAUD_START_BIT) & 0x7, 5);
        assert_eq!((word >> COMM_GPS_BAUD_START_BIT) & 0x7, 0);
        assert_eq!(word & COMM_BROADCAST_RATE_MASK, 0);
    }

    #[test]
    fn test_communication_word_with_gps() {
        let settings = DeviceSettings {
            gps_enable: true,
            gps_baud: 57600,
            broadcast_rate: 20,
            ..Default::default()
        };
        let word = communication_word(&settings, 38400).unwrap();
        let flags = CommunicationFlags::from_bits_truncate(word);
        assert!(flags.contains(GPS_OUTPUTS));
        assert_eq!((word >> COMM_BAUD_START_BIT) & 0x7, 3);
        assert_eq!((word >> COMM_GPS_BAUD_START_BIT) & 0x7, 4);
        assert_eq!(word & COMM_BROADCAST_RATE_MASK, 20);
    }

    #[test]
    fn test_invalid_gps_baud_rejected_before_io() {
        let mut transport = ScriptedTransport::opened();
        let settings = DeviceSettings {
            gps_baud: 4800,
            ..Default::default()
        };
        assert!(matches!(
            configure(&mut transport, &settings, 115200),
            Err(BridgeError::InvalidConfigurationValue(_))
        ));
        assert!(transport.sent.is_empty());
    }

    #[test]
    fn test_misc_config_word() {
        let all = misc_config_word(&DeviceSettings::default());
        assert_eq!(
            MiscConfigFlags::from_bits_truncate(all),
            MiscConfigFlags::QUAT_ESTIMATE | MiscConfigFlags::MAG_UPDATE | MiscConfigFlags::ACCEL_UPDATE
        );

        let no_mag = misc_config_word(&DeviceSettings {
            mag_updates: false,
            ..Default::default()
        });
        assert_eq!(
            MiscConfigFlags::from_bits_truncate(no_mag),
            MiscConfigFlags::QUAT_ESTIMATE | MiscConfigFlags::ACCEL_UPDATE
        );
    }

    #[test]
    fn test_default_sequence() {
        let mut transport = ScriptedTransport::opened();
        configure(&mut transport, &DeviceSettings::default(), 115200).unwrap();
        assert_eq!(
            transport.sent_addresses(),
            vec![address::COMMUNICATION, address::MISC_CONFIG, address::ZERO_GYROS]
        );
    }

    #[test]
    fn test_full_sequence_order() {
        let v = Some(Vector3Setting {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        });
        let settings = DeviceSettings {
            gps_enable: true,
            zero_gyros: false,
            mag_ref: v,
            accel_ref: v,
            mag_bias: v,
            accel_bias: v,
            gyro_bias: v,
            gps_home: v,
            ..Default::default()
        };
        let mut transport = ScriptedTransport::opened();
        configure(&mut transport, &settings, 115200).unwrap();
        assert_eq!(
            transport.sent_addresses(),
            vec![
                address::COMMUNICATION,
                address::MISC_CONFIG,
                address::MAG_REF_X,
                address::ACCEL_REF_X,
                address::MAG_BIAS_XY,
                address::ACCEL_BIAS_XY,
                address::GYRO_BIAS_XY,
                address::GPS_HOME_LAT,
            ]
        );

        let mag_ref = &transport.sent[2];
        assert_eq!(mag_ref.register_count(), 3);
        assert_eq!(&mag_ref.data[4..8], &2.0f32.to_be_bytes());

        let gyro_bias = &transport.sent[6];
        assert_eq!(gyro_bias.register_count(), 2);
        assert_eq!(&gyro_bias.data[..4], &[0, 1, 0, 2]);
    }

    #[test]
    fn test_gps_home_skipped_without_gps() {
        let settings = DeviceSettings {
            zero_gyros: false,
            gps_home: Some(Vector3Setting {
                x: 1.0,
                y: 2.0,
                z: 3.0,
            }),
            ..Default::default()
        };
        let mut transport = ScriptedTransport::opened();
        configure(&mut transport, &settings, 115200).unwrap();
        assert!(!transport.sent_addresses().contains(&address::GPS_HOME_LAT));
    }

    #[test]
    fn test_rejection_aborts_sequence() {
        let mut transport = ScriptedTransport::opened();
        transport.nack(address::MISC_CONFIG);
        let err = configure(&mut transport, &DeviceSettings::default(), 115200).unwrap_err();
        assert!(matches!(err, BridgeError::ConfigurationRejected(_)));
        assert_eq!(
            transport.sent_addresses(),
            vec![address::COMMUNICATION, address::MISC_CONFIG]
        );
    }

    #[test]
    fn test_vector_write_rejected() {
        let mut transport = ScriptedTransport::opened();
        transport.nack(address::ACCEL_REF_X);
        let mut registers = Registers::new();
        let value = Vector3Setting {
            x: 0.0,
            y: 0.0,
            z: -1.0,
        };
        assert!(matches!(
            configure_vector3(
                &mut transport,
                &mut registers,
                &fields::ACCEL_REF,
                Some(&value),
                "accelerometer reference vector"
            ),
            Err(BridgeError::ConfigurationRejected(_))
        ));
    }

    #[test]
    fn test_vector_requires_three_fields() {
        let mut transport = ScriptedTransport::opened();
        let mut registers = Registers::new();
        assert!(matches!(
            configure_vector3(&mut transport, &mut registers, &fields::QUAT, None, "quaternion"),
            Err(BridgeError::InvalidConfigurationValue(_))
        ));
    }
}
