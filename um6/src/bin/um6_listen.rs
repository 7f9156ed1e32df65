//! Dump the raw UM6 packet stream.
//!
//! Opens the serial port, optionally turns on broadcast output, and prints
//! every packet as it arrives. Useful for checking wiring and baud rate
//! before running the full driver.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{info, warn};
use um6::registers::{baud_code, COMM_BAUD_START_BIT};
use um6::{fields, CommunicationFlags, Registers, SerialTransport, Transport, Um6Error};

/// UM6 raw packet listener
#[derive(Parser, Debug)]
#[command(name = "um6_listen")]
#[command(about = "Print packets received from a UM6 orientation sensor")]
#[command(version)]
struct Args {
    /// Serial port path
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Read timeout in milliseconds
    #[arg(long, default_value = "500")]
    timeout_ms: u64,

    /// Enable broadcast of processed data before listening
    #[arg(long)]
    enable_broadcast: bool,

    /// Stop after this many packets (0 = run forever)
    #[arg(short, long, default_value = "0")]
    count: u64,

    /// Print decoded values of known data registers
    #[arg(short, long)]
    decode: bool,
}

fn enable_broadcast(transport: &mut SerialTransport, baud: u32) -> Result<()> {
    let Some(code) = baud_code(baud) else {
        bail!("Baud rate {baud} has no UM6 code");
    };

    let flags = CommunicationFlags::BROADCAST
        | CommunicationFlags::GYROS_PROC
        | CommunicationFlags::ACCELS_PROC
        | CommunicationFlags::MAG_PROC
        | CommunicationFlags::QUAT
        | CommunicationFlags::EULER
        | CommunicationFlags::COV
        | CommunicationFlags::TEMPERATURE;

    let mut registers = Registers::new();
    fields::COMMUNICATION.set(
        &mut registers,
        0,
        flags.bits() | (code << COMM_BAUD_START_BIT),
    );
    let packet = fields::COMMUNICATION.write_packet(&registers)?;
    if !transport.send_wait_ack(&packet)? {
        bail!("Device did not acknowledge COMMUNICATION register write");
    }
    info!("Broadcast enabled");
    Ok(())
}

fn print_decoded(address: u8, registers: &Registers) {
    use um6::address as addr;

    match address {
        addr::QUAT_AB => println!(
            "  quat     w={:+.4} x={:+.4} y={:+.4} z={:+.4}",
            fields::QUAT.get_scaled(registers, 0),
            fields::QUAT.get_scaled(registers, 1),
            fields::QUAT.get_scaled(registers, 2),
            fields::QUAT.get_scaled(registers, 3),
        ),
        addr::EULER_PHI_THETA => println!(
            "  euler    roll={:+.4} pitch={:+.4} yaw={:+.4} rad",
            fields::EULER.get_scaled(registers, 0),
            fields::EULER.get_scaled(registers, 1),
            fields::EULER.get_scaled(registers, 2),
        ),
        addr::GYRO_PROC_XY => println!(
            "  gyro     {:+.4} {:+.4} {:+.4} rad/s",
            fields::GYRO.get_scaled(registers, 0),
            fields::GYRO.get_scaled(registers, 1),
            fields::GYRO.get_scaled(registers, 2),
        ),
        addr::ACCEL_PROC_XY => println!(
            "  accel    {:+.4} {:+.4} {:+.4} g",
            fields::ACCEL.get_scaled(registers, 0),
            fields::ACCEL.get_scaled(registers, 1),
            fields::ACCEL.get_scaled(registers, 2),
        ),
        addr::TEMPERATURE => println!(
            "  temp     {:.2} C",
            fields::TEMPERATURE.get_scaled(registers, 0)
        ),
        _ => {}
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut transport = SerialTransport::serial(
        &args.port,
        args.baud,
        Duration::from_millis(args.timeout_ms),
    );
    transport.open()?;
    info!("Listening on {}", transport.describe());

    if args.enable_broadcast {
        enable_broadcast(&mut transport, args.baud)?;
    }

    let mut registers = Registers::new();
    let mut received = 0u64;
    let mut timeouts = 0u64;

    while args.count == 0 || received < args.count {
        match transport.receive(&mut registers) {
            Ok(address) => {
                received += 1;
                println!("[{received:>8}] {address:#04x}");
                if args.decode {
                    print_decoded(address, &registers);
                }
            }
            Err(Um6Error::Timeout) => {
                timeouts += 1;
                if timeouts == 1 || timeouts % 10 == 0 {
                    warn!("No packets received ({timeouts} timeouts)");
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("Received {received} packets, {timeouts} timeouts");
    Ok(())
}
