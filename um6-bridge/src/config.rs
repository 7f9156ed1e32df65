//! Command line arguments and per-connection device settings.
//!
//! Connection parameters (port, baud, timeouts) come from the command line
//! and are fixed for the life of the process. Device settings are loaded
//! from a [`SettingsSource`] at the start of every connection attempt, so a
//! settings file can be edited while the device is unplugged and the next
//! connection picks up the change.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Serial connection arguments shared by the driver binaries.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Serial port the UM6 is attached to
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub port: String,

    /// Serial baud rate (also programmed into the device)
    #[arg(long, default_value = "115200")]
    pub baud: u32,

    /// Frame id stamped on every published message
    #[arg(long, default_value = "imu_link")]
    pub frame_id: String,

    /// Serial read timeout in milliseconds; bounds every blocking receive
    #[arg(long, default_value = "500")]
    pub read_timeout_ms: u64,

    /// Delay between reconnection attempts in milliseconds
    #[arg(long, default_value = "1000")]
    pub retry_delay_ms: u64,
}

impl ConnectionArgs {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// A three-component setting. All components are required when present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Vector3Setting {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3Setting {
    pub fn components(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Device configuration applied on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Enable GPS passthrough and publication of GPS topics
    pub gps_enable: bool,
    /// Baud rate between the UM6 and its GPS receiver
    pub gps_baud: u32,
    /// Raw value of the COMMUNICATION broadcast rate field
    pub broadcast_rate: u8,
    /// Use the magnetometer in the EKF
    pub mag_updates: bool,
    /// Use the accelerometer in the EKF
    pub accel_updates: bool,
    /// Zero the gyros at startup (device must be still)
    pub zero_gyros: bool,
    pub mag_ref: Option<Vector3Setting>,
    pub accel_ref: Option<Vector3Setting>,
    pub mag_bias: Option<Vector3Setting>,
    pub accel_bias: Option<Vector3Setting>,
    pub gyro_bias: Option<Vector3Setting>,
    /// Latitude, longitude, altitude of the GPS home position
    pub gps_home: Option<Vector3Setting>,
    /// Topic for synthesized GPS odometry; none disables it
    pub gps_odom: Option<String>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            gps_enable: false,
            gps_baud: 9600,
            broadcast_rate: 0,
            mag_updates: true,
            accel_updates: true,
            zero_gyros: true,
            mag_ref: None,
            accel_ref: None,
            mag_bias: None,
            accel_bias: None,
            gyro_bias: None,
            gps_home: None,
            gps_odom: None,
        }
    }
}

impl DeviceSettings {
    /// Parse settings from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        serde_json::from_str(json).map_err(|e| BridgeError::Settings(e.to_string()))
    }

    /// Odometry topic, when GPS is enabled and a non-empty topic is configured.
    pub fn odometry_topic(&self) -> Option<&str> {
        if !self.gps_enable {
            return None;
        }
        self.gps_odom.as_deref().filter(|t| !t.is_empty())
    }
}

/// Where device settings come from.
///
/// Loaded once per connection attempt; a load failure is treated like a
/// configuration failure and the connection is retried.
pub trait SettingsSource: Send {
    fn load(&self) -> BridgeResult<DeviceSettings>;
}

impl SettingsSource for Box<dyn SettingsSource> {
    fn load(&self) -> BridgeResult<DeviceSettings> {
        (**self).load()
    }
}

/// Settings read from a JSON file on every load.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsSource for FileSettings {
    fn load(&self) -> BridgeResult<DeviceSettings> {
        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            BridgeError::Settings(format!("failed to read {}: {e}", self.path.display()))
        })?;
        DeviceSettings::from_json(&json)
    }
}

/// Fixed settings, used when no settings file is given.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub DeviceSettings);

impl SettingsSource for StaticSettings {
    fn load(&self) -> BridgeResult<DeviceSettings> {
        Ok(self.0.clone())
    }
}
