//! Message types published on the topic bus.
//!
//! Shapes follow the usual robotics conventions (stamped vectors, IMU with
//! row-major 3x3 covariances, odometry with 6x6 covariances) and serialize to
//! JSON for the HTTP event streams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp and coordinate frame shared by every message of one publish pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
}

impl Header {
    pub fn now(frame_id: impl Into<String>) -> Self {
        Self {
            stamp: Utc::now(),
            frame_id: frame_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Inertial measurement in the east-north-up frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Imu {
    pub header: Header,
    pub orientation: Quaternion,
    /// Row-major 3x3
    pub orientation_covariance: [f64; 9],
    pub angular_velocity: Vector3,
    pub angular_velocity_covariance: [f64; 9],
    pub linear_acceleration: Vector3,
    pub linear_acceleration_covariance: [f64; 9],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector3Stamped {
    pub header: Header,
    pub vector: Vector3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Float32Stamped {
    pub header: Header,
    pub data: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UInt8Stamped {
    pub header: Header,
    pub data: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3,
    pub orientation: Quaternion,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseWithCovariance {
    pub pose: Pose,
    /// Row-major 6x6 over (x, y, z, roll, pitch, yaw)
    #[serde(with = "matrix6")]
    pub covariance: [f64; 36],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwistWithCovariance {
    pub twist: Twist,
    /// Row-major 6x6 over (vx, vy, vz, wx, wy, wz)
    #[serde(with = "matrix6")]
    pub covariance: [f64; 36],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Odometry {
    pub header: Header,
    pub child_frame_id: String,
    pub pose: PoseWithCovariance,
    pub twist: TwistWithCovariance,
}

/// serde only derives fixed arrays up to 32 elements.
mod matrix6 {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &[f64; 36], serializer: S) -> Result<S::Ok, S::Error> {
        value.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[f64; 36], D::Error> {
        let values = Vec::<f64>::deserialize(deserializer)?;
        let len = values.len();
        values
            .try_into()
            .map_err(|_| D::Error::invalid_length(len, &"36 covariance entries"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odometry_covariance_serializes_as_flat_list() {
        let mut covariance = [0.0; 36];
        covariance[0] = 2.5;
        let odom = Odometry {
            header: Header::now("imu_link"),
            child_frame_id: "base".to_string(),
            pose: PoseWithCovariance {
                pose: Pose::default(),
                covariance,
            },
            twist: TwistWithCovariance {
                twist: Twist::default(),
                covariance: [0.0; 36],
            },
        };

        let json = serde_json::to_value(&odom).unwrap();
        let cov = json["pose"]["covariance"].as_array().unwrap();
        assert_eq!(cov.len(), 36);
        assert_eq!(cov[0], 2.5);
        assert_eq!(json["pose"]["pose"]["orientation"]["w"], 1.0);

        let back: Odometry = serde_json::from_value(json).unwrap();
        assert_eq!(back, odom);
    }

    #[test]
    fn test_short_covariance_rejected() {
        let json = serde_json::json!({
            "pose": {"position": {"x": 0.0, "y": 0.0, "z": 0.0},
                     "orientation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}},
            "covariance": [1.0, 2.0]
        });
        assert!(serde_json::from_value::<PoseWithCovariance>(json).is_err());
    }
}
