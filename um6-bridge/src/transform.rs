//! Conversion of UM6 register values into published messages.
//!
//! The UM6 reports in north-east-down. Published messages use east-north-up,
//! which swaps the first two axes and negates the third.

use um6::{fields, GpsSummary, Registers};

use crate::messages::{
    Header, Imu, Odometry, Pose, PoseWithCovariance, Quaternion, Twist, TwistWithCovariance,
    Vector3,
};

/// Device covariance cells (4x4 over w,x,y,z) forming the 3x3 x,y,z block.
pub const ORIENTATION_COVARIANCE_CELLS: [usize; 9] = [5, 6, 7, 9, 10, 11, 13, 14, 15];

/// Covariance marking an odometry axis as unknown.
pub const UNKNOWN_COVARIANCE: f64 = 999999.0;

/// Multiplier turning the raw GPS course into radians.
pub const GPS_COURSE_SCALE: f64 = 0.0314159265;

/// Raw GPS speed units (cm/s) per m/s.
pub const GPS_SPEED_DIVISOR: f64 = 100.0;

/// Child frame of synthesized GPS odometry.
pub const ODOMETRY_CHILD_FRAME: &str = "base";

/// `[w, x, y, z]` NED quaternion to ENU.
pub fn enu_quaternion(wxyz: [f64; 4]) -> Quaternion {
    Quaternion {
        x: wxyz[2],
        y: wxyz[1],
        z: -wxyz[3],
        w: wxyz[0],
    }
}

/// NED vector to ENU.
pub fn enu_vector(ned: [f64; 3]) -> Vector3 {
    Vector3 {
        x: ned[1],
        y: ned[0],
        z: -ned[2],
    }
}

/// Extract the row-major 3x3 orientation covariance from the 4x4 device matrix.
pub fn orientation_covariance(device: &[f64; 16]) -> [f64; 9] {
    ORIENTATION_COVARIANCE_CELLS.map(|cell| device[cell])
}

/// Dilution of precision as (hdop, hdop, vdop).
pub fn dop_vector(summary: &GpsSummary) -> Vector3 {
    let hdop = f64::from(summary.hdop);
    let vdop = f64::from(summary.vdop);
    Vector3::new(hdop, hdop, vdop)
}

/// Combined position dilution of precision.
pub fn position_dop(summary: &GpsSummary) -> f64 {
    let hdop = f64::from(summary.hdop);
    let vdop = f64::from(summary.vdop);
    (hdop * hdop + vdop * vdop).sqrt()
}

/// Planar velocity from raw GPS course and speed.
pub fn gps_velocity(course_raw: u16, speed_raw: u16) -> Vector3 {
    let course = f64::from(course_raw) * GPS_COURSE_SCALE;
    let speed = f64::from(speed_raw) / GPS_SPEED_DIVISOR;
    Vector3::new(speed * course.cos(), speed * course.sin(), 0.0)
}

/// Odometry from a GPS fix, usable by pose fusion that ignores orientation.
pub fn gps_odometry(
    header: Header,
    position: Vector3,
    summary: &GpsSummary,
    course_raw: u16,
    speed_raw: u16,
) -> Odometry {
    let pdop = position_dop(summary);

    let mut pose_covariance = [0.0; 36];
    let mut twist_covariance = [0.0; 36];
    for axis in 0..6 {
        let diagonal = axis * 7;
        pose_covariance[diagonal] = if axis < 3 { pdop } else { UNKNOWN_COVARIANCE };
        twist_covariance[diagonal] = UNKNOWN_COVARIANCE;
    }

    Odometry {
        header,
        child_frame_id: ODOMETRY_CHILD_FRAME.to_string(),
        pose: PoseWithCovariance {
            pose: Pose {
                position,
                orientation: Quaternion::IDENTITY,
            },
            covariance: pose_covariance,
        },
        twist: TwistWithCovariance {
            twist: Twist {
                linear: gps_velocity(course_raw, speed_raw),
                angular: Vector3::default(),
            },
            covariance: twist_covariance,
        },
    }
}

fn scaled3(accessor: &um6::Accessor<i16>, registers: &Registers) -> [f64; 3] {
    [0, 1, 2].map(|i| accessor.get_scaled(registers, i))
}

fn raw_f32x3(accessor: &um6::Accessor<f32>, registers: &Registers) -> [f64; 3] {
    [0, 1, 2].map(|i| f64::from(accessor.get(registers, i)))
}

/// IMU message from the current register snapshot.
pub fn imu_message(header: Header, registers: &Registers) -> Imu {
    let quat = [0, 1, 2, 3].map(|i| fields::QUAT.get_scaled(registers, i));
    let covariance: [f64; 16] =
        std::array::from_fn(|i| fields::COVARIANCE.get_scaled(registers, i));

    Imu {
        header,
        orientation: enu_quaternion(quat),
        orientation_covariance: orientation_covariance(&covariance),
        angular_velocity: enu_vector(scaled3(&fields::GYRO, registers)),
        angular_velocity_covariance: [0.0; 9],
        linear_acceleration: enu_vector(scaled3(&fields::ACCEL, registers)),
        linear_acceleration_covariance: [0.0; 9],
    }
}

pub fn magnetic_field(registers: &Registers) -> Vector3 {
    enu_vector(scaled3(&fields::MAG, registers))
}

/// Roll, pitch, yaw in ENU.
pub fn roll_pitch_yaw(registers: &Registers) -> Vector3 {
    enu_vector(scaled3(&fields::EULER, registers))
}

pub fn temperature(registers: &Registers) -> f32 {
    fields::TEMPERATURE.get_scaled(registers, 0) as f32
}

/// Longitude, latitude, altitude.
pub fn gps_absolute(registers: &Registers) -> Vector3 {
    let [x, y, z] = raw_f32x3(&fields::GPS_ABS, registers);
    Vector3::new(x, y, z)
}

/// North, east, height relative to the GPS home position.
pub fn gps_relative(registers: &Registers) -> Vector3 {
    let [x, y, z] = raw_f32x3(&fields::GPS_REL, registers);
    Vector3::new(x, y, z)
}

pub fn gps_summary(registers: &Registers) -> GpsSummary {
    GpsSummary::from_word(fields::GPS_SAT_SUMMARY.get(registers, 0))
}

/// Raw (course, speed) pair.
pub fn gps_course_speed(registers: &Registers) -> (u16, u16) {
    (
        fields::GPS_COURSE_SPEED.get(registers, 0),
        fields::GPS_COURSE_SPEED.get(registers, 1),
    )
}
