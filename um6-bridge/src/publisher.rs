//! Per-connection telemetry publisher.
//!
//! Built once a connection is configured, holding a handle to every topic it
//! may publish on. [`TelemetryPublisher::publish`] runs once per broadcast
//! group; each message is only constructed if its topic has subscribers.

use tracing::trace;
use um6::Registers;

use crate::bus::{Bus, Topic};
use crate::config::DeviceSettings;
use crate::error::BridgeResult;
use crate::messages::{Float32Stamped, Header, Imu, Odometry, UInt8Stamped, Vector3Stamped};
use crate::transform;

/// Topic names.
pub mod topics {
    pub const IMU: &str = "imu/data";
    pub const MAG: &str = "imu/mag";
    pub const RPY: &str = "imu/rpy";
    pub const TEMPERATURE: &str = "imu/temperature";
    pub const GPS_ABS: &str = "imu/gps_abs";
    pub const GPS_REL: &str = "imu/gps_rel";
    pub const GPS_NUM_SAT: &str = "imu/gps_num_sat";
    pub const GPS_DOP: &str = "imu/gps_dop";
    /// 0 no GPS, 1 no fix, 2 2D fix, 3 3D fix
    pub const GPS_STATUS: &str = "imu/gps_status";
}

/// Topics that exist only while GPS is enabled.
pub struct GpsTopics {
    abs: Topic<Vector3Stamped>,
    rel: Topic<Vector3Stamped>,
    num_sat: Topic<UInt8Stamped>,
    dop: Topic<Vector3Stamped>,
    status: Topic<UInt8Stamped>,
    odometry: Option<Topic<Odometry>>,
}

impl GpsTopics {
    fn new(bus: &Bus, odometry_topic: Option<&str>) -> BridgeResult<Self> {
        Ok(Self {
            abs: bus.topic(topics::GPS_ABS)?,
            rel: bus.topic(topics::GPS_REL)?,
            num_sat: bus.topic(topics::GPS_NUM_SAT)?,
            dop: bus.topic(topics::GPS_DOP)?,
            status: bus.topic(topics::GPS_STATUS)?,
            odometry: odometry_topic.map(|name| bus.topic(name)).transpose()?,
        })
    }

    fn publish(&self, header: &Header, registers: &Registers) -> usize {
        let summary = transform::gps_summary(registers);
        let stamped = |vector| Vector3Stamped {
            header: header.clone(),
            vector,
        };
        let byte = |data| UInt8Stamped {
            header: header.clone(),
            data,
        };

        let mut published = [
            self.status.publish_with(|| byte(summary.mode)),
            self.abs
                .publish_with(|| stamped(transform::gps_absolute(registers))),
            self.rel
                .publish_with(|| stamped(transform::gps_relative(registers))),
            self.dop
                .publish_with(|| stamped(transform::dop_vector(&summary))),
            self.num_sat.publish_with(|| byte(summary.satellites)),
        ]
        .into_iter()
        .filter(|&p| p)
        .count();

        if let Some(odometry) = &self.odometry {
            let sent = odometry.publish_with(|| {
                let (course, speed) = transform::gps_course_speed(registers);
                transform::gps_odometry(
                    header.clone(),
                    transform::gps_absolute(registers),
                    &summary,
                    course,
                    speed,
                )
            });
            published += usize::from(sent);
        }
        published
    }
}

/// Publishes one broadcast group's worth of messages.
pub struct TelemetryPublisher {
    frame_id: String,
    imu: Topic<Imu>,
    mag: Topic<Vector3Stamped>,
    rpy: Topic<Vector3Stamped>,
    temperature: Topic<Float32Stamped>,
    gps: Option<GpsTopics>,
}

impl TelemetryPublisher {
    /// Advertise the topics this connection's settings call for.
    ///
    /// # Errors
    /// Fails if a topic name, typically the odometry topic, is already in use
    /// with a different message type.
    pub fn new(bus: &Bus, frame_id: &str, settings: &DeviceSettings) -> BridgeResult<Self> {
        let gps = if settings.gps_enable {
            Some(GpsTopics::new(bus, settings.odometry_topic())?)
        } else {
            None
        };

        Ok(Self {
            frame_id: frame_id.to_string(),
            imu: bus.topic(topics::IMU)?,
            mag: bus.topic(topics::MAG)?,
            rpy: bus.topic(topics::RPY)?,
            temperature: bus.topic(topics::TEMPERATURE)?,
            gps,
        })
    }

    pub fn gps_enabled(&self) -> bool {
        self.gps.is_some()
    }

    /// Publish every subscribed topic from the register snapshot.
    ///
    /// Returns the number of messages built and sent.
    pub fn publish(&self, registers: &Registers) -> usize {
        let header = Header::now(self.frame_id.as_str());

        let mut published = [
            self.imu
                .publish_with(|| transform::imu_message(header.clone(), registers)),
            self.mag.publish_with(|| Vector3Stamped {
                header: header.clone(),
                vector: transform::magnetic_field(registers),
            }),
            self.rpy.publish_with(|| Vector3Stamped {
                header: header.clone(),
                vector: transform::roll_pitch_yaw(registers),
            }),
            self.temperature.publish_with(|| Float32Stamped {
                header: header.clone(),
                data: transform::temperature(registers),
            }),
        ]
        .into_iter()
        .filter(|&p| p)
        .count();

        if let Some(gps) = &self.gps {
            published += gps.publish(&header, registers);
        }

        trace!("Published {published} message(s)");
        published
    }
}
