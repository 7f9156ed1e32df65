//! End-to-end supervisor runs against the simulated UM6.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use um6::{address, GpsSummary, SimTransport, SimulatedDevice};
use um6_bridge::messages::{Float32Stamped, Imu, Odometry, UInt8Stamped};
use um6_bridge::publisher::topics;
use um6_bridge::{
    reset_channel, Bus, ConnectionState, DeviceSettings, ResetClient, ResetRequest,
    ResetResponse, StaticSettings, StepOutcome, Supervisor, SupervisorConfig,
};

fn config() -> SupervisorConfig {
    SupervisorConfig {
        frame_id: "imu_link".to_string(),
        serial_baud: 115200,
        retry_delay: Duration::ZERO,
    }
}

fn supervisor(
    device: &SimulatedDevice,
    settings: DeviceSettings,
) -> (Supervisor<SimTransport>, Arc<Bus>, ResetClient) {
    let bus = Arc::new(Bus::default());
    let (service, client) = reset_channel();
    let supervisor = Supervisor::new(
        SimTransport::simulated(device.clone()),
        StaticSettings(settings),
        Arc::clone(&bus),
        service,
        config(),
    );
    (supervisor, bus, client)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_configures_then_streams_until_unplugged() {
    let device = SimulatedDevice::new();
    device.disconnect_after(3);
    let (mut supervisor, bus, _client) = supervisor(&device, DeviceSettings::default());

    let mut temperature = bus
        .topic::<Float32Stamped>(topics::TEMPERATURE)
        .unwrap()
        .subscribe();
    let mut imu = bus.topic::<Imu>(topics::IMU).unwrap().subscribe();

    assert_eq!(supervisor.step(), StepOutcome::ConnectionLost);

    let received = device.received();
    assert_eq!(&received[..2], &[address::COMMUNICATION, address::MISC_CONFIG]);
    assert!(received.contains(&address::ZERO_GYROS));

    for _ in 0..3 {
        let message = temperature.try_recv().unwrap();
        assert_eq!(message.data, 25.0);
        assert_eq!(message.header.frame_id, "imu_link");
    }
    assert!(temperature.try_recv().is_err());

    let message = imu.try_recv().unwrap();
    assert_abs_diff_eq!(message.orientation.w, 1.0, epsilon = 1e-4);
    assert_abs_diff_eq!(message.orientation.z, 0.0);

    let status = supervisor.status();
    assert_eq!(status.publishes, 3);
    assert_eq!(status.connection_losses, 1);
    assert_eq!(status.state, ConnectionState::Faulted);
}

#[test]
fn test_rejected_register_prevents_streaming() {
    let device = SimulatedDevice::new();
    device.reject(address::MISC_CONFIG);
    let (mut supervisor, bus, client) = supervisor(&device, DeviceSettings::default());
    let mut temperature = bus
        .topic::<Float32Stamped>(topics::TEMPERATURE)
        .unwrap()
        .subscribe();

    assert_eq!(supervisor.step(), StepOutcome::ConfigurationFailed);
    assert!(!device.received().contains(&address::ZERO_GYROS));
    assert!(temperature.try_recv().is_err());
    assert!(!client.is_available());

    let status = supervisor.status();
    assert_eq!(status.configuration_failures, 1);
    assert_eq!(status.publishes, 0);
    assert!(status.last_error.is_some());
}

#[test]
fn test_reconnects_and_reconfigures_after_loss() {
    let device = SimulatedDevice::new();
    let (mut supervisor, _bus, _client) = supervisor(&device, DeviceSettings::default());

    device.disconnect_after(1);
    assert_eq!(supervisor.step(), StepOutcome::ConnectionLost);
    device.disconnect_after(1);
    assert_eq!(supervisor.step(), StepOutcome::ConnectionLost);

    assert_eq!(device.open_attempts(), 2);
    let configured = device
        .received()
        .iter()
        .filter(|&&a| a == address::COMMUNICATION)
        .count();
    assert_eq!(configured, 2);

    let status = supervisor.status();
    assert_eq!(status.connections, 2);
    assert_eq!(status.connection_losses, 2);
}

#[test]
fn test_waits_for_absent_device() {
    let device = SimulatedDevice::new();
    device.set_present(false);
    let (mut supervisor, _bus, _client) = supervisor(&device, DeviceSettings::default());

    assert_eq!(supervisor.step(), StepOutcome::OpenFailed);
    assert_eq!(supervisor.step(), StepOutcome::OpenFailed);
    assert!(device.received().is_empty());

    device.set_present(true);
    device.disconnect_after(1);
    assert_eq!(supervisor.step(), StepOutcome::ConnectionLost);

    let status = supervisor.status();
    assert_eq!(status.open_failures, 2);
    assert_eq!(status.connections, 1);
}

#[test]
fn test_gps_topics_and_odometry() {
    let device = SimulatedDevice::new();
    device.set_gps_summary(GpsSummary {
        mode: 3,
        satellites: 7,
        hdop: 120,
        vdop: 160,
    });
    device.disconnect_after(1);
    let settings = DeviceSettings {
        gps_enable: true,
        gps_odom: Some("gps/odom".to_string()),
        ..Default::default()
    };
    let (mut supervisor, bus, _client) = supervisor(&device, settings);

    let mut status = bus
        .topic::<UInt8Stamped>(topics::GPS_STATUS)
        .unwrap()
        .subscribe();
    let mut satellites = bus
        .topic::<UInt8Stamped>(topics::GPS_NUM_SAT)
        .unwrap()
        .subscribe();
    let mut odometry = bus.topic::<Odometry>("gps/odom").unwrap().subscribe();

    assert_eq!(supervisor.step(), StepOutcome::ConnectionLost);
    assert!(supervisor.status().gps_enabled);

    assert_eq!(status.try_recv().unwrap().data, 3);
    assert_eq!(satellites.try_recv().unwrap().data, 7);
    let odom = odometry.try_recv().unwrap();
    assert_eq!(odom.child_frame_id, "base");
    assert_eq!(odom.header.frame_id, "imu_link");
}

#[test]
fn test_odometry_topic_clash_fails_configuration() {
    let device = SimulatedDevice::new();
    let settings = DeviceSettings {
        gps_enable: true,
        gps_odom: Some(topics::TEMPERATURE.to_string()),
        ..Default::default()
    };
    let (mut supervisor, bus, _client) = supervisor(&device, settings);
    bus.topic::<Float32Stamped>(topics::TEMPERATURE).unwrap();

    assert_eq!(supervisor.step(), StepOutcome::ConfigurationFailed);
    assert_eq!(device.cycles(), 0);
}

#[test]
fn test_reset_served_while_streaming() {
    let device = SimulatedDevice::new().with_rate(200.0);
    device.reject(address::SET_ACCEL_REF);
    let (mut supervisor, _bus, client) = supervisor(&device, DeviceSettings::default());
    let shutdown = supervisor.shutdown_handle();
    let status = supervisor.subscribe_status();

    let handle = thread::spawn(move || {
        supervisor.run();
        supervisor
    });
    assert!(wait_until(Duration::from_secs(5), || client.is_available()));

    let response = client.request_blocking(ResetRequest {
        zero_gyros: true,
        reset_ekf: true,
        ..Default::default()
    });
    assert_eq!(response, ResetResponse::Ok);

    let response = client.request_blocking(ResetRequest {
        set_accel_ref: true,
        ..Default::default()
    });
    assert!(matches!(response, ResetResponse::CommandFailure { .. }));

    // A rejected command does not cost the connection.
    assert!(client.is_available());
    assert_eq!(status.borrow().state, ConnectionState::Configured);

    shutdown.store(true, Ordering::SeqCst);
    let supervisor = handle.join().unwrap();

    assert!(device.received().contains(&address::RESET_EKF));
    let status = supervisor.status();
    assert_eq!(status.resets_served, 2);
    assert_eq!(status.connection_losses, 0);
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(!client.is_available());
}
