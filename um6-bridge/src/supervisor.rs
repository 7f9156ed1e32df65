//! Connection supervisor: open, configure, stream, and recover.
//!
//! ```text
//! Disconnected --open--> Connected --configure--> Configured (streaming)
//!      ^                     |                          |
//!      |                     | rejected / invalid       | I/O error / timeout
//!      +----- retry delay ---+------- Faulted <---------+
//! ```
//!
//! The supervisor runs on its own thread and is the only owner of the
//! transport and the register snapshot. Device absence and removal are
//! expected: every failure closes the transport, waits the retry delay and
//! starts over. Repeated open failures log a single warning per streak.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use um6::{address, Registers, Transport};

use crate::bus::Bus;
use crate::config::{DeviceSettings, SettingsSource};
use crate::error::{BridgeError, BridgeResult};
use crate::publisher::TelemetryPublisher;
use crate::reset::ResetService;
use crate::sequencer;

/// Longest single sleep while waiting out the retry delay.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Transport open, configuration in progress.
    Connected,
    /// Configured and streaming telemetry.
    Configured,
    /// Last connection ended in an error; waiting to retry.
    Faulted,
}

/// Tracks a run of consecutive failures so only the first is reported loudly.
#[derive(Debug, Default, Clone)]
pub struct FailureStreak {
    count: usize,
}

impl FailureStreak {
    /// Record a failure. Returns `true` if it starts a new streak.
    pub fn record(&mut self) -> bool {
        self.count += 1;
        self.count == 1
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Snapshot of supervisor state published on a watch channel.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub state: ConnectionState,
    pub endpoint: String,
    pub gps_enabled: bool,
    pub connections: u64,
    pub open_failures: u64,
    /// Runs of consecutive open failures; one warning is logged per run.
    pub open_failure_streaks: u64,
    pub configuration_failures: u64,
    pub connection_losses: u64,
    pub packets: u64,
    pub publishes: u64,
    pub resets_served: u64,
    pub last_error: Option<String>,
}

impl SupervisorStatus {
    /// Disconnected, with all counters zero.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            endpoint: endpoint.into(),
            gps_enabled: false,
            connections: 0,
            open_failures: 0,
            open_failure_streaks: 0,
            configuration_failures: 0,
            connection_losses: 0,
            packets: 0,
            publishes: 0,
            resets_served: 0,
            last_error: None,
        }
    }
}

/// How one top-level iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    OpenFailed,
    ConfigurationFailed,
    ConnectionLost,
    Shutdown,
}

/// Fixed supervisor parameters.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub frame_id: String,
    /// Baud rate programmed into the device's COMMUNICATION register.
    pub serial_baud: u32,
    pub retry_delay: Duration,
}

pub struct Supervisor<T: Transport> {
    transport: T,
    settings: Box<dyn SettingsSource>,
    bus: Arc<Bus>,
    resets: ResetService,
    config: SupervisorConfig,
    registers: Registers,
    open_failures: FailureStreak,
    shutdown: Arc<AtomicBool>,
    status_tx: watch::Sender<SupervisorStatus>,
}

impl<T: Transport> Supervisor<T> {
    pub fn new(
        transport: T,
        settings: impl SettingsSource + 'static,
        bus: Arc<Bus>,
        resets: ResetService,
        config: SupervisorConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(SupervisorStatus::new(transport.describe()));
        Self {
            transport,
            settings: Box::new(settings),
            bus,
            resets,
            config,
            registers: Registers::new(),
            open_failures: FailureStreak::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
            status_tx,
        }
    }

    /// Flag that stops [`run`](Self::run) when set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status_tx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status_tx.borrow().state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Latest register values received from the device.
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        self.status_tx.send_modify(|s| s.state = state);
    }

    /// Loop until shutdown is requested.
    pub fn run(&mut self) {
        info!("Supervising UM6 on {}", self.transport.describe());
        while self.step() != StepOutcome::Shutdown {}
        self.set_state(ConnectionState::Disconnected);
        info!("Supervisor stopped");
    }

    /// One connection attempt, from open through to its end.
    pub fn step(&mut self) -> StepOutcome {
        if self.is_shutdown() {
            return StepOutcome::Shutdown;
        }
        self.resets.reject_pending();
        self.set_state(ConnectionState::Disconnected);

        if let Err(e) = self.transport.open() {
            let e = BridgeError::from(e);
            let new_streak = self.open_failures.record();
            if new_streak {
                warn!("{e}. Will keep retrying every {:?}.", self.config.retry_delay);
            } else {
                debug!("Open attempt {} failed: {e}", self.open_failures.len());
            }
            self.status_tx.send_modify(|s| {
                s.open_failures += 1;
                s.open_failure_streaks += u64::from(new_streak);
                s.last_error = Some(e.to_string());
            });
            self.wait_retry();
            return StepOutcome::OpenFailed;
        }
        self.open_failures.reset();
        info!("Connected to {}", self.transport.describe());
        self.status_tx.send_modify(|s| {
            s.state = ConnectionState::Connected;
            s.connections += 1;
        });

        let publisher = match self.configure() {
            Ok(publisher) => publisher,
            Err(e) => {
                error!("Configuration failed: {e}");
                self.fault(e, |s| s.configuration_failures += 1);
                return StepOutcome::ConfigurationFailed;
            }
        };

        match self.stream(&publisher) {
            Ok(()) => {
                self.transport.close();
                StepOutcome::Shutdown
            }
            Err(e) => {
                error!("Connection lost: {e}");
                self.fault(e, |s| s.connection_losses += 1);
                StepOutcome::ConnectionLost
            }
        }
    }

    /// Load settings, push them to the device and build this connection's publisher.
    fn configure(&mut self) -> BridgeResult<TelemetryPublisher> {
        let settings: DeviceSettings = self.settings.load()?;
        sequencer::configure(&mut self.transport, &settings, self.config.serial_baud)?;
        let publisher = TelemetryPublisher::new(&self.bus, &self.config.frame_id, &settings)?;
        self.status_tx
            .send_modify(|s| s.gps_enabled = publisher.gps_enabled());
        Ok(publisher)
    }

    /// Receive until an error or shutdown. Returns `Ok` only on shutdown.
    fn stream(&mut self, publisher: &TelemetryPublisher) -> BridgeResult<()> {
        let _advertisement = self.resets.advertise();
        self.set_state(ConnectionState::Configured);

        let mut packets = 0u64;
        loop {
            if self.is_shutdown() {
                return Ok(());
            }

            let served = self.resets.serve(&mut self.transport)?;
            if served > 0 {
                self.status_tx
                    .send_modify(|s| s.resets_served += served as u64);
            }

            let received = self.transport.receive(&mut self.registers)?;
            packets += 1;
            if received == address::TEMPERATURE {
                publisher.publish(&self.registers);
                self.status_tx.send_modify(|s| {
                    s.packets += packets;
                    s.publishes += 1;
                });
                packets = 0;
            }
        }
    }

    fn fault(&mut self, e: BridgeError, count: impl FnOnce(&mut SupervisorStatus)) {
        self.transport.close();
        self.status_tx.send_modify(|s| {
            s.state = ConnectionState::Faulted;
            s.last_error = Some(e.to_string());
            count(s);
        });
        self.wait_retry();
    }

    /// Sleep the retry delay in short slices so shutdown stays responsive.
    fn wait_retry(&self) {
        let deadline = Instant::now() + self.config.retry_delay;
        loop {
            self.resets.reject_pending();
            let now = Instant::now();
            if self.is_shutdown() || now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }
}
