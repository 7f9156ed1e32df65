//! UM6 driver: supervise the sensor and serve its telemetry over HTTP.
//!
//! ```text
//! um6_driver --port /dev/ttyUSB0 --settings um6.json --listen 0.0.0.0:8686
//! um6_driver --mock
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use um6::{SimulatedDevice, Transport};
use um6_bridge::server::{self, AppState};
use um6_bridge::{
    reset_channel, Bus, ConnectionArgs, FileSettings, ResetService, SettingsSource,
    StaticSettings, Supervisor, SupervisorConfig, SupervisorStatus,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "UM6 orientation sensor driver and telemetry bridge")]
struct Args {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// JSON device settings, re-read on every connection
    #[arg(long)]
    settings: Option<PathBuf>,

    /// HTTP bind address
    #[arg(long, default_value = "127.0.0.1:8686")]
    listen: SocketAddr,

    /// Use a simulated UM6 instead of a serial port
    #[arg(long)]
    mock: bool,

    /// Broadcast rate of the simulated UM6 in Hz
    #[arg(long, default_value = "20")]
    mock_rate_hz: f64,
}

struct Running {
    supervisor: thread::JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    status: watch::Receiver<SupervisorStatus>,
}

fn spawn_supervisor<T: Transport + 'static>(
    transport: T,
    settings: Box<dyn SettingsSource>,
    bus: Arc<Bus>,
    resets: ResetService,
    config: SupervisorConfig,
) -> Result<Running> {
    let mut supervisor = Supervisor::new(transport, settings, bus, resets, config);
    let shutdown = supervisor.shutdown_handle();
    let status = supervisor.subscribe_status();
    let handle = thread::Builder::new()
        .name("um6-supervisor".to_string())
        .spawn(move || supervisor.run())
        .context("Failed to spawn supervisor thread")?;
    Ok(Running {
        supervisor: handle,
        shutdown,
        status,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let settings: Box<dyn SettingsSource> = match &args.settings {
        Some(path) => {
            info!("Loading device settings from {}", path.display());
            Box::new(FileSettings::new(path))
        }
        None => Box::new(StaticSettings::default()),
    };

    let bus = Arc::new(Bus::default());
    let (resets, reset_client) = reset_channel();
    let config = SupervisorConfig {
        frame_id: args.connection.frame_id.clone(),
        serial_baud: args.connection.baud,
        retry_delay: args.connection.retry_delay(),
    };

    let running = if args.mock {
        info!("Using simulated UM6 at {} Hz", args.mock_rate_hz);
        let device = SimulatedDevice::new().with_rate(args.mock_rate_hz);
        let transport = um6::SimTransport::simulated(device);
        spawn_supervisor(transport, settings, Arc::clone(&bus), resets, config)?
    } else {
        serial_supervisor(&args.connection, settings, Arc::clone(&bus), resets, config)?
    };

    let state = AppState {
        bus,
        resets: reset_client,
        status: running.status.clone(),
    };
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;

    let shutdown = Arc::clone(&running.shutdown);
    server::serve(listener, state, async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
        shutdown.store(true, Ordering::SeqCst);
    })
    .await?;

    running.shutdown.store(true, Ordering::SeqCst);
    let supervisor = running.supervisor;
    tokio::task::spawn_blocking(move || supervisor.join())
        .await?
        .map_err(|_| anyhow::anyhow!("Supervisor thread panicked"))?;
    Ok(())
}

#[cfg(feature = "serial")]
fn serial_supervisor(
    connection: &ConnectionArgs,
    settings: Box<dyn SettingsSource>,
    bus: Arc<Bus>,
    resets: ResetService,
    config: SupervisorConfig,
) -> Result<Running> {
    let transport = um6::SerialTransport::serial(
        &connection.port,
        connection.baud,
        connection.read_timeout(),
    );
    spawn_supervisor(transport, settings, bus, resets, config)
}

#[cfg(not(feature = "serial"))]
fn serial_supervisor(
    _connection: &ConnectionArgs,
    _settings: Box<dyn SettingsSource>,
    _bus: Arc<Bus>,
    _resets: ResetService,
    _config: SupervisorConfig,
) -> Result<Running> {
    anyhow::bail!("Built without serial support; run with --mock")
}
