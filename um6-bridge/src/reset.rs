//! Reset service: re-zero gyros, reset the EKF, or latch references on demand.
//!
//! Requests come from the HTTP surface (or any [`ResetClient`] holder) and
//! are queued on a crossbeam channel. The supervisor thread owns the
//! transport, so it drains the queue between received packets and answers
//! each request through a oneshot channel. While no connection is streaming
//! the service is not advertised and requests are answered with
//! [`ResetResponse::Unavailable`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{info, warn};
use um6::{fields, Registers, Transport};

use crate::error::{BridgeError, BridgeResult};

/// Which commands to issue. Commands run in field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetRequest {
    pub zero_gyros: bool,
    pub reset_ekf: bool,
    pub set_mag_ref: bool,
    pub set_accel_ref: bool,
}

/// Outcome reported to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResetResponse {
    Ok,
    /// A command was not acknowledged; the connection stays up.
    CommandFailure { message: String },
    /// The transport failed mid-request; the connection is being re-established.
    TransportError { message: String },
    /// No configured connection to serve the request.
    Unavailable,
}

impl ResetResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Issue the requested commands in order, each acknowledged.
///
/// # Errors
/// [`BridgeError::CommandFailure`] on the first unacknowledged command;
/// transport errors pass through.
pub fn handle_reset<T: Transport + ?Sized>(
    transport: &mut T,
    request: &ResetRequest,
) -> BridgeResult<()> {
    let registers = Registers::new();
    let commands = [
        (request.zero_gyros, &fields::CMD_ZERO_GYROS, "zero gyroscopes"),
        (request.reset_ekf, &fields::CMD_RESET_EKF, "reset EKF"),
        (request.set_mag_ref, &fields::CMD_SET_MAG_REF, "set magnetometer reference"),
        (request.set_accel_ref, &fields::CMD_SET_ACCEL_REF, "set accelerometer reference"),
    ];

    for (_, command, name) in commands.into_iter().filter(|(wanted, _, _)| *wanted) {
        info!("Sending command: {name}");
        if !transport.send_wait_ack(&command.write_packet(&registers)?)? {
            return Err(BridgeError::CommandFailure(name.to_string()));
        }
    }
    Ok(())
}

struct PendingReset {
    request: ResetRequest,
    reply: oneshot::Sender<ResetResponse>,
}

/// Create a connected service/client pair.
pub fn reset_channel() -> (ResetService, ResetClient) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let available = Arc::new(AtomicBool::new(false));
    (
        ResetService {
            rx,
            available: Arc::clone(&available),
        },
        ResetClient { tx, available },
    )
}

/// Requester side. Cheap to clone.
#[derive(Clone)]
pub struct ResetClient {
    tx: Sender<PendingReset>,
    available: Arc<AtomicBool>,
}

impl ResetClient {
    /// Whether a streaming connection is currently serving requests.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn submit(&self, request: ResetRequest) -> Result<oneshot::Receiver<ResetResponse>, ResetResponse> {
        if !self.is_available() {
            return Err(ResetResponse::Unavailable);
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PendingReset { request, reply })
            .map_err(|_| ResetResponse::Unavailable)?;
        Ok(rx)
    }

    /// Queue a request and wait for the supervisor to answer it.
    pub async fn request(&self, request: ResetRequest) -> ResetResponse {
        match self.submit(request) {
            Ok(rx) => rx.await.unwrap_or(ResetResponse::Unavailable),
            Err(response) => response,
        }
    }

    /// Blocking variant of [`request`](Self::request). Must not be called
    /// from within an async runtime.
    pub fn request_blocking(&self, request: ResetRequest) -> ResetResponse {
        match self.submit(request) {
            Ok(rx) => rx.blocking_recv().unwrap_or(ResetResponse::Unavailable),
            Err(response) => response,
        }
    }
}

/// Server side, owned by the supervisor.
pub struct ResetService {
    rx: Receiver<PendingReset>,
    available: Arc<AtomicBool>,
}

impl ResetService {
    /// Start accepting requests until the returned guard is dropped.
    pub fn advertise(&self) -> Advertisement {
        self.available.store(true, Ordering::SeqCst);
        info!("Reset service advertised");
        Advertisement {
            rx: self.rx.clone(),
            available: Arc::clone(&self.available),
        }
    }

    /// Answer every queued request using `transport`.
    ///
    /// Command failures are reported to their requester only. A transport
    /// error is reported to the requester and returned, since it means the
    /// connection is broken.
    pub fn serve<T: Transport + ?Sized>(&self, transport: &mut T) -> BridgeResult<usize> {
        let mut served = 0;
        while let Ok(pending) = self.rx.try_recv() {
            served += 1;
            let result = handle_reset(transport, &pending.request);
            let response = match &result {
                Ok(()) => ResetResponse::Ok,
                Err(BridgeError::CommandFailure(message)) => {
                    warn!("Reset command failed: {message}");
                    ResetResponse::CommandFailure {
                        message: message.clone(),
                    }
                }
                Err(e) => ResetResponse::TransportError {
                    message: e.to_string(),
                },
            };
            let _ = pending.reply.send(response);

            if let Err(e) = result {
                if e.is_connection_fatal() {
                    return Err(e);
                }
            }
        }
        Ok(served)
    }

    /// Answer every queued request with [`ResetResponse::Unavailable`].
    pub fn reject_pending(&self) -> usize {
        reject_all(&self.rx)
    }
}

fn reject_all(rx: &Receiver<PendingReset>) -> usize {
    let mut rejected = 0;
    while let Ok(pending) = rx.try_recv() {
        let _ = pending.reply.send(ResetResponse::Unavailable);
        rejected += 1;
    }
    rejected
}

/// Keeps the reset service advertised for the lifetime of one connection.
pub struct Advertisement {
    rx: Receiver<PendingReset>,
    available: Arc<AtomicBool>,
}

impl Drop for Advertisement {
    fn drop(&mut self) {
        self.available.store(false, Ordering::SeqCst);
        reject_all(&self.rx);
    }
}
