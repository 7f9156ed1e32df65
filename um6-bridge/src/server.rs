//! HTTP surface for the bridge.
//!
//! - `GET /topics` lists advertised topics with their subscriber counts
//! - `GET /topics/{*name}` streams a topic as Server-Sent Events (JSON data)
//! - `POST /reset` forwards a [`ResetRequest`] to the supervisor
//! - `GET /status` returns the supervisor's connection status
//!
//! An open event stream counts as a topic subscriber, so the supervisor only
//! builds messages that some HTTP client is reading.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::bus::Bus;
use crate::reset::{ResetClient, ResetRequest, ResetResponse};
use crate::supervisor::SupervisorStatus;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<Bus>,
    pub resets: ResetClient,
    pub status: watch::Receiver<SupervisorStatus>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TopicInfo {
    pub name: String,
    pub message_type: String,
    pub subscribers: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/topics", get(list_topics))
        .route("/topics/{*name}", get(stream_topic))
        .route("/reset", post(reset))
        .route("/status", get(status))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server listening on http://{addr}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn list_topics(State(state): State<AppState>) -> Json<Vec<TopicInfo>> {
    let topics = state
        .bus
        .topic_names()
        .into_iter()
        .filter_map(|name| state.bus.json_topic(&name))
        .map(|topic| TopicInfo {
            name: topic.name().to_string(),
            message_type: topic.message_type().to_string(),
            subscribers: topic.subscriber_count(),
        })
        .collect();
    Json(topics)
}

async fn stream_topic(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let name = name.trim_start_matches('/').to_string();
    let Some(topic) = state.bus.json_topic(&name) else {
        return (StatusCode::NOT_FOUND, format!("Unknown topic {name}")).into_response();
    };

    debug!("New event stream subscriber on {name}");
    let events = topic.subscribe_json().map(move |value| {
        Ok::<_, Infallible>(
            Event::default()
                .event(name.as_str())
                .data(value.to_string()),
        )
    });
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn reset(
    State(state): State<AppState>,
    Json(request): Json<ResetRequest>,
) -> (StatusCode, Json<ResetResponse>) {
    let response = state.resets.request(request).await;
    let code = match &response {
        ResetResponse::Ok => StatusCode::OK,
        ResetResponse::CommandFailure { .. } => StatusCode::CONFLICT,
        ResetResponse::TransportError { .. } => StatusCode::BAD_GATEWAY,
        ResetResponse::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(response))
}

async fn status(State(state): State<AppState>) -> Json<SupervisorStatus> {
    Json(state.status.borrow().clone())
}
