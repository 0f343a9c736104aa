//! Inbound trigger boundary: decode a push notification, enqueue, respond.
//!
//! The handler does no processing of its own. It translates the GitHub
//! push payload into a `TriggerEvent`, hands it to the ingestion queue,
//! and answers immediately: 202 when queued, 503 when the queue is
//! saturated (the sender should retry later), 400/422 when the payload
//! does not decode. The caller never learns the eventual outcome.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::EnqueueError;
use crate::queue::IngestionQueue;
use crate::workflow::TriggerEvent;

// ── Payload types ─────────────────────────────────────────────────────

/// The subset of GitHub's push webhook payload the service consumes.
#[derive(Debug, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub repository: RepositoryInfo,
    #[serde(default)]
    pub head_commit: Option<CommitInfo>,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub owner: OwnerInfo,
    #[serde(default)]
    pub clone_url: String,
}

#[derive(Debug, Deserialize)]
pub struct OwnerInfo {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
}

impl PushPayload {
    /// Flatten the payload into a trigger event. Added files count as
    /// changes too; a brand-new definition arrives as `added`.
    pub fn into_event(self) -> TriggerEvent {
        let (id, message, changed_paths) = match self.head_commit {
            Some(commit) => {
                let mut paths = commit.added;
                paths.extend(commit.modified);
                (commit.id, commit.message, paths)
            }
            None => (String::new(), String::new(), Vec::new()),
        };
        TriggerEvent {
            ref_name: self.ref_name,
            owner: self.repository.owner.login,
            repo: self.repository.name,
            clone_url: self.repository.clone_url,
            head_commit_id: id,
            head_commit_message: message,
            changed_paths,
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub struct AppState {
    pub queue: IngestionQueue,
}

pub type SharedState = Arc<AppState>;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/webhook/git", post(handle_push))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn handle_push(State(state): State<SharedState>, Json(payload): Json<PushPayload>) -> Response {
    let event = payload.into_event();
    info!(ref_name = %event.ref_name, repo = %event.repo, "received push notification");

    match state.queue.enqueue(event) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "queued"})),
        )
            .into_response(),
        Err(EnqueueError::QueueSaturated) => {
            warn!("ingestion queue saturated; rejecting push");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "service busy, retry later"})),
            )
                .into_response()
        }
        Err(EnqueueError::ConsumerGone) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "service shutting down"})),
        )
            .into_response(),
    }
}

// ── Server ────────────────────────────────────────────────────────────

/// Serve the router until ctrl-c, then return so the caller can stop the
/// consumer loop.
pub async fn start_server(port: u16, state: SharedState) -> Result<()> {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!(addr = %listener.local_addr()?, "webhook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("webhook server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
    }
}
