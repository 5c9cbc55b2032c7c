//! HTTP surface: webhook endpoint, health check, notification WebSocket.
//!
//! Response policy: only an upstream fetch failure (502) and an
//! unanticipated fault (500) are non-200. Every business outcome (ignored,
//! duplicate, needs-review) returns 200 with a discriminating payload so
//! the delivery system does not retry-storm well-handled events.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::notify::WsNotifierHub;
use crate::pipeline::{EmailPipeline, PipelineOutcome, WebhookEvent};

/// Webhook event type this service consumes.
const INBOUND_EMAIL_EVENT: &str = "email.received";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<EmailPipeline>,
    pub hub: Arc<WsNotifierHub>,
}

/// Build the Axum router.
pub fn routes(pipeline: Arc<EmailPipeline>, hub: Arc<WsNotifierHub>) -> Router {
    let state = AppState { pipeline, hub };

    Router::new()
        .route("/health", get(health))
        .route("/webhook/inbound-email", post(inbound_email))
        .route("/ws/notifications/{account_id}", get(ws_notifications))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "jobtrail"
    }))
}

// ── Webhook ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WebhookRequest {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    #[serde(default)]
    email_id: Option<String>,
    #[serde(default)]
    test_email: Option<String>,
}

async fn inbound_email(
    State(state): State<AppState>,
    Json(request): Json<WebhookRequest>,
) -> impl IntoResponse {
    if request.event_type != INBOUND_EMAIL_EVENT {
        debug!(event_type = %request.event_type, "Ignoring non-inbound webhook event");
        return (
            StatusCode::OK,
            Json(serde_json::json!({"success": true, "ignored": true})),
        );
    }

    let data = request.data.unwrap_or(WebhookData {
        email_id: None,
        test_email: None,
    });
    let Some(email_id) = data.email_id.filter(|id| !id.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Missing email_id"})),
        );
    };

    let event = WebhookEvent {
        email_id,
        test_email: data.test_email,
    };

    match state.pipeline.process(&event).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome_payload(&outcome))),
        Err(PipelineError::Fetch(e)) => {
            warn!(email_id = %event.email_id, error = %e, "Upstream mail fetch failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": "Failed to fetch email content"})),
            )
        }
        Err(e) => {
            error!(email_id = %event.email_id, error = %e, "Webhook processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Internal server error"})),
            )
        }
    }
}

fn outcome_payload(outcome: &PipelineOutcome) -> serde_json::Value {
    match outcome {
        PipelineOutcome::NoAccountMatch => {
            serde_json::json!({"success": true, "matched": false})
        }
        PipelineOutcome::ForwardingVerification => {
            serde_json::json!({"success": true, "verification": true})
        }
        PipelineOutcome::Duplicate => {
            serde_json::json!({"success": true, "duplicate": true})
        }
        PipelineOutcome::Ignored { confidence } => {
            serde_json::json!({"success": true, "ignored": true, "confidence": confidence})
        }
        PipelineOutcome::NeedsReview { reason, event_type } => {
            let mut payload = serde_json::json!({
                "success": true,
                "ignored": true,
                "reason": reason.as_str(),
            });
            if let Some(event_type) = event_type {
                payload["event_type"] = serde_json::json!(event_type.as_str());
            }
            payload
        }
        PipelineOutcome::Created { .. } => {
            serde_json::json!({"success": true, "created": true})
        }
        PipelineOutcome::Updated { changed, .. } => {
            serde_json::json!({"success": true, "updated": true, "changed": changed})
        }
    }
}

// ── Notification WebSocket ──────────────────────────────────────────

async fn ws_notifications(
    ws: WebSocketUpgrade,
    Path(account_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!(account_id = %account_id, "Notification WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, account_id, state.hub))
}

async fn handle_socket(mut socket: WebSocket, account_id: String, hub: Arc<WsNotifierHub>) {
    let mut rx = hub.subscribe(&account_id).await;

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(payload) => {
                        if let Ok(json) = serde_json::to_string(&payload)
                            && socket.send(Message::Text(json.into())).await.is_err()
                        {
                            debug!(account_id = %account_id, "Client disconnected during send");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(account_id = %account_id, missed = n, "WS client lagged behind broadcast");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(account_id = %account_id, "Notification WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}
