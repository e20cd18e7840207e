//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::authn::signature::{verify, SIGNATURE_HEADER};
use crate::errors::HookError;
use crate::events::dispatcher::Dispatcher;
use crate::models::webhook::{WebhookPayload, EVENT_HEADER};
use crate::server::state::ServerState;
use crate::utils::version_info;

const DELIVERY_HEADER: &str = "x-github-delivery";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "relhook".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Webhook acknowledgment
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub accepted: bool,
    pub message: String,
}

impl AckResponse {
    fn rejected(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                accepted: false,
                message: message.into(),
            }),
        )
    }
}

/// Webhook handler.
///
/// The signature is checked against the raw body before anything is parsed.
/// A verified, parseable delivery is acknowledged at once and dispatched on a
/// tracked background task.
pub async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = header_str(&headers, SIGNATURE_HEADER);
    let secret = state.webhook_secret.expose_secret().as_bytes();
    if !verify(&body, signature, secret) {
        let reason = HookError::AuthenticationFailed(match signature {
            Some(_) => "signature mismatch".to_string(),
            None => format!("missing {SIGNATURE_HEADER} header"),
        });
        warn!("rejected delivery: {}", reason);
        return AckResponse::rejected(StatusCode::UNAUTHORIZED, reason.to_string());
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            let reason = HookError::InvalidPayload(e.to_string());
            warn!("rejected delivery: {}", reason);
            return AckResponse::rejected(StatusCode::BAD_REQUEST, reason.to_string());
        }
    };

    let event = header_str(&headers, EVENT_HEADER).unwrap_or_default().to_string();
    let delivery = header_str(&headers, DELIVERY_HEADER).unwrap_or("-").to_string();
    let span = info_span!("delivery", id = %delivery, event = %event);

    let dispatcher = state.dispatcher.clone();
    state
        .tasks
        .spawn(async move { dispatch(&dispatcher, &event, &payload).await }.instrument(span));

    (
        StatusCode::OK,
        Json(AckResponse {
            accepted: true,
            message: "accepted".to_string(),
        }),
    )
}

/// Run one delivery to completion, logging rather than propagating failures
pub async fn dispatch(dispatcher: &Dispatcher, event: &str, payload: &WebhookPayload) {
    match dispatcher.handle(event, payload).await {
        Ok(None) => debug!("no deploy triggered"),
        // The deployer logs each outcome
        Ok(Some(_)) => {}
        Err(e @ HookError::UnknownRepository(_)) => warn!("{}", e),
        Err(e) => error!("delivery failed: {}", e),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
