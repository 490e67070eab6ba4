//! HTTP-mode ingress: Events API and slash command deliveries.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Form, Json, Router,
};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use sha2::Sha256;
use taskbot_slack::events::{EventProcessor, RawSlashCommand, SlackEnvelope};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MAX_BODY_BYTES: usize = 1024 * 1024;
const MAX_REQUEST_AGE_SECS: i64 = 5 * 60;
const SIGNATURE_VERSION: &str = "v0";
const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const SIGNATURE_HEADER: &str = "x-slack-signature";
const RETRY_HEADER: &str = "x-slack-retry-num";

#[derive(Clone)]
pub struct IngressState {
    processor: Arc<EventProcessor>,
    signing_secret: Option<SecretString>,
}

impl IngressState {
    pub fn new(processor: Arc<EventProcessor>, signing_secret: Option<SecretString>) -> Self {
        Self { processor, signing_secret }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing slack signature headers")]
    MissingHeaders,
    #[error("malformed slack request timestamp")]
    MalformedTimestamp,
    #[error("slack request is older than five minutes")]
    Stale,
    #[error("slack signature mismatch")]
    Mismatch,
}

pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/slack/events", post(slack_events))
        .route("/slack/commands", post(slack_commands))
        .layer(middleware::from_fn_with_state(state.clone(), verify_slack_request))
        .with_state(state)
}

async fn slack_events(
    State(state): State<IngressState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match payload.get("type").and_then(Value::as_str) {
        Some("url_verification") => {
            let challenge = payload.get("challenge").cloned().unwrap_or(Value::Null);
            Json(json!({ "challenge": challenge })).into_response()
        }
        Some("event_callback") => {
            if let Some(retry) = headers.get(RETRY_HEADER) {
                info!(
                    event_name = "ingress.slack.retry_skipped",
                    retry_num = ?retry,
                    "ignoring slack retry delivery"
                );
                return StatusCode::OK.into_response();
            }

            let envelope_id = payload
                .get("event_id")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let envelope = SlackEnvelope::from_event_callback(envelope_id, &payload);
            info!(
                event_name = "ingress.slack.envelope_received",
                correlation_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                "received slack event over http"
            );
            state.processor.spawn(envelope);
            StatusCode::OK.into_response()
        }
        other => {
            debug!(payload_type = ?other, "ignoring slack http payload");
            StatusCode::OK.into_response()
        }
    }
}

async fn slack_commands(
    State(state): State<IngressState>,
    Form(command): Form<RawSlashCommand>,
) -> StatusCode {
    let envelope_id = if command.trigger_id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        command.trigger_id.clone()
    };
    let envelope = SlackEnvelope::from_slash_command(envelope_id, command);
    info!(
        event_name = "ingress.slack.envelope_received",
        correlation_id = %envelope.envelope_id,
        event_type = ?envelope.event.event_type(),
        "received slash command over http"
    );
    state.processor.spawn(envelope);
    StatusCode::OK
}

async fn verify_slack_request(
    State(state): State<IngressState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(secret) = state.signing_secret.as_ref() else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let Ok(body) = to_bytes(body, MAX_BODY_BYTES).await else {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    };

    let timestamp = parts.headers.get(TIMESTAMP_HEADER).and_then(|value| value.to_str().ok());
    let signature = parts.headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
    let verdict = match (timestamp, signature) {
        (Some(timestamp), Some(signature)) => verify_signature(
            secret.expose_secret(),
            timestamp,
            signature,
            &body,
            chrono::Utc::now().timestamp(),
        ),
        _ => Err(SignatureError::MissingHeaders),
    };
    if let Err(error) = verdict {
        warn!(
            event_name = "ingress.slack.signature_rejected",
            path = %parts.uri.path(),
            error = %error,
            "rejecting unsigned or invalid slack request"
        );
        return StatusCode::UNAUTHORIZED.into_response();
    }

    next.run(Request::from_parts(parts, Body::from(body))).await
}

/// Checks `v0=<hex hmac-sha256(secret, "v0:<timestamp>:<body>")>` and the
/// five-minute replay window.
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    signature: &str,
    body: &[u8],
    now_unix: i64,
) -> Result<(), SignatureError> {
    let sent_at = timestamp.trim().parse::<i64>().map_err(|_| SignatureError::MalformedTimestamp)?;
    let age = now_unix.checked_sub(sent_at).map(i64::unsigned_abs);
    if !age.is_some_and(|age| age <= MAX_REQUEST_AGE_SECS.unsigned_abs()) {
        return Err(SignatureError::Stale);
    }

    let provided = signature
        .strip_prefix(&format!("{SIGNATURE_VERSION}="))
        .and_then(decode_hex)
        .ok_or(SignatureError::Mismatch)?;
    signing_mac(secret, timestamp, body)?
        .verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

fn signing_mac(secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::Mismatch)?;
    mac.update(format!("{SIGNATURE_VERSION}:{timestamp}:").as_bytes());
    mac.update(body);
    Ok(mac)
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(text.get(index..index + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let digest = signing_mac(secret, timestamp, body).expect("mac").finalize().into_bytes();
    let hex = digest.iter().map(|byte| format!("{byte:02x}")).collect::<String>();
    format!("{SIGNATURE_VERSION}={hex}")
}
