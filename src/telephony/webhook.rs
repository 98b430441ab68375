//! Carrier webhook endpoint (C10): signature verification and per-event
//! dispatch (`call.initiated`, `call.answered`, `call.hangup`,
//! `streaming.started`/`stopped`, `call.dtmf.received`).

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tracing::{info, warn};

use crate::config::media_stream_url;
use crate::core::Core;
use crate::events::EventType;
use crate::session::Session;
use crate::telephony::SessionRegistry;

use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    event_type: String,
    payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    call_control_id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    hangup_cause: Option<String>,
    #[serde(default)]
    digit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    status: &'static str,
    message: String,
}

pub struct WebhookState {
    pub core: Arc<Core>,
    pub sessions: Arc<SessionRegistry>,
}

/// Verifies the webhook signature if a signing key is configured. With no
/// key configured, signature checks are skipped (local/dev mode).
fn verify_signature(signing_key: &str, body: &[u8], signature_header: Option<&str>) -> bool {
    if signing_key.is_empty() {
        return true;
    }
    let Some(signature_hex) = signature_header else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(signing_key.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let expected_hex = hex::encode(expected);
    expected_hex.eq_ignore_ascii_case(signature_header_trim(signature_hex))
}

fn signature_header_trim(s: &str) -> &str {
    s.trim()
}

pub async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    let signature = headers.get("telnyx-signature-ed25519").and_then(|v| v.to_str().ok());

    if !verify_signature(&state.core.config.telnyx.webhook_signing_key, &body, signature) {
        warn!("webhook signature verification failed");
        return (
            StatusCode::UNAUTHORIZED,
            Json(WebhookResponse {
                status: "error",
                message: "invalid signature".to_string(),
            }),
        );
    }

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "failed to parse webhook envelope");
            return (
                StatusCode::OK,
                Json(WebhookResponse {
                    status: "ok",
                    message: "ignored unparseable event".to_string(),
                }),
            );
        }
    };

    dispatch(&state, envelope.data).await;

    (
        StatusCode::OK,
        Json(WebhookResponse {
            status: "ok",
            message: "processed".to_string(),
        }),
    )
}

async fn dispatch(state: &WebhookState, data: WebhookData) {
    let call_control_id = data.payload.call_control_id.clone();

    match data.event_type.as_str() {
        "call.initiated" => on_call_initiated(state, data.payload).await,
        "call.answered" => {
            info!(call_control_id, "call answered, awaiting media start frame for greeting");
        }
        "streaming.started" | "streaming.stopped" => {
            info!(call_control_id, event = data.event_type.as_str(), "media streaming state change");
        }
        "call.hangup" => on_call_hangup(state, data.payload).await,
        "call.dtmf.received" => {
            if let Some(digit) = data.payload.digit {
                info!(call_control_id, digit, "dtmf received");
            }
        }
        other => {
            info!(call_control_id, event_type = other, "unrecognized webhook event, ignored");
        }
    }
}

async fn on_call_initiated(state: &WebhookState, payload: WebhookPayload) {
    let admission = match state.core.try_admit() {
        Ok(admission) => admission,
        Err(e) => {
            warn!(call_control_id = %payload.call_control_id, error = %e, "rejecting call, at capacity");
            let telnyx = crate::telnyx::TelnyxClient::new(state.core.config.telnyx.api_key.clone());
            let _ = telnyx.hangup_call(&payload.call_control_id).await;
            return;
        }
    };

    let telnyx = crate::telnyx::TelnyxClient::new(state.core.config.telnyx.api_key.clone());

    if let Err(e) = telnyx.answer_call(&payload.call_control_id).await {
        warn!(call_control_id = %payload.call_control_id, error = %e, "failed to answer call");
        return;
    }

    let stream_url = media_stream_url(&state.core.config, &payload.call_control_id);
    if let Err(e) = telnyx.start_media_stream(&payload.call_control_id, &stream_url).await {
        warn!(call_control_id = %payload.call_control_id, error = %e, "failed to start media stream");
    }

    let session = Session::new(
        payload.call_control_id.clone(),
        payload.from.clone(),
        payload.to.clone(),
        default_system_prompt(),
        std::sync::Arc::new(crate::sequencer::Sequencer::new(crate::codec::SAMPLES_8K_20MS, crate::codec::CHUNK_DURATION_MS)),
    )
    .with_admission(admission);
    state.sessions.insert(payload.call_control_id.clone(), session).await;

    state
        .core
        .publish(
            EventType::CallStarted,
            json!({"call_control_id": payload.call_control_id, "from": payload.from, "to": payload.to}),
            "telephony::webhook",
        )
        .await;
}

async fn on_call_hangup(state: &WebhookState, payload: WebhookPayload) {
    if let Some(session) = state.sessions.remove(&payload.call_control_id).await {
        let session = session.lock().await;
        session.sequencer.stop().await;
    }

    state
        .core
        .publish(
            EventType::CallEnded,
            json!({
                "call_control_id": payload.call_control_id,
                "hangup_cause": payload.hangup_cause,
            }),
            "telephony::webhook",
        )
        .await;
}

fn default_system_prompt() -> String {
    "أنت سارة، مساعدة صوتية ودودة في مركز اتصال طبي. جاوبي بإيجاز ووضوح.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_signing_key_skips_verification() {
        assert!(verify_signature("", b"body", None));
    }

    #[test]
    fn missing_header_fails_when_key_configured() {
        assert!(!verify_signature("secret", b"body", None));
    }

    #[test]
    fn correct_hmac_verifies() {
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(b"hello");
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(verify_signature("secret", b"hello", Some(&sig)));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(b"hello");
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(!verify_signature("secret", b"goodbye", Some(&sig)));
    }
}
