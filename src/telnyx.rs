//! Carrier Call-Control client (Telnyx).
//!
//! Bearer-auth `reqwest::Client` wrapper over the Call-Control REST API.
//! There is no local mock here — `telephony::webhook` drives this client
//! directly and a capability-less run simply never answers a webhook.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{CoreError, CoreResult};

const BASE_URL: &str = "https://api.telnyx.com/v2";

pub struct TelnyxClient {
    http: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct CallDetails {
    pub call_control_id: String,
    pub call_state: Option<String>,
}

impl TelnyxClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> CoreResult<Value> {
        let response = self
            .http
            .post(format!("{BASE_URL}{path}"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::capability("telnyx", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::capability("telnyx", format!("{status}: {text}")));
        }

        response
            .json()
            .await
            .map_err(|e| CoreError::capability("telnyx", e.to_string()))
    }

    pub async fn answer_call(&self, call_control_id: &str) -> CoreResult<Value> {
        info!(call_control_id, "answering call");
        self.post(&format!("/calls/{call_control_id}/actions/answer"), json!({})).await
    }

    pub async fn start_media_stream(&self, call_control_id: &str, stream_url: &str) -> CoreResult<Value> {
        info!(call_control_id, stream_url, "starting media stream");
        self.post(
            &format!("/calls/{call_control_id}/actions/streaming_start"),
            json!({ "stream_url": stream_url, "stream_track": "both_tracks" }),
        )
        .await
    }

    pub async fn stop_media_stream(&self, call_control_id: &str) -> CoreResult<Value> {
        info!(call_control_id, "stopping media stream");
        self.post(&format!("/calls/{call_control_id}/actions/streaming_stop"), json!({})).await
    }

    pub async fn hangup_call(&self, call_control_id: &str) -> CoreResult<Value> {
        info!(call_control_id, "hanging up call");
        self.post(&format!("/calls/{call_control_id}/actions/hangup"), json!({})).await
    }

    pub async fn send_dtmf(&self, call_control_id: &str, digits: &str) -> CoreResult<Value> {
        self.post(&format!("/calls/{call_control_id}/actions/send_dtmf"), json!({ "digits": digits }))
            .await
    }

    pub async fn get_call(&self, call_control_id: &str) -> CoreResult<CallDetails> {
        let response = self
            .http
            .get(format!("{BASE_URL}/calls/{call_control_id}"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| CoreError::capability("telnyx", e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::capability("telnyx", e.to_string()))?;

        serde_json::from_value(body["data"].clone()).map_err(|e| CoreError::capability("telnyx", e.to_string()))
    }
}
