//! Media transport (C9): the carrier-facing WebSocket that streams
//! inbound mu-law audio in and paced mu-law audio out.
//!
//! One connection per call, at `/media/{call_control_id}`. Absorbs the
//! split-socket/mpsc-relay idiom used for the realtime voice session,
//! driven by the carrier's `connected`/`start`/`media`/`stop` frames
//! instead of a browser's JSON/binary mix.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec;
use crate::core::Core;
use crate::events::EventType;
use crate::pipeline;
use crate::sequencer::SegmentPriority;
use crate::session::Session;
use crate::telephony::SessionRegistry;
use crate::vad::VadEvent;

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    media: Option<InboundMedia>,
}

#[derive(Debug, Deserialize)]
struct InboundMedia {
    payload: String,
    #[serde(default)]
    track: String,
}

#[derive(Debug, Serialize)]
struct OutboundMediaFrame<'a> {
    event: &'static str,
    media: OutboundMediaPayload<'a>,
}

#[derive(Debug, Serialize)]
struct OutboundMediaPayload<'a> {
    payload: &'a str,
    track: &'static str,
}

pub struct MediaWsState {
    pub core: Arc<Core>,
    pub sessions: Arc<SessionRegistry>,
}

pub async fn handle_media_ws(
    Path(call_control_id): Path<String>,
    State(state): State<Arc<MediaWsState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_media_session(socket, call_control_id, state))
}

async fn run_media_session(ws: WebSocket, call_control_id: String, state: Arc<MediaWsState>) {
    let Some(session_handle) = state.sessions.get(&call_control_id).await else {
        warn!(call_control_id, "media socket opened for unknown call, closing");
        state
            .core
            .publish(
                EventType::CallError,
                serde_json::json!({"call_control_id": call_control_id, "reason": "unknown_call_control_id"}),
                "telephony::media_ws",
            )
            .await;
        return;
    };

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);

    let sender_task = tokio::spawn(async move {
        while let Some(ulaw_chunk) = rx.recv().await {
            let payload = BASE64.encode(&ulaw_chunk);
            let frame = OutboundMediaFrame {
                event: "media",
                media: OutboundMediaPayload {
                    payload: &payload,
                    track: "outbound",
                },
            };
            let text = serde_json::to_string(&frame).unwrap_or_default();
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    info!(call_control_id, "media socket connected");

    while let Some(Ok(msg)) = ws_rx.next().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };

        let frame: InboundFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                debug!(call_control_id, error = %e, "unparseable media frame, ignoring");
                continue;
            }
        };

        match frame.event.as_str() {
            "connected" => {}
            "start" => {
                handle_start(&state.core, &session_handle, &tx).await;
            }
            "media" => {
                if let Some(media) = frame.media {
                    if media.track == "inbound" {
                        handle_inbound_audio(state.core.clone(), session_handle.clone(), &media.payload).await;
                    }
                }
            }
            "stop" => {
                info!(call_control_id, "carrier sent stop frame");
                break;
            }
            other => {
                debug!(call_control_id, event = other, "unrecognized media frame event");
            }
        }
    }

    info!(call_control_id, "media socket closing");
    sender_task.abort();
}

async fn handle_start(core: &Arc<Core>, session_handle: &Arc<tokio::sync::Mutex<Session>>, tx: &mpsc::Sender<Vec<u8>>) {
    let greeting = match pipeline::greeting_segment(core).await {
        Ok(pcm) => pcm,
        Err(e) => {
            warn!(error = %e, "failed to synthesize greeting");
            return;
        }
    };

    let (sequencer, turn_id) = {
        let session = session_handle.lock().await;
        (session.sequencer.clone(), session.current_turn_id())
    };
    sequencer
        .enqueue(greeting, crate::capability::Persona::Sara, SegmentPriority::Normal, "greeting", turn_id)
        .await;

    spawn_playback(sequencer, tx.clone());
}

fn spawn_playback(sequencer: Arc<crate::sequencer::Sequencer>, tx: mpsc::Sender<Vec<u8>>) {
    tokio::spawn(async move {
        sequencer
            .play(|pcm16_16k_chunk| {
                let tx = tx.clone();
                async move {
                    match codec::ai_to_telnyx(&pcm16_16k_chunk) {
                        Ok(ulaw) => {
                            let _ = tx.send(ulaw).await;
                        }
                        Err(e) => warn!(error = %e, "failed to encode outbound chunk"),
                    }
                }
            })
            .await;
    });
}

/// Feeds one inbound chunk through VAD and the barge-in watcher. On
/// `SPEECH_END`, spawns the turn rather than awaiting it here: this task
/// is also the one reading the next inbound frame off the wire, and a
/// multi-hundred-millisecond ASR/LLM/TTS turn must not stall that read or
/// barge-in on the caller's *next* utterance would never be observed.
async fn handle_inbound_audio(core: Arc<Core>, session_handle: Arc<tokio::sync::Mutex<Session>>, payload_b64: &str) {
    let ulaw = match BASE64.decode(payload_b64) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "failed to base64-decode inbound media payload");
            return;
        }
    };

    let pcm16_16k = match codec::telnyx_to_ai(&ulaw) {
        Ok(pcm) => pcm,
        Err(e) => {
            warn!(error = %e, "failed to decode inbound carrier audio");
            return;
        }
    };

    let utterance = {
        let mut session = session_handle.lock().await;
        let event = session.vad.process_chunk(&pcm16_16k);

        pipeline::handle_barge_in(&session, event).await;

        match event {
            VadEvent::SpeechStart | VadEvent::SpeechContinue => {
                session.utterance_buffer.push(&pcm16_16k);
                None
            }
            VadEvent::SpeechEnd => {
                session.utterance_buffer.push(&pcm16_16k);
                Some(session.utterance_buffer.drain())
            }
            VadEvent::Silence => None,
        }
    };

    if let Some(utterance) = utterance {
        tokio::spawn(async move {
            let mut session = session_handle.lock().await;
            pipeline::process_turn(&core, &mut session, utterance).await;
        });
    }
}
