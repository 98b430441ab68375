//! Pipeline orchestrator: the per-turn ASR -> filler -> LLM -> TTS
//! choreography, plus the independent barge-in watcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capability::{DbContext, Persona, ResponseAction, ResponseSegment};
use crate::core::Core;
use crate::error::CoreError;
use crate::events::EventType;
use crate::filler::FillerCategory;
use crate::sequencer::SegmentPriority;
use crate::session::{Session, TurnMetrics};
use crate::vad::VadEvent;

/// Delay before the low-priority "still searching" filler fires, carried
/// from the original service's `FILLER_DELAY_MS` constant.
pub const FILLER_DELAY_MS: u64 = 800;

/// Cap on how many rows of each repository snapshot are handed to the LLM.
const DB_CONTEXT_TOP_K: usize = 5;

/// Builds the read-only `DbContext` snapshot for one turn: doctors,
/// insurance carriers, and the caller's appointments for today, each
/// bounded to `DB_CONTEXT_TOP_K` rows. A repository failure degrades to
/// an empty slice for that section rather than failing the turn.
async fn build_db_context(core: &Arc<Core>, session: &Session) -> DbContext {
    let doctors = match core.repository.list_doctors().await {
        Ok(rows) => rows
            .into_iter()
            .take(DB_CONTEXT_TOP_K)
            .map(|d| format!("{} ({}, {})", d.name, d.specialty, d.department))
            .collect(),
        Err(e) => {
            warn!(error = %e, "failed to list doctors for db_context");
            Vec::new()
        }
    };

    let insurance = match core.repository.list_insurance().await {
        Ok(rows) => rows
            .into_iter()
            .take(DB_CONTEXT_TOP_K)
            .map(|i| format!("{}: {}", i.company, i.covered_departments.join(", ")))
            .collect(),
        Err(e) => {
            warn!(error = %e, "failed to list insurance for db_context");
            Vec::new()
        }
    };

    let todays_appointments = match core.repository.todays_appointments(&session.caller).await {
        Ok(rows) => rows
            .into_iter()
            .take(DB_CONTEXT_TOP_K)
            .map(|a| format!("{} with doctor {} at {}", a.id, a.doctor_id, a.scheduled_at))
            .collect(),
        Err(e) => {
            warn!(error = %e, "failed to list today's appointments for db_context");
            Vec::new()
        }
    };

    DbContext {
        doctors,
        insurance,
        todays_appointments,
    }
}

/// Drives one turn to completion: ASR -> history -> filler -> LLM ->
/// TTS -> sequencer enqueue. Call once per `SpeechEnd` event.
pub async fn process_turn(core: &Arc<Core>, session: &mut Session, utterance_pcm16_16k: Vec<u8>) {
    if utterance_pcm16_16k.is_empty() {
        return;
    }

    let turn_id = session.begin_turn();
    let turn_started = Instant::now();
    let mut metrics = TurnMetrics::default();

    let asr_started = Instant::now();
    let asr_result = core
        .asr
        .breaker
        .call(|| async { core.asr.client.transcribe(&utterance_pcm16_16k, "ar").await })
        .await;
    metrics.asr_ms = asr_started.elapsed().as_millis() as u64;

    let user_text = match asr_result {
        Ok(result) => result.text,
        Err(CoreError::BreakerOpen { fallback_text, .. }) | Err(CoreError::Capability { message: fallback_text, .. }) => {
            warn!(turn_id, "asr unavailable, playing fallback");
            enqueue_fallback(core, session, turn_id, fallback_text).await;
            return;
        }
        Err(e) => {
            warn!(turn_id, error = %e, "asr failed unexpectedly");
            return;
        }
    };

    if user_text.trim().is_empty() {
        return;
    }

    session.add_message("user", user_text.clone());

    if let Some(empathy) = core.fillers.get_empathy(&user_text) {
        metrics.filler_used = true;
        enqueue_text_as_filler(core, session, turn_id, &empathy.text, SegmentPriority::High).await;
    }

    let delayed_filler = spawn_delayed_filler(core.clone(), session.sequencer.clone(), turn_id, &user_text);

    let llm_started = Instant::now();
    let db_context = build_db_context(core, session).await;
    let llm_result = core
        .llm
        .breaker
        .call(|| async {
            core.llm
                .client
                .generate(&user_text, &session.history, &session.system_prompt, &db_context)
                .await
        })
        .await;
    metrics.llm_ms = llm_started.elapsed().as_millis() as u64;

    delayed_filler.abort();

    let segments = match llm_result {
        Ok(segments) => segments,
        Err(CoreError::BreakerOpen { fallback_text, .. }) | Err(CoreError::Capability { message: fallback_text, .. }) => {
            warn!(turn_id, "llm unavailable, playing fallback");
            enqueue_fallback(core, session, turn_id, fallback_text).await;
            return;
        }
        Err(e) => {
            warn!(turn_id, error = %e, "llm failed unexpectedly");
            return;
        }
    };

    if !session.is_turn_current(turn_id) {
        info!(turn_id, "turn superseded by barge-in before synthesis, dropping segments");
        return;
    }

    let tts_started = Instant::now();
    let mut any_audio_produced = false;
    for segment in &segments {
        if !session.is_turn_current(turn_id) {
            info!(turn_id, "turn superseded mid-synthesis, stopping");
            return;
        }
        if synthesize_and_enqueue(core, session, turn_id, segment).await {
            any_audio_produced = true;
            metrics.segments += 1;
        }
        session.add_message(segment.persona.to_string(), segment.text.clone());
        if segment.action == ResponseAction::TransferPersona {
            info!(turn_id, persona = %segment.persona, "transferring active persona");
            session.persona = segment.persona;
        }
    }
    metrics.tts_ms = tts_started.elapsed().as_millis() as u64;

    if !any_audio_produced && !segments.is_empty() {
        let fallback = core.tts.breaker.fallback_text();
        enqueue_text_as_filler(core, session, turn_id, &fallback, SegmentPriority::High).await;
    }

    if segments.iter().any(|s| s.action == ResponseAction::EndCall) {
        core.publish(
            EventType::CallEnded,
            serde_json::json!({"call_control_id": session.call_control_id, "reason": "llm_requested_end"}),
            "pipeline",
        )
        .await;
    }

    metrics.total_ms = turn_started.elapsed().as_millis() as u64;
    session.record_turn(&metrics);
}

/// Independent barge-in watcher: call on every VAD event while the
/// sequencer may be playing. Stops playback immediately on `SpeechStart`.
pub async fn handle_barge_in(session: &Session, event: VadEvent) {
    if event == VadEvent::SpeechStart && !session.sequencer.is_empty().await {
        session.sequencer.stop().await;
        session.begin_turn();
        info!(call_control_id = %session.call_control_id, "barge-in: sequencer stopped");
    }
}

async fn synthesize_and_enqueue(core: &Arc<Core>, session: &Session, turn_id: u64, segment: &ResponseSegment) -> bool {
    let tts_result = core
        .tts
        .breaker
        .call(|| async { core.tts.client.synthesize(&segment.text, segment.persona).await })
        .await;

    match tts_result {
        Ok(pcm) => {
            session
                .sequencer
                .enqueue(pcm, segment.persona, SegmentPriority::Normal, segment.text.clone(), turn_id)
                .await;
            true
        }
        Err(e) => {
            warn!(turn_id, error = %e, "tts failed for segment, skipping");
            false
        }
    }
}

async fn enqueue_fallback(core: &Arc<Core>, session: &Session, turn_id: u64, text: String) {
    enqueue_text_as_filler(core, session, turn_id, &text, SegmentPriority::High).await;
}

async fn enqueue_text_as_filler(core: &Arc<Core>, session: &Session, turn_id: u64, text: &str, priority: SegmentPriority) {
    match core.tts.client.synthesize(text, Persona::Sara).await {
        Ok(pcm) => {
            session.sequencer.enqueue(pcm, Persona::Sara, priority, text.to_string(), turn_id).await;
        }
        Err(e) => {
            warn!(error = %e, "failed to synthesize filler/fallback text");
        }
    }
}

fn spawn_delayed_filler(
    core: Arc<Core>,
    sequencer: Arc<crate::sequencer::Sequencer>,
    turn_id: u64,
    user_text: &str,
) -> JoinHandle<()> {
    let user_text = user_text.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(FILLER_DELAY_MS)).await;
        let filler = core.fillers.get_contextual(&user_text).or_else(|| core.fillers.get_random(FillerCategory::Searching));
        if let Some(filler) = filler {
            match core.tts.client.synthesize(&filler.text, Persona::Sara).await {
                Ok(pcm) => {
                    sequencer
                        .enqueue(pcm, Persona::Sara, SegmentPriority::Low, filler.text.clone(), turn_id)
                        .await;
                }
                Err(e) => warn!(error = %e, "delayed filler synthesis failed"),
            }
        }
    })
}

/// Builds the greeting segment played on the first media frame of a call.
pub async fn greeting_segment(core: &Arc<Core>) -> anyhow::Result<Vec<u8>> {
    const GREETING: &str = "مرحبا بك، معك سارة، كيف أقدر أساعدك اليوم؟";
    core.tts.client.synthesize(GREETING, Persona::Sara).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{MockAsr, MockLlm, MockTts};
    use crate::config::Config;
    use crate::sequencer::Sequencer;
    use crate::session::Session;
    use std::sync::Arc as StdArc;

    fn core_with(asr: &str, llm_raw: &str) -> StdArc<Core> {
        StdArc::new(Core::new(
            Config::default(),
            StdArc::new(MockAsr::new(asr)),
            StdArc::new(MockLlm::new(llm_raw)),
            StdArc::new(MockTts),
            StdArc::new(crate::repository::InMemoryRepository::default()),
        ))
    }

    fn session() -> Session {
        Session::new(
            "call-1".into(),
            "+966500000001".into(),
            "+966500000000".into(),
            "system prompt".into(),
            StdArc::new(Sequencer::new(640, 20)),
        )
    }

    #[tokio::test]
    async fn empty_transcript_does_not_advance_history() {
        let core = core_with("   ", "hello");
        let mut session = session();
        process_turn(&core, &mut session, vec![0u8; 320]).await;
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn a_full_turn_appends_user_and_assistant_history_and_enqueues_audio() {
        let raw = r#"[{"persona":"sara","text":"تفضل","emotion":"neutral","action":"none"}]"#;
        let core = core_with("أبغى موعد", raw);
        let mut session = session();
        process_turn(&core, &mut session, vec![0u8; 320]).await;

        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].role, "user");
        assert_eq!(session.total_turns, 1);
        assert!(!session.sequencer.is_empty().await);
    }

    #[tokio::test]
    async fn empty_utterance_buffer_is_a_noop() {
        let core = core_with("hi", "hi");
        let mut session = session();
        process_turn(&core, &mut session, vec![]).await;
        assert!(session.history.is_empty());
        assert_eq!(session.total_turns, 0);
    }
}
