//! Per-call session state: conversation history, persona, metrics, and
//! the owned sequencer/VAD/utterance buffer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::capability::{HistoryMessage, Persona};
use crate::core::CallAdmission;
use crate::sequencer::Sequencer;
use crate::vad::Vad;

/// PCM bytes accumulated between `SPEECH_START` and `SPEECH_END`.
/// Invariant: length is always a multiple of 2 (sample-aligned).
#[derive(Default)]
pub struct UtteranceBuffer {
    bytes: Vec<u8>,
}

impl UtteranceBuffer {
    pub fn push(&mut self, pcm16: &[u8]) {
        self.bytes.extend_from_slice(pcm16);
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Drains and returns the buffer; always leaves it empty.
    pub fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

/// Per-turn latency breakdown, accumulated into the session's running
/// average.
#[derive(Debug, Clone, Default)]
pub struct TurnMetrics {
    pub asr_ms: u64,
    pub llm_ms: u64,
    pub tts_ms: u64,
    pub total_ms: u64,
    pub segments: u32,
    pub filler_used: bool,
}

/// Identity and lifecycle state for one active call.
pub struct Session {
    pub call_control_id: String,
    pub caller: String,
    pub called: String,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,

    pub persona: Persona,
    pub system_prompt: String,
    pub history: Vec<HistoryMessage>,

    pub utterance_buffer: UtteranceBuffer,
    pub vad: Vad,
    pub sequencer: Arc<Sequencer>,

    pub total_turns: u32,
    pub total_latency_ms: u64,
    current_turn: AtomicU64,

    /// Held for the lifetime of the call; releases the admission slot on
    /// drop. `None` for sessions built outside `Core::try_admit` (tests).
    admission: Option<CallAdmission>,
}

impl Session {
    pub fn new(call_control_id: String, caller: String, called: String, system_prompt: String, sequencer: Arc<Sequencer>) -> Self {
        Self {
            call_control_id,
            caller,
            called,
            created_at: Utc::now(),
            answered_at: None,
            persona: Persona::Sara,
            system_prompt,
            history: Vec::new(),
            utterance_buffer: UtteranceBuffer::default(),
            vad: Vad::new(crate::vad::VadConfig::default()),
            sequencer,
            total_turns: 0,
            total_latency_ms: 0,
            current_turn: AtomicU64::new(0),
            admission: None,
        }
    }

    /// Attaches the call's admission guard, so the slot frees automatically
    /// when this session is dropped (normally on hangup).
    pub fn with_admission(mut self, admission: CallAdmission) -> Self {
        self.admission = Some(admission);
        self
    }

    pub fn add_message(&mut self, role: impl Into<String>, content: impl Into<String>) {
        self.history.push(HistoryMessage {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.total_turns == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total_turns as f64
        }
    }

    pub fn record_turn(&mut self, metrics: &TurnMetrics) {
        self.total_turns += 1;
        self.total_latency_ms += metrics.total_ms;
    }

    /// Starts a new turn, invalidating any segments still in flight from
    /// a prior, barge-in-cancelled turn.
    pub fn begin_turn(&self) -> u64 {
        self.current_turn.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_turn_id(&self) -> u64 {
        self.current_turn.load(Ordering::SeqCst)
    }

    pub fn is_turn_current(&self, turn_id: u64) -> bool {
        self.current_turn.load(Ordering::SeqCst) == turn_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            "call-1".into(),
            "+966500000001".into(),
            "+966500000000".into(),
            "system prompt".into(),
            Arc::new(Sequencer::new(640, 20)),
        )
    }

    #[test]
    fn begin_turn_invalidates_previous_turn_id() {
        let s = session();
        let t1 = s.begin_turn();
        assert!(s.is_turn_current(t1));
        let t2 = s.begin_turn();
        assert!(!s.is_turn_current(t1));
        assert!(s.is_turn_current(t2));
    }

    #[test]
    fn average_latency_is_zero_with_no_turns() {
        let s = session();
        assert_eq!(s.average_latency_ms(), 0.0);
    }

    #[test]
    fn utterance_buffer_drains_to_empty() {
        let mut buf = UtteranceBuffer::default();
        buf.push(&[1, 2, 3, 4]);
        assert!(!buf.is_empty());
        let drained = buf.drain();
        assert_eq!(drained, vec![1, 2, 3, 4]);
        assert!(buf.is_empty());
    }
}
