//! Deterministic in-memory capability mocks, used by tests and by a
//! capability-less local run. These are not provider SDKs.

use async_trait::async_trait;
use std::sync::Mutex;

use super::asr::{AsrClient, AsrResult};
use super::llm::{parse_response, DbContext, HistoryMessage, LlmClient, ResponseSegment};
use super::tts::TtsClient;
use super::Persona;

/// Returns a fixed transcript (or, if configured, a queued sequence of
/// transcripts) regardless of input audio.
pub struct MockAsr {
    queue: Mutex<Vec<String>>,
    default_text: String,
}

impl MockAsr {
    pub fn new(default_text: impl Into<String>) -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            default_text: default_text.into(),
        }
    }

    pub fn with_queue(queue: Vec<String>) -> Self {
        Self {
            queue: Mutex::new(queue),
            default_text: String::new(),
        }
    }
}

#[async_trait]
impl AsrClient for MockAsr {
    async fn transcribe(&self, pcm16_16k: &[u8], language: &str) -> anyhow::Result<AsrResult> {
        let text = {
            let mut q = self.queue.lock().unwrap();
            if q.is_empty() {
                self.default_text.clone()
            } else {
                q.remove(0)
            }
        };
        Ok(AsrResult {
            text,
            confidence: if pcm16_16k.is_empty() { 0.0 } else { 0.95 },
            language: language.to_string(),
            latency_ms: 5,
        })
    }
}

/// Echoes a canned response, or a queued sequence of raw-text responses
/// run through the same parser a real provider's output would go through.
pub struct MockLlm {
    queue: Mutex<Vec<String>>,
    default_response: String,
}

impl MockLlm {
    pub fn new(default_response: impl Into<String>) -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            default_response: default_response.into(),
        }
    }

    pub fn with_queue(queue: Vec<String>) -> Self {
        Self {
            queue: Mutex::new(queue),
            default_response: String::new(),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(
        &self,
        _user_text: &str,
        _history: &[HistoryMessage],
        _system_prompt: &str,
        _db_context: &DbContext,
    ) -> anyhow::Result<Vec<ResponseSegment>> {
        let raw = {
            let mut q = self.queue.lock().unwrap();
            if q.is_empty() {
                self.default_response.clone()
            } else {
                q.remove(0)
            }
        };
        Ok(parse_response(&raw))
    }
}

/// Synthesizes a fixed-duration silent PCM buffer proportional to text
/// length, so downstream pacing/sequencer logic has something real to
/// chunk without depending on a provider.
pub struct MockTts;

#[async_trait]
impl TtsClient for MockTts {
    async fn synthesize(&self, text: &str, _persona: Persona) -> anyhow::Result<Vec<u8>> {
        let ms = (text.len() as u32 * 60).clamp(200, 5000);
        let samples = (crate::codec::AI_SAMPLE_RATE * ms / 1000) as usize;
        Ok(vec![0u8; samples * 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_asr_returns_queued_then_default() {
        let asr = MockAsr::with_queue(vec!["hello".to_string()]);
        let first = asr.transcribe(&[1, 2], "ar").await.unwrap();
        assert_eq!(first.text, "hello");
        let second = asr.transcribe(&[1, 2], "ar").await.unwrap();
        assert_eq!(second.text, "");
    }

    #[tokio::test]
    async fn mock_tts_produces_nonempty_audio_for_nonempty_text() {
        let tts = MockTts;
        let audio = tts.synthesize("hello there", Persona::Sara).await.unwrap();
        assert!(!audio.is_empty());
        assert_eq!(audio.len() % 2, 0);
    }
}
