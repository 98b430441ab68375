//! ASR (speech-to-text) capability interface.

use async_trait::async_trait;

/// Result of a single ASR call.
#[derive(Debug, Clone)]
pub struct AsrResult {
    pub text: String,
    pub confidence: f32,
    pub language: String,
    pub latency_ms: u64,
}

/// Transcribes PCM16-16kHz audio to text. Implementations wrap a
/// concrete provider SDK; none ship here.
#[async_trait]
pub trait AsrClient: Send + Sync {
    async fn transcribe(&self, pcm16_16k: &[u8], language: &str) -> anyhow::Result<AsrResult>;
}
