//! TTS (text-to-speech) capability interface.

use async_trait::async_trait;

use super::Persona;

/// Synthesizes text to PCM16-16kHz audio for a given persona's voice.
#[async_trait]
pub trait TtsClient: Send + Sync {
    async fn synthesize(&self, text: &str, persona: Persona) -> anyhow::Result<Vec<u8>>;
}
