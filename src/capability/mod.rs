//! Capability clients: ASR, LLM, and TTS as pluggable async interfaces.
//!
//! Concrete provider SDKs are out of scope; only the trait seams and a
//! deterministic in-memory mock of each ship here.

pub mod asr;
pub mod llm;
pub mod mock;
pub mod tts;

pub use asr::{AsrClient, AsrResult};
pub use llm::{LlmClient, ResponseAction, ResponseSegment};
pub use mock::{MockAsr, MockLlm, MockTts};
pub use tts::TtsClient;

/// Which voice persona a response segment is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    Sara,
    Nexus,
}

impl Default for Persona {
    fn default() -> Self {
        Persona::Sara
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Persona::Sara => write!(f, "sara"),
            Persona::Nexus => write!(f, "nexus"),
        }
    }
}
