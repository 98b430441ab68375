//! LLM capability interface and response-segment parsing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Persona;

/// Action a response segment asks the call controller to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    None,
    TransferPersona,
    BookAppointment,
    CheckInsurance,
    EndCall,
}

impl Default for ResponseAction {
    fn default() -> Self {
        ResponseAction::None
    }
}

/// Anything the LLM emits that isn't one of the recognized actions
/// decodes to `None`, per SPEC_FULL.md §9 ("Unknown `action` values
/// decode to `none`"), rather than failing the whole segment.
impl<'de> Deserialize<'de> for ResponseAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "transfer_persona" => ResponseAction::TransferPersona,
            "book_appointment" => ResponseAction::BookAppointment,
            "check_insurance" => ResponseAction::CheckInsurance,
            "end_call" => ResponseAction::EndCall,
            _ => ResponseAction::None,
        })
    }
}

/// One atomic (persona, text) unit of an LLM turn's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSegment {
    #[serde(default)]
    pub persona: Persona,
    pub text: String,
    #[serde(default)]
    pub emotion: String,
    #[serde(default)]
    pub action: ResponseAction,
}

/// One turn of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Read-only database context handed to the LLM for grounding (top-K
/// snapshot of doctors/insurance/appointments; the repository interface
/// owns the real storage).
#[derive(Debug, Clone, Default, Serialize)]
pub struct DbContext {
    pub doctors: Vec<String>,
    pub insurance: Vec<String>,
    pub todays_appointments: Vec<String>,
}

/// Generates a structured response for one conversational turn.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        user_text: &str,
        history: &[HistoryMessage],
        system_prompt: &str,
        db_context: &DbContext,
    ) -> anyhow::Result<Vec<ResponseSegment>>;
}

/// Parse a provider's raw text output into response segments.
///
/// Tries strict JSON-array decoding first (stripping a markdown code
/// fence if present); on any parse failure, wraps the raw text into a
/// single segment with default fields, per SPEC_FULL.md §4.3.
pub fn parse_response(raw: &str) -> Vec<ResponseSegment> {
    let trimmed = strip_code_fence(raw.trim());

    if let Ok(segments) = serde_json::from_str::<Vec<ResponseSegment>>(trimmed) {
        if !segments.is_empty() {
            return segments;
        }
    }

    vec![ResponseSegment {
        persona: Persona::Sara,
        text: raw.trim().to_string(),
        emotion: "neutral".to_string(),
        action: ResponseAction::None,
    }]
}

fn strip_code_fence(s: &str) -> &str {
    let s = s.strip_prefix("```json").or_else(|| s.strip_prefix("```")).unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_json_array() {
        let raw = r#"[{"persona":"sara","text":"hi","emotion":"neutral","action":"none"}]"#;
        let segments = parse_response(raw);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hi");
        assert_eq!(segments[0].persona, Persona::Sara);
    }

    #[test]
    fn parses_json_wrapped_in_code_fence() {
        let raw = "```json\n[{\"persona\":\"nexus\",\"text\":\"ok\"}]\n```";
        let segments = parse_response(raw);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].persona, Persona::Nexus);
    }

    #[test]
    fn falls_back_to_raw_text_segment() {
        let raw = "just plain text, not json";
        let segments = parse_response(raw);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, raw);
        assert_eq!(segments[0].persona, Persona::Sara);
        assert_eq!(segments[0].action, ResponseAction::None);
    }

    #[test]
    fn unknown_action_decodes_to_none_not_a_parse_failure() {
        let raw = r#"[{"persona":"sara","text":"hi","action":"self_destruct"}]"#;
        let segments = parse_response(raw);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hi");
        assert_eq!(segments[0].action, ResponseAction::None);
    }
}
