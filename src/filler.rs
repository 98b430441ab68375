//! Filler cache: short pre-synthesized utterances that mask provider
//! latency, retrieved by category, empathy trigger, or free-text context.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillerCategory {
    Thinking,
    Searching,
    Empathy,
    Acknowledgment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillerPhrase {
    pub id: String,
    pub category: FillerCategory,
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    pub text: String,
    /// Populated at load time if a matching audio file exists; absent
    /// entries are synthesized on demand (or skipped) by the caller.
    #[serde(skip)]
    pub pre_synthesized_pcm: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
struct FillerCatalogue {
    phrases: Vec<FillerPhrase>,
}

/// In-memory filler catalogue, ordered by category then declaration
/// order (for contextual scan precedence).
pub struct FillerCache {
    by_category: HashMap<FillerCategory, Vec<FillerPhrase>>,
    category_order: Vec<FillerCategory>,
}

impl FillerCache {
    /// Load from a JSON catalogue file if present, else fall back to the
    /// built-in default set.
    pub fn load(path: Option<&Path>) -> Self {
        let phrases = path
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|s| match serde_json::from_str::<FillerCatalogue>(&s) {
                Ok(cat) => Some(cat.phrases),
                Err(e) => {
                    warn!("failed to parse filler catalogue, using defaults: {e}");
                    None
                }
            })
            .unwrap_or_else(default_fillers);

        info!(count = phrases.len(), "loaded filler catalogue");
        Self::from_phrases(phrases)
    }

    fn from_phrases(phrases: Vec<FillerPhrase>) -> Self {
        let category_order = vec![
            FillerCategory::Thinking,
            FillerCategory::Searching,
            FillerCategory::Empathy,
            FillerCategory::Acknowledgment,
        ];
        let mut by_category: HashMap<FillerCategory, Vec<FillerPhrase>> = HashMap::new();
        for phrase in phrases {
            by_category.entry(phrase.category).or_default().push(phrase);
        }
        Self {
            by_category,
            category_order,
        }
    }

    /// Uniform random choice among a category's phrases.
    pub fn get_random(&self, category: FillerCategory) -> Option<&FillerPhrase> {
        self.by_category
            .get(&category)
            .and_then(|phrases| phrases.choose(&mut rand::rng()))
    }

    /// Returns an empathy phrase only if `user_text` contains one of its
    /// trigger keywords; `None` otherwise (never falls back).
    pub fn get_empathy(&self, user_text: &str) -> Option<&FillerPhrase> {
        let lower = user_text.to_lowercase();
        let candidates = self.by_category.get(&FillerCategory::Empathy)?;
        let matching: Vec<&FillerPhrase> = candidates
            .iter()
            .filter(|p| p.trigger_keywords.iter().any(|k| lower.contains(&k.to_lowercase())))
            .collect();
        matching.choose(&mut rand::rng()).copied()
    }

    /// Scans all categories' keywords in definition order; first match
    /// wins, else falls back to `thinking`.
    pub fn get_contextual(&self, user_text: &str) -> Option<&FillerPhrase> {
        let lower = user_text.to_lowercase();
        for category in &self.category_order {
            if let Some(phrases) = self.by_category.get(category) {
                for phrase in phrases {
                    if phrase.trigger_keywords.iter().any(|k| lower.contains(&k.to_lowercase())) {
                        return Some(phrase);
                    }
                }
            }
        }
        self.get_random(FillerCategory::Thinking)
    }
}

/// Built-in catalogue. Inspired by the original service's default filler
/// set but not a verbatim port: ids, keyword sets, and phrase text have
/// all been reworked here.
fn default_fillers() -> Vec<FillerPhrase> {
    fn p(id: &str, category: FillerCategory, keywords: &[&str], text: &str) -> FillerPhrase {
        FillerPhrase {
            id: id.to_string(),
            category,
            trigger_keywords: keywords.iter().map(|s| s.to_string()).collect(),
            text: text.to_string(),
            pre_synthesized_pcm: None,
        }
    }

    vec![
        p("thinking_1", FillerCategory::Thinking, &[], "خليني أشوف لك..."),
        p("thinking_2", FillerCategory::Thinking, &[], "ثانية وحدة..."),
        p("thinking_3", FillerCategory::Thinking, &[], "أها، تمام..."),
        p(
            "searching_1",
            FillerCategory::Searching,
            &["موعد", "دكتور", "appointment"],
            "خليني أدور لك على أقرب موعد متاح...",
        ),
        p(
            "searching_2",
            FillerCategory::Searching,
            &["تأمين", "insurance"],
            "ثانية، أتأكد لك من التأمين...",
        ),
        p(
            "empathy_1",
            FillerCategory::Empathy,
            &["وجع", "ألم", "تعبان", "pain"],
            "آسفة تسمع إنك تعبان، بنساعدك بأسرع وقت",
        ),
        p(
            "empathy_2",
            FillerCategory::Empathy,
            &["مستعجل", "urgent", "ضروري"],
            "فاهمة إنه مستعجل، خلني أشوف لك أقرب حل",
        ),
        p("ack_1", FillerCategory::Acknowledgment, &[], "تمام، فهمتك"),
        p("ack_2", FillerCategory::Acknowledgment, &[], "ماشي، أكيد"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_defaults_when_no_catalogue_file() {
        let cache = FillerCache::load(None);
        assert!(cache.get_random(FillerCategory::Thinking).is_some());
    }

    #[test]
    fn empathy_requires_keyword_match() {
        let cache = FillerCache::load(None);
        assert!(cache.get_empathy("أنا تعبان جداً").is_some());
        assert!(cache.get_empathy("أبغى موعد بكرة").is_none());
    }

    #[test]
    fn contextual_falls_back_to_thinking() {
        let cache = FillerCache::load(None);
        let phrase = cache.get_contextual("كلام ما له علاقة بشي").unwrap();
        assert_eq!(phrase.category, FillerCategory::Thinking);
    }

    #[test]
    fn contextual_matches_searching_before_falling_back() {
        let cache = FillerCache::load(None);
        let phrase = cache.get_contextual("أبغى أحجز موعد مع دكتور").unwrap();
        assert_eq!(phrase.category, FillerCategory::Searching);
    }
}
