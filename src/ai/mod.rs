//! Generative-model seam: prompt construction and response normalization.
//!
//! The model's reply is resolved into a tagged payload exactly once, at this
//! boundary; downstream code only ever sees `Vec<Sense>`.

mod client;

pub use client::HttpTextGenerator;

use crate::error::{Result, WorkerError};
use crate::models::Sense;
use async_trait::async_trait;
use serde::Deserialize;

/// Most senses of one homonym worth keeping.
const MAX_SENSES: usize = 3;

pub const VALID_TOPICS: &[&str] = &[
    "Daily Life",
    "Economics",
    "Politics",
    "Society",
    "Culture",
    "Health",
    "Environment",
    "Science",
    "Education",
    "History",
    "Art",
    "Sports",
    "Weather",
    "Shopping",
    "Travel",
    "Food",
    "Work",
    "Feelings",
    "Personality",
    "Appearance",
    "Hobbies",
    "Other",
];

pub const VALID_CATEGORIES: &[&str] = &[
    "Noun",
    "Verb",
    "Adjective",
    "Adverb",
    "Particle",
    "Suffix",
    "Pronoun",
    "Number",
    "Interjection",
    "Grammar",
];

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// One generation attempt against one named model.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String>;
}

/// Build the enrichment prompt for one submitted word.
pub fn build_prompt(word: &str) -> String {
    format!(
        r#"You are an expert Korean language tutor building flashcard data.
Analyze the input: '{word}'.

### Identification
- Detect typos and romanization and use the corrected Korean word.
- If the input is gibberish or not a valid Korean word, return: {{"error": "Invalid input"}}

### Analysis
- If the word has multiple distinct meanings (homonyms), return a JSON ARRAY of objects (max {MAX_SENSES} most common).
- If it has a single meaning, return a single JSON object.
- Output ONLY the JSON, no Markdown fences.

### Fields per object
- "word": corrected Korean word
- "translation": concise English translation (1-3 words)
- "hanja": Hanja characters if applicable, else empty string
- "topic": one of: {topics}
- "category": one of: {categories}
- "level": one of "beginner", "intermediate", "advanced"
- "example": a natural Korean sentence using the word in polite informal style
- "example_translation": English translation of the example
- "synonyms": comma-separated Korean synonyms for this specific meaning, max 3, empty if none
- "antonyms": comma-separated Korean antonyms for this specific meaning, max 3, empty if none
- "collocations": common word pairings, max 3
- "grammar_note": short usage or conjugation note, or Hanja breakdown
- "kind": "word" or "grammar"

Topic and category MUST be exactly from the provided lists; use "Other" when unsure.

Input: '{word}'
"#,
        topics = VALID_TOPICS.join(", "),
        categories = VALID_CATEGORIES.join(", "),
    )
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerationPayload {
    Rejection { error: String },
    Multiple(Vec<Sense>),
    Single(Sense),
}

/// Normalize a raw model reply into senses. Markdown fences are tolerated;
/// everything else about the shape is strict.
pub fn parse_senses(raw: &str) -> Result<Vec<Sense>> {
    let cleaned = strip_code_fences(raw).trim();

    let payload: GenerationPayload = serde_json::from_str(cleaned)
        .map_err(|e| WorkerError::MalformedResponse(format!("unparsable JSON: {e}")))?;

    match payload {
        GenerationPayload::Rejection { error } => {
            if error.eq_ignore_ascii_case("invalid input") {
                Err(WorkerError::GenerationRejected)
            } else {
                Err(WorkerError::MalformedResponse(format!(
                    "model signalled error: {error}"
                )))
            }
        }
        GenerationPayload::Multiple(senses) => {
            let senses: Vec<Sense> = senses
                .into_iter()
                .filter(|s| !s.word.trim().is_empty())
                .take(MAX_SENSES)
                .collect();
            if senses.is_empty() {
                Err(WorkerError::MalformedResponse(
                    "response contained no usable senses".to_string(),
                ))
            } else {
                Ok(senses)
            }
        }
        GenerationPayload::Single(sense) => {
            if sense.word.trim().is_empty() {
                Err(WorkerError::MalformedResponse(
                    "response contained no usable senses".to_string(),
                ))
            } else {
                Ok(vec![sense])
            }
        }
    }
}

fn strip_code_fences(raw: &str) -> &str {
    if let Some(start) = raw.find("```json") {
        let body = &raw[start + 7..];
        if let Some(end) = body.find("```") {
            return &body[..end];
        }
        return body;
    }
    if let Some(start) = raw.find("```") {
        let body = &raw[start + 3..];
        if let Some(end) = body.find("```") {
            return &body[..end];
        }
        return body;
    }
    raw
}

/// Canned-response generator for tests and offline runs.
pub struct MockGenerator {
    response: std::sync::Mutex<Option<String>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockGenerator {
    pub fn with_response(response: &str) -> Self {
        Self {
            response: std::sync::Mutex::new(Some(response.to_string())),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: std::sync::Mutex::new(None),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, _model: &str, _prompt: &str) -> Result<String> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match self.response.lock().expect("mock poisoned").clone() {
            Some(response) => Ok(response),
            None => Err(WorkerError::GenerationFailed(
                "mock generator configured to fail".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_object_yields_one_sense() {
        let raw = r#"{"word": "사과", "translation": "apple", "topic": "Food"}"#;
        let senses = parse_senses(raw).unwrap();
        assert_eq!(senses.len(), 1);
        assert_eq!(senses[0].word, "사과");
        assert_eq!(senses[0].translation.as_deref(), Some("apple"));
    }

    #[test]
    fn array_yields_multiple_senses() {
        let raw = r#"[
            {"word": "사과", "translation": "apple"},
            {"word": "사과", "translation": "apology"}
        ]"#;
        let senses = parse_senses(raw).unwrap();
        assert_eq!(senses.len(), 2);
    }

    #[test]
    fn markdown_fences_are_stripped() {
        let raw = "```json\n{\"word\": \"사과\", \"translation\": \"apple\"}\n```";
        let senses = parse_senses(raw).unwrap();
        assert_eq!(senses[0].word, "사과");
    }

    #[test]
    fn explicit_rejection_is_surfaced() {
        let raw = r#"{"error": "Invalid input"}"#;
        assert!(matches!(
            parse_senses(raw),
            Err(WorkerError::GenerationRejected)
        ));
    }

    #[test]
    fn other_error_payloads_are_malformed() {
        let raw = r#"{"error": "quota exceeded"}"#;
        assert!(matches!(
            parse_senses(raw),
            Err(WorkerError::MalformedResponse(_))
        ));
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(
            parse_senses("I cannot help with that."),
            Err(WorkerError::MalformedResponse(_))
        ));
    }

    #[test]
    fn senses_beyond_the_cap_are_dropped() {
        let raw = r#"[
            {"word": "눈", "translation": "eye"},
            {"word": "눈", "translation": "snow"},
            {"word": "눈", "translation": "bud"},
            {"word": "눈", "translation": "mesh"}
        ]"#;
        assert_eq!(parse_senses(raw).unwrap().len(), 3);
    }

    #[test]
    fn blank_words_are_filtered() {
        let raw = r#"[{"word": "  "}, {"word": "눈", "translation": "snow"}]"#;
        let senses = parse_senses(raw).unwrap();
        assert_eq!(senses.len(), 1);
        assert_eq!(senses[0].word, "눈");
    }

    #[test]
    fn prompt_mentions_the_input_and_topics() {
        let prompt = build_prompt("테스트");
        assert!(prompt.contains("테스트"));
        assert!(prompt.contains("Daily Life"));
        assert!(prompt.contains("Noun"));
    }
}
