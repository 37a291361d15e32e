//! Media synthesis: per-field adapters over black-box TTS and image-search
//! services, plus the aggregator that merges their results into one patch.

mod engine;
mod http;

pub use engine::MediaEngine;
pub use http::{HttpImageSource, HttpSpeechSynthesizer};

use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;

    /// Render SSML markup (multi-voice dialogue with pauses).
    async fn synthesize_ssml(&self, ssml: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub audio_bucket: String,
    pub image_bucket: String,
    pub primary_voice: String,
    pub secondary_voice: String,
    /// Output below this many bytes counts as a synthesis failure.
    pub min_media_bytes: usize,
}

/// Deterministic object key stem for a piece of source text. Keys hash the
/// source, not the rendered bytes, so re-synthesis overwrites in place.
pub fn content_key(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[\(\[].*?[\)\]]").expect("valid regex"));
static PARENTHESIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(.*?\)").expect("valid regex"));
static DIALOGUE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[AaBb가나]\s*:").expect("valid regex"));
static PRIMARY_SPEAKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[Aa가]\s*:").expect("valid regex"));
static SECONDARY_SPEAKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[Bb나]\s*:").expect("valid regex"));

/// Drop bracketed glosses (Hanja, clarifications) before synthesis.
pub fn clean_for_tts(text: &str) -> String {
    BRACKETED.replace_all(text, "").trim().to_string()
}

/// Reduce a translation to an image search query: no parenthesized glosses,
/// first clause only.
pub fn image_query(translation: &str) -> String {
    let stripped = PARENTHESIZED.replace_all(translation, "");
    stripped
        .split([';', ','])
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Whether example text is a two-party dialogue.
pub fn is_dialogue(text: &str) -> bool {
    DIALOGUE_MARKER.is_match(text)
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Build SSML for a two-party dialogue: speaker-marked lines alternate
/// between the two voices with a fixed pause between utterances. Returns
/// `None` when no speakable content remains after cleaning.
pub fn build_dialogue_ssml(text: &str, primary_voice: &str, secondary_voice: &str) -> Option<String> {
    let mut parts = vec![
        r#"<speak version="1.0" xmlns="http://www.w3.org/2001/10/synthesis" xml:lang="ko-KR">"#
            .to_string(),
    ];
    let mut current_voice = primary_voice;
    let mut has_content = false;

    let normalized = text.replace("\r\n", "\n");
    for raw_line in normalized.split('\n') {
        let mut line = raw_line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if PRIMARY_SPEAKER.is_match(&line) {
            current_voice = primary_voice;
            line = PRIMARY_SPEAKER.replace(&line, "").trim().to_string();
        } else if SECONDARY_SPEAKER.is_match(&line) {
            current_voice = secondary_voice;
            line = SECONDARY_SPEAKER.replace(&line, "").trim().to_string();
        }

        let speakable = escape_xml(&clean_for_tts(&line));
        if speakable.is_empty() {
            continue;
        }

        if has_content {
            parts.push(r#"<break time="500ms"/>"#.to_string());
        }
        parts.push(format!(r#"<voice name="{current_voice}">{speakable}</voice>"#));
        has_content = true;
    }

    if !has_content {
        return None;
    }
    parts.push("</speak>".to_string());
    Some(parts.concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_key_is_stable_and_input_sensitive() {
        assert_eq!(content_key("사과"), content_key("사과"));
        assert_ne!(content_key("사과"), content_key("사전"));
    }

    #[test]
    fn clean_for_tts_strips_bracketed_glosses() {
        assert_eq!(clean_for_tts("학교 (學校)"), "학교");
        assert_eq!(clean_for_tts("가다 [irregular]"), "가다");
        assert_eq!(clean_for_tts("먹다"), "먹다");
    }

    #[test]
    fn image_query_takes_first_clause() {
        assert_eq!(image_query("woman (adult)"), "woman");
        assert_eq!(image_query("apple; fruit"), "apple");
        assert_eq!(image_query("to go, to leave"), "to go");
    }

    #[test]
    fn dialogue_detection() {
        assert!(is_dialogue("A: 안녕하세요\nB: 안녕하세요"));
        assert!(is_dialogue("가: 뭐 해요?\n나: 공부해요."));
        assert!(!is_dialogue("저는 학교에 가요."));
    }

    #[test]
    fn dialogue_ssml_alternates_voices_with_pauses() {
        let ssml =
            build_dialogue_ssml("A: 안녕하세요\nB: 네, 안녕하세요", "voice-f", "voice-m").unwrap();
        assert!(ssml.starts_with("<speak"));
        assert!(ssml.contains(r#"<voice name="voice-f">안녕하세요</voice>"#));
        assert!(ssml.contains(r#"<break time="500ms"/>"#));
        assert!(ssml.contains(r#"<voice name="voice-m">네, 안녕하세요</voice>"#));
        assert!(ssml.ends_with("</speak>"));
    }

    #[test]
    fn dialogue_ssml_escapes_markup_and_strips_hanja() {
        let ssml = build_dialogue_ssml("가: 1 < 2 & 3 (一二三)", "f", "m").unwrap();
        assert!(ssml.contains("1 &lt; 2 &amp; 3"));
        assert!(!ssml.contains("一二三"));
    }

    #[test]
    fn empty_dialogue_yields_none() {
        assert!(build_dialogue_ssml("A:\nB:  ", "f", "m").is_none());
        assert!(build_dialogue_ssml("", "f", "m").is_none());
    }
}
