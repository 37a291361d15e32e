use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Where a vocabulary image came from. User uploads are never overwritten by
/// the worker; generated images may be regenerated under force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "image_origin", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    UserProvided,
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "request_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Processed,
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processed => "processed",
            RequestStatus::Error => "error",
        }
    }
}

/// One row of the `vocabulary` table.
#[derive(Debug, Clone, FromRow)]
pub struct VocabularyRecord {
    pub id: Uuid,
    pub word: String,
    pub translation: Option<String>,
    pub hanja: Option<String>,
    pub topic: Option<String>,
    pub category: Option<String>,
    pub level: Option<String>,
    pub kind: Option<String>,
    pub example: Option<String>,
    pub example_translation: Option<String>,
    pub synonyms: Option<String>,
    pub antonyms: Option<String>,
    pub collocations: Option<String>,
    /// Optional column; older schemas don't have it.
    #[sqlx(default)]
    pub grammar_note: Option<String>,
    pub audio_url: Option<String>,
    pub audio_alt_url: Option<String>,
    pub example_audio_url: Option<String>,
    pub image_url: Option<String>,
    pub image_origin: Option<ImageOrigin>,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Partial update for a vocabulary row. Each populated field becomes one SET
/// clause of a single update-by-id statement; an empty patch is never sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VocabularyPatch {
    pub audio_url: Option<String>,
    pub audio_alt_url: Option<String>,
    pub example_audio_url: Option<String>,
    pub image_url: Option<String>,
    pub image_origin: Option<ImageOrigin>,
}

impl VocabularyPatch {
    pub fn is_empty(&self) -> bool {
        self.audio_url.is_none()
            && self.audio_alt_url.is_none()
            && self.example_audio_url.is_none()
            && self.image_url.is_none()
            && self.image_origin.is_none()
    }

    /// Absorb another partial result; later writers win on overlap, though
    /// adapters each own a disjoint set of fields.
    pub fn merge(&mut self, other: VocabularyPatch) {
        if other.audio_url.is_some() {
            self.audio_url = other.audio_url;
        }
        if other.audio_alt_url.is_some() {
            self.audio_alt_url = other.audio_alt_url;
        }
        if other.example_audio_url.is_some() {
            self.example_audio_url = other.example_audio_url;
        }
        if other.image_url.is_some() {
            self.image_url = other.image_url;
        }
        if other.image_origin.is_some() {
            self.image_origin = other.image_origin;
        }
    }

    /// Column names this patch would touch.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut cols = Vec::new();
        if self.audio_url.is_some() {
            cols.push("audio_url");
        }
        if self.audio_alt_url.is_some() {
            cols.push("audio_alt_url");
        }
        if self.example_audio_url.is_some() {
            cols.push("example_audio_url");
        }
        if self.image_url.is_some() {
            cols.push("image_url");
        }
        if self.image_origin.is_some() {
            cols.push("image_origin");
        }
        cols
    }
}

/// Insert payload for a new vocabulary row. Only known-safe columns appear
/// here; `grammar_note` is dropped at insert time when the live schema lacks
/// the column.
#[derive(Debug, Clone, Default)]
pub struct NewVocabulary {
    pub word: String,
    pub translation: Option<String>,
    pub hanja: Option<String>,
    pub topic: Option<String>,
    pub category: Option<String>,
    pub level: Option<String>,
    pub kind: Option<String>,
    pub example: Option<String>,
    pub example_translation: Option<String>,
    pub synonyms: Option<String>,
    pub antonyms: Option<String>,
    pub collocations: Option<String>,
    pub grammar_note: Option<String>,
    pub user_id: Option<Uuid>,
}

/// One row of the `word_requests` table.
#[derive(Debug, Clone, FromRow)]
pub struct WordRequest {
    pub id: Uuid,
    pub word: String,
    pub translation: Option<String>,
    pub topic: Option<String>,
    pub category: Option<String>,
    pub target_list_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub status: RequestStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One row of the `quotes` table.
#[derive(Debug, Clone, FromRow)]
pub struct QuoteRecord {
    pub id: Uuid,
    pub text: String,
    pub audio_url: Option<String>,
}

/// Optional-column flags probed once at startup and passed by value into the
/// request pipeline.
#[derive(Debug, Clone, Copy)]
pub struct SchemaCapabilities {
    pub grammar_note: bool,
}

impl Default for SchemaCapabilities {
    fn default() -> Self {
        Self { grammar_note: true }
    }
}

/// One sense of a head word as returned by the generation model (or built
/// from a request's manual fields).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sense {
    pub word: String,
    #[serde(default)]
    pub translation: Option<String>,
    #[serde(default)]
    pub hanja: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub example: Option<String>,
    #[serde(default)]
    pub example_translation: Option<String>,
    #[serde(default)]
    pub synonyms: Option<String>,
    #[serde(default)]
    pub antonyms: Option<String>,
    #[serde(default)]
    pub collocations: Option<String>,
    #[serde(default)]
    pub grammar_note: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_patch_has_no_columns() {
        let patch = VocabularyPatch::default();
        assert!(patch.is_empty());
        assert!(patch.columns().is_empty());
    }

    #[test]
    fn merge_unions_disjoint_fields() {
        let mut a = VocabularyPatch {
            audio_url: Some("https://cdn/a.mp3".into()),
            ..Default::default()
        };
        let b = VocabularyPatch {
            image_url: Some("https://cdn/a.jpg".into()),
            image_origin: Some(ImageOrigin::Generated),
            ..Default::default()
        };
        a.merge(b);
        assert_eq!(a.columns(), vec!["audio_url", "image_url", "image_origin"]);
    }
}
