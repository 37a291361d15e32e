//! Row store seam: every database operation the worker needs, behind one
//! trait so loops and pipelines can be exercised against in-memory fakes.

mod postgres;

pub use postgres::PgRowStore;

use crate::error::Result;
use crate::models::{
    NewVocabulary, QuoteRecord, RequestStatus, SchemaCapabilities, VocabularyPatch,
    VocabularyRecord, WordRequest,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Reference columns the integrity reconciler can null out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaColumn {
    AudioUrl,
    AudioAltUrl,
    ExampleAudioUrl,
    ImageUrl,
}

impl MediaColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaColumn::AudioUrl => "audio_url",
            MediaColumn::AudioAltUrl => "audio_alt_url",
            MediaColumn::ExampleAudioUrl => "example_audio_url",
            MediaColumn::ImageUrl => "image_url",
        }
    }

    pub fn value<'a>(&self, record: &'a VocabularyRecord) -> Option<&'a str> {
        match self {
            MediaColumn::AudioUrl => record.audio_url.as_deref(),
            MediaColumn::AudioAltUrl => record.audio_alt_url.as_deref(),
            MediaColumn::ExampleAudioUrl => record.example_audio_url.as_deref(),
            MediaColumn::ImageUrl => record.image_url.as_deref(),
        }
    }
}

/// Filters for the maintenance backlog fetch.
#[derive(Debug, Clone, Default)]
pub struct BacklogFilter {
    /// Fetch rows regardless of missing derived fields (force modes).
    pub include_complete: bool,
    /// Case-insensitive substring match on topic.
    pub topic: Option<String>,
    /// Exact match on the head word.
    pub word: Option<String>,
}

#[async_trait]
pub trait RowStore: Send + Sync {
    /// Verify required columns exist and report optional-column flags.
    async fn schema_capabilities(&self) -> Result<SchemaCapabilities>;

    async fn pending_requests(&self, limit: i64) -> Result<Vec<WordRequest>>;

    async fn update_request_status(
        &self,
        id: Uuid,
        status: RequestStatus,
        note: Option<&str>,
    ) -> Result<()>;

    /// Flip all error-status requests back to pending; returns how many.
    async fn reset_errored_requests(&self) -> Result<u64>;

    async fn vocabulary_by_word(&self, word: &str) -> Result<Vec<VocabularyRecord>>;

    async fn insert_vocabulary(
        &self,
        row: &NewVocabulary,
        caps: SchemaCapabilities,
    ) -> Result<VocabularyRecord>;

    async fn update_vocabulary(&self, id: Uuid, patch: &VocabularyPatch) -> Result<()>;

    /// Rows missing any derived media field (or any row under
    /// `include_complete`), with optional topic/word filters. Quarantined
    /// ids are excluded in the query; force modes page with `offset`
    /// instead.
    async fn vocabulary_backlog(
        &self,
        filter: &BacklogFilter,
        exclude: &[Uuid],
        limit: i64,
        offset: i64,
    ) -> Result<Vec<VocabularyRecord>>;

    /// Stable page over the whole table, for the reconciler.
    async fn vocabulary_page(&self, offset: i64, limit: i64) -> Result<Vec<VocabularyRecord>>;

    async fn quotes_missing_audio(
        &self,
        include_complete: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QuoteRecord>>;

    async fn update_quote_audio(&self, id: Uuid, url: &str) -> Result<()>;

    /// Null out broken media references (image also clears its provenance).
    async fn clear_media_refs(&self, id: Uuid, columns: &[MediaColumn]) -> Result<()>;

    async fn upsert_user_progress(&self, user_id: Uuid, word_id: Uuid) -> Result<()>;

    async fn upsert_list_item(&self, list_id: Uuid, word_id: Uuid) -> Result<()>;
}
