//! Enrichment pipeline for user-submitted word requests.
//!
//! Terminal outcomes land in the request's status and notes; nothing in
//! here propagates to the loop except through logging. Manual data on the
//! request short-circuits the model call; otherwise the fallback model list
//! is tried in order under a per-attempt timeout.

use crate::ai::{build_prompt, parse_senses, TextGenerator};
use crate::config::ForceFlags;
use crate::error::{Result, WorkerError};
use crate::media::MediaEngine;
use crate::models::{
    NewVocabulary, RequestStatus, SchemaCapabilities, Sense, WordRequest,
};
use crate::store::RowStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct RequestPipeline {
    rows: Arc<dyn RowStore>,
    media: Arc<MediaEngine>,
    generator: Option<Arc<dyn TextGenerator>>,
    models: Vec<String>,
    attempt_timeout: Duration,
    caps: SchemaCapabilities,
}

impl RequestPipeline {
    pub fn new(
        rows: Arc<dyn RowStore>,
        media: Arc<MediaEngine>,
        generator: Option<Arc<dyn TextGenerator>>,
        models: Vec<String>,
        attempt_timeout_seconds: u64,
        caps: SchemaCapabilities,
    ) -> Self {
        Self {
            rows,
            media,
            generator,
            models,
            attempt_timeout: Duration::from_secs(attempt_timeout_seconds),
            caps,
        }
    }

    /// Process one pending request to a terminal status.
    pub async fn process(&self, request: &WordRequest) {
        if request.word.trim().is_empty() {
            warn!(request = %request.id, "Request carries no word");
            self.mark(request.id, RequestStatus::Error, Some("Request contained no word"))
                .await;
            return;
        }

        let has_manual_data = request.translation.is_some();
        info!(
            request = %request.id,
            word = %request.word,
            manual = has_manual_data,
            "Processing word request"
        );

        let senses = if has_manual_data {
            vec![manual_sense(request)]
        } else {
            let Some(generator) = self.generator.as_deref() else {
                warn!(word = %request.word, "No generation key and no manual data");
                self.mark(
                    request.id,
                    RequestStatus::Error,
                    Some("Generation API key is not configured"),
                )
                .await;
                return;
            };
            match self.generate_senses(generator, &request.word).await {
                Ok(senses) => senses,
                Err(e) => {
                    error!(word = %request.word, "Generation failed: {e}");
                    self.mark(request.id, RequestStatus::Error, Some(&e.to_string()))
                        .await;
                    return;
                }
            }
        };

        let mut successes = 0usize;
        for mut sense in senses {
            if sense.word.trim().is_empty() {
                continue;
            }

            // Manual topic/category picks beat whatever the model chose.
            if let Some(topic) = &request.topic {
                sense.topic = Some(topic.clone());
            }
            if let Some(category) = &request.category {
                sense.category = Some(category.clone());
            }

            let word_id = match self.find_or_insert(&sense, request).await {
                Ok(Some(id)) => {
                    successes += 1;
                    id
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(word = %sense.word, "Sense lookup failed: {e}");
                    continue;
                }
            };

            if let Some(user_id) = request.user_id {
                if let Err(e) = self.rows.upsert_user_progress(user_id, word_id).await {
                    warn!(word = %sense.word, "Could not link word to user progress: {e}");
                }
            }
            if let Some(list_id) = request.target_list_id {
                match self.rows.upsert_list_item(list_id, word_id).await {
                    Ok(()) => info!(word = %sense.word, list = %list_id, "Word linked to list"),
                    Err(e) => warn!(word = %sense.word, "Could not link word to list: {e}"),
                }
            }
        }

        if successes > 0 {
            self.mark(request.id, RequestStatus::Processed, None).await;
        } else {
            self.mark(
                request.id,
                RequestStatus::Error,
                Some("Failed to insert or match any sense"),
            )
            .await;
        }
    }

    /// Try the fallback model list in order; the first non-empty reply is
    /// parsed and wins. Per-attempt timeouts count as model failures.
    async fn generate_senses(
        &self,
        generator: &dyn TextGenerator,
        word: &str,
    ) -> Result<Vec<Sense>> {
        let prompt = build_prompt(word);
        let mut last_error: Option<WorkerError> = None;

        for model in &self.models {
            match tokio::time::timeout(self.attempt_timeout, generator.generate(model, &prompt))
                .await
            {
                Ok(Ok(text)) => {
                    info!(model, "Model produced a response");
                    return parse_senses(&text);
                }
                Ok(Err(e)) => {
                    warn!(model, "Model attempt failed: {e}");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(model, "Model attempt timed out");
                    last_error = Some(WorkerError::GenerationTimeout);
                }
            }
        }

        Err(WorkerError::ModelsExhausted(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no models configured".to_string()),
        ))
    }

    /// Homonym disambiguation: a sense matches an existing record only when
    /// head word AND translation agree. Otherwise it becomes its own row,
    /// immediately followed by a media pass.
    async fn find_or_insert(
        &self,
        sense: &Sense,
        request: &WordRequest,
    ) -> Result<Option<Uuid>> {
        let existing = self.rows.vocabulary_by_word(&sense.word).await?;
        if let Some(row) = existing
            .iter()
            .find(|row| row.translation == sense.translation)
        {
            info!(word = %sense.word, id = %row.id, "Sense already in vocabulary, reusing");
            return Ok(Some(row.id));
        }

        let new_row = NewVocabulary {
            word: sense.word.clone(),
            translation: sense.translation.clone(),
            hanja: sense.hanja.clone(),
            topic: sense.topic.clone(),
            category: sense.category.clone(),
            level: sense.level.clone(),
            kind: sense.kind.clone(),
            example: sense.example.clone(),
            example_translation: sense.example_translation.clone(),
            synonyms: sense.synonyms.clone(),
            antonyms: sense.antonyms.clone(),
            collocations: sense.collocations.clone(),
            grammar_note: sense.grammar_note.clone(),
            user_id: request.user_id,
        };

        let inserted = match self.rows.insert_vocabulary(&new_row, self.caps).await {
            Ok(row) => row,
            Err(e) => {
                error!(word = %sense.word, "Vocabulary insert failed: {e}");
                return Ok(None);
            }
        };
        info!(word = %inserted.word, id = %inserted.id, "Vocabulary record inserted");

        // Media for the fresh row; anything that fails here is picked up by
        // the maintenance loop later.
        match self
            .media
            .enrich_vocabulary(&inserted, ForceFlags::default())
            .await
        {
            Ok(patch) if !patch.is_empty() => {
                if let Err(e) = self.rows.update_vocabulary(inserted.id, &patch).await {
                    warn!(id = %inserted.id, "Could not apply media patch: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(id = %inserted.id, "Media enrichment failed: {e}"),
        }

        Ok(Some(inserted.id))
    }

    async fn mark(&self, id: Uuid, status: RequestStatus, note: Option<&str>) {
        if let Err(e) = self.rows.update_request_status(id, status, note).await {
            error!(request = %id, "Could not update request status: {e}");
        }
    }
}

fn manual_sense(request: &WordRequest) -> Sense {
    Sense {
        word: request.word.clone(),
        translation: request.translation.clone(),
        topic: request.topic.clone(),
        category: request.category.clone(),
        kind: Some("word".to_string()),
        ..Default::default()
    }
}
