use super::{BacklogFilter, MediaColumn, RowStore};
use crate::error::{Result, WorkerError};
use crate::models::{
    NewVocabulary, QuoteRecord, RequestStatus, SchemaCapabilities, VocabularyPatch,
    VocabularyRecord, WordRequest,
};
use crate::retry;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

/// Columns the worker cannot run without, per table.
const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "vocabulary",
        &[
            "id",
            "word",
            "translation",
            "topic",
            "category",
            "level",
            "kind",
            "example",
            "audio_url",
            "audio_alt_url",
            "example_audio_url",
            "image_url",
            "image_origin",
            "user_id",
            "created_at",
        ],
    ),
    (
        "word_requests",
        &[
            "id",
            "word",
            "translation",
            "topic",
            "category",
            "status",
            "notes",
            "target_list_id",
            "user_id",
            "created_at",
        ],
    ),
    ("quotes", &["id", "text", "audio_url"]),
];

#[derive(Debug, Clone)]
pub struct PgRowStore {
    pool: PgPool,
}

impl PgRowStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table_columns(&self, table: &str) -> Result<HashSet<String>> {
        let columns: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name = $1",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        Ok(columns.into_iter().collect())
    }
}

#[async_trait]
impl RowStore for PgRowStore {
    async fn schema_capabilities(&self) -> Result<SchemaCapabilities> {
        info!("Checking database schema");
        let mut caps = SchemaCapabilities::default();

        for (table, required) in REQUIRED_COLUMNS {
            let present = retry::execute("row_store.table_columns", || async {
                self.table_columns(table).await
            })
            .await?;

            for column in *required {
                if !present.contains(*column) {
                    return Err(WorkerError::MissingColumn {
                        table: table.to_string(),
                        column: column.to_string(),
                    });
                }
            }

            if *table == "vocabulary" && !present.contains("grammar_note") {
                warn!("Column vocabulary.grammar_note is missing; grammar notes will not be saved");
                caps.grammar_note = false;
            }
        }

        Ok(caps)
    }

    async fn pending_requests(&self, limit: i64) -> Result<Vec<WordRequest>> {
        retry::execute("row_store.pending_requests", || async {
            let rows = sqlx::query_as::<_, WordRequest>(
                "SELECT * FROM word_requests WHERE status = $1 ORDER BY created_at ASC LIMIT $2",
            )
            .bind(RequestStatus::Pending)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await
    }

    async fn update_request_status(
        &self,
        id: Uuid,
        status: RequestStatus,
        note: Option<&str>,
    ) -> Result<()> {
        retry::execute("row_store.update_request_status", || async {
            match note {
                Some(note) => {
                    sqlx::query("UPDATE word_requests SET status = $1, notes = $2 WHERE id = $3")
                        .bind(status)
                        .bind(note)
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                }
                None => {
                    sqlx::query("UPDATE word_requests SET status = $1 WHERE id = $2")
                        .bind(status)
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn reset_errored_requests(&self) -> Result<u64> {
        retry::execute("row_store.reset_errored_requests", || async {
            let result = sqlx::query("UPDATE word_requests SET status = $1 WHERE status = $2")
                .bind(RequestStatus::Pending)
                .bind(RequestStatus::Error)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn vocabulary_by_word(&self, word: &str) -> Result<Vec<VocabularyRecord>> {
        retry::execute("row_store.vocabulary_by_word", || async {
            let rows =
                sqlx::query_as::<_, VocabularyRecord>("SELECT * FROM vocabulary WHERE word = $1")
                    .bind(word)
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        })
        .await
    }

    async fn insert_vocabulary(
        &self,
        row: &NewVocabulary,
        caps: SchemaCapabilities,
    ) -> Result<VocabularyRecord> {
        retry::execute("row_store.insert_vocabulary", || async {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO vocabulary (word, translation, hanja, topic, category, level, \
                 kind, example, example_translation, synonyms, antonyms, collocations, user_id",
            );
            if caps.grammar_note {
                qb.push(", grammar_note");
            }
            qb.push(") VALUES (");
            {
                let mut values = qb.separated(", ");
                values.push_bind(&row.word);
                values.push_bind(&row.translation);
                values.push_bind(&row.hanja);
                values.push_bind(&row.topic);
                values.push_bind(&row.category);
                values.push_bind(&row.level);
                values.push_bind(&row.kind);
                values.push_bind(&row.example);
                values.push_bind(&row.example_translation);
                values.push_bind(&row.synonyms);
                values.push_bind(&row.antonyms);
                values.push_bind(&row.collocations);
                values.push_bind(row.user_id);
                if caps.grammar_note {
                    values.push_bind(&row.grammar_note);
                }
            }
            qb.push(") RETURNING *");

            let inserted = qb
                .build_query_as::<VocabularyRecord>()
                .fetch_one(&self.pool)
                .await?;
            Ok(inserted)
        })
        .await
    }

    async fn update_vocabulary(&self, id: Uuid, patch: &VocabularyPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        retry::execute("row_store.update_vocabulary", || async {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE vocabulary SET ");
            {
                let mut assignments = qb.separated(", ");
                if let Some(url) = &patch.audio_url {
                    assignments.push("audio_url = ");
                    assignments.push_bind_unseparated(url);
                }
                if let Some(url) = &patch.audio_alt_url {
                    assignments.push("audio_alt_url = ");
                    assignments.push_bind_unseparated(url);
                }
                if let Some(url) = &patch.example_audio_url {
                    assignments.push("example_audio_url = ");
                    assignments.push_bind_unseparated(url);
                }
                if let Some(url) = &patch.image_url {
                    assignments.push("image_url = ");
                    assignments.push_bind_unseparated(url);
                }
                if let Some(origin) = patch.image_origin {
                    assignments.push("image_origin = ");
                    assignments.push_bind_unseparated(origin);
                }
            }
            qb.push(" WHERE id = ");
            qb.push_bind(id);

            qb.build().execute(&self.pool).await?;
            Ok(())
        })
        .await
    }

    async fn vocabulary_backlog(
        &self,
        filter: &BacklogFilter,
        exclude: &[Uuid],
        limit: i64,
        offset: i64,
    ) -> Result<Vec<VocabularyRecord>> {
        retry::execute("row_store.vocabulary_backlog", || async {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM vocabulary");
            let mut clause = " WHERE ";

            if !filter.include_complete {
                qb.push(clause).push(
                    "(audio_url IS NULL OR audio_alt_url IS NULL \
                     OR example_audio_url IS NULL OR image_url IS NULL)",
                );
                clause = " AND ";
            }
            if let Some(topic) = &filter.topic {
                qb.push(clause).push("topic ILIKE ");
                qb.push_bind(format!("%{topic}%"));
                clause = " AND ";
            }
            if let Some(word) = &filter.word {
                qb.push(clause).push("word = ");
                qb.push_bind(word);
                clause = " AND ";
            }
            if !exclude.is_empty() {
                qb.push(clause).push("id <> ALL(");
                qb.push_bind(exclude.to_vec());
                qb.push(")");
            }
            qb.push(" ORDER BY created_at ASC LIMIT ");
            qb.push_bind(limit);
            qb.push(" OFFSET ");
            qb.push_bind(offset);

            let rows = qb
                .build_query_as::<VocabularyRecord>()
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        })
        .await
    }

    async fn vocabulary_page(&self, offset: i64, limit: i64) -> Result<Vec<VocabularyRecord>> {
        retry::execute("row_store.vocabulary_page", || async {
            let rows = sqlx::query_as::<_, VocabularyRecord>(
                "SELECT * FROM vocabulary ORDER BY id LIMIT $1 OFFSET $2",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await
    }

    async fn quotes_missing_audio(
        &self,
        include_complete: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QuoteRecord>> {
        retry::execute("row_store.quotes_missing_audio", || async {
            let sql = if include_complete {
                "SELECT * FROM quotes ORDER BY id LIMIT $1 OFFSET $2"
            } else {
                "SELECT * FROM quotes WHERE audio_url IS NULL OR audio_url = '' \
                 ORDER BY id LIMIT $1 OFFSET $2"
            };
            let rows = sqlx::query_as::<_, QuoteRecord>(sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        })
        .await
    }

    async fn update_quote_audio(&self, id: Uuid, url: &str) -> Result<()> {
        retry::execute("row_store.update_quote_audio", || async {
            sqlx::query("UPDATE quotes SET audio_url = $1 WHERE id = $2")
                .bind(url)
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn clear_media_refs(&self, id: Uuid, columns: &[MediaColumn]) -> Result<()> {
        if columns.is_empty() {
            return Ok(());
        }

        retry::execute("row_store.clear_media_refs", || async {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE vocabulary SET ");
            {
                let mut assignments = qb.separated(", ");
                for column in columns {
                    assignments.push(format!("{} = NULL", column.as_str()));
                    if *column == MediaColumn::ImageUrl {
                        assignments.push("image_origin = NULL");
                    }
                }
            }
            qb.push(" WHERE id = ");
            qb.push_bind(id);

            qb.build().execute(&self.pool).await?;
            Ok(())
        })
        .await
    }

    async fn upsert_user_progress(&self, user_id: Uuid, word_id: Uuid) -> Result<()> {
        retry::execute("row_store.upsert_user_progress", || async {
            sqlx::query(
                "INSERT INTO user_progress (user_id, word_id, learned) VALUES ($1, $2, FALSE) \
                 ON CONFLICT (user_id, word_id) DO NOTHING",
            )
            .bind(user_id)
            .bind(word_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn upsert_list_item(&self, list_id: Uuid, word_id: Uuid) -> Result<()> {
        retry::execute("row_store.upsert_list_item", || async {
            sqlx::query(
                "INSERT INTO list_items (list_id, word_id) VALUES ($1, $2) \
                 ON CONFLICT (list_id, word_id) DO NOTHING",
            )
            .bind(list_id)
            .bind(word_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }
}
