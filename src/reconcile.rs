//! Integrity reconciliation between vocabulary rows and stored objects.
//!
//! Two-pass mark-and-sweep: both the bucket listing and the table are fully
//! materialized, then a pure plan decides which references to null and which
//! objects are orphans. Broken references are cleared so the next
//! maintenance pass regenerates them; orphans are deleted in small batches.

use crate::error::Result;
use crate::models::VocabularyRecord;
use crate::storage::{object_key_from_url, ObjectStore};
use crate::store::{MediaColumn, RowStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const OBJECT_PAGE: usize = 100;
const ROW_PAGE: i64 = 1000;
const DELETE_BATCH: usize = 10;

/// Which bucket to reconcile, the reference columns that point into it, and
/// the minimum object size below which a reference counts as broken.
#[derive(Debug, Clone)]
pub struct BucketSpec {
    pub bucket: String,
    pub columns: Vec<MediaColumn>,
    pub min_object_bytes: i64,
}

impl BucketSpec {
    pub fn audio(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            columns: vec![
                MediaColumn::AudioUrl,
                MediaColumn::AudioAltUrl,
                MediaColumn::ExampleAudioUrl,
            ],
            min_object_bytes: 100,
        }
    }

    pub fn image(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            columns: vec![MediaColumn::ImageUrl],
            min_object_bytes: 0,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Rows whose listed columns must be nulled.
    pub clears: Vec<(Uuid, Vec<MediaColumn>)>,
    /// Object keys with no valid referencing row, in stable order.
    pub orphans: Vec<String>,
}

/// Decide what to fix. A reference is valid only when its decoded key exists
/// in storage with a size above the bucket minimum; everything else is
/// cleared. Objects no valid reference marks are orphans.
pub fn plan(
    objects: &HashMap<String, i64>,
    rows: &[VocabularyRecord],
    spec: &BucketSpec,
) -> ReconcilePlan {
    let mut referenced: HashSet<String> = HashSet::new();
    let mut clears = Vec::new();

    for row in rows {
        let mut broken = Vec::new();
        for column in &spec.columns {
            let Some(url) = column.value(row) else {
                continue;
            };
            let key = object_key_from_url(url);
            let valid = key
                .as_ref()
                .and_then(|k| objects.get(k))
                .map(|size| *size > spec.min_object_bytes)
                .unwrap_or(false);
            match (valid, key) {
                (true, Some(key)) => {
                    referenced.insert(key);
                }
                _ => broken.push(*column),
            }
        }
        if !broken.is_empty() {
            clears.push((row.id, broken));
        }
    }

    let mut orphans: Vec<String> = objects
        .keys()
        .filter(|key| !referenced.contains(*key))
        .cloned()
        .collect();
    orphans.sort();

    ReconcilePlan { clears, orphans }
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub objects_seen: usize,
    pub rows_seen: usize,
    pub references_cleared: usize,
    pub orphans_deleted: usize,
}

pub struct Reconciler {
    rows: Arc<dyn RowStore>,
    objects: Arc<dyn ObjectStore>,
}

impl Reconciler {
    pub fn new(rows: Arc<dyn RowStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { rows, objects }
    }

    pub async fn run(&self, spec: &BucketSpec) -> Result<ReconcileReport> {
        info!(bucket = %spec.bucket, "Starting integrity reconciliation");

        let mut objects: HashMap<String, i64> = HashMap::new();
        let mut offset = 0;
        loop {
            let page = self.objects.list(&spec.bucket, OBJECT_PAGE, offset).await?;
            let page_len = page.len();
            for entry in page {
                objects.insert(entry.name, entry.size);
            }
            if page_len < OBJECT_PAGE {
                break;
            }
            offset += OBJECT_PAGE;
        }
        info!(bucket = %spec.bucket, objects = objects.len(), "Object listing materialized");

        let mut rows: Vec<VocabularyRecord> = Vec::new();
        let mut offset: i64 = 0;
        loop {
            let page = self.rows.vocabulary_page(offset, ROW_PAGE).await?;
            let page_len = page.len() as i64;
            rows.extend(page);
            if page_len < ROW_PAGE {
                break;
            }
            offset += ROW_PAGE;
        }

        let plan = plan(&objects, &rows, spec);
        let mut report = ReconcileReport {
            objects_seen: objects.len(),
            rows_seen: rows.len(),
            ..Default::default()
        };

        for (id, columns) in &plan.clears {
            let names: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
            warn!(row = %id, columns = ?names, "Clearing broken media references");
            match self.rows.clear_media_refs(*id, columns).await {
                Ok(()) => report.references_cleared += 1,
                Err(e) => error!(row = %id, "Failed to clear references: {e}"),
            }
        }

        for chunk in plan.orphans.chunks(DELETE_BATCH) {
            match self.objects.remove(&spec.bucket, chunk).await {
                Ok(()) => {
                    info!(bucket = %spec.bucket, removed = ?chunk, "Deleted orphaned objects");
                    report.orphans_deleted += chunk.len();
                }
                Err(e) => error!(bucket = %spec.bucket, "Failed to delete orphans: {e}"),
            }
        }

        info!(
            bucket = %spec.bucket,
            cleared = report.references_cleared,
            deleted = report.orphans_deleted,
            "Reconciliation finished"
        );
        Ok(report)
    }
}
