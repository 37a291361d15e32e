//! Maintenance backlog loop: quotes missing audio, vocabulary rows missing
//! any derived field, periodic error-state resets, and stray temp-file
//! cleanup. Batches run under the adaptive concurrency bound; failures feed
//! the quarantine.

use super::grow_backoff;
use crate::concurrency::ConcurrencyController;
use crate::config::ForceFlags;
use crate::error::Result;
use crate::media::MediaEngine;
use crate::models::VocabularyRecord;
use crate::quarantine::IgnoreSet;
use crate::store::{BacklogFilter, RowStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

const MIN_IDLE_SLEEP: Duration = Duration::from_secs(5);
const MAX_IDLE_SLEEP: Duration = Duration::from_secs(120);
const ERROR_SLEEP: Duration = Duration::from_secs(60);
const RESET_INTERVAL: Duration = Duration::from_secs(600);
const QUOTE_PAGE: i64 = 5;
const VOCAB_PAGE: i64 = 200;

#[derive(Debug, Clone)]
pub struct BacklogOptions {
    pub force: ForceFlags,
    pub topic: Option<String>,
    pub word: Option<String>,
    /// Directory scanned for stray temp files from interrupted runs.
    pub temp_dir: PathBuf,
}

pub struct BacklogLoop {
    rows: Arc<dyn RowStore>,
    media: Arc<MediaEngine>,
    controller: Arc<ConcurrencyController>,
    quarantine: Arc<IgnoreSet>,
    options: BacklogOptions,
}

enum Step {
    Worked,
    Idle,
}

enum RecordOutcome {
    Updated,
    NoChange(Uuid),
    NetworkError(Uuid),
    OtherError(Uuid),
}

#[derive(Default)]
struct BatchStats {
    batch_size: usize,
    updated: usize,
    network_failures: usize,
    other_failures: usize,
}

struct LoopState {
    last_reset: Instant,
    /// Force modes walk the tables with cursors instead of refetching the
    /// shrinking missing-media set.
    quote_offset: i64,
    vocab_offset: i64,
}

impl BacklogLoop {
    pub fn new(
        rows: Arc<dyn RowStore>,
        media: Arc<MediaEngine>,
        controller: Arc<ConcurrencyController>,
        quarantine: Arc<IgnoreSet>,
        options: BacklogOptions,
    ) -> Self {
        Self {
            rows,
            media,
            controller,
            quarantine,
            options,
        }
    }

    /// Run until interrupted; under a force mode, return once the fetches
    /// drain.
    pub async fn run(&self) -> Result<()> {
        info!(
            concurrency = self.controller.current(),
            force = ?self.options.force,
            "Maintenance backlog loop started"
        );

        let mut idle_sleep = MIN_IDLE_SLEEP;
        let mut state = LoopState {
            last_reset: Instant::now(),
            quote_offset: 0,
            vocab_offset: 0,
        };

        loop {
            match self.iteration(&mut state).await {
                Ok(Step::Worked) => {
                    idle_sleep = MIN_IDLE_SLEEP;
                    // Let other loops breathe between batches.
                    tokio::task::yield_now().await;
                }
                Ok(Step::Idle) => {
                    if self.options.force.any() {
                        info!("Force-mode backlog drained, exiting");
                        return Ok(());
                    }
                    if idle_sleep < MAX_IDLE_SLEEP {
                        info!(sleep_secs = idle_sleep.as_secs(), "No pending work, backing off");
                    }
                    tokio::time::sleep(idle_sleep).await;
                    idle_sleep = grow_backoff(idle_sleep, MAX_IDLE_SLEEP);
                }
                Err(e) => {
                    error!("Backlog iteration failed: {e}");
                    tokio::time::sleep(ERROR_SLEEP).await;
                }
            }
        }
    }

    async fn iteration(&self, state: &mut LoopState) -> Result<Step> {
        if state.last_reset.elapsed() >= RESET_INTERVAL {
            match self.rows.reset_errored_requests().await {
                Ok(0) => {}
                Ok(count) => info!(count, "Requeued errored requests"),
                Err(e) => warn!("Could not reset errored requests: {e}"),
            }
            state.last_reset = Instant::now();
        }

        purge_temp_files(&self.options.temp_dir);

        let quotes_processed = match self.quote_pass(state).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Quote pass skipped: {e}");
                0
            }
        };

        let words = if self.options.force.quotes_only() {
            Vec::new()
        } else {
            self.fetch_backlog(state).await?
        };

        if words.is_empty() {
            return Ok(if quotes_processed > 0 {
                Step::Worked
            } else {
                Step::Idle
            });
        }

        let stats = self.process_vocabulary(&words).await;
        self.controller
            .observe_batch(stats.batch_size, stats.network_failures);
        info!(
            updated = stats.updated,
            network_failures = stats.network_failures,
            other_failures = stats.other_failures,
            quarantined = self.quarantine.len(),
            "Vocabulary batch complete"
        );

        Ok(Step::Worked)
    }

    async fn quote_pass(&self, state: &mut LoopState) -> Result<usize> {
        let force = self.options.force.audio || self.options.force.quotes;
        let quotes = self
            .rows
            .quotes_missing_audio(force, QUOTE_PAGE, state.quote_offset)
            .await?;
        if force {
            state.quote_offset += quotes.len() as i64;
        }
        if quotes.is_empty() {
            return Ok(0);
        }

        info!(count = quotes.len(), "Synthesizing quote audio");
        let semaphore = Arc::new(Semaphore::new(self.controller.current()));
        let tasks = quotes.iter().map(|quote| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                match self.media.enrich_quote(quote, force).await {
                    Ok(Some(url)) => {
                        if let Err(e) = self.rows.update_quote_audio(quote.id, &url).await {
                            error!(quote = %quote.id, "Quote update failed: {e}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!(quote = %quote.id, "Quote synthesis failed: {e}"),
                }
            }
        });
        futures::future::join_all(tasks).await;
        Ok(quotes.len())
    }

    async fn fetch_backlog(&self, state: &mut LoopState) -> Result<Vec<VocabularyRecord>> {
        let force = self.options.force.images || self.options.force.audio;
        let filter = BacklogFilter {
            include_complete: force,
            topic: self.options.topic.clone(),
            word: self.options.word.clone(),
        };
        // Under force the cursor already skips processed rows; excluding
        // quarantined ids would shift the pages underneath it.
        let exclude = if force {
            Vec::new()
        } else {
            self.quarantine.snapshot()
        };

        let words = self
            .rows
            .vocabulary_backlog(&filter, &exclude, VOCAB_PAGE, state.vocab_offset)
            .await?;
        if force {
            state.vocab_offset += words.len() as i64;
        }
        Ok(words)
    }

    async fn process_vocabulary(&self, words: &[VocabularyRecord]) -> BatchStats {
        let concurrency = self.controller.current();
        info!(count = words.len(), concurrency, "Processing vocabulary batch");

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let outcomes = futures::future::join_all(words.iter().map(|record| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                self.process_record(record).await
            }
        }))
        .await;

        let mut stats = BatchStats {
            batch_size: words.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                RecordOutcome::Updated => stats.updated += 1,
                RecordOutcome::NoChange(id) => self.quarantine.insert(id),
                RecordOutcome::NetworkError(id) => {
                    stats.network_failures += 1;
                    self.quarantine.insert(id);
                }
                RecordOutcome::OtherError(id) => {
                    stats.other_failures += 1;
                    self.quarantine.insert(id);
                }
            }
        }
        stats
    }

    async fn process_record(&self, record: &VocabularyRecord) -> RecordOutcome {
        match self.media.enrich_vocabulary(record, self.options.force).await {
            Ok(patch) if patch.is_empty() => RecordOutcome::NoChange(record.id),
            Ok(patch) => match self.rows.update_vocabulary(record.id, &patch).await {
                Ok(()) => RecordOutcome::Updated,
                Err(e) if e.is_network_transient() => {
                    warn!(word = %record.word, "Network error applying patch: {e}");
                    RecordOutcome::NetworkError(record.id)
                }
                Err(e) => {
                    error!(word = %record.word, "Could not apply patch: {e}");
                    RecordOutcome::OtherError(record.id)
                }
            },
            Err(e) if e.is_network_transient() => {
                warn!(word = %record.word, "Network error during enrichment: {e}");
                RecordOutcome::NetworkError(record.id)
            }
            Err(e) => {
                error!(word = %record.word, "Enrichment failed: {e}");
                RecordOutcome::OtherError(record.id)
            }
        }
    }
}

/// Remove `temp_*.mp3` leftovers from interrupted runs.
fn purge_temp_files(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "Temp cleanup skipped: {e}");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with("temp_") && name.ends_with(".mp3") {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => info!(file = name, "Removed stray temp file"),
                Err(e) => warn!(file = name, "Could not remove temp file: {e}"),
            }
        }
    }
}
