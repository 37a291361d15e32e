use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vocab_forge::{
    probe_initial_concurrency, BacklogLoop, BacklogOptions, BucketSpec, ConcurrencyController,
    Config, EventLoop, ForceFlags, HttpImageSource, HttpObjectStore, HttpSpeechSynthesizer,
    HttpTextGenerator, IgnoreSet, ImageSource, MediaConfig, MediaEngine, ObjectStore, PgRowStore,
    Reconciler, RequestLoop, RequestPipeline, RowStore, SpeechSynthesizer, TextGenerator,
};

#[derive(Parser)]
#[command(name = "vocab-forge")]
#[command(about = "Background content-enrichment worker: AI metadata, audio, images, integrity")]
#[command(version)]
struct Cli {
    /// Only process vocabulary from topics matching this filter
    #[arg(long)]
    topic: Option<String>,

    /// Only process this exact word
    #[arg(long)]
    word: Option<String>,

    /// Regenerate images even when already present
    #[arg(long)]
    force_images: bool,

    /// Regenerate audio even when already present
    #[arg(long)]
    force_audio: bool,

    /// Regenerate quote audio even when already present
    #[arg(long)]
    force_quotes: bool,

    /// Check storage/database integrity (null broken refs, delete orphans)
    #[arg(long)]
    check: bool,

    /// Reset errored requests back to pending before processing
    #[arg(long)]
    retry_errors: bool,

    /// Exit after the maintenance actions instead of entering the loops
    #[arg(long)]
    exit_after_maintenance: bool,

    /// Concurrent record-processing bound (0 = derive from a latency probe)
    #[arg(long, default_value_t = 0)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Configuration error")?;
    info!("Worker starting");

    // Startup validation is the only place allowed to abort the process.
    let rows: Arc<dyn RowStore> = Arc::new(
        PgRowStore::connect(&config.database_url, config.max_db_connections)
            .await
            .context("Database connection failed")?,
    );
    let caps = rows
        .schema_capabilities()
        .await
        .context("Schema check failed; apply the pending migrations")?;

    let objects: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::new(
        &config.storage.base_url,
        &config.storage.api_key,
    )?);
    objects
        .ensure_bucket(&config.storage.audio_bucket)
        .await
        .context("Audio bucket unavailable")?;
    objects
        .ensure_bucket(&config.storage.image_bucket)
        .await
        .context("Image bucket unavailable")?;

    let generator: Option<Arc<dyn TextGenerator>> = match &config.generation.api_key {
        Some(_) => {
            let client = HttpTextGenerator::new(&config.generation)?;
            if let Some(model) = config.generation.models.first() {
                match client.generate(model, "Reply with OK.").await {
                    Ok(_) => info!("Generation API key validated"),
                    Err(e) => warn!("Generation API probe failed: {e}"),
                }
            }
            Some(Arc::new(client))
        }
        None => {
            warn!("GENERATION_API_KEY not set; AI enrichment will be unavailable");
            None
        }
    };

    if cli.retry_errors {
        let count = rows
            .reset_errored_requests()
            .await
            .context("Error-retry reset failed")?;
        info!(count, "Errored requests requeued");
    }

    if cli.check {
        let reconciler = Reconciler::new(rows.clone(), objects.clone());
        reconciler
            .run(&BucketSpec::audio(&config.storage.audio_bucket))
            .await?;
        reconciler
            .run(&BucketSpec::image(&config.storage.image_bucket))
            .await?;
        info!("Integrity check finished, moving on to content recovery");
    }

    if cli.exit_after_maintenance {
        info!("Maintenance complete, exiting");
        return Ok(());
    }

    let initial_concurrency = if cli.concurrency > 0 {
        cli.concurrency
    } else {
        probe_initial_concurrency(&config.probe_url).await
    };
    let controller = Arc::new(ConcurrencyController::new(initial_concurrency));
    info!(concurrency = controller.current(), "Concurrency bound initialized");

    // Startup requeue so a restart picks errored requests back up.
    match rows.reset_errored_requests().await {
        Ok(0) => {}
        Ok(count) => info!(count, "Errored requests requeued at startup"),
        Err(e) => warn!("Startup requeue failed: {e}"),
    }

    let tts: Arc<dyn SpeechSynthesizer> = Arc::new(HttpSpeechSynthesizer::new(&config.tts)?);
    let images: Arc<dyn ImageSource> = Arc::new(HttpImageSource::new(&config.image_search)?);
    let media = Arc::new(MediaEngine::new(
        objects.clone(),
        tts,
        images,
        MediaConfig {
            audio_bucket: config.storage.audio_bucket.clone(),
            image_bucket: config.storage.image_bucket.clone(),
            primary_voice: config.tts.primary_voice.clone(),
            secondary_voice: config.tts.secondary_voice.clone(),
            min_media_bytes: config.min_media_bytes,
        },
    ));

    let pipeline = Arc::new(RequestPipeline::new(
        rows.clone(),
        media.clone(),
        generator,
        config.generation.models.clone(),
        config.generation.timeout_seconds,
        caps,
    ));

    let wake = Arc::new(Notify::new());
    let quarantine = Arc::new(IgnoreSet::new());

    let backlog = BacklogLoop::new(
        rows.clone(),
        media,
        controller,
        quarantine,
        BacklogOptions {
            force: ForceFlags {
                images: cli.force_images,
                audio: cli.force_audio,
                quotes: cli.force_quotes,
            },
            topic: cli.topic,
            word: cli.word,
            temp_dir: std::env::current_dir().unwrap_or_else(|_| ".".into()),
        },
    );
    let requests = RequestLoop::new(rows.clone(), pipeline, wake.clone());
    let events = EventLoop::new(config.database_url.clone(), config.probe_url.clone(), wake);

    // The event loop may stand down permanently (polling still works), so
    // it runs detached instead of racing the other loops.
    tokio::spawn(async move {
        if let Err(e) = events.run().await {
            error!("Event-source loop failed: {e}");
        }
    });

    tokio::select! {
        result = backlog.run() => {
            result?;
            info!("Backlog processing finished");
        }
        result = requests.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
        }
    }

    Ok(())
}
