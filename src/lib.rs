pub mod ai;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod loops;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod quarantine;
pub mod reconcile;
pub mod retry;
pub mod storage;
pub mod store;

pub use config::{Config, ForceFlags};
pub use error::{Result, WorkerError};

// Re-export the worker building blocks for convenience
pub use ai::{HttpTextGenerator, MockGenerator, TextGenerator};
pub use concurrency::{probe_initial_concurrency, ConcurrencyController};
pub use loops::{BacklogLoop, BacklogOptions, EventLoop, RequestLoop};
pub use media::{
    HttpImageSource, HttpSpeechSynthesizer, ImageSource, MediaConfig, MediaEngine,
    SpeechSynthesizer,
};
pub use pipeline::RequestPipeline;
pub use quarantine::IgnoreSet;
pub use reconcile::{BucketSpec, Reconciler};
pub use storage::{HttpObjectStore, ObjectStore};
pub use store::{PgRowStore, RowStore};
