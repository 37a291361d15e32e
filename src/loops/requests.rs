//! Priority loop for user-submitted word requests. Polls in small pages and
//! sleeps with multiplicative backoff, but is woken early whenever the
//! event-source loop signals a fresh insert.

use super::grow_backoff;
use crate::error::Result;
use crate::pipeline::RequestPipeline;
use crate::store::RowStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info};

const MIN_IDLE_SLEEP: Duration = Duration::from_secs(2);
const MAX_IDLE_SLEEP: Duration = Duration::from_secs(30);
const ERROR_SLEEP: Duration = Duration::from_secs(5);
const REQUEST_PAGE: i64 = 5;

pub struct RequestLoop {
    rows: Arc<dyn RowStore>,
    pipeline: Arc<RequestPipeline>,
    wake: Arc<Notify>,
}

impl RequestLoop {
    pub fn new(rows: Arc<dyn RowStore>, pipeline: Arc<RequestPipeline>, wake: Arc<Notify>) -> Self {
        Self {
            rows,
            pipeline,
            wake,
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!("Priority request loop started");
        let mut idle_sleep = MIN_IDLE_SLEEP;

        loop {
            match self.rows.pending_requests(REQUEST_PAGE).await {
                Ok(requests) if !requests.is_empty() => {
                    info!(count = requests.len(), "Found pending word requests");
                    for request in &requests {
                        self.pipeline.process(request).await;
                    }
                    idle_sleep = MIN_IDLE_SLEEP;
                    tokio::task::yield_now().await;
                }
                Ok(_) => {
                    match tokio::time::timeout(idle_sleep, self.wake.notified()).await {
                        Ok(()) => {
                            info!("Woken by change notification");
                            idle_sleep = MIN_IDLE_SLEEP;
                        }
                        Err(_) => {
                            idle_sleep = grow_backoff(idle_sleep, MAX_IDLE_SLEEP);
                        }
                    }
                }
                Err(e) => {
                    error!("Request poll failed: {e}");
                    tokio::time::sleep(ERROR_SLEEP).await;
                }
            }
        }
    }
}
