//! Change-notification listener. Holds a `LISTEN` subscription on the word
//! request channel and flips the shared wake signal on every insert.
//!
//! The subscription reconnects with backoff after transport errors, checks
//! basic reachability before each attempt, and is proactively recycled on a
//! fixed TTL so a silently half-open socket cannot mute notifications for
//! long. A non-transient subscription error stands the loop down for good
//! and the worker degrades to polling.

use crate::concurrency::is_reachable;
use crate::error::Result;
use sqlx::postgres::PgListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

const CHANNEL: &str = "word_requests_new";
const INITIAL_RECONNECT: Duration = Duration::from_secs(5);
const MAX_RECONNECT: Duration = Duration::from_secs(60);
const SUBSCRIPTION_TTL: Duration = Duration::from_secs(3600);

pub struct EventLoop {
    database_url: String,
    probe_url: String,
    wake: Arc<Notify>,
}

impl EventLoop {
    pub fn new(database_url: String, probe_url: String, wake: Arc<Notify>) -> Self {
        Self {
            database_url,
            probe_url,
            wake,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let mut reconnect = INITIAL_RECONNECT;

        loop {
            if !is_reachable(&self.probe_url).await {
                warn!(
                    delay_secs = reconnect.as_secs(),
                    "Network unreachable, delaying subscription attempt"
                );
                tokio::time::sleep(reconnect).await;
                reconnect = grow(reconnect);
                continue;
            }

            let mut listener = match self.subscribe().await {
                Ok(listener) => listener,
                Err(e) if e.is_network_transient() => {
                    warn!(
                        delay_secs = reconnect.as_secs(),
                        "Subscription attempt failed ({e}), retrying"
                    );
                    tokio::time::sleep(reconnect).await;
                    reconnect = grow(reconnect);
                    continue;
                }
                Err(e) => {
                    error!("Change notifications unavailable ({e}); polling only from here on");
                    return Ok(());
                }
            };

            info!(channel = CHANNEL, "Change notification subscription active");
            reconnect = INITIAL_RECONNECT;

            let ttl = tokio::time::sleep(SUBSCRIPTION_TTL);
            tokio::pin!(ttl);

            loop {
                tokio::select! {
                    notification = listener.recv() => match notification {
                        Ok(notification) => {
                            debug!(channel = notification.channel(), "Insert notification");
                            info!("New word request signalled");
                            self.wake.notify_one();
                        }
                        Err(e) => {
                            warn!(
                                delay_secs = reconnect.as_secs(),
                                "Subscription dropped ({e}), reconnecting"
                            );
                            tokio::time::sleep(reconnect).await;
                            reconnect = grow(reconnect);
                            break;
                        }
                    },
                    _ = &mut ttl => {
                        info!("Recycling subscription (TTL reached)");
                        break;
                    }
                }
            }
        }
    }

    async fn subscribe(&self) -> Result<PgListener> {
        let mut listener = PgListener::connect(&self.database_url).await?;
        listener.listen(CHANNEL).await?;
        Ok(listener)
    }
}

fn grow(current: Duration) -> Duration {
    super::grow_backoff(current, MAX_RECONNECT)
}
