//! Live feed messages and the supervised feed worker.
//!
//! The feed pushes JSON messages discriminated by `type`. Only
//! `location_update` carries a payload (shaped like a batch record); every
//! other kind is decoded as [`FeedMessage::Other`] and ignored.
//!
//! With the `live` feature, [`spawn_live_feed`] runs two tasks:
//! - a feed task that connects, forwards text frames into a channel, and on
//!   disconnect waits a fixed delay before reconnecting, forever
//! - an ingest worker that owns every live write to the engine, applying
//!   frames strictly in arrival order
//!
//! The engine never sees connection state; while the feed is down its
//! aggregates simply stop advancing.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::LocationRecord;

/// A message from the live feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// New position for a device
    LocationUpdate(LocationRecord),
    /// Any other message kind
    #[serde(other)]
    Other,
}

/// Decode a raw feed message.
pub fn decode_message(text: &str) -> Result<FeedMessage> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(feature = "live")]
pub use worker::{
    run_feed, spawn_ingest_worker, spawn_live_feed, FeedConnector, FeedStats, LiveFeedHandle,
    DEFAULT_RECONNECT_DELAY,
};

#[cfg(feature = "live")]
mod worker {
    use std::future::Future;
    use std::time::Duration;

    use log::{debug, info, warn};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    use crate::engine::SharedEngine;
    use crate::error::Result;

    /// Delay between reconnect attempts.
    pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

    /// Source of live feed connections.
    ///
    /// Each successful `connect` yields the text frames of one connection;
    /// the receiver ending means the connection dropped.
    pub trait FeedConnector: Send + 'static {
        fn connect(&mut self) -> impl Future<Output = Result<mpsc::Receiver<String>>> + Send;
    }

    /// Counters kept by the feed task.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct FeedStats {
        pub connections: u32,
        pub failed_connects: u32,
        pub frames: u64,
    }

    /// Forward frames from the connector into `sink`, reconnecting after
    /// `reconnect_delay` whenever a connection fails or drops.
    ///
    /// There is no backoff growth and no retry limit. Returns once the
    /// receiving side of `sink` is gone.
    pub async fn run_feed<C: FeedConnector>(
        mut connector: C,
        sink: mpsc::Sender<String>,
        reconnect_delay: Duration,
    ) -> FeedStats {
        let mut stats = FeedStats::default();

        loop {
            match connector.connect().await {
                Ok(mut frames) => {
                    stats.connections += 1;
                    info!("[LiveFeed] Connected (connection #{})", stats.connections);

                    while let Some(frame) = frames.recv().await {
                        stats.frames += 1;
                        if sink.send(frame).await.is_err() {
                            info!("[LiveFeed] Ingest worker gone, stopping");
                            return stats;
                        }
                    }
                    warn!(
                        "[LiveFeed] Disconnected, retrying in {:?}",
                        reconnect_delay
                    );
                }
                Err(e) => {
                    stats.failed_connects += 1;
                    warn!(
                        "[LiveFeed] Connect failed: {}, retrying in {:?}",
                        e, reconnect_delay
                    );
                }
            }

            if sink.is_closed() {
                return stats;
            }
            tokio::time::sleep(reconnect_delay).await;
        }
    }

    /// Spawn the single writer that applies feed frames to the engine.
    ///
    /// The task ends when every sender is dropped and returns the number of
    /// location updates it applied.
    pub fn spawn_ingest_worker(
        engine: SharedEngine,
        capacity: usize,
    ) -> (mpsc::Sender<String>, JoinHandle<u64>) {
        let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));

        let handle = tokio::spawn(async move {
            let mut applied = 0u64;
            while let Some(frame) = rx.recv().await {
                let outcome = {
                    let mut guard = engine.write().unwrap_or_else(|p| p.into_inner());
                    guard.ingest_live_message(&frame)
                };
                match outcome {
                    Ok(true) => applied += 1,
                    Ok(false) => debug!("[LiveFeed] Ignoring non-location message"),
                    // Already counted and logged by the engine
                    Err(_) => {}
                }
            }
            applied
        });

        (tx, handle)
    }

    /// Running feed and ingest tasks.
    pub struct LiveFeedHandle {
        pub feed: JoinHandle<FeedStats>,
        pub worker: JoinHandle<u64>,
    }

    impl LiveFeedHandle {
        /// Stop both tasks. Updates already applied stay applied.
        pub fn abort(&self) {
            self.feed.abort();
            self.worker.abort();
        }
    }

    /// Start the feed and ingest tasks for an engine.
    pub fn spawn_live_feed<C: FeedConnector>(
        connector: C,
        engine: SharedEngine,
        reconnect_delay: Duration,
    ) -> LiveFeedHandle {
        let (sink, worker) = spawn_ingest_worker(engine, 1024);
        let feed = tokio::spawn(run_feed(connector, sink, reconnect_delay));
        LiveFeedHandle { feed, worker }
    }
}
