//! Fans N websocket clients into one deduplicated output channel.
//!
//! Each client gets its own buffered channel and consumer task. The
//! consumer serializes test-and-forward across clients under the manager
//! mutex, so a block observed on several peers is published exactly once
//! per dedup-queue lifetime. The output channel is bounded and drained by
//! the app loop, so holding the mutex across the forward cannot deadlock.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, trace};

use crate::queue::DedupQueue;
use crate::ws_client::{WsClient, WsClientConfig, WsEmittable};

/// Default bound of the dedup queue.
pub const DEDUP_QUEUE_SIZE: usize = 100;
/// Per-client buffer between the socket reader and the consumer.
const CLIENT_CHANNEL_CAPACITY: usize = 64;

pub struct WsManager {
    queue: Mutex<DedupQueue>,
    tx: mpsc::Sender<WsEmittable>,
}

impl WsManager {
    /// Build the manager and hand back the unified output channel.
    pub fn new(output_capacity: usize) -> (Arc<Self>, mpsc::Receiver<WsEmittable>) {
        let (tx, rx) = mpsc::channel(output_capacity);
        (
            Arc::new(Self {
                queue: Mutex::new(DedupQueue::new(DEDUP_QUEUE_SIZE)),
                tx,
            }),
            rx,
        )
    }

    /// Spawn one client and one consumer per endpoint. All tasks observe
    /// the stop signal.
    pub fn listen(
        self: Arc<Self>,
        endpoints: &[String],
        config: WsClientConfig,
        stop: watch::Receiver<bool>,
    ) {
        for url in endpoints {
            let (client_tx, client_rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
            let client = WsClient::new(url.clone(), config.clone(), client_tx, stop.clone());
            tokio::spawn(client.run());

            let manager = Arc::clone(&self);
            let mut stop = stop.clone();
            let url = url.clone();
            tokio::spawn(async move {
                let mut client_rx = client_rx;
                loop {
                    tokio::select! {
                        _ = stop.changed() => return,
                        received = client_rx.recv() => {
                            match received {
                                None => {
                                    debug!(url = %url, "client channel closed");
                                    return;
                                }
                                Some(emittable) => {
                                    manager.forward(emittable).await;
                                }
                            }
                        }
                    }
                }
            });
        }
    }

    /// Test-and-forward one emittable. Returns `true` when it was new and
    /// delivered downstream.
    pub async fn forward(&self, emittable: WsEmittable) -> bool {
        let mut queue = self.queue.lock().await;

        let hash = emittable.hash();
        if queue.has(&hash) {
            trace!(hash = %hash, "duplicate emittable, not forwarding");
            return false;
        }

        if self.tx.send(emittable).await.is_err() {
            // Receiver gone; the app is shutting down.
            return false;
        }
        queue.add(hash);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockwatch_core::types::Block;
    use chrono::{TimeZone, Utc};

    fn emittable(height: i64, proposer: &str) -> WsEmittable {
        WsEmittable::NewBlock(Block {
            height,
            time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            proposer: proposer.into(),
            signatures: vec![],
        })
    }

    #[tokio::test]
    async fn duplicate_emittable_delivered_once() {
        let (manager, mut rx) = WsManager::new(16);

        // The same block observed on two peers.
        assert!(manager.forward(emittable(10, "PP")).await);
        assert!(!manager.forward(emittable(10, "PP")).await);

        let WsEmittable::NewBlock(block) = rx.recv().await.unwrap();
        assert_eq!(block.height, 10);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn distinct_blocks_all_pass() {
        let (manager, mut rx) = WsManager::new(16);

        for height in 1..=5 {
            assert!(manager.forward(emittable(height, "PP")).await);
        }
        for height in 1..=5 {
            let WsEmittable::NewBlock(block) = rx.recv().await.unwrap();
            assert_eq!(block.height, height);
        }
    }

    #[tokio::test]
    async fn dedup_window_is_bounded() {
        let (manager, mut rx) = WsManager::new(512);

        assert!(manager.forward(emittable(0, "PP")).await);
        // Push the first hash out of the bounded dedup window.
        for height in 1..=(DEDUP_QUEUE_SIZE as i64) {
            manager.forward(emittable(height, "PP")).await;
        }
        // The evicted duplicate slips through; downstream insertion is
        // idempotent, so this is harmless.
        assert!(manager.forward(emittable(0, "PP")).await);

        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, DEDUP_QUEUE_SIZE + 2);
    }
}
