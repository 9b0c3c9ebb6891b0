//! Websocket subscriber for one RPC endpoint.
//!
//! Maintains a long-lived connection, subscribes to new-block events, and
//! pushes parsed blocks onto its output channel. Reconnects with
//! exponential backoff and re-subscribes transparently. Never blocks on a
//! full downstream channel: peers are redundant, so freshness beats
//! completeness and the block is dropped with a warning.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use blockwatch_core::types::Block;

use crate::wire::WsResponse;
use crate::NEW_BLOCKS_QUERY;

/// Anything a websocket client can emit, deduplicated by content hash.
#[derive(Debug, Clone, PartialEq)]
pub enum WsEmittable {
    NewBlock(Block),
}

impl WsEmittable {
    pub fn hash(&self) -> String {
        match self {
            Self::NewBlock(block) => block.hash(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WsClientConfig {
    pub dial_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// No frame for this long forces a reconnect.
    pub read_idle: Duration,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(30),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            read_idle: Duration::from_secs(120),
        }
    }
}

/// One connection to one RPC endpoint.
pub struct WsClient {
    url: String,
    config: WsClientConfig,
    tx: mpsc::Sender<WsEmittable>,
    stop: watch::Receiver<bool>,
}

impl WsClient {
    pub fn new(
        url: impl Into<String>,
        config: WsClientConfig,
        tx: mpsc::Sender<WsEmittable>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            url: url.into(),
            config,
            tx,
            stop,
        }
    }

    /// Connect-subscribe-read until the stop signal fires.
    pub async fn run(self) {
        let mut stop = self.stop.clone();
        let mut backoff = self.config.reconnect_initial;

        loop {
            if *stop.borrow() {
                return;
            }

            info!(url = %self.url, "connecting websocket");
            let connected = time::timeout(
                self.config.dial_timeout,
                tokio_tungstenite::connect_async(&self.url),
            )
            .await;

            let ws_stream = match connected {
                Err(_) => {
                    warn!(url = %self.url, "websocket dial timed out, retrying in {backoff:?}");
                    if !sleep_unless_stopped(&mut stop, backoff).await {
                        return;
                    }
                    backoff = (backoff * 2).min(self.config.reconnect_max);
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(url = %self.url, error = %e, "websocket connect failed, retrying in {backoff:?}");
                    if !sleep_unless_stopped(&mut stop, backoff).await {
                        return;
                    }
                    backoff = (backoff * 2).min(self.config.reconnect_max);
                    continue;
                }
                Ok(Ok((ws_stream, _))) => ws_stream,
            };

            backoff = self.config.reconnect_initial; // reset on success
            let (mut sink, mut stream) = ws_stream.split();

            let subscribe = serde_json::json!({
                "jsonrpc": "2.0",
                "method": "subscribe",
                "id": 0,
                "params": { "query": NEW_BLOCKS_QUERY },
            });
            if sink.send(Message::Text(subscribe.to_string())).await.is_err() {
                warn!(url = %self.url, "failed to send subscription, reconnecting");
                continue;
            }
            info!(url = %self.url, query = NEW_BLOCKS_QUERY, "subscribed");

            // Read loop; any break reconnects.
            loop {
                tokio::select! {
                    _ = stop.changed() => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                    msg = time::timeout(self.config.read_idle, stream.next()) => {
                        match msg {
                            Err(_) => {
                                warn!(url = %self.url, "websocket idle for {:?}, reconnecting", self.config.read_idle);
                                break;
                            }
                            Ok(None) => {
                                warn!(url = %self.url, "websocket stream closed");
                                break;
                            }
                            Ok(Some(Err(e))) => {
                                warn!(url = %self.url, error = %e, "websocket receive error");
                                break;
                            }
                            Ok(Some(Ok(Message::Text(text)))) => self.handle_frame(&text),
                            Ok(Some(Ok(Message::Ping(payload)))) => {
                                let _ = sink.send(Message::Pong(payload)).await;
                            }
                            Ok(Some(Ok(Message::Close(_)))) => break,
                            Ok(Some(Ok(_))) => {} // binary / pong — ignore
                        }
                    }
                }
            }

            warn!(url = %self.url, "websocket disconnected, reconnecting in {backoff:?}");
            if !sleep_unless_stopped(&mut stop, backoff).await {
                return;
            }
            backoff = (backoff * 2).min(self.config.reconnect_max);
        }
    }

    /// Parse one frame and push the block, dropping on backpressure.
    fn handle_frame(&self, text: &str) {
        let response: WsResponse = match serde_json::from_str(text) {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %self.url, error = %e, "malformed websocket frame");
                return;
            }
        };

        let Some(tendermint_block) = response.block() else {
            // Subscription confirmation or keep-alive.
            return;
        };

        let block = match tendermint_block.to_block() {
            Ok(block) => block,
            Err(e) => {
                warn!(url = %self.url, error = %e, "unparseable block in frame");
                return;
            }
        };

        debug!(url = %self.url, height = block.height, "new block frame");
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.tx.try_send(WsEmittable::NewBlock(block))
        {
            warn!(url = %self.url, "downstream channel full, dropping block");
        }
    }
}

/// Sleep for `duration`, returning `false` if the stop signal fired first.
async fn sleep_unless_stopped(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = stop.changed() => false,
        _ = time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_capacity(capacity: usize) -> (WsClient, mpsc::Receiver<WsEmittable>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let client = WsClient::new(
            "ws://localhost:26657/websocket",
            WsClientConfig::default(),
            tx,
            stop_rx,
        );
        (client, rx)
    }

    fn event_frame(height: i64) -> String {
        format!(
            r#"{{"jsonrpc":"2.0","id":0,"result":{{"data":{{"type":"tendermint/event/NewBlock","value":{{"block":{{"header":{{"height":"{height}","time":"2026-07-01T12:00:00Z","proposer_address":"PP"}},"last_commit":{{"signatures":[{{"block_id_flag":2,"validator_address":"AAAA"}}]}}}}}}}}}}}}"#,
        )
    }

    #[tokio::test]
    async fn event_frame_pushes_block() {
        let (client, mut rx) = client_with_capacity(4);
        client.handle_frame(&event_frame(9));

        let WsEmittable::NewBlock(block) = rx.try_recv().unwrap();
        assert_eq!(block.height, 9);
        assert_eq!(block.signatures, vec!["AAAA"]);
    }

    #[tokio::test]
    async fn confirmation_and_garbage_frames_are_skipped() {
        let (client, mut rx) = client_with_capacity(4);
        client.handle_frame(r#"{"jsonrpc":"2.0","id":0,"result":{}}"#);
        client.handle_frame("definitely not json");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (client, mut rx) = client_with_capacity(1);
        client.handle_frame(&event_frame(1));
        client.handle_frame(&event_frame(2)); // dropped, must not block

        let WsEmittable::NewBlock(block) = rx.try_recv().unwrap();
        assert_eq!(block.height, 1);
        assert!(rx.try_recv().is_err());
    }
}
