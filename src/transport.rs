//! WebSocket transport with reconnect/backoff.
//!
//! Generalizes the corpus's `WebSocketStream`/`ReconnectConfig` pair:
//! same backoff shape (exponential, capped, reset on a successful
//! connection), and like `WebSocketStream::subscribe_async` sends a
//! subscribe message right after connecting (here, on every
//! reconnect too, since the feed has no notion of a persistent
//! session). It otherwise forwards raw text frames downstream
//! untouched — parsing is `FeedDemux`'s job.

use crate::error::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub max_retries: u32,
    pub base_delay: std::time::Duration,
    pub max_delay: std::time::Duration,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: std::time::Duration::from_secs(1),
            max_delay: std::time::Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

/// Consumes a feed url, forwarding each text frame received to `tx`.
/// Reconnects with exponential backoff on disconnect; gives up after
/// `reconnect.max_retries` consecutive failed connection attempts.
pub struct WebSocketTransport {
    url: String,
    product_ids: Vec<String>,
    reconnect: ReconnectConfig,
}

impl WebSocketTransport {
    /// `product_ids` is subscribed to the `ticker`, `matches`, and
    /// `level2` channels — the subscribe message from SPEC_FULL.md §6.
    pub fn new(url: impl Into<String>, product_ids: Vec<String>) -> Self {
        Self { url: url.into(), product_ids, reconnect: ReconnectConfig::default() }
    }

    pub fn with_reconnect_config(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    fn subscribe_message(&self) -> String {
        json!({
            "type": "subscribe",
            "product_ids": self.product_ids,
            "channels": ["ticker", "matches", "level2"],
        })
        .to_string()
    }

    /// Runs until `cancel` is triggered or the retry budget is
    /// exhausted. Frames are pushed to `tx` as they arrive; a closed
    /// receiver ends the run early.
    pub async fn run(&self, tx: mpsc::UnboundedSender<String>, cancel: CancellationToken) -> Result<()> {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.connect_and_forward(&tx, &cancel).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.reconnect.max_retries {
                        error!(url = %self.url, attempts = attempt, "exhausted reconnect budget");
                        return Err(Error::TransportDisconnect(format!(
                            "giving up after {attempt} attempts: {e}"
                        )));
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!(url = %self.url, attempt, delay_ms = delay.as_millis() as u64, error = %e, "reconnecting after backoff");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        let scaled = self.reconnect.base_delay.as_secs_f64()
            * self.reconnect.backoff_multiplier.powi(attempt as i32 - 1);
        std::time::Duration::from_secs_f64(scaled).min(self.reconnect.max_delay)
    }

    async fn connect_and_forward(
        &self,
        tx: &mpsc::UnboundedSender<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (stream, _response) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| Error::TransportDisconnect(format!("connect to {}: {e}", self.url)))?;
        info!(url = %self.url, "connected to feed");

        let (mut write, mut read) = stream.split();

        write
            .send(Message::Text(self.subscribe_message()))
            .await
            .map_err(|e| Error::TransportDisconnect(format!("subscribe failed: {e}")))?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if tx.send(text).is_err() {
                                debug!("frame receiver dropped, ending transport run");
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(Error::TransportDisconnect("stream closed".to_string()));
                        }
                        Some(Ok(_)) => {} // ping/pong/binary frames carry no book data
                        Some(Err(e)) => {
                            return Err(Error::TransportDisconnect(format!("read error: {e}")));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_grows_and_caps() {
        let transport = WebSocketTransport::new("wss://example.test", vec!["BTC-USD".to_string()])
            .with_reconnect_config(ReconnectConfig {
                max_retries: 10,
                base_delay: std::time::Duration::from_secs(1),
                max_delay: std::time::Duration::from_secs(8),
                backoff_multiplier: 2.0,
            });
        assert_eq!(transport.backoff_delay(1), std::time::Duration::from_secs(1));
        assert_eq!(transport.backoff_delay(2), std::time::Duration::from_secs(2));
        assert_eq!(transport.backoff_delay(4), std::time::Duration::from_secs(8));
        assert_eq!(transport.backoff_delay(10), std::time::Duration::from_secs(8));
    }

    #[test]
    fn subscribe_message_carries_configured_products_and_channels() {
        let transport = WebSocketTransport::new(
            "wss://example.test",
            vec!["BTC-USD".to_string(), "ETH-USD".to_string()],
        );
        let value: serde_json::Value = serde_json::from_str(&transport.subscribe_message()).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["product_ids"], json!(["BTC-USD", "ETH-USD"]));
        assert_eq!(value["channels"], json!(["ticker", "matches", "level2"]));
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_retries_against_unreachable_host() {
        let transport = WebSocketTransport::new("ws://127.0.0.1:1", vec!["BTC-USD".to_string()])
            .with_reconnect_config(ReconnectConfig {
                max_retries: 1,
                base_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(5),
                backoff_multiplier: 1.0,
            });
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let result = transport.run(tx, cancel).await;
        assert!(result.is_err());
    }
}
