//! Owns the registry, sinks, and transport; starts/stops the feed and
//! sampler workers as tokio tasks realizing the two-OS-thread
//! concurrency model, and joins on shutdown.

use crate::config::Config;
use crate::demux::FeedDemux;
use crate::operator::{LoggingOperatorChannel, RateLimitedChannel};
use crate::registry::BookRegistry;
use crate::sampler::Sampler;
use crate::sinks::{NotifyingBookSink, NotifyingTickerSink, SqliteBookSink, SqliteTickerSink};
use crate::transport::WebSocketTransport;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Supervisor {
    registry: Arc<BookRegistry>,
    ticker_sink: Arc<NotifyingTickerSink<SqliteTickerSink>>,
    book_sink: Arc<NotifyingBookSink<SqliteBookSink>>,
    transport: Arc<WebSocketTransport>,
    bands: Vec<f64>,
    sample_period: std::time::Duration,
    cancel: CancellationToken,
    clock: Arc<dyn Fn() -> f64 + Send + Sync>,
}

impl Supervisor {
    pub fn new(config: &Config) -> crate::error::Result<Self> {
        let operator_channel = Arc::new(RateLimitedChannel::new(
            LoggingOperatorChannel,
            config.operator_notify_period,
        ));

        let ticker_sink = Arc::new(NotifyingTickerSink::new(
            SqliteTickerSink::open(&config.ticker_db_path)?,
            operator_channel.clone(),
        ));
        let book_sink = Arc::new(NotifyingBookSink::new(
            SqliteBookSink::open(&config.book_db_path)?,
            operator_channel,
        ));

        Ok(Self {
            registry: Arc::new(BookRegistry::new(&config.product_refs())),
            ticker_sink,
            book_sink,
            transport: Arc::new(WebSocketTransport::new(
                config.feed_url.clone(),
                config.products.iter().map(|(id, _)| id.clone()).collect(),
            )),
            bands: config.bands.clone(),
            sample_period: config.sample_period,
            cancel: CancellationToken::new(),
            clock: Arc::new(crate::types::system_time_now),
        })
    }

    /// Overrides the clock used to stamp ticker rows. Exists for tests
    /// that need to reproduce a duplicate-primary-key (same
    /// `system_time`) write deterministically; production code never
    /// calls this.
    pub fn with_clock(mut self, clock: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Starts the feed worker and sampler worker, and blocks until
    /// `shutdown` resolves. On return, both workers have observed the
    /// stop flag and exited, and the registry's books are dropped.
    pub async fn run_until(self, shutdown: impl std::future::Future<Output = ()>) {
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();

        let transport = self.transport.clone();
        let transport_cancel = self.cancel.clone();
        let transport_task = tokio::spawn(async move {
            if let Err(e) = transport.run(frame_tx, transport_cancel).await {
                warn!(error = %e, "transport exited with error");
            }
        });

        let registry = self.registry.clone();
        let ticker_sink = self.ticker_sink.clone();
        let clock = self.clock.clone();
        let demux_cancel = self.cancel.clone();
        let feed_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = demux_cancel.cancelled() => {
                        debug!("feed worker observed cancellation, exiting");
                        break;
                    }
                    frame = frame_rx.recv() => {
                        match frame {
                            Some(frame) => {
                                let demux = FeedDemux::with_clock(&registry, ticker_sink.as_ref(), || clock());
                                demux.handle_frame(&frame);
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        let registry = self.registry.clone();
        let book_sink = self.book_sink.clone();
        let bands = self.bands.clone();
        let sample_period = self.sample_period;
        let sampler_cancel = self.cancel.clone();
        let sampler_task = tokio::spawn(async move {
            let sampler = Sampler::new(&registry, book_sink.as_ref(), bands, sample_period);
            sampler.run(sampler_cancel).await;
        });

        shutdown.await;
        info!("shutdown signal received, stopping workers");
        self.cancel.cancel();

        let _ = tokio::join!(transport_task, feed_task, sampler_task);
        info!("all workers stopped, releasing books");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            products: vec![("BTC-USD".to_string(), 50_000)],
            bands: vec![0.01],
            sample_period: Duration::from_millis(5),
            feed_url: "ws://127.0.0.1:1".to_string(),
            ticker_db_path: dir.join("tickers.db").to_string_lossy().to_string(),
            book_db_path: dir.join("order_books.db").to_string_lossy().to_string(),
            operator_notify_period: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn starts_and_stops_cleanly() {
        let dir = tempfile_dir();
        let config = test_config(&dir);
        let supervisor = Supervisor::new(&config).unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = tx.send(());
        });

        let run = supervisor.run_until(async {
            let _ = rx.await;
        });
        tokio::time::timeout(Duration::from_secs(5), run).await.unwrap();
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("aggbook-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
