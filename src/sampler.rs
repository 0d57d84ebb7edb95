//! Fixed-cadence reader that snapshots every built book and forwards
//! the row to the book sink.
//!
//! Grounded in the original logger's `__query_thread` (sleep, iterate
//! configured products, write each snapshot) generalized to the
//! registry abstraction, and in the corpus's tokio cancellation-aware
//! worker loops (`tokio::select!` between a sleep and a cancellation
//! token).

use crate::registry::BookRegistry;
use crate::sinks::BookSink;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Sampler<'a> {
    registry: &'a BookRegistry,
    book_sink: &'a dyn BookSink,
    bands: Vec<f64>,
    sample_period: Duration,
}

impl<'a> Sampler<'a> {
    pub fn new(
        registry: &'a BookRegistry,
        book_sink: &'a dyn BookSink,
        bands: Vec<f64>,
        sample_period: Duration,
    ) -> Self {
        Self { registry, book_sink, bands, sample_period }
    }

    /// Runs until `cancel` is triggered. Self-paced: sleeps
    /// `sample_period` after each full pass regardless of pass
    /// duration, and checks cancellation between products (not
    /// mid-operation) for a bounded shutdown latency.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            for product_id in self.registry.product_ids() {
                if cancel.is_cancelled() {
                    debug!("sampler observed cancellation mid-pass, exiting");
                    return;
                }
                self.sample_one(product_id);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("sampler observed cancellation, exiting");
                    return;
                }
                _ = tokio::time::sleep(self.sample_period) => {}
            }
        }
    }

    fn sample_one(&self, product_id: &str) {
        let Some(book) = self.registry.get(product_id) else { return };
        if !book.built() {
            return;
        }
        let row = book.sample(&self.bands);
        if let Err(e) = self.book_sink.append(&row) {
            if e.is_quiet_sink_error() {
                debug!(product_id, error = %e, "dropping book snapshot row");
            } else {
                warn!(product_id, error = %e, "book sink append failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::SqliteBookSink;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn skips_unbuilt_books() {
        let registry = BookRegistry::new(&[("BTC-USD", 50_000)]);
        let sink = SqliteBookSink::open_in_memory().unwrap();
        let sampler = Sampler::new(&registry, &sink, vec![0.01], StdDuration::from_millis(5));
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            cancel_clone.cancel();
        });
        sampler.run(cancel).await;
    }

    #[tokio::test]
    async fn samples_built_book_into_sink() {
        let registry = BookRegistry::new(&[("BTC-USD", 50_000)]);
        registry.get("BTC-USD").unwrap().init_from_snapshot(
            &[("100.00".to_string(), "3.0".to_string())],
            &[("100.50".to_string(), "1.0".to_string())],
        );
        registry.get("BTC-USD").unwrap().set_market_price("100.00");

        let sink = SqliteBookSink::open_in_memory().unwrap();
        let sampler = Sampler::new(&registry, &sink, vec![0.01], StdDuration::from_millis(5));
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(15)).await;
            cancel_clone.cancel();
        });
        sampler.run(cancel).await;
    }

    #[tokio::test]
    async fn exits_promptly_on_immediate_cancellation() {
        let registry = BookRegistry::new(&[("BTC-USD", 50_000)]);
        let sink = SqliteBookSink::open_in_memory().unwrap();
        let sampler = Sampler::new(&registry, &sink, vec![0.01], StdDuration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let start = std::time::Instant::now();
        sampler.run(cancel).await;
        assert!(start.elapsed() < StdDuration::from_secs(1));
    }
}
