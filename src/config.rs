//! Process configuration, loaded from the environment (via `.env` using
//! `dotenvy`, matching the corpus's convention) with hardcoded defaults.
//! There are no CLI flags - the binary takes no arguments - so the
//! environment is the only override surface.

use crate::types::DEFAULT_BANDS;
use std::time::Duration;

/// The four products this system has historically tracked, with their
/// per-product price cap in whole dollars. Lifted from the original
/// logger's `LoggerHandler.__init__`.
pub const DEFAULT_PRODUCTS: [(&str, u32); 4] = [
    ("BTC-USD", 50_000),
    ("ETH-USD", 10_000),
    ("LTC-USD", 5_000),
    ("BCH-USD", 20_000),
];

#[derive(Debug, Clone)]
pub struct Config {
    pub products: Vec<(String, u32)>,
    pub bands: Vec<f64>,
    pub sample_period: Duration,
    pub feed_url: String,
    pub ticker_db_path: String,
    pub book_db_path: String,
    pub operator_notify_period: Duration,
}

impl Config {
    /// Build configuration from the environment, falling back to
    /// defaults for anything unset. Never fails: a missing/invalid
    /// environment variable just means the default is used, logged at
    /// debug level by the caller.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let sample_period_ms: u64 = std::env::var("AGGBOOK_SAMPLE_PERIOD_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);

        Self {
            products: DEFAULT_PRODUCTS
                .iter()
                .map(|&(id, cap)| (id.to_string(), cap))
                .collect(),
            bands: DEFAULT_BANDS.to_vec(),
            sample_period: Duration::from_millis(sample_period_ms),
            feed_url: std::env::var("AGGBOOK_FEED_URL")
                .unwrap_or_else(|_| "wss://ws-feed.exchange.example/".to_string()),
            ticker_db_path: std::env::var("AGGBOOK_TICKER_DB").unwrap_or_else(|_| "tickers.db".to_string()),
            book_db_path: std::env::var("AGGBOOK_BOOK_DB").unwrap_or_else(|_| "order_books.db".to_string()),
            operator_notify_period: Duration::from_secs(300),
        }
    }

    pub fn product_refs(&self) -> Vec<(&str, u32)> {
        self.products.iter().map(|(id, cap)| (id.as_str(), *cap)).collect()
    }
}
