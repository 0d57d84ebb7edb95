//! Wire and row types shared across the ingestion pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// The nine percentage bands a book snapshot is sampled at, lifted
/// verbatim from the original logger's `percent_ranges`.
pub const DEFAULT_BANDS: [f64; 9] = [0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0];

/// Which side of the book an order or trade is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// One row of the `tickers` sink table. `system_time` is the primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerRow {
    pub system_time: f64,
    pub server_time: String,
    pub product_id: String,
    pub price: f64,
    pub open_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub side: Option<String>,
    pub last_size: Option<f64>,
}

/// One row of the `order_books` sink table. `system_time` is the primary
/// key. `buy_vol`/`sell_vol` are positional, parallel to `bands`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshotRow {
    pub system_time: f64,
    pub product_id: String,
    pub server_time: String,
    pub market_price: f64,
    pub bands: Vec<f64>,
    pub buy_vol: Vec<f64>,
    pub sell_vol: Vec<f64>,
    pub total_volume: f64,
}

/// Current wall-clock time as seconds-since-epoch, matching the
/// original logger's `time.time()` index column.
pub fn system_time_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs_f64()
}

/// Current UTC time rendered the way the original logger stored
/// `server_time`: `datetime.utcnow().__str__()`'s Rust equivalent.
pub fn server_time_now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}
