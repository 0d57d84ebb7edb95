//! aggbook: a concurrent segment-tree order book and ticker/volume
//! logger for a crypto exchange feed.
//!
//! Ingests a public market-data websocket feed, maintains one
//! [`segment_book::SegmentBook`] per product for O(log N) banded
//! volume queries, and periodically writes ticker and book-snapshot
//! rows to SQLite.
//!
//! ```no_run
//! use aggbook::config::Config;
//! use aggbook::supervisor::Supervisor;
//!
//! #[tokio::main]
//! async fn main() {
//!     aggbook::init();
//!     let config = Config::from_env();
//!     let supervisor = Supervisor::new(&config).expect("failed to start supervisor");
//!     supervisor.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await;
//! }
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initializes process-wide structured logging. Honors `RUST_LOG`,
/// defaulting to `info` when unset.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("aggbook initialized");
}

pub mod config;
pub mod demux;
pub mod error;
pub mod operator;
pub mod price_grid;
pub mod registry;
pub mod sampler;
pub mod segment_book;
pub mod sinks;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use crate::error::{Error, Result};
