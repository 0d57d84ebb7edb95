//! Persistent sinks for ticker rows and book snapshot rows.
//!
//! `TickerSink`/`BookSink` are narrow append-only contracts; the core
//! pipeline (`FeedDemux`, `Sampler`) only ever talks to these traits.
//! The SQLite-backed implementation below is the concrete default,
//! grounded in the corpus's own `rusqlite`-over-`Mutex<Connection>`
//! storage layers: WAL journal mode, `CREATE TABLE IF NOT EXISTS` at
//! open time, and primary-key collisions classified separately from
//! other SQLite errors so the transient/unique/fatal distinction in the
//! error taxonomy can be implemented precisely.

use crate::error::{Error, Result};
use crate::operator::OperatorChannel;
use crate::types::{BookSnapshotRow, TickerRow, DEFAULT_BANDS};
use rusqlite::{params, Connection, Error as SqliteError, OpenFlags};
use std::sync::{Arc, Mutex};

/// Sink for ticker rows. `append` is synchronous and may fail; callers
/// are expected to classify the error via `Error::is_quiet_sink_error`
/// and drop-and-continue rather than propagate for transient/unique
/// failures.
pub trait TickerSink: Send + Sync {
    fn append(&self, row: &TickerRow) -> Result<()>;
}

/// Sink for book snapshot rows.
pub trait BookSink: Send + Sync {
    fn append(&self, row: &BookSnapshotRow) -> Result<()>;
}

fn band_column_suffix(band: f64) -> String {
    // e.g. 0.01 -> "0001", 25.0 -> "2500", matching the original
    // logger's `buy_vol_0001` .. `buy_vol_2500` column names.
    format!("{:04}", (band * 100.0).round() as i64)
}

const TICKER_SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
CREATE TABLE IF NOT EXISTS tickers (
    system_time REAL PRIMARY KEY,
    server_time TEXT,
    product_id TEXT,
    price REAL,
    open_24h REAL,
    volume_24h REAL,
    best_bid REAL,
    best_ask REAL,
    side TEXT,
    last_size REAL
);
"#;

/// SQLite-backed `TickerSink`.
pub struct SqliteTickerSink {
    conn: Mutex<Connection>,
}

impl SqliteTickerSink {
    pub fn open(path: &str) -> Result<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(TICKER_SCHEMA)
            .map_err(|e| Error::sink_fatal(format!("failed to create `tickers` table: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::sink_fatal(format!("failed to open in-memory sqlite db: {e}")))?;
        conn.execute_batch(TICKER_SCHEMA)
            .map_err(|e| Error::sink_fatal(format!("failed to create `tickers` table: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl TickerSink for SqliteTickerSink {
    fn append(&self, row: &TickerRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tickers VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.system_time,
                row.server_time,
                row.product_id,
                row.price,
                row.open_24h,
                row.volume_24h,
                row.best_bid,
                row.best_ask,
                row.side,
                row.last_size,
            ],
        )
        .map(|_| ())
        .map_err(classify_sqlite_error)
    }
}

/// SQLite-backed `BookSink`. Uses `DEFAULT_BANDS` to build the fixed
/// column set at schema-creation time; every sampled row must carry
/// bands in that same order (`Sampler` guarantees this).
pub struct SqliteBookSink {
    conn: Mutex<Connection>,
}

impl SqliteBookSink {
    pub fn open(path: &str) -> Result<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(&book_schema())
            .map_err(|e| Error::sink_fatal(format!("failed to create `order_books` table: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::sink_fatal(format!("failed to open in-memory sqlite db: {e}")))?;
        conn.execute_batch(&book_schema())
            .map_err(|e| Error::sink_fatal(format!("failed to create `order_books` table: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn book_schema() -> String {
    let mut columns = String::new();
    for band in DEFAULT_BANDS {
        columns.push_str(&format!(", buy_vol_{} REAL", band_column_suffix(band)));
    }
    for band in DEFAULT_BANDS {
        columns.push_str(&format!(", sell_vol_{} REAL", band_column_suffix(band)));
    }
    format!(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        CREATE TABLE IF NOT EXISTS order_books (
            system_time REAL PRIMARY KEY,
            product_id TEXT,
            server_time TEXT,
            price REAL{columns},
            total REAL
        );
        "#
    )
}

impl BookSink for SqliteBookSink {
    fn append(&self, row: &BookSnapshotRow) -> Result<()> {
        let placeholders: Vec<String> = (1..=4 + row.buy_vol.len() + row.sell_vol.len() + 1)
            .map(|i| format!("?{i}"))
            .collect();
        let sql = format!(
            "INSERT INTO order_books VALUES ({})",
            placeholders.join(", ")
        );

        let conn = self.conn.lock().unwrap();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(row.system_time),
            Box::new(row.product_id.clone()),
            Box::new(row.server_time.clone()),
            Box::new(row.market_price),
        ];
        for v in &row.buy_vol {
            values.push(Box::new(*v));
        }
        for v in &row.sell_vol {
            values.push(Box::new(*v));
        }
        values.push(Box::new(row.total_volume));

        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        conn.execute(&sql, params.as_slice())
            .map(|_| ())
            .map_err(classify_sqlite_error)
    }
}

fn open_connection(path: &str) -> Result<Connection> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::sink_fatal(format!("failed to create sink directory: {e}")))?;
        }
    }
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(path, flags)
        .map_err(|e| Error::sink_fatal(format!("failed to open sink at {path}: {e}")))
}

/// SQLite reports primary-key collisions and "database is locked" as
/// the same broad error type; we inspect the message the way the
/// original logger's `__write_to_db` did, to keep the two apart. Any
/// other error (disk full, corruption, a malformed statement,
/// permissions, ...) falls into the third bucket, which escalates to
/// the operator channel instead of being dropped quietly.
fn classify_sqlite_error(e: SqliteError) -> Error {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        Error::sink_unique_violation(message)
    } else if message.contains("database is locked") || message.contains("busy") {
        Error::sink_transient(message)
    } else {
        Error::sink_other(message)
    }
}

/// Decorates a sink with operator escalation: errors other than
/// contention/uniqueness are reported to `channel` (expected to be
/// rate-limited) before being passed back to the caller, which still
/// drops the row per the sink contract.
pub struct NotifyingTickerSink<S: TickerSink> {
    inner: S,
    channel: Arc<dyn OperatorChannel>,
}

impl<S: TickerSink> NotifyingTickerSink<S> {
    pub fn new(inner: S, channel: Arc<dyn OperatorChannel>) -> Self {
        Self { inner, channel }
    }
}

impl<S: TickerSink> TickerSink for NotifyingTickerSink<S> {
    fn append(&self, row: &TickerRow) -> Result<()> {
        self.inner.append(row).inspect_err(|e| {
            if !e.is_quiet_sink_error() {
                self.channel.notify(&format!("ticker sink error: {e}"));
            }
        })
    }
}

pub struct NotifyingBookSink<S: BookSink> {
    inner: S,
    channel: Arc<dyn OperatorChannel>,
}

impl<S: BookSink> NotifyingBookSink<S> {
    pub fn new(inner: S, channel: Arc<dyn OperatorChannel>) -> Self {
        Self { inner, channel }
    }
}

impl<S: BookSink> BookSink for NotifyingBookSink<S> {
    fn append(&self, row: &BookSnapshotRow) -> Result<()> {
        self.inner.append(row).inspect_err(|e| {
            if !e.is_quiet_sink_error() {
                self.channel.notify(&format!("book sink error: {e}"));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::LoggingOperatorChannel;

    fn sample_ticker_row(system_time: f64) -> TickerRow {
        TickerRow {
            system_time,
            server_time: "2020-01-01 00:00:00".to_string(),
            product_id: "BTC-USD".to_string(),
            price: 123.45,
            open_24h: Some(100.0),
            volume_24h: Some(1000.0),
            best_bid: Some(123.40),
            best_ask: Some(123.50),
            side: Some("buy".to_string()),
            last_size: Some(0.5),
        }
    }

    fn sample_book_row(system_time: f64) -> BookSnapshotRow {
        BookSnapshotRow {
            system_time,
            product_id: "BTC-USD".to_string(),
            server_time: "2020-01-01 00:00:00".to_string(),
            market_price: 100.0,
            bands: DEFAULT_BANDS.to_vec(),
            buy_vol: vec![1.0; DEFAULT_BANDS.len()],
            sell_vol: vec![2.0; DEFAULT_BANDS.len()],
            total_volume: 3.0,
        }
    }

    #[test]
    fn ticker_sink_round_trips() {
        let sink = SqliteTickerSink::open_in_memory().unwrap();
        sink.append(&sample_ticker_row(1.0)).unwrap();
    }

    /// S6. Duplicate primary key.
    #[test]
    fn ticker_sink_rejects_duplicate_primary_key() {
        let sink = SqliteTickerSink::open_in_memory().unwrap();
        sink.append(&sample_ticker_row(42.0)).unwrap();
        let err = sink.append(&sample_ticker_row(42.0)).unwrap_err();
        assert!(err.is_quiet_sink_error());
    }

    #[test]
    fn book_sink_round_trips() {
        let sink = SqliteBookSink::open_in_memory().unwrap();
        sink.append(&sample_book_row(1.0)).unwrap();
    }

    #[test]
    fn book_sink_rejects_duplicate_primary_key() {
        let sink = SqliteBookSink::open_in_memory().unwrap();
        sink.append(&sample_book_row(7.0)).unwrap();
        let err = sink.append(&sample_book_row(7.0)).unwrap_err();
        assert!(err.is_quiet_sink_error());
    }

    #[test]
    fn notifying_sink_still_propagates_quiet_errors() {
        let sink = NotifyingTickerSink::new(
            SqliteTickerSink::open_in_memory().unwrap(),
            Arc::new(LoggingOperatorChannel),
        );
        sink.append(&sample_ticker_row(1.0)).unwrap();
        let err = sink.append(&sample_ticker_row(1.0)).unwrap_err();
        assert!(err.is_quiet_sink_error());
    }
}
