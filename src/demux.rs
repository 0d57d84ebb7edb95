//! Parses inbound feed frames and dispatches to book mutations or the
//! ticker sink.
//!
//! Grounded in the original logger's `on_message` dispatch (`type` ==
//! `snapshot`/`l2update`/`match`/`last_match`/`ticker`, anything else
//! ignored) and in the corpus's own JSON-frame handling in its
//! websocket transport layer (`serde_json::Value` parsed field by
//! field rather than into a single tagged enum, since unrecognized or
//! partially-malformed frames must be dropped rather than fail to
//! deserialize).

use crate::registry::BookRegistry;
use crate::sinks::TickerSink;
use crate::types::{system_time_now, TickerRow};
use serde_json::Value;
use tracing::{debug, warn};

/// Stateless frame dispatcher. Holds no data of its own beyond the
/// registry, sink, and clock it was constructed with.
pub struct FeedDemux<'a> {
    registry: &'a BookRegistry,
    ticker_sink: &'a dyn TickerSink,
    clock: Box<dyn Fn() -> f64 + 'a>,
}

impl<'a> FeedDemux<'a> {
    pub fn new(registry: &'a BookRegistry, ticker_sink: &'a dyn TickerSink) -> Self {
        Self { registry, ticker_sink, clock: Box::new(system_time_now) }
    }

    /// Like `new`, but sources the ticker row's `system_time` from
    /// `clock` instead of the wall clock. Used to reproduce S6
    /// (duplicate primary key) deterministically in tests.
    pub fn with_clock(
        registry: &'a BookRegistry,
        ticker_sink: &'a dyn TickerSink,
        clock: impl Fn() -> f64 + 'a,
    ) -> Self {
        Self { registry, ticker_sink, clock: Box::new(clock) }
    }

    /// Parse and apply one text frame. Malformed JSON or an unknown
    /// product is logged and dropped; the stream continues either way.
    pub fn handle_frame(&self, frame: &str) {
        let value: Value = match serde_json::from_str(frame) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "malformed feed frame, dropping");
                return;
            }
        };

        let Some(msg_type) = value.get("type").and_then(Value::as_str) else {
            debug!("feed frame missing `type`, ignoring");
            return;
        };

        match msg_type {
            "snapshot" => self.handle_snapshot(&value),
            "l2update" => self.handle_l2update(&value),
            "match" | "last_match" => self.handle_match(&value),
            "ticker" => self.handle_ticker(&value),
            other => debug!(msg_type = other, "unrecognized frame type, ignoring"),
        }
    }

    fn product_id<'v>(&self, value: &'v Value) -> Option<&'v str> {
        value.get("product_id").and_then(Value::as_str)
    }

    fn handle_snapshot(&self, value: &Value) {
        let Some(product_id) = self.product_id(value) else { return };
        let Some(book) = self.registry.get(product_id) else {
            debug!(product_id, "snapshot for unknown product, dropping");
            return;
        };

        let bids = parse_levels(value.get("bids"));
        let asks = parse_levels(value.get("asks"));
        book.init_from_snapshot(&bids, &asks);
    }

    fn handle_l2update(&self, value: &Value) {
        let Some(product_id) = self.product_id(value) else { return };
        let Some(book) = self.registry.get(product_id) else {
            debug!(product_id, "l2update for unknown product, dropping");
            return;
        };

        let Some(changes) = value.get("changes").and_then(Value::as_array) else {
            return;
        };

        for change in changes {
            let Some(entry) = change.as_array() else { continue };
            let [_side, price, new_size] = entry.as_slice() else { continue };
            let (Some(price), Some(new_size)) = (price.as_str(), new_size.as_str()) else {
                continue;
            };
            let Some(volume) = new_size.parse::<f64>().ok() else {
                warn!(product_id, price, new_size, "non-numeric l2update size, dropping");
                continue;
            };
            book.set_level(price, volume);
        }
    }

    fn handle_match(&self, value: &Value) {
        let Some(product_id) = self.product_id(value) else { return };
        let Some(book) = self.registry.get(product_id) else {
            debug!(product_id, "match for unknown product, dropping");
            return;
        };
        let Some(price) = value.get("price").and_then(Value::as_str) else {
            return;
        };
        book.set_market_price(price);
    }

    fn handle_ticker(&self, value: &Value) {
        let Some(product_id) = self.product_id(value) else { return };
        if !self.registry.contains(product_id) {
            debug!(product_id, "ticker for unknown product, dropping");
            return;
        }
        let Some(price) = value.get("price").and_then(Value::as_str).and_then(|s| s.parse::<f64>().ok()) else {
            return;
        };

        let row = TickerRow {
            system_time: (self.clock)(),
            server_time: value
                .get("time")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            product_id: product_id.to_string(),
            price,
            open_24h: as_f64(value.get("open_24h")),
            volume_24h: as_f64(value.get("volume_24h")),
            best_bid: as_f64(value.get("best_bid")),
            best_ask: as_f64(value.get("best_ask")),
            side: value.get("side").and_then(Value::as_str).map(str::to_string),
            last_size: as_f64(value.get("last_size")),
        };

        if let Err(e) = self.ticker_sink.append(&row) {
            if e.is_quiet_sink_error() {
                debug!(product_id, error = %e, "dropping ticker row");
            } else {
                warn!(product_id, error = %e, "ticker sink append failed");
            }
        }
    }
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_str).and_then(|s| s.parse::<f64>().ok())
}

fn parse_levels(value: Option<&Value>) -> Vec<(String, String)> {
    let Some(array) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    array
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            let price = pair.first()?.as_str()?;
            let size = pair.get(1)?.as_str()?;
            Some((price.to_string(), size.to_string()))
        })
        .collect()
}
