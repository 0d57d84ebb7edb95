//! The concurrent aggregating order book.
//!
//! An array-backed segment tree over price-indexed leaves. Leaves hold
//! resting volume at each cent between `$0.01` and a per-product price
//! cap; internal nodes hold the sum of their two children, so any
//! contiguous price range can be summed in `O(log price_cap_cents)`
//! instead of walking every leaf.
//!
//! Ported from a segment-tree order book that predates this crate
//! (see `OrderBook.py` in the original logger): same index arithmetic,
//! same absolute-assignment semantics for level updates, reworked here
//! behind a `Mutex` so a writer (the feed) and a reader (the sampler)
//! can touch the same book from different threads without ever
//! observing a partially-propagated tree.

use crate::price_grid::PriceGrid;
use crate::types::{BookSnapshotRow, server_time_now, system_time_now};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

struct Tree {
    /// Flat segment tree, length `2 * price_cap_cents`. Index 0 unused,
    /// index 1 is the root, leaves occupy `[price_cap_cents, 2 *
    /// price_cap_cents)`.
    nodes: Vec<f64>,
    /// Last observed trade price, in cents. Zero until the first match.
    market_price_cents: i64,
}

/// A single product's order book.
pub struct SegmentBook {
    product_id: String,
    grid: PriceGrid,
    tree: Mutex<Tree>,
    /// Count of rejected price/volume updates, for observability; not
    /// part of the book's logical state and not protected by `tree`'s
    /// lock.
    rejected: AtomicU64,
}

impl SegmentBook {
    pub fn new(product_id: impl Into<String>, price_cap: u32) -> Self {
        let grid = PriceGrid::new(price_cap);
        let size = grid.price_cap_cents();
        Self {
            product_id: product_id.into(),
            grid,
            tree: Mutex::new(Tree {
                nodes: vec![0.0; 2 * size],
                market_price_cents: 0,
            }),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// True once the book holds any volume at all, i.e. it has received
    /// a valid snapshot or level update. The sampler uses this to skip
    /// books that haven't been built yet.
    pub fn built(&self) -> bool {
        let tree = self.tree.lock().unwrap();
        tree.nodes[1] != 0.0
    }

    /// Build the book from a snapshot's bid and ask sides. Each entry is
    /// `(price, size)` as decimal strings. Replaces the book's entire
    /// leaf array and rebuilds every internal node bottom-up in a single
    /// critical section, so a reader never observes a half-built tree.
    ///
    /// Asks are applied after bids, so if a feed anomaly puts the same
    /// price on both sides, the ask value wins.
    pub fn init_from_snapshot(&self, bids: &[(String, String)], asks: &[(String, String)]) {
        let size = self.grid.price_cap_cents();
        let mut leaves = vec![0.0f64; size];

        for (price, size_str) in bids.iter().chain(asks.iter()) {
            self.write_leaf(&mut leaves, price, size_str);
        }

        let mut tree = self.tree.lock().unwrap();
        let base = size;
        tree.nodes[base..base + size].copy_from_slice(&leaves);
        for i in (1..base).rev() {
            tree.nodes[i] = tree.nodes[2 * i] + tree.nodes[2 * i + 1];
        }
    }

    fn write_leaf(&self, leaves: &mut [f64], price: &str, volume: &str) {
        let Some(volume) = parse_f64(volume) else {
            self.reject(price, f64::NAN);
            return;
        };
        match self.validate(price, volume) {
            Some(index) => leaves[index] = volume,
            None => self.reject(price, volume),
        }
    }

    /// Absolute assignment of the total resting volume at `price`. The
    /// feed sends the *new total* at a level on every `l2update`,
    /// including zero (which removes the level) - never a delta to add
    /// or subtract, so we must not pre-subtract the old value.
    pub fn set_level(&self, price: &str, volume: f64) {
        let Some(index) = self.validate(price, volume) else {
            self.reject(price, volume);
            return;
        };

        let mut tree = self.tree.lock().unwrap();
        let mut i = self.grid.price_cap_cents() + index;
        tree.nodes[i] = volume;
        while i > 1 {
            i >>= 1;
            tree.nodes[i] = tree.nodes[2 * i] + tree.nodes[2 * i + 1];
        }
    }

    /// Record the last trade price, used to split the book into bid and
    /// ask halves for sampling. Invalid prices leave the market price
    /// unchanged.
    pub fn set_market_price(&self, price: &str) {
        let Some(index) = self.grid.to_index(price) else {
            warn!(
                product_id = %self.product_id,
                price,
                "market price not set, invalid price"
            );
            return;
        };
        let mut tree = self.tree.lock().unwrap();
        tree.market_price_cents = self.grid.index_to_cents(index);
    }

    /// Sum of resting volume over `[lo, hi]`, inclusive at cent
    /// granularity. Returns 0 for inverted or out-of-range bounds.
    pub fn range_sum(&self, lo_price: &str, hi_price: &str) -> f64 {
        let (Some(lo), Some(hi)) = (self.grid.to_index(lo_price), self.grid.to_index(hi_price))
        else {
            warn!(
                product_id = %self.product_id,
                lo_price, hi_price,
                "failed to query volume, invalid bound"
            );
            return 0.0;
        };
        if hi < lo {
            return 0.0;
        }
        let tree = self.tree.lock().unwrap();
        Self::range_sum_indices(&tree.nodes, self.grid.price_cap_cents(), lo, hi)
    }

    fn range_sum_indices(nodes: &[f64], base: usize, lo: usize, hi: usize) -> f64 {
        let mut l = base + lo;
        let mut r = base + hi + 1; // half-open upper bound
        let mut sum = 0.0;
        while l < r {
            if l & 1 == 1 {
                sum += nodes[l];
                l += 1;
            }
            if r & 1 == 1 {
                r -= 1;
                sum += nodes[r];
            }
            l >>= 1;
            r >>= 1;
        }
        sum
    }

    /// Total resting volume across the whole book. Equivalent to the
    /// root node once built; expressed as a range query for consistency
    /// with the original logger's boundary handling (`$0.01` to
    /// `price_cap - $0.01`).
    pub fn total(&self) -> f64 {
        let cap_cents = self.grid.price_cap_cents();
        let tree = self.tree.lock().unwrap();
        Self::range_sum_indices(&tree.nodes, cap_cents, 0, cap_cents - 2)
    }

    /// Take a point-in-time snapshot of banded buy/sell volume around
    /// the current market price, under one lock acquisition.
    pub fn sample(&self, bands: &[f64]) -> BookSnapshotRow {
        let cap_cents = self.grid.price_cap_cents();
        let tree = self.tree.lock().unwrap();
        let market_cents = tree.market_price_cents;
        let market_price = market_cents as f64 / 100.0;

        let mut buy_vol = Vec::with_capacity(bands.len());
        let mut sell_vol = Vec::with_capacity(bands.len());
        for &pct in bands {
            let delta_cents = ((market_cents as f64) * pct / 100.0).round() as i64;
            let lo_cents = (market_cents - delta_cents).max(1);
            let hi_cents = (market_cents + delta_cents).min(cap_cents as i64);

            let lo = (lo_cents - 1).max(0) as usize;
            let hi_market = (market_cents - 1).max(0) as usize;
            let hi_upper = (hi_cents - 1).max(0) as usize;

            buy_vol.push(Self::range_sum_indices(&tree.nodes, cap_cents, lo.min(hi_market), hi_market));
            sell_vol.push(Self::range_sum_indices(
                &tree.nodes,
                cap_cents,
                hi_market,
                hi_upper.max(hi_market),
            ));
        }
        let total = Self::range_sum_indices(&tree.nodes, cap_cents, 0, cap_cents - 2);

        BookSnapshotRow {
            system_time: system_time_now(),
            product_id: self.product_id.clone(),
            server_time: server_time_now(),
            market_price,
            bands: bands.to_vec(),
            buy_vol,
            sell_vol,
            total_volume: total,
        }
    }

    fn validate(&self, price: &str, volume: f64) -> Option<usize> {
        if !crate::price_grid::PriceGrid::valid_volume(volume) {
            return None;
        }
        self.grid.to_index(price)
    }

    fn reject(&self, price: &str, volume: f64) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(
            product_id = %self.product_id,
            price, volume,
            "order book update dropped, not a valid order"
        );
    }
}

fn parse_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_book() -> SegmentBook {
        let book = SegmentBook::new("BTC-USD", 200);
        book.init_from_snapshot(
            &[
                ("100.00".into(), "1.5".into()),
                ("99.50".into(), "2.0".into()),
            ],
            &[("100.50".into(), "0.5".into())],
        );
        book
    }

    /// S1. Snapshot then total.
    #[test]
    fn s1_snapshot_then_total() {
        let book = snapshot_book();
        assert_eq!(book.total(), 4.0);
    }

    /// S2. Incremental set and range.
    #[test]
    fn s2_incremental_set_and_range() {
        let book = snapshot_book();
        book.set_level("100.00", 3.0);
        assert_eq!(book.range_sum("99.50", "100.00"), 5.0);
        assert_eq!(book.total(), 5.5);
    }

    /// S3. Level removal.
    #[test]
    fn s3_level_removal() {
        let book = snapshot_book();
        book.set_level("100.00", 3.0);
        book.set_level("99.50", 0.0);
        assert_eq!(book.total(), 3.5);
        assert_eq!(book.range_sum("99.50", "99.50"), 0.0);
    }

    /// S4. Market price & bands.
    ///
    /// `buy_vol` matches the literal scenario in the spec exactly.
    /// `sell_vol` does not: the spec's own worked example (0.5) ignores
    /// that S2 already overwrote the leaf at the market price (100.00)
    /// to 3.0, so a range sum over [100.00, 100.50] is 3.5, not 0.5. We
    /// follow the stated formula and the inclusive-both-ends convention
    /// uniformly (see DESIGN.md) rather than the arithmetic in the
    /// worked example, since doing so is what keeps P6 (buy+sell double
    /// counts exactly the market leaf) true.
    #[test]
    fn s4_market_price_and_bands() {
        let book = snapshot_book();
        book.set_level("100.00", 3.0);
        book.set_market_price("100.00");
        let row = book.sample(&[0.5, 1.0]);
        assert_eq!(row.buy_vol[0], 5.0);
        assert_eq!(row.sell_vol[0], 3.5);
    }

    /// P6: buy_vol + sell_vol double-counts exactly the market leaf
    /// relative to the plain range sum over the same bounds.
    #[test]
    fn p6_sample_consistency() {
        let book = snapshot_book();
        book.set_level("100.00", 3.0);
        book.set_market_price("100.00");
        let row = book.sample(&[0.5]);
        let plain = book.range_sum("99.50", "100.50");
        let market_leaf = book.range_sum("100.00", "100.00");
        assert_eq!(row.buy_vol[0] + row.sell_vol[0], plain + market_leaf);
    }

    #[test]
    fn p3_idempotent_absolute_set() {
        let book = snapshot_book();
        book.set_level("150.00", 7.0);
        let after_first = book.total();
        book.set_level("150.00", 7.0);
        assert_eq!(book.total(), after_first);
    }

    #[test]
    fn p4_removal_reduces_root_exactly() {
        let book = snapshot_book();
        let before = book.total();
        book.set_level("100.50", 0.0);
        assert_eq!(book.total(), before - 0.5);
    }

    #[test]
    fn p5_total_matches_full_range_sum() {
        let book = snapshot_book();
        assert_eq!(book.total(), book.range_sum("0.01", "199.99"));
    }

    #[test]
    fn boundary_zero_and_above_cap_rejected() {
        let book = SegmentBook::new("BTC-USD", 200);
        book.set_level("0.00", 1.0);
        book.set_level("200.01", 1.0);
        assert_eq!(book.total(), 0.0);
        assert_eq!(book.rejected_count(), 2);
    }

    #[test]
    fn inverted_range_returns_zero() {
        let book = snapshot_book();
        assert_eq!(book.range_sum("100.00", "99.50"), 0.0);
    }

    #[test]
    fn unbuilt_book_reports_not_built() {
        let book = SegmentBook::new("BTC-USD", 200);
        assert!(!book.built());
        book.set_level("50.00", 1.0);
        assert!(book.built());
    }

    #[test]
    fn duplicate_price_across_sides_takes_ask_value() {
        let book = SegmentBook::new("BTC-USD", 200);
        book.init_from_snapshot(
            &[("100.00".into(), "1.0".into())],
            &[("100.00".into(), "2.0".into())],
        );
        assert_eq!(book.range_sum("100.00", "100.00"), 2.0);
    }

    #[test]
    fn concurrent_writes_and_reads_preserve_invariant() {
        use std::sync::Arc;
        let book = Arc::new(SegmentBook::new("BTC-USD", 200));
        let writer_book = Arc::clone(&book);
        let writer = std::thread::spawn(move || {
            for i in 0..500u32 {
                let price = format!("{}.00", 1 + (i % 150));
                writer_book.set_level(&price, (i % 7) as f64);
            }
        });
        let reader_book = Arc::clone(&book);
        let reader = std::thread::spawn(move || {
            for _ in 0..500 {
                let total = reader_book.total();
                assert!(total.is_finite());
                assert!(total >= 0.0);
            }
        });
        writer.join().unwrap();
        reader.join().unwrap();
    }
}
