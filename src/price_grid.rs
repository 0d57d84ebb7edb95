//! Fixed-point price grid for one tracked product.
//!
//! Prices arrive off the wire as decimal strings. We convert them to an
//! integer number of cents on ingress so that all hot-path arithmetic
//! downstream (the segment tree's index math) is integer, never float -
//! the classic fixed-point-on-ingress / float-at-the-edges split.
//! See `SegmentBook` for where the resulting index feeds into the tree.

use rust_decimal::Decimal;
use std::str::FromStr;

/// Smallest valid price, in cents (inclusive).
const MIN_PRICE_CENTS: i64 = 1;

/// One price point inside the index domain `[0, price_cap_cents)`.
pub type PriceIndex = usize;

/// Immutable price↔index mapping for a single product, capped at
/// `price_cap_cents`. `price_cap_cents` is also the number of leaves in
/// the owning `SegmentBook`'s segment tree.
#[derive(Debug, Clone, Copy)]
pub struct PriceGrid {
    price_cap_cents: i64,
}

impl PriceGrid {
    /// `price_cap` is a whole-dollar amount; the grid covers `$0.01` up
    /// to and including `price_cap`.
    pub fn new(price_cap: u32) -> Self {
        Self {
            price_cap_cents: price_cap as i64 * 100,
        }
    }

    pub fn price_cap_cents(&self) -> usize {
        self.price_cap_cents as usize
    }

    /// Convert a decimal price string to a leaf index in `[0, price_cap_cents)`.
    ///
    /// Returns `None` for anything that isn't a valid, in-range, positive
    /// price: non-numeric input, zero or negative prices, and prices
    /// above the cap are all rejected here rather than downstream, so
    /// every caller gets the same validation for free.
    pub fn to_index(&self, price: &str) -> Option<PriceIndex> {
        let decimal = Decimal::from_str(price.trim()).ok()?;
        self.decimal_to_index(decimal)
    }

    /// Same conversion, for callers that already hold a `Decimal` (e.g.
    /// having summed/scaled a price rather than read it off the wire).
    pub fn decimal_to_index(&self, price: Decimal) -> Option<PriceIndex> {
        if !price.is_sign_positive() && !price.is_zero() {
            return None;
        }
        // Round-to-nearest-even at the cent boundary, matching the
        // feed's own quantization, then drop to an integer.
        let cents = (price * Decimal::from(100)).round();
        let cents: i64 = cents.try_into().ok()?;

        if cents < MIN_PRICE_CENTS || cents > self.price_cap_cents {
            return None;
        }
        Some((cents - 1) as PriceIndex)
    }

    /// Convert a leaf index back to whole cents (1-based), the inverse
    /// of `to_index`. Used when recording `market_price_cents`.
    pub fn index_to_cents(&self, index: PriceIndex) -> i64 {
        index as i64 + 1
    }

    /// `v` is a valid volume iff it is finite and non-negative.
    pub fn valid_volume(v: f64) -> bool {
        v.is_finite() && v >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_and_above_cap() {
        let grid = PriceGrid::new(200);
        assert_eq!(grid.to_index("0.00"), None);
        assert_eq!(grid.to_index("-1.00"), None);
        assert_eq!(grid.to_index("200.01"), None);
        assert_eq!(grid.to_index("not a number"), None);
    }

    #[test]
    fn accepts_boundary_prices() {
        let grid = PriceGrid::new(200);
        assert_eq!(grid.to_index("0.01"), Some(0));
        assert_eq!(grid.to_index("200.00"), Some(grid.price_cap_cents() - 1));
    }

    #[test]
    fn round_trips_through_cents() {
        let grid = PriceGrid::new(200);
        let idx = grid.to_index("100.00").unwrap();
        assert_eq!(grid.index_to_cents(idx), 10_000);
    }

    #[test]
    fn valid_volume_rejects_non_finite_and_negative() {
        assert!(PriceGrid::valid_volume(0.0));
        assert!(PriceGrid::valid_volume(12.5));
        assert!(!PriceGrid::valid_volume(-0.1));
        assert!(!PriceGrid::valid_volume(f64::NAN));
        assert!(!PriceGrid::valid_volume(f64::INFINITY));
    }
}
