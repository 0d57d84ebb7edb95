//! Owns every tracked product's order book.
//!
//! Products are fixed at construction time from `Config`; there is no
//! dynamic add/remove while the supervisor is running. `FeedDemux` and
//! `Sampler` each hold a shared reference to the registry and look
//! books up by product id - they never own a book outright, the
//! registry does.

use crate::segment_book::SegmentBook;
use std::collections::HashMap;

pub struct BookRegistry {
    books: HashMap<String, SegmentBook>,
}

impl BookRegistry {
    /// `products` is `(product_id, price_cap)` pairs, e.g. the four
    /// pairs this system has historically tracked.
    pub fn new(products: &[(&str, u32)]) -> Self {
        let books = products
            .iter()
            .map(|&(product_id, price_cap)| {
                (product_id.to_string(), SegmentBook::new(product_id, price_cap))
            })
            .collect();
        Self { books }
    }

    pub fn get(&self, product_id: &str) -> Option<&SegmentBook> {
        self.books.get(product_id)
    }

    pub fn contains(&self, product_id: &str) -> bool {
        self.books.contains_key(product_id)
    }

    pub fn product_ids(&self) -> impl Iterator<Item = &str> {
        self.books.keys().map(String::as_str)
    }

    pub fn books(&self) -> impl Iterator<Item = &SegmentBook> {
        self.books.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_configured_products() {
        let registry = BookRegistry::new(&[("BTC-USD", 50_000), ("ETH-USD", 10_000)]);
        assert!(registry.get("BTC-USD").is_some());
        assert!(registry.get("ETH-USD").is_some());
        assert!(registry.get("DOGE-USD").is_none());
    }

    #[test]
    fn unbuilt_books_start_unbuilt() {
        let registry = BookRegistry::new(&[("BTC-USD", 50_000)]);
        assert!(!registry.get("BTC-USD").unwrap().built());
    }
}
