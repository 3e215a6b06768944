// =============================================================================
// Book Store — in-memory mirror of bids/asks per outcome token
// =============================================================================
//
// Lookup uses a canonical digits-only key. Upstream identifiers arrive in
// several formats (raw decimal strings, quoted JSON strings, bracketed
// array-strings); stripping every non-digit collapses them all onto one key,
// which removes a whole class of silent cache misses.
//
// Writes come from a single ingest task (snapshot or incremental); reads come
// from the scan cycle and API handlers. Each write replaces whole sides, so a
// racing reader sees either the previous or the new book, never a half-sorted
// one.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Book depth retained per side.
pub const MAX_DEPTH_PER_SIDE: usize = 50;

/// Levels included in a top-of-book depth summary unless the caller asks for
/// more.
pub const DEFAULT_SUMMARY_LEVELS: usize = 5;

/// One resting level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderLevel {
    pub price: f64,
    pub size: f64,
}

/// Per-token book: bids descending, asks ascending, both capped at
/// [`MAX_DEPTH_PER_SIDE`].
#[derive(Debug, Clone, Serialize)]
pub struct OrderBookState {
    pub bids: Vec<OrderLevel>,
    pub asks: Vec<OrderLevel>,
    pub updated_at: DateTime<Utc>,
}

/// Notional depth over the summarized prefix of each side.
#[derive(Debug, Clone, Serialize)]
pub struct DepthSummary {
    pub bid_liquidity_usd: f64,
    pub ask_liquidity_usd: f64,
    pub levels_count: usize,
}

/// Best bid/ask view. Field names keep the project's historical `no_` prefix
/// but the store accepts any outcome token.
#[derive(Debug, Clone, Serialize)]
pub struct TopOfBook {
    pub no_bid: Option<f64>,
    pub no_ask: Option<f64>,
    /// ask − bid, only when both sides are present.
    pub spread: Option<f64>,
    pub depth: DepthSummary,
}

/// Project an asset identifier onto the canonical digits-only key.
pub fn normalize_key(id: &str) -> String {
    id.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Thread-safe store of order books keyed by canonical token key.
pub struct BookStore {
    books: RwLock<HashMap<String, OrderBookState>>,
}

impl BookStore {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Replace both sides for a token. Sorts (bids descending, asks
    /// ascending), drops duplicate prices and non-positive sizes, truncates
    /// to max depth. A key that normalizes to empty is ignored.
    pub fn apply_snapshot(&self, asset_id: &str, bids: Vec<OrderLevel>, asks: Vec<OrderLevel>) {
        let key = normalize_key(asset_id);
        if key.is_empty() {
            return;
        }

        let state = OrderBookState {
            bids: prepare_side(bids, true),
            asks: prepare_side(asks, false),
            updated_at: Utc::now(),
        };
        self.books.write().insert(key, state);
    }

    /// Upsert or delete a single level. Size 0 removes the level; otherwise
    /// the level is replaced or inserted and the side re-sorted and
    /// re-truncated.
    pub fn apply_price_change(&self, asset_id: &str, price: f64, size: f64, side: Side) {
        let key = normalize_key(asset_id);
        if key.is_empty() {
            return;
        }

        let mut books = self.books.write();
        let book = books.entry(key).or_insert_with(|| OrderBookState {
            bids: Vec::new(),
            asks: Vec::new(),
            updated_at: Utc::now(),
        });

        let (levels, descending) = match side {
            Side::Buy => (&mut book.bids, true),
            Side::Sell => (&mut book.asks, false),
        };

        levels.retain(|l| l.price != price);
        if size > 0.0 {
            levels.push(OrderLevel { price, size });
        }
        let updated = prepare_side(std::mem::take(levels), descending);
        *levels = updated;
        book.updated_at = Utc::now();
    }

    /// Top-of-book with the default summary depth.
    pub fn top_of_book(&self, id: &str) -> Option<TopOfBook> {
        self.top_of_book_levels(id, DEFAULT_SUMMARY_LEVELS)
    }

    /// Top-of-book summarizing up to `max_levels` per side. Returns `None`
    /// when the token has no book at all.
    pub fn top_of_book_levels(&self, id: &str, max_levels: usize) -> Option<TopOfBook> {
        let key = normalize_key(id);
        if key.is_empty() {
            return None;
        }
        let books = self.books.read();
        let book = books.get(&key)?;

        let no_bid = book.bids.first().map(|l| l.price);
        let no_ask = book.asks.first().map(|l| l.price);
        let spread = match (no_bid, no_ask) {
            (Some(b), Some(a)) => Some(a - b),
            _ => None,
        };

        let bid_liquidity_usd: f64 = book
            .bids
            .iter()
            .take(max_levels)
            .map(|l| l.price * l.size)
            .sum();
        let ask_liquidity_usd: f64 = book
            .asks
            .iter()
            .take(max_levels)
            .map(|l| l.price * l.size)
            .sum();

        Some(TopOfBook {
            no_bid,
            no_ask,
            spread,
            depth: DepthSummary {
                bid_liquidity_usd,
                ask_liquidity_usd,
                levels_count: book.bids.len() + book.asks.len(),
            },
        })
    }

    /// Copy of up to [`MAX_DEPTH_PER_SIDE`] levels for fill simulation.
    pub fn depth(&self, id: &str, side: Side) -> Vec<OrderLevel> {
        let key = normalize_key(id);
        if key.is_empty() {
            return Vec::new();
        }
        let books = self.books.read();
        match books.get(&key) {
            Some(book) => match side {
                Side::Buy => book.bids.clone(),
                Side::Sell => book.asks.clone(),
            },
            None => Vec::new(),
        }
    }

    /// Full book clone for debug surfaces.
    pub fn get(&self, id: &str) -> Option<OrderBookState> {
        let key = normalize_key(id);
        self.books.read().get(&key).cloned()
    }

    pub fn has_book(&self, id: &str) -> bool {
        let key = normalize_key(id);
        !key.is_empty() && self.books.read().contains_key(&key)
    }

    /// Number of tokens with a book.
    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }

    /// A few stored keys for `/books-debug`.
    pub fn sample_keys(&self, n: usize) -> Vec<String> {
        self.books.read().keys().take(n).cloned().collect()
    }
}

impl Default for BookStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BookStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookStore")
            .field("books", &self.books.read().len())
            .finish()
    }
}

/// Sort a side, drop empty and duplicate-price levels, cap the depth.
fn prepare_side(mut levels: Vec<OrderLevel>, descending: bool) -> Vec<OrderLevel> {
    levels.retain(|l| l.size > 0.0 && l.price >= 0.0);
    if descending {
        levels.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
    } else {
        levels.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
    }
    levels.dedup_by(|a, b| a.price == b.price);
    levels.truncate(MAX_DEPTH_PER_SIDE);
    levels
}
