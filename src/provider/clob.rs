// =============================================================================
// CLOB REST Client — book snapshots and the TTL-cached HTTP fallback
// =============================================================================
//
// The scan cycle primes the book store with one batched snapshot per cycle.
// The fallback path serves `/book`, `/fill`, and the carry selector when the
// WebSocket mirror has no book yet; results are cached for a few seconds and
// the cache is capped so a burst of unknown tokens cannot grow it without
// bound.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::market_data::OrderLevel;

/// Fallback cache time-to-live.
const FALLBACK_TTL: Duration = Duration::from_secs(8);
/// Fallback cache entry cap.
const FALLBACK_CACHE_MAX: usize = 200;

/// A book as returned by the REST surface: bids descending, asks ascending.
#[derive(Debug, Clone)]
pub struct RestBook {
    pub bids: Vec<OrderLevel>,
    pub asks: Vec<OrderLevel>,
}

impl RestBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn ask_liquidity_usd(&self, levels: usize) -> f64 {
        self.asks.iter().take(levels).map(|l| l.price * l.size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

struct CacheEntry {
    book: Option<RestBook>,
    fetched_at: Instant,
}

#[derive(Default)]
struct FallbackCache {
    entries: HashMap<String, CacheEntry>,
    insertion_order: VecDeque<String>,
}

/// REST client for the order-book API.
pub struct ClobClient {
    base_url: String,
    client: reqwest::Client,
    cache: Mutex<FallbackCache>,
}

impl ClobClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
            cache: Mutex::new(FallbackCache::default()),
        }
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// GET /book for a single token.
    pub async fn fetch_book(&self, token_id: &str) -> Result<RestBook> {
        let url = format!("{}/book?token_id={}", self.base_url, token_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /book request failed")?;

        let status = resp.status();
        let body: Value = resp.json().await.context("failed to parse /book response")?;
        if !status.is_success() {
            anyhow::bail!("GET /book returned {status}: {body}");
        }

        Ok(parse_rest_book(&body))
    }

    /// POST /books for a batch of tokens. Returns `(token_id, book)` pairs;
    /// tokens the venue does not know are simply absent.
    pub async fn fetch_books(&self, token_ids: &[String]) -> Result<Vec<(String, RestBook)>> {
        if token_ids.is_empty() {
            return Ok(Vec::new());
        }

        let payload: Vec<Value> = token_ids
            .iter()
            .map(|t| serde_json::json!({ "token_id": t }))
            .collect();

        let url = format!("{}/books", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("POST /books request failed")?;

        let status = resp.status();
        let body: Value = resp.json().await.context("failed to parse /books response")?;
        if !status.is_success() {
            anyhow::bail!("POST /books returned {status}: {body}");
        }

        let mut out = Vec::new();
        if let Some(arr) = body.as_array() {
            for entry in arr {
                let token = entry
                    .get("asset_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if token.is_empty() {
                    continue;
                }
                out.push((token, parse_rest_book(entry)));
            }
        }
        debug!(requested = token_ids.len(), received = out.len(), "book snapshot fetched");
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // TTL-cached fallback
    // -------------------------------------------------------------------------

    /// Fetch a book with a short TTL cache, absorbing errors into `None`.
    /// Used when the live mirror has no book for a token.
    pub async fn fallback_book(&self, token_id: &str) -> Option<RestBook> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.entries.get(token_id) {
                if entry.fetched_at.elapsed() < FALLBACK_TTL {
                    return entry.book.clone();
                }
            }
        }

        let fetched = match self.fetch_book(token_id).await {
            Ok(book) if !book.is_empty() => Some(book),
            Ok(_) => None,
            Err(e) => {
                warn!(token_id, error = %e, "HTTP book fallback failed");
                None
            }
        };

        let mut cache = self.cache.lock();
        if !cache.entries.contains_key(token_id) {
            cache.insertion_order.push_back(token_id.to_string());
        }
        cache.entries.insert(
            token_id.to_string(),
            CacheEntry {
                book: fetched.clone(),
                fetched_at: Instant::now(),
            },
        );
        while cache.entries.len() > FALLBACK_CACHE_MAX {
            match cache.insertion_order.pop_front() {
                Some(oldest) => {
                    cache.entries.remove(&oldest);
                }
                None => break,
            }
        }

        fetched
    }

    /// Test hook: how many fallback entries are cached.
    #[cfg(test)]
    pub fn cached_fallbacks(&self) -> usize {
        self.cache.lock().entries.len()
    }

    #[cfg(test)]
    pub fn seed_cache(&self, token_id: &str, book: Option<RestBook>) {
        let mut cache = self.cache.lock();
        if !cache.entries.contains_key(token_id) {
            cache.insertion_order.push_back(token_id.to_string());
        }
        cache.entries.insert(
            token_id.to_string(),
            CacheEntry {
                book,
                fetched_at: Instant::now(),
            },
        );
        while cache.entries.len() > FALLBACK_CACHE_MAX {
            if let Some(oldest) = cache.insertion_order.pop_front() {
                cache.entries.remove(&oldest);
            }
        }
    }
}

impl std::fmt::Debug for ClobClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClobClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Parse one REST book body. Prices and sizes arrive as strings; levels are
/// re-sorted locally rather than trusting upstream order.
fn parse_rest_book(body: &Value) -> RestBook {
    let mut bids = parse_levels(body.get("bids"));
    let mut asks = parse_levels(body.get("asks"));
    bids.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
    asks.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
    RestBook { bids, asks }
}

fn parse_levels(value: Option<&Value>) -> Vec<OrderLevel> {
    let mut out = Vec::new();
    let Some(arr) = value.and_then(|v| v.as_array()) else {
        return out;
    };
    for entry in arr {
        let price = entry
            .get("price")
            .and_then(parse_number)
            .unwrap_or(0.0);
        let size = entry.get("size").and_then(parse_number).unwrap_or(0.0);
        if price > 0.0 && size > 0.0 {
            out.push(OrderLevel { price, size });
        }
    }
    out
}

/// Numbers arrive either as JSON numbers or as quoted decimal strings.
fn parse_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
