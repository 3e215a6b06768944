// =============================================================================
// Carry Selector — YES-side resolution-carry candidates
// =============================================================================
//
// Buy YES near certainty, hold to resolution, earn (1 - ask) / ask. Every
// market runs a staged pipeline; the first failing stage rejects the market
// and bumps a per-reason counter so the operator can see exactly where the
// funnel narrows.
//
// A synthetic ask (bid + tick when the ask side is empty) prices candidates
// that cannot be executed; those plans are paper-only and the confirm path
// refuses them.
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::CarryConfig;
use crate::keys::{carry_assumption_key, carry_window_key};
use crate::market_data::{normalize_key, BookStore};
use crate::provider::ClobClient;
use crate::types::{NormalizedMarket, PriceSource};

/// Keyword fallback when the config allowlist is empty.
pub const DEFAULT_ALLOW_KEYWORDS: [&str; 10] = [
    "fed",
    "cpi",
    "temperature",
    "rainfall",
    "snow",
    "election",
    "court",
    "rate decision",
    "deadline",
    "resolution",
];

/// A market that survived the carry pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct CarryCandidate {
    pub market_id: String,
    pub condition_id: String,
    pub yes_token_id: String,
    pub category: String,
    pub question: String,
    pub yes_ask: f64,
    pub yes_bid: Option<f64>,
    pub spread: Option<f64>,
    pub ask_liquidity_usd: f64,
    pub t_days: f64,
    pub edge_abs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_edge_ratio: Option<f64>,
    pub carry_roi_pct: f64,
    pub price_source: PriceSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthetic_reason: Option<String>,
    pub assumption_key: String,
    pub window_key: String,
    pub end_date_iso: String,
}

/// Selector output: candidates plus per-reason rejection counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CarrySelection {
    pub candidates: Vec<CarryCandidate>,
    pub debug: BTreeMap<String, u64>,
}

impl CarrySelection {
    fn reject(&mut self, reason: &str) {
        *self.debug.entry(reason.to_string()).or_insert(0) += 1;
    }
}

/// Run the carry pipeline over the scanned market set.
pub async fn select(
    markets: &[NormalizedMarket],
    store: &BookStore,
    clob: Option<&ClobClient>,
    cfg: &CarryConfig,
    now: DateTime<Utc>,
) -> CarrySelection {
    let mut out = CarrySelection::default();
    if !cfg.enabled {
        return out;
    }

    for market in markets {
        // 1. A usable YES token id, canonicalized.
        let yes_token = market
            .yes_token_id
            .as_deref()
            .map(normalize_key)
            .unwrap_or_default();
        if yes_token.is_empty() {
            out.reject("no_yes_token");
            continue;
        }

        // 2-3. Resolution time and the day window.
        let Some(end) = market.end_date else {
            out.reject("no_end_date");
            continue;
        };
        let t_days = (end - now).num_seconds() as f64 / 86_400.0;
        if t_days <= 0.0 {
            out.reject("already_ended_or_resolving");
            continue;
        }
        if t_days < cfg.min_days_to_resolution {
            out.reject("too_soon_to_resolve");
            continue;
        }
        if t_days > cfg.max_days {
            out.reject("beyond_max_days");
            continue;
        }

        // 4. Procedural heuristic over keywords and categories.
        if !heuristic_allows(market, cfg) {
            out.reject("keyword_category_mismatch");
            continue;
        }

        // 5. A book, from the mirror or (optionally) over HTTP.
        let mut price_source = PriceSource::Ws;
        let yes_bid;
        let mut yes_ask_opt;
        let mut ask_liquidity_usd;

        match store.top_of_book(&yes_token) {
            Some(top) => {
                yes_bid = top.no_bid;
                yes_ask_opt = top.no_ask;
                ask_liquidity_usd = top.depth.ask_liquidity_usd;
            }
            None => {
                let fetched = if cfg.allow_http_fallback {
                    match clob {
                        Some(c) => c.fallback_book(&yes_token).await,
                        None => None,
                    }
                } else {
                    None
                };
                match fetched {
                    Some(book) => {
                        price_source = PriceSource::Http;
                        yes_bid = book.best_bid();
                        yes_ask_opt = book.best_ask();
                        ask_liquidity_usd = book.ask_liquidity_usd(5);
                    }
                    None => {
                        out.reject("no_book");
                        continue;
                    }
                }
            }
        }

        // 6. Derive the ask, synthesizing from the bid when allowed.
        let mut synthetic_reason = None;
        let yes_ask = match yes_ask_opt.take() {
            Some(a) => a,
            None => {
                let Some(bid) = yes_bid else {
                    out.reject("no_ask");
                    continue;
                };
                if !cfg.allow_synthetic_ask {
                    out.reject("no_ask");
                    continue;
                }
                price_source = PriceSource::SyntheticAsk;
                synthetic_reason = Some("no_ask_using_noBid_plus_tick".to_string());
                ask_liquidity_usd = 0.0;
                (bid + cfg.synthetic_tick).min(cfg.synthetic_max_ask)
            }
        };

        let spread = yes_bid.map(|b| yes_ask - b);
        if let Some(s) = spread {
            if s > cfg.max_spread {
                out.reject("spread_too_wide");
                continue;
            }
        }
        // A synthetic ask has no resting size behind it; the liquidity gate
        // only applies to real asks.
        if price_source != PriceSource::SyntheticAsk && ask_liquidity_usd < cfg.min_ask_liq_usd {
            out.reject("ask_liquidity_low");
            continue;
        }

        // 7. Edge checks.
        let edge_abs = 1.0 - yes_ask;
        if edge_abs <= cfg.spread_edge_min_abs {
            out.reject("edge_too_small");
            continue;
        }
        let spread_edge_ratio = spread.map(|s| s / edge_abs);
        if let Some(s) = spread {
            if s > edge_abs * cfg.spread_edge_max_ratio {
                out.reject("spread_edge_ratio_exceeded");
                continue;
            }
        }

        // 8. ROI band.
        let carry_roi_pct = (1.0 - yes_ask) / yes_ask * 100.0;
        if carry_roi_pct < cfg.roi_min_pct {
            out.reject("roi_below_min");
            continue;
        }
        if carry_roi_pct > cfg.roi_max_pct {
            out.reject("roi_above_max");
            continue;
        }

        // 9. Candidate.
        let category = crate::keys::category_of(market);
        let end_date_iso = end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let candidate = CarryCandidate {
            market_id: market.market_id.clone(),
            condition_id: market.condition_id.clone(),
            yes_token_id: yes_token,
            assumption_key: carry_assumption_key(&category, &end_date_iso),
            window_key: carry_window_key(t_days).to_string(),
            category,
            question: market.question.clone(),
            yes_ask,
            yes_bid,
            spread,
            ask_liquidity_usd,
            t_days,
            edge_abs,
            spread_edge_ratio,
            carry_roi_pct,
            price_source,
            synthetic_reason,
            end_date_iso,
        };
        debug!(
            market_id = %candidate.market_id,
            roi = candidate.carry_roi_pct,
            source = %candidate.price_source,
            "carry candidate selected"
        );
        out.candidates.push(candidate);
        out.reject("passed");
    }

    out
}

/// Keyword/category gate. With no configured lists every market is eligible;
/// otherwise text must hit a keyword (config list, or the default set when
/// the config list is empty) or the category must match exactly.
fn heuristic_allows(market: &NormalizedMarket, cfg: &CarryConfig) -> bool {
    if cfg.allow_keywords.is_empty() && cfg.allow_categories.is_empty() {
        return true;
    }

    let text = format!(
        "{} {}",
        market.question.to_lowercase(),
        market.rules.as_deref().unwrap_or("").to_lowercase()
    );

    let keyword_hit = if cfg.allow_keywords.is_empty() {
        DEFAULT_ALLOW_KEYWORDS.iter().any(|k| text.contains(k))
    } else {
        cfg.allow_keywords
            .iter()
            .any(|k| text.contains(&k.to_lowercase()))
    };
    if keyword_hit {
        return true;
    }

    match &market.category {
        Some(c) => cfg.allow_categories.iter().any(|a| a == c.trim()),
        None => false,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::OrderLevel;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn market(days_out: i64) -> NormalizedMarket {
        NormalizedMarket {
            market_id: "m-carry".to_string(),
            condition_id: "c-carry".to_string(),
            question: "Will the election result be certified?".to_string(),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            end_date: Some(now() + Duration::days(days_out)),
            category: Some("Politics".to_string()),
            rules: None,
            yes_token_id: Some("\"900900\"".to_string()),
            no_token_id: Some("800800".to_string()),
            liquidity_hint: None,
            closed: false,
        }
    }

    fn cfg() -> CarryConfig {
        CarryConfig {
            enabled: true,
            roi_min_pct: 6.0,
            roi_max_pct: 7.0,
            max_spread: 0.02,
            max_days: 45.0,
            min_days_to_resolution: 2.0,
            spread_edge_max_ratio: 2.0,
            spread_edge_min_abs: 0.01,
            min_ask_liq_usd: 100.0,
            allow_synthetic_ask: true,
            synthetic_tick: 0.01,
            synthetic_max_ask: 0.995,
            allow_http_fallback: false,
            allow_categories: Vec::new(),
            allow_keywords: vec!["election".to_string()],
        }
    }

    fn store_with_book(bid: Option<f64>, ask: Option<f64>) -> BookStore {
        let store = BookStore::new();
        let bids = bid
            .map(|p| vec![OrderLevel { price: p, size: 5_000.0 }])
            .unwrap_or_default();
        let asks = ask
            .map(|p| vec![OrderLevel { price: p, size: 5_000.0 }])
            .unwrap_or_default();
        store.apply_snapshot("900900", bids, asks);
        store
    }

    #[tokio::test]
    async fn roi_band_candidate_selected() {
        let store = store_with_book(Some(0.93), Some(0.94));
        let sel = select(&[market(14)], &store, None, &cfg(), now()).await;

        assert_eq!(sel.candidates.len(), 1);
        assert_eq!(sel.debug.get("passed"), Some(&1));

        let c = &sel.candidates[0];
        assert!((c.carry_roi_pct - 6.383).abs() < 0.01);
        assert_eq!(c.price_source, PriceSource::Ws);
        assert!((c.edge_abs - 0.06).abs() < 1e-9);
        let ratio = c.spread_edge_ratio.unwrap();
        assert!((ratio - 0.1667).abs() < 0.001);
        assert_eq!(c.window_key, "D8_30");
        assert!(c.assumption_key.starts_with("a1_"));
        // Token id was canonicalized from its quoted form.
        assert_eq!(c.yes_token_id, "900900");
    }

    #[tokio::test]
    async fn time_window_rejections() {
        let store = store_with_book(Some(0.93), Some(0.94));
        let c = cfg();

        let sel = select(&[market(-1)], &store, None, &c, now()).await;
        assert_eq!(sel.debug.get("already_ended_or_resolving"), Some(&1));

        let sel = select(&[market(1)], &store, None, &c, now()).await;
        assert_eq!(sel.debug.get("too_soon_to_resolve"), Some(&1));

        let sel = select(&[market(60)], &store, None, &c, now()).await;
        assert_eq!(sel.debug.get("beyond_max_days"), Some(&1));
    }

    #[tokio::test]
    async fn keyword_gate_rejects_unrelated_markets() {
        let store = store_with_book(Some(0.93), Some(0.94));
        let mut m = market(14);
        m.question = "Will it snow heavily next week?".to_string();
        m.category = Some("Weather".to_string());

        let sel = select(&[m.clone()], &store, None, &cfg(), now()).await;
        assert_eq!(sel.debug.get("keyword_category_mismatch"), Some(&1));

        // Category allowlist rescues it.
        let mut c = cfg();
        c.allow_categories = vec!["Weather".to_string()];
        let sel = select(&[m], &store, None, &c, now()).await;
        assert_eq!(sel.candidates.len(), 1);
    }

    #[tokio::test]
    async fn empty_lists_accept_everything() {
        let store = store_with_book(Some(0.93), Some(0.94));
        let mut m = market(14);
        m.question = "Entirely unrelated question".to_string();
        let mut c = cfg();
        c.allow_keywords.clear();
        let sel = select(&[m], &store, None, &c, now()).await;
        assert_eq!(sel.candidates.len(), 1);
    }

    #[tokio::test]
    async fn missing_book_rejects_without_fallback() {
        let store = BookStore::new();
        let sel = select(&[market(14)], &store, None, &cfg(), now()).await;
        assert_eq!(sel.debug.get("no_book"), Some(&1));
    }

    #[tokio::test]
    async fn synthetic_ask_from_bid_plus_tick() {
        let store = store_with_book(Some(0.93), None);
        let mut c = cfg();
        // 0.94 synthetic ask gives 6.38% ROI, inside the band.
        let sel = select(&[market(14)], &store, None, &c, now()).await;
        assert_eq!(sel.candidates.len(), 1);
        let cand = &sel.candidates[0];
        assert!((cand.yes_ask - 0.94).abs() < 1e-12);
        assert_eq!(cand.price_source, PriceSource::SyntheticAsk);
        assert_eq!(
            cand.synthetic_reason.as_deref(),
            Some("no_ask_using_noBid_plus_tick")
        );

        // High bid clamps at synthetic_max_ask.
        let store = store_with_book(Some(0.99), None);
        c.roi_min_pct = 0.0;
        c.roi_max_pct = 100.0;
        c.spread_edge_min_abs = 0.0;
        c.max_spread = 1.0;
        c.spread_edge_max_ratio = 1_000.0;
        let sel = select(&[market(14)], &store, None, &c, now()).await;
        assert_eq!(sel.candidates.len(), 1);
        assert!((sel.candidates[0].yes_ask - 0.995).abs() < 1e-12);
    }

    #[tokio::test]
    async fn synthetic_disabled_rejects_no_ask() {
        let store = store_with_book(Some(0.93), None);
        let mut c = cfg();
        c.allow_synthetic_ask = false;
        let sel = select(&[market(14)], &store, None, &c, now()).await;
        assert_eq!(sel.debug.get("no_ask"), Some(&1));
    }

    #[tokio::test]
    async fn roi_out_of_band_rejections() {
        // 0.90 ask -> 11.1% ROI, above the 7% cap.
        let store = store_with_book(Some(0.895), Some(0.90));
        let mut c = cfg();
        c.max_spread = 0.02;
        let sel = select(&[market(14)], &store, None, &c, now()).await;
        assert_eq!(sel.debug.get("roi_above_max"), Some(&1));

        // 0.97 ask -> 3.1% ROI, below the 6% floor.
        let store = store_with_book(Some(0.965), Some(0.97));
        let sel = select(&[market(14)], &store, None, &cfg(), now()).await;
        assert_eq!(sel.debug.get("roi_below_min"), Some(&1));
    }

    #[tokio::test]
    async fn wide_spread_and_ratio_rejections() {
        // Spread 0.04 over max 0.02.
        let store = store_with_book(Some(0.90), Some(0.94));
        let sel = select(&[market(14)], &store, None, &cfg(), now()).await;
        assert_eq!(sel.debug.get("spread_too_wide"), Some(&1));

        // Spread within max but large versus the edge: ask 0.985, bid 0.97,
        // edge 0.015, spread 0.015 > 0.015 * 0.5.
        let store = store_with_book(Some(0.97), Some(0.985));
        let mut c = cfg();
        c.spread_edge_max_ratio = 0.5;
        c.roi_min_pct = 0.0;
        c.spread_edge_min_abs = 0.001;
        let sel = select(&[market(14)], &store, None, &c, now()).await;
        assert_eq!(sel.debug.get("spread_edge_ratio_exceeded"), Some(&1));
    }

    #[tokio::test]
    async fn disabled_selector_returns_nothing() {
        let store = store_with_book(Some(0.93), Some(0.94));
        let mut c = cfg();
        c.enabled = false;
        let sel = select(&[market(14)], &store, None, &c, now()).await;
        assert!(sel.candidates.is_empty());
        assert!(sel.debug.is_empty());
    }
}
