// =============================================================================
// Filter Evaluator — ordered pass/fail gates for NO-side candidates
// =============================================================================
//
// Checks run in a fixed order and the first failure short-circuits. The
// diagnostic variant runs every check and records each failure with the
// observed value and the threshold, which feeds the near-miss report.
//
// Ambiguous resolution rules are surfaced as a flag, never a failure: the EV
// model penalizes the tail instead, and the operator sees the flag in the
// plan breakdown.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::SelectionConfig;
use crate::market_data::TopOfBook;
use crate::types::{NormalizedMarket, StrategyMode};

/// Flag attached when resolution rules contain a discretionary phrase.
pub const RESOLUTION_AMBIGUOUS: &str = "RESOLUTION_AMBIGUOUS";

/// Phrase set that marks resolution rules as ambiguous.
pub const AMBIGUITY_PHRASES: [&str; 6] = [
    "at discretion",
    "tbd",
    "subject to",
    "final determination",
    "as determined by",
    "may be resolved",
];

/// Outcome of the filter pass for one market.
#[derive(Debug, Clone, Serialize)]
pub struct FilterResult {
    pub pass: bool,
    /// Failure reasons in check order.
    pub reasons: Vec<String>,
    /// Non-fatal flags, notably [`RESOLUTION_AMBIGUOUS`].
    pub flags: Vec<String>,
}

impl FilterResult {
    pub fn is_ambiguous(&self) -> bool {
        self.flags.iter().any(|f| f == RESOLUTION_AMBIGUOUS)
    }
}

/// Evaluate one market against the selection thresholds.
///
/// `diagnostic` switches from short-circuit to run-all so every failed check
/// is recorded.
pub fn evaluate(
    market: &NormalizedMarket,
    top: Option<&TopOfBook>,
    now: DateTime<Utc>,
    selection: &SelectionConfig,
    ev_mode: StrategyMode,
    diagnostic: bool,
) -> FilterResult {
    let mut reasons: Vec<String> = Vec::new();
    let mut flags: Vec<String> = Vec::new();

    macro_rules! fail {
        ($($arg:tt)*) => {{
            reasons.push(format!($($arg)*));
            if !diagnostic {
                return FilterResult { pass: false, reasons, flags };
            }
        }};
    }

    // 1. Closed markets carry no tradable book.
    if market.closed {
        fail!("market_closed");
    }

    // 2. The NO token id must be known to resolve a book at all.
    if market
        .no_token_id
        .as_deref()
        .map(|t| t.trim().is_empty())
        .unwrap_or(true)
    {
        fail!("missing_no_token");
    }

    let ask = top.and_then(|t| t.no_ask);

    // 3. No ask means no entry price.
    if ask.is_none() {
        fail!("missing_ask");
    }

    // 4. Price gate depends on the EV mode.
    if let Some(ask) = ask {
        match ev_mode {
            StrategyMode::Capture | StrategyMode::MicroCaptureV1 => {
                if ask < selection.capture_min_no_ask || ask > selection.capture_max_no_ask {
                    fail!(
                        "ask {ask:.4} outside capture band [{:.4}, {:.4}]",
                        selection.capture_min_no_ask,
                        selection.capture_max_no_ask
                    );
                }
            }
            _ => {
                if ask < selection.min_no_price {
                    fail!(
                        "ask {ask:.4} below min_no_price {:.4}",
                        selection.min_no_price
                    );
                }
            }
        }
    }

    // 5. Spread, when both sides quote.
    if let Some(spread) = top.and_then(|t| t.spread) {
        if spread > selection.max_spread {
            fail!("spread {spread:.4} above max_spread {:.4}", selection.max_spread);
        }
    }

    // 6. Thin books are rejected on the weaker side.
    if let Some(t) = top {
        let min_liq = t.depth.bid_liquidity_usd.min(t.depth.ask_liquidity_usd);
        if min_liq < selection.min_liquidity_usd {
            fail!(
                "liquidity {min_liq:.2} below min_liquidity_usd {:.2}",
                selection.min_liquidity_usd
            );
        }
    }

    // 7. Time to resolution, when the listing carries an end date. A missing
    //    end date flows through and lands in the W_UNKNOWN risk window.
    if let Some(end) = market.end_date {
        let hours_left = (end - now).num_seconds() as f64 / 3600.0;
        if hours_left < 0.0 {
            fail!("resolution {hours_left:.1}h in the past");
        } else if hours_left > selection.max_time_to_resolution_hours {
            fail!(
                "resolution in {hours_left:.1}h beyond max {:.1}h",
                selection.max_time_to_resolution_hours
            );
        }
    }

    // 8. Ambiguity surfaces as a flag, not a failure.
    if let Some(rules) = &market.rules {
        let lowered = rules.to_lowercase();
        if AMBIGUITY_PHRASES.iter().any(|p| lowered.contains(p)) {
            flags.push(RESOLUTION_AMBIGUOUS.to_string());
        }
    }

    FilterResult {
        pass: reasons.is_empty(),
        reasons,
        flags,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{BookStore, OrderLevel};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn market(hours_out: i64) -> NormalizedMarket {
        NormalizedMarket {
            market_id: "m1".to_string(),
            condition_id: "c1".to_string(),
            question: "Will the launch happen?".to_string(),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            end_date: Some(now() + Duration::hours(hours_out)),
            category: Some("Science".to_string()),
            rules: None,
            yes_token_id: Some("100".to_string()),
            no_token_id: Some("200".to_string()),
            liquidity_hint: None,
            closed: false,
        }
    }

    fn deep_top(bid: f64, ask: f64) -> TopOfBook {
        let store = BookStore::new();
        store.apply_snapshot(
            "200",
            vec![OrderLevel { price: bid, size: 6000.0 }],
            vec![OrderLevel { price: ask, size: 6000.0 }],
        );
        store.top_of_book("200").unwrap()
    }

    fn selection() -> SelectionConfig {
        SelectionConfig {
            min_no_price: 0.94,
            max_spread: 0.02,
            min_liquidity_usd: 500.0,
            max_time_to_resolution_hours: 720.0,
            capture_min_no_ask: 0.45,
            capture_max_no_ask: 0.60,
        }
    }

    #[test]
    fn baseline_happy_path_passes() {
        let top = deep_top(0.96, 0.97);
        let res = evaluate(
            &market(7 * 24),
            Some(&top),
            now(),
            &selection(),
            StrategyMode::Baseline,
            false,
        );
        assert!(res.pass, "reasons: {:?}", res.reasons);
        assert!(res.flags.is_empty());
    }

    #[test]
    fn closed_market_fails_first() {
        let mut m = market(24);
        m.closed = true;
        let res = evaluate(&m, None, now(), &selection(), StrategyMode::Baseline, false);
        assert!(!res.pass);
        assert_eq!(res.reasons, vec!["market_closed".to_string()]);
    }

    #[test]
    fn missing_no_token_fails() {
        let mut m = market(24);
        m.no_token_id = None;
        let res = evaluate(&m, None, now(), &selection(), StrategyMode::Baseline, false);
        assert_eq!(res.reasons, vec!["missing_no_token".to_string()]);
    }

    #[test]
    fn missing_ask_fails() {
        let m = market(24);
        let res = evaluate(&m, None, now(), &selection(), StrategyMode::Baseline, false);
        assert_eq!(res.reasons, vec!["missing_ask".to_string()]);
    }

    #[test]
    fn baseline_rejects_cheap_ask_capture_accepts_band() {
        let top = deep_top(0.50, 0.51);
        let m = market(24);

        let res = evaluate(&m, Some(&top), now(), &selection(), StrategyMode::Baseline, false);
        assert!(!res.pass);
        assert!(res.reasons[0].contains("below min_no_price"));

        let res = evaluate(&m, Some(&top), now(), &selection(), StrategyMode::Capture, false);
        assert!(res.pass, "reasons: {:?}", res.reasons);
    }

    #[test]
    fn capture_rejects_outside_band() {
        let top = deep_top(0.96, 0.97);
        let res = evaluate(
            &market(24),
            Some(&top),
            now(),
            &selection(),
            StrategyMode::Capture,
            false,
        );
        assert!(!res.pass);
        assert!(res.reasons[0].contains("capture band"));
    }

    #[test]
    fn wide_spread_fails() {
        let top = deep_top(0.90, 0.97);
        let res = evaluate(
            &market(24),
            Some(&top),
            now(),
            &selection(),
            StrategyMode::Baseline,
            false,
        );
        assert!(!res.pass);
        assert!(res.reasons[0].contains("max_spread"));
    }

    #[test]
    fn thin_book_fails_on_weak_side() {
        let store = BookStore::new();
        store.apply_snapshot(
            "200",
            vec![OrderLevel { price: 0.96, size: 10.0 }],
            vec![OrderLevel { price: 0.97, size: 6000.0 }],
        );
        let top = store.top_of_book("200").unwrap();
        let res = evaluate(
            &market(24),
            Some(&top),
            now(),
            &selection(),
            StrategyMode::Baseline,
            false,
        );
        assert!(!res.pass);
        assert!(res.reasons[0].contains("min_liquidity_usd"));
    }

    #[test]
    fn far_resolution_fails_and_past_resolution_fails() {
        let top = deep_top(0.96, 0.97);
        let res = evaluate(
            &market(1000),
            Some(&top),
            now(),
            &selection(),
            StrategyMode::Baseline,
            false,
        );
        assert!(!res.pass);
        assert!(res.reasons[0].contains("beyond max"));

        let res = evaluate(
            &market(-2),
            Some(&top),
            now(),
            &selection(),
            StrategyMode::Baseline,
            false,
        );
        assert!(!res.pass);
        assert!(res.reasons[0].contains("in the past"));
    }

    #[test]
    fn ambiguity_flags_without_failing() {
        let top = deep_top(0.96, 0.97);
        let mut m = market(24);
        m.rules = Some("Resolution at discretion of the committee".to_string());
        let res = evaluate(&m, Some(&top), now(), &selection(), StrategyMode::Baseline, false);
        assert!(res.pass);
        assert!(res.is_ambiguous());
    }

    #[test]
    fn diagnostic_mode_records_every_failure() {
        let store = BookStore::new();
        store.apply_snapshot(
            "200",
            vec![OrderLevel { price: 0.80, size: 10.0 }],
            vec![OrderLevel { price: 0.90, size: 10.0 }],
        );
        let top = store.top_of_book("200").unwrap();
        let res = evaluate(
            &market(1000),
            Some(&top),
            now(),
            &selection(),
            StrategyMode::Baseline,
            true,
        );
        assert!(!res.pass);
        // Price, spread, liquidity, and time all failed.
        assert_eq!(res.reasons.len(), 4);
    }
}
