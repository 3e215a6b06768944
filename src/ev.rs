// =============================================================================
// EV Model — gross return, fees, tail cost, net expected value
// =============================================================================
//
// gross_ev multiplies (1 − entry) twice: once as the market-implied
// probability of the NO leg failing to pay and once as the per-share payout.
// That double-count is the intended conservative estimator; do not "fix" it.
//
// Capture mode bypasses the tail term entirely (short holds are out of the
// market before resolution risk matters) and stamps the bypass on the
// breakdown so the report can show it.
// =============================================================================

use serde::Serialize;

use crate::config::FeesConfig;
use crate::filters::FilterResult;
use crate::types::StrategyMode;

/// Inputs the model actually used, frozen into the plan for the report.
#[derive(Debug, Clone, Serialize)]
pub struct EvAssumptions {
    pub entry_price: f64,
    pub size_usd: f64,
    pub shares: f64,
    pub fee_bps: f64,
    pub p_tail: f64,
    /// p_tail after the ambiguity multiplier, when applied.
    pub p_tail_effective: f64,
    pub tail_loss_fraction: f64,
    pub ambiguous: bool,
    pub ev_mode: StrategyMode,
}

/// Full EV breakdown carried on every plan.
#[derive(Debug, Clone, Serialize)]
pub struct EvBreakdown {
    pub mode: StrategyMode,
    pub gross_ev: f64,
    pub fees_estimate: f64,
    pub tail_risk_cost: f64,
    pub net_ev: f64,
    pub assumptions: EvAssumptions,
    #[serde(rename = "tailByp", skip_serializing_if = "Option::is_none")]
    pub tail_byp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tail_bypass_reason: Option<String>,
    pub explanation: Vec<String>,
}

/// Compute the EV breakdown for a NO-side entry.
pub fn compute(
    entry_price: f64,
    size_usd: f64,
    fees: &FeesConfig,
    filter: &FilterResult,
) -> EvBreakdown {
    let mode = StrategyMode::from_ev_mode(&fees.ev_mode);
    let shares = if entry_price > 0.0 {
        size_usd / entry_price
    } else {
        0.0
    };

    // Implied probability times per-share payout, both (1 - entry).
    let gross_ev = (1.0 - entry_price) * (1.0 - entry_price) * shares;
    let fees_estimate = size_usd * (fees.fee_bps / 10_000.0);

    let ambiguous = filter.is_ambiguous();
    let mut tail_byp = None;
    let mut tail_bypass_reason = None;

    let (p_tail_effective, tail_risk_cost) = if mode == StrategyMode::Capture {
        tail_byp = Some("Y".to_string());
        tail_bypass_reason = Some("capture_mode".to_string());
        (fees.p_tail, 0.0)
    } else {
        let p = if ambiguous {
            fees.p_tail * fees.ambiguous_resolution_p_tail_multiplier
        } else {
            fees.p_tail
        };
        (p, p * fees.tail_loss_fraction * shares)
    };

    let net_ev = gross_ev - fees_estimate - tail_risk_cost;

    let mut explanation = vec![
        format!("entry {entry_price:.4}, size ${size_usd:.2} -> {shares:.2} shares"),
        format!("gross_ev = (1-{entry_price:.4})^2 * {shares:.2} = {gross_ev:.4}"),
        format!("fees = ${size_usd:.2} * {}bps = {fees_estimate:.4}", fees.fee_bps),
    ];
    if tail_byp.is_some() {
        explanation.push("tail cost bypassed (capture mode)".to_string());
    } else {
        explanation.push(format!(
            "tail = {p_tail_effective:.4} * {:.2} * {shares:.2} = {tail_risk_cost:.4}{}",
            fees.tail_loss_fraction,
            if ambiguous { " (ambiguity multiplier applied)" } else { "" }
        ));
    }
    explanation.push(format!("net_ev = {net_ev:.4}"));

    EvBreakdown {
        mode,
        gross_ev,
        fees_estimate,
        tail_risk_cost,
        net_ev,
        assumptions: EvAssumptions {
            entry_price,
            size_usd,
            shares,
            fee_bps: fees.fee_bps,
            p_tail: fees.p_tail,
            p_tail_effective,
            tail_loss_fraction: fees.tail_loss_fraction,
            ambiguous,
            ev_mode: mode,
        },
        tail_byp,
        tail_bypass_reason,
        explanation,
    }
}

/// EV breakdown for a YES carry candidate: edge to par minus fees, no tail
/// term (the hold runs to resolution by construction).
pub fn compute_carry(yes_ask: f64, size_usd: f64, fees: &FeesConfig) -> EvBreakdown {
    let shares = if yes_ask > 0.0 { size_usd / yes_ask } else { 0.0 };
    let gross_ev = (1.0 - yes_ask) * shares;
    let fees_estimate = size_usd * (fees.fee_bps / 10_000.0);
    let net_ev = gross_ev - fees_estimate;

    EvBreakdown {
        mode: StrategyMode::Carry,
        gross_ev,
        fees_estimate,
        tail_risk_cost: 0.0,
        net_ev,
        assumptions: EvAssumptions {
            entry_price: yes_ask,
            size_usd,
            shares,
            fee_bps: fees.fee_bps,
            p_tail: 0.0,
            p_tail_effective: 0.0,
            tail_loss_fraction: 0.0,
            ambiguous: false,
            ev_mode: StrategyMode::Carry,
        },
        tail_byp: None,
        tail_bypass_reason: None,
        explanation: vec![
            format!("yes ask {yes_ask:.4}, size ${size_usd:.2} -> {shares:.2} shares"),
            format!("edge to par = (1-{yes_ask:.4}) * {shares:.2} = {gross_ev:.4}"),
            format!("net_ev = {net_ev:.4}"),
        ],
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn clean_filter() -> FilterResult {
        FilterResult {
            pass: true,
            reasons: Vec::new(),
            flags: Vec::new(),
        }
    }

    fn ambiguous_filter() -> FilterResult {
        FilterResult {
            pass: true,
            reasons: Vec::new(),
            flags: vec![crate::filters::RESOLUTION_AMBIGUOUS.to_string()],
        }
    }

    fn fees(ev_mode: &str) -> FeesConfig {
        FeesConfig {
            fee_bps: 0.0,
            p_tail: 0.02,
            tail_loss_fraction: 0.5,
            ambiguous_resolution_p_tail_multiplier: 2.0,
            ev_mode: ev_mode.to_string(),
        }
    }

    #[test]
    fn baseline_near_certainty_is_net_negative() {
        // ask 0.97, $100: the conservative estimator prices the tail above
        // the thin gross edge.
        let ev = compute(0.97, 100.0, &fees("baseline"), &clean_filter());
        let shares = 100.0 / 0.97;
        assert!((ev.assumptions.shares - shares).abs() < 1e-9);
        assert!((ev.gross_ev - 0.03 * 0.03 * shares).abs() < 1e-9);
        assert!((ev.gross_ev - 0.0928).abs() < 0.001);
        assert!((ev.fees_estimate - 0.0).abs() < f64::EPSILON);
        assert!((ev.tail_risk_cost - 0.02 * 0.5 * shares).abs() < 1e-9);
        assert!((ev.tail_risk_cost - 1.031).abs() < 0.001);
        assert!((ev.net_ev - (-0.938)).abs() < 0.001);
        assert!(ev.tail_byp.is_none());
    }

    #[test]
    fn capture_bypasses_tail_and_flips_positive() {
        let ev = compute(0.51, 100.0, &fees("capture"), &clean_filter());
        assert_eq!(ev.mode, StrategyMode::Capture);
        assert_eq!(ev.tail_risk_cost, 0.0);
        assert_eq!(ev.tail_byp.as_deref(), Some("Y"));
        assert_eq!(ev.tail_bypass_reason.as_deref(), Some("capture_mode"));
        assert!(ev.net_ev > 0.0);
    }

    #[test]
    fn ambiguity_multiplies_p_tail() {
        let plain = compute(0.97, 100.0, &fees("baseline"), &clean_filter());
        let flagged = compute(0.97, 100.0, &fees("baseline"), &ambiguous_filter());
        assert!((flagged.tail_risk_cost - plain.tail_risk_cost * 2.0).abs() < 1e-9);
        assert!(flagged.assumptions.ambiguous);
        assert!((flagged.assumptions.p_tail_effective - 0.04).abs() < 1e-12);
    }

    #[test]
    fn fees_scale_with_size() {
        let mut f = fees("baseline");
        f.fee_bps = 100.0;
        let ev = compute(0.97, 200.0, &f, &clean_filter());
        assert!((ev.fees_estimate - 2.0).abs() < 1e-9);
    }

    #[test]
    fn explanation_trail_is_populated() {
        let ev = compute(0.97, 100.0, &fees("baseline"), &clean_filter());
        assert!(ev.explanation.len() >= 4);
        assert!(ev.explanation.last().unwrap().starts_with("net_ev"));
    }

    #[test]
    fn carry_breakdown_uses_edge_to_par() {
        let ev = compute_carry(0.94, 100.0, &fees("baseline"));
        let shares = 100.0 / 0.94;
        assert!((ev.gross_ev - 0.06 * shares).abs() < 1e-9);
        assert_eq!(ev.mode, StrategyMode::Carry);
        assert_eq!(ev.tail_risk_cost, 0.0);
    }
}
