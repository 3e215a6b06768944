// =============================================================================
// Risk Engine — correlated-exposure admission across five dimensions
// =============================================================================
//
// Every proposal is checked against USD-notional caps on: total open
// exposure, the proposal's market, its category, its assumption key, and its
// resolution window. Open positions contribute their full size_usd.
//
// Admission never throws: the answer is ALLOW, ALLOW_REDUCED_SIZE with a
// suggested size that fits every binding cap, or BLOCK. The full headroom
// snapshot rides along on every answer so plans and reports can show exactly
// how much room each dimension had at decision time.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::config::RiskConfig;
use crate::keys::assumption_group;
use crate::positions::PaperPosition;
use crate::types::TradeProposal;

/// Admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AllowDecision {
    #[serde(rename = "ALLOW")]
    Allow,
    #[serde(rename = "ALLOW_REDUCED_SIZE")]
    AllowReducedSize,
    #[serde(rename = "BLOCK")]
    Block,
}

/// Remaining USD per dimension at decision time.
#[derive(Debug, Clone, Serialize)]
pub struct HeadroomSnapshot {
    pub global: f64,
    pub per_market: f64,
    pub category: f64,
    pub assumption: f64,
    pub window: f64,
}

impl HeadroomSnapshot {
    fn min(&self) -> f64 {
        self.global
            .min(self.per_market)
            .min(self.category)
            .min(self.assumption)
            .min(self.window)
    }
}

/// Full admission answer.
#[derive(Debug, Clone, Serialize)]
pub struct AllowTradeResult {
    pub decision: AllowDecision,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_size: Option<f64>,
    pub headroom: HeadroomSnapshot,
}

/// Current open exposure folded from the position book.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExposureState {
    pub total: f64,
    pub by_market: HashMap<String, f64>,
    pub by_category: HashMap<String, f64>,
    pub by_assumption: HashMap<String, f64>,
    pub by_window: HashMap<String, f64>,
    pub open_positions: usize,
}

impl ExposureState {
    /// Fold open positions into per-dimension sums. Positions persisted
    /// before deterministic keys existed fall back to the legacy heuristics.
    pub fn from_positions(positions: &[PaperPosition]) -> Self {
        let mut state = Self::default();
        for pos in positions.iter().filter(|p| p.is_open()) {
            let size = pos.size_usd;
            state.total += size;
            state.open_positions += 1;

            *state
                .by_market
                .entry(pos.market_id.clone())
                .or_insert(0.0) += size;

            let category = if pos.category.trim().is_empty() {
                "uncategorized".to_string()
            } else {
                pos.category.trim().to_string()
            };
            *state.by_category.entry(category).or_insert(0.0) += size;

            let assumption = if pos.assumption_key.is_empty() {
                assumption_group(&pos.question, None).to_string()
            } else {
                pos.assumption_key.clone()
            };
            *state.by_assumption.entry(assumption).or_insert(0.0) += size;

            let window = if pos.window_key.is_empty() {
                "unknown".to_string()
            } else {
                pos.window_key.clone()
            };
            *state.by_window.entry(window).or_insert(0.0) += size;
        }
        state
    }

    fn current(&self, map: &HashMap<String, f64>, key: &str) -> f64 {
        map.get(key).copied().unwrap_or(0.0)
    }
}

/// Stateless admission over a config and an exposure fold.
pub struct RiskEngine {
    cfg: RiskConfig,
}

impl RiskEngine {
    pub fn new(cfg: RiskConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.cfg
    }

    /// Admit, shrink, or block a proposal against the current exposure.
    pub fn allow_trade(
        &self,
        proposal: &TradeProposal,
        exposure: &ExposureState,
    ) -> AllowTradeResult {
        let requested = proposal.size_usd;

        let market_sum = exposure.current(&exposure.by_market, &proposal.market_id);
        let category_sum = exposure.current(&exposure.by_category, &proposal.category);
        let assumption_sum = exposure.current(&exposure.by_assumption, &proposal.assumption_key);
        let window_sum = exposure.current(&exposure.by_window, &proposal.window_key);

        let headroom = HeadroomSnapshot {
            global: (self.cfg.max_total_exposure_usd - exposure.total).max(0.0),
            per_market: (self.cfg.max_exposure_per_market_usd - market_sum).max(0.0),
            category: (self.cfg.max_exposure_per_category_usd - category_sum).max(0.0),
            assumption: (self.cfg.max_exposure_per_assumption_usd - assumption_sum).max(0.0),
            window: (self.cfg.max_exposure_per_resolution_window_usd - window_sum).max(0.0),
        };

        if self.cfg.kill_switch_enabled {
            return AllowTradeResult {
                decision: AllowDecision::Block,
                reasons: vec!["kill_switch_enabled".to_string()],
                suggested_size: None,
                headroom,
            };
        }

        if exposure.open_positions >= self.cfg.max_positions_open {
            return AllowTradeResult {
                decision: AllowDecision::Block,
                reasons: vec![format!(
                    "max_positions_open reached ({}/{})",
                    exposure.open_positions, self.cfg.max_positions_open
                )],
                suggested_size: None,
                headroom,
            };
        }

        let mut reasons = Vec::new();
        if requested > headroom.global {
            reasons.push(format!(
                "global exposure {:.2} + {:.2} exceeds cap {:.2}",
                exposure.total, requested, self.cfg.max_total_exposure_usd
            ));
        }
        if requested > headroom.per_market {
            reasons.push(format!(
                "market {} exposure {:.2} + {:.2} exceeds cap {:.2}",
                proposal.market_id, market_sum, requested, self.cfg.max_exposure_per_market_usd
            ));
        }
        if requested > headroom.category {
            reasons.push(format!(
                "category {} exposure {:.2} + {:.2} exceeds cap {:.2}",
                proposal.category, category_sum, requested, self.cfg.max_exposure_per_category_usd
            ));
        }
        if requested > headroom.assumption {
            reasons.push(format!(
                "assumption {} exposure {:.2} + {:.2} exceeds cap {:.2}",
                proposal.assumption_key,
                assumption_sum,
                requested,
                self.cfg.max_exposure_per_assumption_usd
            ));
        }
        if requested > headroom.window {
            reasons.push(format!(
                "window {} exposure {:.2} + {:.2} exceeds cap {:.2}",
                proposal.window_key,
                window_sum,
                requested,
                self.cfg.max_exposure_per_resolution_window_usd
            ));
        }

        if reasons.is_empty() {
            return AllowTradeResult {
                decision: AllowDecision::Allow,
                reasons,
                suggested_size: None,
                headroom,
            };
        }

        let suggested = requested.min(headroom.min());
        debug!(
            market_id = %proposal.market_id,
            requested,
            suggested,
            "proposal over cap"
        );

        if suggested > 0.0 {
            AllowTradeResult {
                decision: AllowDecision::AllowReducedSize,
                reasons,
                suggested_size: Some(suggested),
                headroom,
            }
        } else {
            AllowTradeResult {
                decision: AllowDecision::Block,
                reasons,
                suggested_size: None,
                headroom,
            }
        }
    }
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("max_total_exposure_usd", &self.cfg.max_total_exposure_usd)
            .field("max_positions_open", &self.cfg.max_positions_open)
            .field("kill_switch_enabled", &self.cfg.kill_switch_enabled)
            .finish()
    }
}
