// =============================================================================
// Fill Simulator — depth-walk VWAP with a slippage cap
// =============================================================================
//
// A buy walks ascending ask levels; a sell walks descending bid levels
// against a share target derived from the top bid. No level past the
// slippage cap ever contributes, and the walk never visits more than
// `max_fill_depth_levels` levels.
// =============================================================================

use serde::Serialize;

use crate::market_data::OrderLevel;

const FULL_FILL_EPSILON: f64 = 1e-9;

/// Outcome of one simulated fill.
#[derive(Debug, Clone, Serialize)]
pub struct FillResult {
    pub filled: bool,
    pub fill_size_usd: f64,
    pub fill_size_shares: f64,
    /// Volume-weighted entry price over the consumed levels.
    pub avg_price: f64,
    pub levels_used: usize,
    pub reason: String,
}

impl FillResult {
    fn empty() -> Self {
        Self {
            filled: false,
            fill_size_usd: 0.0,
            fill_size_shares: 0.0,
            avg_price: 0.0,
            levels_used: 0,
            reason: "no liquidity within slippage or depth".to_string(),
        }
    }

    /// Rescale a fill to a smaller notional at the same VWAP. Used when the
    /// risk engine grants a reduced size.
    pub fn rescaled_to(&self, new_size_usd: f64) -> Self {
        if !self.filled || self.fill_size_usd <= 0.0 || new_size_usd >= self.fill_size_usd {
            return self.clone();
        }
        let ratio = new_size_usd / self.fill_size_usd;
        Self {
            filled: true,
            fill_size_usd: new_size_usd,
            fill_size_shares: self.fill_size_shares * ratio,
            avg_price: self.avg_price,
            levels_used: self.levels_used,
            reason: self.reason.clone(),
        }
    }
}

/// Walk ascending asks buying up to `size_usd` of notional.
pub fn simulate_buy(
    asks: &[OrderLevel],
    size_usd: f64,
    slippage_bps: f64,
    max_levels: usize,
) -> FillResult {
    let best_ask = match asks.first() {
        Some(l) if l.price > 0.0 => l.price,
        _ => return FillResult::empty(),
    };
    if size_usd <= 0.0 {
        return FillResult::empty();
    }

    let price_cap = best_ask * (1.0 + slippage_bps / 10_000.0);

    let mut remaining_usd = size_usd;
    let mut total_usd = 0.0;
    let mut total_shares = 0.0;
    let mut levels_used = 0usize;

    for level in asks.iter().take(max_levels) {
        if level.price > price_cap || remaining_usd <= FULL_FILL_EPSILON {
            break;
        }
        let level_notional = level.price * level.size;
        let take_usd = remaining_usd.min(level_notional);
        if take_usd <= 0.0 {
            continue;
        }
        total_usd += take_usd;
        total_shares += take_usd / level.price;
        remaining_usd -= take_usd;
        levels_used += 1;
    }

    if total_shares <= 0.0 {
        return FillResult::empty();
    }

    let reason = if remaining_usd <= FULL_FILL_EPSILON {
        "full fill".to_string()
    } else {
        "partial fill (insufficient depth)".to_string()
    };

    FillResult {
        filled: true,
        fill_size_usd: total_usd,
        fill_size_shares: total_shares,
        avg_price: total_usd / total_shares,
        levels_used,
        reason,
    }
}

/// Walk descending bids selling the share target `size_usd / top_bid`.
pub fn simulate_sell(
    bids: &[OrderLevel],
    size_usd: f64,
    slippage_bps: f64,
    max_levels: usize,
) -> FillResult {
    let top_bid = match bids.first() {
        Some(l) if l.price > 0.0 => l.price,
        _ => return FillResult::empty(),
    };
    if size_usd <= 0.0 {
        return FillResult::empty();
    }

    let price_floor = top_bid * (1.0 - slippage_bps / 10_000.0);
    let target_shares = size_usd / top_bid;

    let mut remaining_shares = target_shares;
    let mut total_usd = 0.0;
    let mut total_shares = 0.0;
    let mut levels_used = 0usize;

    for level in bids.iter().take(max_levels) {
        if level.price < price_floor || remaining_shares <= FULL_FILL_EPSILON {
            break;
        }
        let take_shares = remaining_shares.min(level.size);
        if take_shares <= 0.0 {
            continue;
        }
        total_usd += take_shares * level.price;
        total_shares += take_shares;
        remaining_shares -= take_shares;
        levels_used += 1;
    }

    if total_shares <= 0.0 {
        return FillResult::empty();
    }

    let reason = if remaining_shares <= FULL_FILL_EPSILON {
        "full fill".to_string()
    } else {
        "partial fill (insufficient depth)".to_string()
    };

    FillResult {
        filled: true,
        fill_size_usd: total_usd,
        fill_size_shares: total_shares,
        avg_price: total_usd / total_shares,
        levels_used,
        reason,
    }
}
