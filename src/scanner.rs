// =============================================================================
// Scan Orchestrator — one cycle: fetch, filter, EV, fill, risk, plans, ops
// =============================================================================
//
// A cycle runs to completion before the next tick is honored. Each cycle:
//
//   1. lists active markets and publishes the token set to the ingest task,
//   2. primes the book store with a REST snapshot,
//   3. evaluates every NO-side market through filter -> EV -> fill -> risk,
//   4. runs the carry selector over the same market set,
//   5. atomically replaces the plan store with the new proposed set,
//   6. queues or auto-opens per the execution mode.
//
// Upstream failures end the cycle early with a log line; the next tick
// simply tries again. The first cycles after boot may see an almost-empty
// book store (REST prime racing the WS bootstrap); those skip evaluation
// rather than spray spurious scan_fail entries.
// =============================================================================

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::carry;
use crate::config::BotConfig;
use crate::ev;
use crate::fill;
use crate::filters;
use crate::keys;
use crate::ledger::{Ledger, LedgerAction};
use crate::market_data::BookStore;
use crate::plans::{PlanStatus, TradePlan};
use crate::positions::{OpenPositionArgs, PositionBook};
use crate::provider::ClobClient;
use crate::risk::{AllowDecision, ExposureState, RiskEngine};
use crate::types::{NormalizedMarket, Outcome, PriceSource, Side, StrategyMode, TradeProposal};

/// Below this many books the store is still bootstrapping; skip evaluation.
pub const WARMUP_MIN_BOOKS: usize = 5;

/// Worst-candidate entries retained per scan.
const MAX_WORST_CANDIDATES: usize = 10;

/// A near-miss: passed the filter but died later in the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct WorstCandidate {
    pub market_id: String,
    pub question: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_ev: Option<f64>,
}

/// Carry policy echo plus the selector's rejection counters.
#[derive(Debug, Clone, Serialize)]
pub struct CarryMeta {
    pub enabled: bool,
    pub roi_min_pct: f64,
    pub roi_max_pct: f64,
    pub max_days: f64,
    pub allow_synthetic_ask: bool,
    pub debug: BTreeMap<String, u64>,
}

/// Metadata for the last completed scan, surfaced via `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct ScanMeta {
    pub ts: DateTime<Utc>,
    pub ev_mode: String,
    pub markets_listed: usize,
    pub markets_scanned: usize,
    pub filter_passed: usize,
    pub trades_proposed: usize,
    pub trades_blocked: usize,
    pub warmup_skipped: bool,
    pub carry: CarryMeta,
    pub worst_candidates: Vec<WorstCandidate>,
}

impl ScanMeta {
    fn empty(cfg: &BotConfig, now: DateTime<Utc>, warmup_skipped: bool) -> Self {
        Self {
            ts: now,
            ev_mode: cfg.fees.ev_mode.clone(),
            markets_listed: 0,
            markets_scanned: 0,
            filter_passed: 0,
            trades_proposed: 0,
            trades_blocked: 0,
            warmup_skipped,
            carry: CarryMeta {
                enabled: cfg.carry.enabled,
                roi_min_pct: cfg.carry.roi_min_pct,
                roi_max_pct: cfg.carry.roi_max_pct,
                max_days: cfg.carry.max_days,
                allow_synthetic_ask: cfg.carry.allow_synthetic_ask,
                debug: BTreeMap::new(),
            },
            worst_candidates: Vec::new(),
        }
    }

    /// The compact view embedded in plain `/status` responses.
    pub fn compact(&self) -> serde_json::Value {
        serde_json::json!({
            "ts": self.ts,
            "ev_mode": self.ev_mode,
            "markets_scanned": self.markets_scanned,
            "filter_passed": self.filter_passed,
            "trades_proposed": self.trades_proposed,
            "trades_blocked": self.trades_blocked,
            "warmup_skipped": self.warmup_skipped,
            "carry": &self.carry,
        })
    }
}

// -----------------------------------------------------------------------------
// Plan construction
// -----------------------------------------------------------------------------

/// Evaluate the market set into this cycle's proposed plans.
pub async fn build_plans(
    cfg: &BotConfig,
    markets: &[NormalizedMarket],
    store: &BookStore,
    positions: &PositionBook,
    ledger: &Ledger,
    clob: Option<&ClobClient>,
    now: DateTime<Utc>,
) -> (Vec<TradePlan>, ScanMeta) {
    let selection = cfg.effective_selection();
    let mode = StrategyMode::from_ev_mode(&cfg.fees.ev_mode);
    let engine = RiskEngine::new(cfg.risk.clone());
    let size_usd = cfg.simulation.default_order_size_usd;

    let mut meta = ScanMeta::empty(cfg, now, false);
    meta.markets_listed = markets.len();

    let mut plans: Vec<TradePlan> = Vec::new();
    let mut worst: Vec<WorstCandidate> = Vec::new();

    for market in markets {
        let Some(no_token) = market.no_token_id.as_deref() else {
            continue;
        };
        meta.markets_scanned += 1;

        let top = store.top_of_book(no_token);
        let filter = filters::evaluate(
            market,
            top.as_ref(),
            now,
            &selection,
            mode,
            cfg.diagnostic_loose_filters,
        );
        if !filter.pass {
            ledger.append(
                LedgerAction::ScanFail,
                &market.market_id,
                serde_json::json!({ "reasons": filter.reasons, "flags": filter.flags }),
            );
            continue;
        }
        meta.filter_passed += 1;

        // Filter pass guarantees an ask.
        let ask = top.as_ref().and_then(|t| t.no_ask).unwrap_or(0.0);

        let breakdown = ev::compute(ask, size_usd, &cfg.fees, &filter);
        if breakdown.net_ev <= 0.0 {
            ledger.append(
                LedgerAction::ScanPass,
                &market.market_id,
                serde_json::json!({ "ev_negative": true, "net_ev": breakdown.net_ev }),
            );
            worst.push(WorstCandidate {
                market_id: market.market_id.clone(),
                question: market.question.clone(),
                reason: "ev_negative".to_string(),
                net_ev: Some(breakdown.net_ev),
            });
            continue;
        }
        ledger.append(
            LedgerAction::ScanPass,
            &market.market_id,
            serde_json::json!({ "net_ev": breakdown.net_ev, "flags": filter.flags }),
        );

        let category = keys::category_of(market);
        let assumption_key = keys::assumption_key_for_market(market, mode, now);
        let window_key = keys::window_key(market.end_date, now).to_string();

        let asks = store.depth(no_token, Side::Sell);
        let fill_result = fill::simulate_buy(
            &asks,
            size_usd,
            cfg.simulation.slippage_bps,
            cfg.simulation.max_fill_depth_levels,
        );
        if !fill_result.filled {
            worst.push(WorstCandidate {
                market_id: market.market_id.clone(),
                question: market.question.clone(),
                reason: format!("no_fill: {}", fill_result.reason),
                net_ev: Some(breakdown.net_ev),
            });
            continue;
        }

        let proposal = TradeProposal {
            market_id: market.market_id.clone(),
            condition_id: market.condition_id.clone(),
            token_id: no_token.to_string(),
            outcome: Outcome::No,
            side: Side::Buy,
            size_usd,
            best_ask: ask,
            category: category.clone(),
            assumption_key: assumption_key.clone(),
            window_key: window_key.clone(),
        };
        let exposure = ExposureState::from_positions(&positions.open_positions());
        let admission = engine.allow_trade(&proposal, &exposure);
        if admission.decision == AllowDecision::Block {
            meta.trades_blocked += 1;
            ledger.append(
                LedgerAction::TradeBlocked,
                &market.market_id,
                serde_json::json!({
                    "reasons": admission.reasons,
                    "requested": size_usd,
                    "assumption_group": keys::assumption_group(&market.question, market.rules.as_deref()),
                }),
            );
            continue;
        }

        let effective_size = admission.suggested_size.unwrap_or(size_usd);
        let effective_fill = fill_result.rescaled_to(effective_size);
        let effective_ev = ev::compute(ask, effective_size, &cfg.fees, &filter);

        plans.push(TradePlan {
            plan_id: keys::plan_id(&market.market_id, Outcome::No, mode),
            market_id: market.market_id.clone(),
            condition_id: market.condition_id.clone(),
            token_id: no_token.to_string(),
            outcome: Outcome::No,
            size_usd: effective_size,
            limit_price: effective_fill.avg_price,
            category,
            assumption_key,
            window_key,
            ev_breakdown: effective_ev,
            headroom: admission.headroom,
            status: PlanStatus::Proposed,
            price_source: Some(PriceSource::Ws),
            synthetic_reason: None,
            created_at: now,
            updated_at: now,
            executed_at: None,
        });
    }

    // YES-side resolution carry over the same market set.
    let selection_result = carry::select(markets, store, clob, &cfg.carry, now).await;
    meta.carry.debug = selection_result.debug;
    for cand in selection_result.candidates {
        let proposal = TradeProposal {
            market_id: cand.market_id.clone(),
            condition_id: cand.condition_id.clone(),
            token_id: cand.yes_token_id.clone(),
            outcome: Outcome::Yes,
            side: Side::Buy,
            size_usd,
            best_ask: cand.yes_ask,
            category: cand.category.clone(),
            assumption_key: cand.assumption_key.clone(),
            window_key: cand.window_key.clone(),
        };
        let exposure = ExposureState::from_positions(&positions.open_positions());
        let admission = engine.allow_trade(&proposal, &exposure);
        if admission.decision == AllowDecision::Block {
            meta.trades_blocked += 1;
            ledger.append(
                LedgerAction::TradeBlocked,
                &cand.market_id,
                serde_json::json!({ "reasons": admission.reasons, "mode": "carry" }),
            );
            continue;
        }

        let effective_size = admission.suggested_size.unwrap_or(size_usd);
        let mut breakdown = ev::compute_carry(cand.yes_ask, effective_size, &cfg.fees);
        breakdown.explanation.push(format!(
            "carry_roi_pct = {:.3}, t_days = {:.1}, price_source = {}",
            cand.carry_roi_pct, cand.t_days, cand.price_source
        ));

        plans.push(TradePlan {
            plan_id: keys::plan_id(&cand.market_id, Outcome::Yes, StrategyMode::Carry),
            market_id: cand.market_id,
            condition_id: cand.condition_id,
            token_id: cand.yes_token_id,
            outcome: Outcome::Yes,
            size_usd: effective_size,
            limit_price: cand.yes_ask,
            category: cand.category,
            assumption_key: cand.assumption_key,
            window_key: cand.window_key,
            ev_breakdown: breakdown,
            headroom: admission.headroom,
            status: PlanStatus::Proposed,
            price_source: Some(cand.price_source),
            synthetic_reason: cand.synthetic_reason,
            created_at: now,
            updated_at: now,
            executed_at: None,
        });
    }

    worst.truncate(MAX_WORST_CANDIDATES);
    meta.worst_candidates = worst;
    meta.trades_proposed = plans.len();

    (plans, meta)
}

// -----------------------------------------------------------------------------
// Execution
// -----------------------------------------------------------------------------

/// How an execution attempt ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Executed { position_id: String, size_usd: f64 },
    AlreadyExecuted,
    Panic,
    Disarmed,
    PaperOnlySynthetic,
    NoFill { reason: String },
    Blocked { reasons: Vec<String> },
}

/// Re-run fill and risk for a plan and open a paper position if still
/// viable. Shared by the auto-execute loop and the confirm endpoint.
pub fn try_execute_plan(state: &AppState, plan: &TradePlan) -> ExecutionOutcome {
    let _exec_guard = state.execution_lock.lock();

    if state.mode_manager.is_panicked() {
        return ExecutionOutcome::Panic;
    }
    if !state.mode_manager.may_execute() {
        return ExecutionOutcome::Disarmed;
    }
    if state.plan_store.is_executed(&plan.plan_id) {
        return ExecutionOutcome::AlreadyExecuted;
    }
    if plan.is_synthetic() {
        return ExecutionOutcome::PaperOnlySynthetic;
    }

    let cfg = state.config.read().clone();

    let asks = state.book_store.depth(&plan.token_id, Side::Sell);
    let fill_result = fill::simulate_buy(
        &asks,
        plan.size_usd,
        cfg.simulation.slippage_bps,
        cfg.simulation.max_fill_depth_levels,
    );
    if !fill_result.filled {
        return ExecutionOutcome::NoFill {
            reason: fill_result.reason,
        };
    }

    let engine = RiskEngine::new(cfg.risk.clone());
    let proposal = TradeProposal {
        market_id: plan.market_id.clone(),
        condition_id: plan.condition_id.clone(),
        token_id: plan.token_id.clone(),
        outcome: plan.outcome,
        side: Side::Buy,
        size_usd: plan.size_usd,
        best_ask: plan.limit_price,
        category: plan.category.clone(),
        assumption_key: plan.assumption_key.clone(),
        window_key: plan.window_key.clone(),
    };
    let exposure = ExposureState::from_positions(&state.positions.open_positions());
    let admission = engine.allow_trade(&proposal, &exposure);
    if admission.decision == AllowDecision::Block {
        state.trades_blocked_total.fetch_add(1, Ordering::Relaxed);
        state.ledger.append(
            LedgerAction::TradeBlocked,
            &plan.market_id,
            serde_json::json!({ "plan_id": plan.plan_id, "reasons": admission.reasons }),
        );
        return ExecutionOutcome::Blocked {
            reasons: admission.reasons,
        };
    }

    let effective_size = admission
        .suggested_size
        .unwrap_or(plan.size_usd)
        .min(plan.size_usd);
    let effective_fill = fill_result.rescaled_to(effective_size);

    let position_id = state.positions.open_position(OpenPositionArgs {
        market_id: plan.market_id.clone(),
        condition_id: plan.condition_id.clone(),
        token_id: plan.token_id.clone(),
        outcome: plan.outcome,
        question: String::new(),
        entry_price: effective_fill.avg_price,
        size_usd: effective_fill.fill_size_usd,
        size_shares: effective_fill.fill_size_shares,
        category: plan.category.clone(),
        assumption_key: plan.assumption_key.clone(),
        window_key: plan.window_key.clone(),
        expected_pnl: plan.ev_breakdown.net_ev,
    });

    state.plan_store.mark_plan_executed(&plan.plan_id);
    state.trades_opened_total.fetch_add(1, Ordering::Relaxed);
    state.ledger.append(
        LedgerAction::TradeOpened,
        &plan.market_id,
        serde_json::json!({
            "plan_id": plan.plan_id,
            "position_id": position_id,
            "size_usd": effective_fill.fill_size_usd,
            "entry_price": effective_fill.avg_price,
        }),
    );
    state.ledger.append(
        LedgerAction::PlanExecuted,
        &plan.market_id,
        serde_json::json!({ "plan_id": plan.plan_id, "position_id": position_id }),
    );

    ExecutionOutcome::Executed {
        position_id,
        size_usd: effective_fill.fill_size_usd,
    }
}

/// Step 11 of the cycle: queue or auto-open the proposed plans per mode.
pub fn execute_proposed(state: &AppState, plans: &[TradePlan]) {
    if !state.mode_manager.may_execute() {
        debug!("execution skipped (disarmed or panic)");
        return;
    }

    for plan in plans {
        if state.mode_manager.is_confirm_mode() {
            state.plan_store.enqueue(plan);
            state.ledger.append(
                LedgerAction::PlanCreated,
                &plan.market_id,
                serde_json::json!({ "plan_id": plan.plan_id, "queued": true }),
            );
        } else if state.mode_manager.is_auto_execute() {
            if plan.is_synthetic() {
                debug!(plan_id = %plan.plan_id, "synthetic plan never auto-executes");
                continue;
            }
            let outcome = try_execute_plan(state, plan);
            debug!(plan_id = %plan.plan_id, outcome = ?outcome, "auto execution");
        }
    }
}

// -----------------------------------------------------------------------------
// Cycle driver
// -----------------------------------------------------------------------------

/// One full scan cycle against live upstream state.
pub async fn run_scan_cycle(
    state: &Arc<AppState>,
    assets_tx: &watch::Sender<Vec<String>>,
) -> Result<()> {
    let cfg = state.config.read().clone();
    let now = Utc::now();

    let markets = match state
        .gamma
        .list_active_markets(cfg.scanner.max_pages, cfg.scanner.page_size)
        .await
    {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "market listing failed, skipping cycle");
            return Ok(());
        }
    };
    if markets.is_empty() {
        info!("no active markets listed, skipping cycle");
        return Ok(());
    }

    // Union of NO and YES tokens, deduplicated, capped by the WS subscription limit.
    let mut seen = HashSet::new();
    let mut tokens: Vec<String> = Vec::new();
    for market in &markets {
        for token in [&market.no_token_id, &market.yes_token_id] {
            if let Some(t) = token {
                let key = crate::market_data::normalize_key(t);
                if !key.is_empty() && seen.insert(key.clone()) {
                    tokens.push(key);
                }
            }
        }
        if tokens.len() >= cfg.ws.max_assets_subscribed {
            tokens.truncate(cfg.ws.max_assets_subscribed);
            break;
        }
    }
    let _ = assets_tx.send(tokens.clone());

    // REST prime; failure leaves the store as-is.
    match state.clob.fetch_books(&tokens).await {
        Ok(list) => {
            for (token, book) in list {
                state.book_store.apply_snapshot(&token, book.bids, book.asks);
            }
        }
        Err(e) => warn!(error = %e, "book snapshot prime failed"),
    }

    if state.book_store.len() < WARMUP_MIN_BOOKS {
        info!(
            books = state.book_store.len(),
            "book store warming up, skipping evaluation this cycle"
        );
        state.record_scan(ScanMeta::empty(&cfg, now, true));
        return Ok(());
    }

    let (plans, meta) = build_plans(
        &cfg,
        &markets,
        &state.book_store,
        &state.positions,
        &state.ledger,
        Some(&state.clob),
        now,
    )
    .await;

    state.plan_store.set_plans(plans.clone());
    state
        .trades_blocked_total
        .fetch_add(meta.trades_blocked as u64, Ordering::Relaxed);
    info!(
        markets = meta.markets_listed,
        passed = meta.filter_passed,
        proposed = meta.trades_proposed,
        blocked = meta.trades_blocked,
        "scan cycle complete"
    );
    state.record_scan(meta);

    execute_proposed(state, &plans);
    Ok(())
}

/// Ticker loop: one cycle at startup, then one per interval. The next tick
/// is not honored until the running cycle finishes.
pub async fn run_scan_loop(
    state: Arc<AppState>,
    assets_tx: watch::Sender<Vec<String>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let poll_ms = state.config.read().scanner.poll_interval_ms;
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(poll_ms.max(500)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_scan_cycle(&state, &assets_tx).await {
                    warn!(error = %e, "scan cycle failed");
                }
            }
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    info!("scan loop stopping");
                    return;
                }
            }
        }
    }
}
