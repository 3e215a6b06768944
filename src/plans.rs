// =============================================================================
// Plan Store — the last scan's intent, the confirm queue, the executed set
// =============================================================================
//
// `set_plans` atomically replaces the whole proposed set each scan: readers
// see the previous scan's plans or the new scan's plans, never a mix.
// `created_at` survives upserts so the operator can see how long a plan has
// been live; `updated_at` refreshes on every scan that still proposes it.
//
// The queue stages plans for confirm-mode execution and keeps its own copy,
// so a queued plan stays confirmable even after a later scan drops it from
// the proposed set. The executed set makes confirm idempotent: a plan
// executes exactly once, ever.
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::ev::EvBreakdown;
use crate::risk::HeadroomSnapshot;
use crate::types::{Outcome, PriceSource};

/// Plan lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanStatus {
    #[serde(rename = "proposed")]
    Proposed,
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "executed")]
    Executed,
}

/// One proposed trade, as surfaced through `/plans`.
#[derive(Debug, Clone, Serialize)]
pub struct TradePlan {
    /// Stable hash of market, outcome, and mode.
    pub plan_id: String,
    pub market_id: String,
    pub condition_id: String,
    pub token_id: String,
    pub outcome: Outcome,
    pub size_usd: f64,
    pub limit_price: f64,
    pub category: String,
    pub assumption_key: String,
    pub window_key: String,
    pub ev_breakdown: EvBreakdown,
    pub headroom: HeadroomSnapshot,
    pub status: PlanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_source: Option<PriceSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthetic_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl TradePlan {
    /// Synthetic-priced plans exist for the report only and must never open
    /// a position.
    pub fn is_synthetic(&self) -> bool {
        self.price_source == Some(PriceSource::SyntheticAsk)
    }
}

/// Thread-safe store for the proposed set, the confirm queue, and the
/// executed-id set.
pub struct PlanStore {
    plans: RwLock<HashMap<String, TradePlan>>,
    queued: RwLock<HashMap<String, TradePlan>>,
    executed: RwLock<HashSet<String>>,
}

impl PlanStore {
    pub fn new() -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
            queued: RwLock::new(HashMap::new()),
            executed: RwLock::new(HashSet::new()),
        }
    }

    /// Replace the proposed set with this scan's plans.
    ///
    /// Upsert by plan_id: `created_at` is preserved for plans that already
    /// existed, `updated_at` is refreshed for everything, and plans absent
    /// from `new_plans` are removed.
    pub fn set_plans(&self, new_plans: Vec<TradePlan>) {
        let now = Utc::now();
        let executed = self.executed.read().clone();
        let queued_ids: HashSet<String> = self.queued.read().keys().cloned().collect();

        let mut plans = self.plans.write();
        let mut next: HashMap<String, TradePlan> = HashMap::with_capacity(new_plans.len());

        for mut plan in new_plans {
            if let Some(existing) = plans.get(&plan.plan_id) {
                plan.created_at = existing.created_at;
                if plan.executed_at.is_none() {
                    plan.executed_at = existing.executed_at;
                }
            }
            plan.updated_at = now;
            plan.status = if executed.contains(&plan.plan_id) {
                PlanStatus::Executed
            } else if queued_ids.contains(&plan.plan_id) {
                PlanStatus::Queued
            } else {
                PlanStatus::Proposed
            };
            next.insert(plan.plan_id.clone(), plan);
        }

        *plans = next;
    }

    /// Look up a plan in the proposed set, falling back to the queue copy.
    pub fn get(&self, plan_id: &str) -> Option<TradePlan> {
        if let Some(p) = self.plans.read().get(plan_id) {
            return Some(p.clone());
        }
        self.queued.read().get(plan_id).cloned()
    }

    /// Every plan from the last scan.
    pub fn all(&self) -> Vec<TradePlan> {
        self.plans.read().values().cloned().collect()
    }

    /// Size of the proposed set (the `X-Plans-Total` header).
    pub fn count(&self) -> usize {
        self.plans.read().len()
    }

    // -------------------------------------------------------------------------
    // Queue
    // -------------------------------------------------------------------------

    /// Stage a plan for confirm-mode execution.
    pub fn enqueue(&self, plan: &TradePlan) {
        let mut copy = plan.clone();
        copy.status = PlanStatus::Queued;
        self.queued.write().insert(copy.plan_id.clone(), copy);
        if let Some(p) = self.plans.write().get_mut(&plan.plan_id) {
            p.status = PlanStatus::Queued;
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queued.read().len()
    }

    pub fn is_queued(&self, plan_id: &str) -> bool {
        self.queued.read().contains_key(plan_id)
    }

    /// Drop the queue and the executed set. Used by panic.
    pub fn clear_queue(&self) {
        self.queued.write().clear();
        self.executed.write().clear();
    }

    // -------------------------------------------------------------------------
    // Execution bookkeeping
    // -------------------------------------------------------------------------

    pub fn is_executed(&self, plan_id: &str) -> bool {
        self.executed.read().contains(plan_id)
    }

    /// Record a plan as executed. Idempotent: re-marking returns true and
    /// changes nothing, so a position can never be opened twice through the
    /// same plan.
    pub fn mark_plan_executed(&self, plan_id: &str) -> bool {
        let newly = self.executed.write().insert(plan_id.to_string());
        if newly {
            let now = Utc::now();
            if let Some(p) = self.plans.write().get_mut(plan_id) {
                p.status = PlanStatus::Executed;
                p.executed_at = Some(now);
            }
            if let Some(p) = self.queued.write().get_mut(plan_id) {
                p.status = PlanStatus::Executed;
                p.executed_at = Some(now);
            }
        }
        true
    }
}

impl Default for PlanStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PlanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanStore")
            .field("plans", &self.plans.read().len())
            .field("queued", &self.queued.read().len())
            .field("executed", &self.executed.read().len())
            .finish()
    }
}
