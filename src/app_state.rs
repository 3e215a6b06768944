// =============================================================================
// Central Application State — Vigil scanner core object
// =============================================================================
//
// The single explicitly-constructed object wired into both the scan task and
// the HTTP handlers. Subsystems manage their own interior mutability; this
// struct ties them together and holds the cross-cutting leaves (config, last
// scan metadata, lifetime counters).
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::BotConfig;
use crate::ledger::{Ledger, LedgerAction};
use crate::market_data::BookStore;
use crate::modes::ModeManager;
use crate::plans::PlanStore;
use crate::positions::PositionBook;
use crate::provider::{ClobClient, GammaClient};
use crate::scanner::ScanMeta;

/// Shared state for the whole engine; always lives behind an `Arc`.
pub struct AppState {
    // ── Configuration ───────────────────────────────────────────────────
    pub config: RwLock<BotConfig>,
    /// Stamped on every API response as X-Build-Id.
    pub build_id: String,

    // ── Subsystems ──────────────────────────────────────────────────────
    pub book_store: Arc<BookStore>,
    pub plan_store: Arc<PlanStore>,
    pub mode_manager: Arc<ModeManager>,
    pub positions: Arc<PositionBook>,
    pub ledger: Arc<Ledger>,
    pub gamma: Arc<GammaClient>,
    pub clob: Arc<ClobClient>,

    /// Serializes plan execution: the confirm endpoint and the auto loop
    /// must not interleave between the executed-set check and the position
    /// insert, or idempotence breaks.
    pub execution_lock: Mutex<()>,

    // ── Scan results ────────────────────────────────────────────────────
    pub last_scan: RwLock<Option<ScanMeta>>,

    // ── Lifetime counters ───────────────────────────────────────────────
    pub scans_completed: AtomicU64,
    pub trades_opened_total: AtomicU64,
    pub trades_blocked_total: AtomicU64,

    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire all subsystems from the configuration. The mode manager's audit
    /// callback appends `mode_change` ledger entries.
    pub fn new(config: BotConfig) -> Arc<Self> {
        let build_id = std::env::var("VIGIL_BUILD_ID")
            .unwrap_or_else(|_| format!("vigil-{}", env!("CARGO_PKG_VERSION")));

        let ledger = Arc::new(Ledger::new(&config.storage.ledger_file));
        let positions = Arc::new(PositionBook::load(&config.storage.positions_file));
        let gamma = Arc::new(GammaClient::new(config.api.gamma_base_url.clone()));
        let clob = Arc::new(ClobClient::new(config.api.clob_rest_base_url.clone()));

        let audit_ledger = ledger.clone();
        let mode_manager = Arc::new(ModeManager::new(Box::new(move |state, note| {
            audit_ledger.append(
                LedgerAction::ModeChange,
                "",
                serde_json::json!({
                    "mode": state.mode,
                    "panic": state.panic,
                    "note": note,
                }),
            );
        })));

        Arc::new(Self {
            config: RwLock::new(config),
            build_id,
            book_store: Arc::new(BookStore::new()),
            plan_store: Arc::new(PlanStore::new()),
            mode_manager,
            positions,
            ledger,
            gamma,
            clob,
            execution_lock: Mutex::new(()),
            last_scan: RwLock::new(None),
            scans_completed: AtomicU64::new(0),
            trades_opened_total: AtomicU64::new(0),
            trades_blocked_total: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        })
    }

    pub fn record_scan(&self, meta: ScanMeta) {
        *self.last_scan.write() = Some(meta);
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }
}
