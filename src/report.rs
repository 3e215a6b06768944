// =============================================================================
// Report — periodic and shutdown summaries for the operator
// =============================================================================
//
// Renders a plain-text snapshot of the last scan, the top plans by net EV,
// open positions, and near-misses into the configured report directory. One
// file per render, timestamped, never overwritten.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::plans::TradePlan;
use crate::positions::PaperPosition;
use crate::scanner::ScanMeta;

/// Render the report body.
pub fn render(
    meta: Option<&ScanMeta>,
    plans: &[TradePlan],
    positions: &[PaperPosition],
    top_n: usize,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "VIGIL SCANNER REPORT  {}\n",
        Utc::now().to_rfc3339()
    ));
    out.push_str("=====================================================\n\n");

    match meta {
        Some(m) => {
            out.push_str(&format!(
                "Last scan: {}  mode={}  markets={}  passed={}  proposed={}  blocked={}{}\n",
                m.ts.to_rfc3339(),
                m.ev_mode,
                m.markets_scanned,
                m.filter_passed,
                m.trades_proposed,
                m.trades_blocked,
                if m.warmup_skipped { "  (warmup skip)" } else { "" },
            ));
            if !m.carry.debug.is_empty() {
                out.push_str("Carry funnel: ");
                let parts: Vec<String> = m
                    .carry
                    .debug
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                out.push_str(&parts.join("  "));
                out.push('\n');
            }
        }
        None => out.push_str("No scan completed yet.\n"),
    }
    out.push('\n');

    // Top plans by net EV.
    let mut sorted: Vec<&TradePlan> = plans.iter().collect();
    sorted.sort_by(|a, b| {
        b.ev_breakdown
            .net_ev
            .partial_cmp(&a.ev_breakdown.net_ev)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out.push_str(&format!("Top plans ({} of {}):\n", sorted.len().min(top_n), plans.len()));
    for plan in sorted.iter().take(top_n) {
        out.push_str(&format!(
            "  {}  {}  {}  size=${:.2}  limit={:.4}  net_ev={:.4}  [{}]\n",
            plan.plan_id,
            plan.outcome,
            plan.ev_breakdown.mode,
            plan.size_usd,
            plan.limit_price,
            plan.ev_breakdown.net_ev,
            plan.category,
        ));
    }
    out.push('\n');

    // Open positions.
    let open: Vec<&PaperPosition> = positions.iter().filter(|p| p.is_open()).collect();
    let total_exposure: f64 = open.iter().map(|p| p.size_usd).sum();
    out.push_str(&format!(
        "Open positions: {}  (exposure ${total_exposure:.2})\n",
        open.len()
    ));
    for pos in &open {
        out.push_str(&format!(
            "  {}  {}  {}  ${:.2} @ {:.4}  expected_pnl={:.4}\n",
            pos.id, pos.market_id, pos.outcome, pos.size_usd, pos.entry_price, pos.expected_pnl,
        ));
    }
    out.push('\n');

    // Near misses.
    if let Some(m) = meta {
        if !m.worst_candidates.is_empty() {
            out.push_str("Worst candidates:\n");
            for w in &m.worst_candidates {
                out.push_str(&format!(
                    "  {}  {}{}\n",
                    w.market_id,
                    w.reason,
                    w.net_ev.map(|e| format!("  net_ev={e:.4}")).unwrap_or_default(),
                ));
            }
        }
    }

    out
}

/// Render and write one report file. Returns the written path.
pub fn write_report(state: &AppState) -> Result<PathBuf> {
    let (dir, top_n) = {
        let cfg = state.config.read();
        (cfg.reporting.report_dir.clone(), cfg.reporting.print_top_n)
    };

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create report dir {dir}"))?;

    let meta = state.last_scan.read().clone();
    let body = render(
        meta.as_ref(),
        &state.plan_store.all(),
        &state.positions.all_positions(),
        top_n,
    );

    let path = PathBuf::from(&dir).join(format!(
        "vigil-report-{}.txt",
        Utc::now().format("%Y%m%d-%H%M%S")
    ));
    std::fs::write(&path, body)
        .with_context(|| format!("failed to write report to {}", path.display()))?;

    info!(path = %path.display(), "report written");
    Ok(path)
}

/// Periodic report task; failures are logged and the loop continues. On top
/// of the fixed interval, one report per day is written at the configured
/// local hour.
pub async fn run_report_loop(state: Arc<AppState>, mut stop_rx: watch::Receiver<bool>) {
    let (interval_minutes, daily_hour) = {
        let cfg = state.config.read();
        (
            cfg.reporting.report_interval_minutes,
            cfg.reporting.daily_report_hour_local,
        )
    };
    let period = std::time::Duration::from_secs(interval_minutes.max(1) * 60);
    let mut ticker = tokio::time::interval(period);
    // The first tick fires immediately; skip it so the first report has data.
    ticker.tick().await;

    let mut daily_check = tokio::time::interval(std::time::Duration::from_secs(60));
    let mut last_daily: Option<chrono::NaiveDate> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = write_report(&state) {
                    warn!(error = %e, "periodic report failed");
                }
            }
            _ = daily_check.tick() => {
                use chrono::Timelike;
                let now = chrono::Local::now();
                let due = now.hour() == daily_hour && last_daily != Some(now.date_naive());
                if due {
                    last_daily = Some(now.date_naive());
                    if let Err(e) = write_report(&state) {
                        warn!(error = %e, "daily report failed");
                    }
                }
            }
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    return;
                }
            }
        }
    }
}
