// =============================================================================
// Vigil — read-only paper-trading scanner and risk governor
// =============================================================================
//
// Startup order matters: the safety preflight runs before any task spawns,
// and a credential-shaped hit anywhere in the environment or config
// terminates the process with exit code 1. Nothing here can sign or place a
// real order; every "execution" is a paper position in a local file.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod carry;
mod config;
mod ev;
mod fill;
mod filters;
mod keys;
mod ledger;
mod market_data;
mod modes;
mod plans;
mod positions;
mod preflight;
mod provider;
mod report;
mod risk;
mod scanner;
mod types;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::BotConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Vigil scanner starting (paper-only)");

    let config_path =
        std::env::var("VIGIL_CONFIG").unwrap_or_else(|_| "vigil.json".to_string());
    let config = BotConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(path = %config_path, error = %e, "config not loaded, using defaults");
        BotConfig::default()
    });

    // ── 2. Safety preflight ──────────────────────────────────────────────
    let violations = preflight::scan(&config);
    if !violations.is_empty() {
        for v in &violations {
            error!(violation = %v, "safety preflight violation");
        }
        error!(
            count = violations.len(),
            "refusing to start with credential-like material in reach"
        );
        std::process::exit(1);
    }
    info!("safety preflight clean");

    // ── 3. Build shared state ────────────────────────────────────────────
    let port = config.control_api.port;
    let ws_url = config.ws.market_url.clone();
    let state: Arc<AppState> = AppState::new(config);

    let (assets_tx, assets_rx) = watch::channel::<Vec<String>>(Vec::new());
    let (stop_tx, stop_rx) = watch::channel(false);

    // ── 4. Order-book ingest ─────────────────────────────────────────────
    let ingest_store = state.book_store.clone();
    let ingest_stop = stop_rx.clone();
    let ingest_handle = tokio::spawn(async move {
        market_data::book_stream::run_ingest(ws_url, ingest_store, assets_rx, ingest_stop).await;
    });

    // ── 5. Control API ───────────────────────────────────────────────────
    let api_state = state.clone();
    tokio::spawn(async move {
        let app = api::router(api_state);
        let addr = format!("0.0.0.0:{port}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!(addr = %addr, "control API listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "control API server failed");
                }
            }
            Err(e) => error!(addr = %addr, error = %e, "failed to bind control API"),
        }
    });

    // ── 6. Report loop ───────────────────────────────────────────────────
    let report_state = state.clone();
    let report_stop = stop_rx.clone();
    tokio::spawn(async move {
        report::run_report_loop(report_state, report_stop).await;
    });

    // ── 7. Scan loop ─────────────────────────────────────────────────────
    let scan_state = state.clone();
    let scan_stop = stop_rx.clone();
    let scan_handle = tokio::spawn(async move {
        scanner::run_scan_loop(scan_state, assets_tx, scan_stop).await;
    });

    info!("all subsystems running; ctrl-c to stop");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received");
    let _ = stop_tx.send(true);

    // Let the in-flight scan cycle finish, then emit a final report.
    let _ = scan_handle.await;
    let _ = ingest_handle.await;

    match report::write_report(&state) {
        Ok(path) => info!(path = %path.display(), "final report written"),
        Err(e) => warn!(error = %e, "final report failed"),
    }

    info!("Vigil scanner shut down");
    Ok(())
}
