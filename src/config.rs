// =============================================================================
// Scanner Configuration — JSON-backed settings with atomic save
// =============================================================================
//
// Every tunable lives here, grouped the way the operator thinks about them:
// upstream endpoints, scan cadence, selection filters, EV model, fill
// simulation, risk caps, carry policy, reporting, and the control API.
//
// All fields carry `#[serde(default)]` so an older config file keeps loading
// after new fields are added. Persistence uses a tmp + rename pattern to
// prevent corruption on crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_gamma_base_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_clob_rest_base_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_ws_market_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()
}

fn default_max_assets_subscribed() -> usize {
    400
}

fn default_poll_interval_ms() -> u64 {
    15_000
}

fn default_max_pages() -> usize {
    5
}

fn default_page_size() -> usize {
    100
}

fn default_min_no_price() -> f64 {
    0.94
}

fn default_max_spread() -> f64 {
    0.02
}

fn default_min_liquidity_usd() -> f64 {
    500.0
}

fn default_max_time_to_resolution_hours() -> f64 {
    2_160.0
}

fn default_capture_min_no_ask() -> f64 {
    0.45
}

fn default_capture_max_no_ask() -> f64 {
    0.60
}

fn default_p_tail() -> f64 {
    0.02
}

fn default_tail_loss_fraction() -> f64 {
    0.5
}

fn default_ambiguous_multiplier() -> f64 {
    2.0
}

fn default_ev_mode() -> String {
    "baseline".to_string()
}

fn default_order_size_usd() -> f64 {
    100.0
}

fn default_slippage_bps() -> f64 {
    50.0
}

fn default_max_fill_depth_levels() -> usize {
    10
}

fn default_max_total_exposure_usd() -> f64 {
    5_000.0
}

fn default_max_exposure_per_market_usd() -> f64 {
    500.0
}

fn default_max_exposure_per_category_usd() -> f64 {
    1_000.0
}

fn default_max_exposure_per_assumption_usd() -> f64 {
    1_000.0
}

fn default_max_exposure_per_window_usd() -> f64 {
    2_000.0
}

fn default_max_positions_open() -> usize {
    25
}

fn default_resolution_windows() -> Vec<ResolutionWindow> {
    vec![
        ResolutionWindow {
            label: "0-24h".to_string(),
            max_hours: 24.0,
        },
        ResolutionWindow {
            label: "1-3d".to_string(),
            max_hours: 72.0,
        },
        ResolutionWindow {
            label: "3-7d".to_string(),
            max_hours: 168.0,
        },
        ResolutionWindow {
            label: "7-30d".to_string(),
            max_hours: 720.0,
        },
    ]
}

fn default_true() -> bool {
    true
}

fn default_roi_min_pct() -> f64 {
    4.0
}

fn default_roi_max_pct() -> f64 {
    12.0
}

fn default_carry_max_days() -> f64 {
    45.0
}

fn default_carry_min_days() -> f64 {
    2.0
}

fn default_spread_edge_max_ratio() -> f64 {
    2.0
}

fn default_spread_edge_min_abs() -> f64 {
    0.01
}

fn default_synthetic_tick() -> f64 {
    0.01
}

fn default_synthetic_max_ask() -> f64 {
    0.995
}

fn default_min_ask_liq_usd() -> f64 {
    100.0
}

fn default_report_dir() -> String {
    "reports".to_string()
}

fn default_daily_report_hour_local() -> u32 {
    8
}

fn default_report_interval_minutes() -> u64 {
    60
}

fn default_print_top_n() -> usize {
    10
}

fn default_control_api_port() -> u16 {
    8080
}

fn default_positions_file() -> String {
    "positions.json".to_string()
}

fn default_ledger_file() -> String {
    "ledger.jsonl".to_string()
}

// =============================================================================
// Sections
// =============================================================================

/// Upstream REST endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_gamma_base_url")]
    pub gamma_base_url: String,
    #[serde(default = "default_clob_rest_base_url")]
    pub clob_rest_base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            gamma_base_url: default_gamma_base_url(),
            clob_rest_base_url: default_clob_rest_base_url(),
        }
    }
}

/// Market-channel WebSocket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    #[serde(default = "default_ws_market_url")]
    pub market_url: String,
    /// Cap on the number of outcome tokens subscribed in one session.
    #[serde(default = "default_max_assets_subscribed")]
    pub max_assets_subscribed: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            market_url: default_ws_market_url(),
            max_assets_subscribed: default_max_assets_subscribed(),
        }
    }
}

/// Scan cadence and listing pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_pages: default_max_pages(),
            page_size: default_page_size(),
        }
    }
}

/// NO-side selection filter thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Baseline mode: minimum acceptable NO ask.
    #[serde(default = "default_min_no_price")]
    pub min_no_price: f64,
    #[serde(default = "default_max_spread")]
    pub max_spread: f64,
    /// Minimum of bid-side and ask-side notional depth.
    #[serde(default = "default_min_liquidity_usd")]
    pub min_liquidity_usd: f64,
    #[serde(default = "default_max_time_to_resolution_hours")]
    pub max_time_to_resolution_hours: f64,
    /// Capture mode: acceptable NO ask band.
    #[serde(default = "default_capture_min_no_ask")]
    pub capture_min_no_ask: f64,
    #[serde(default = "default_capture_max_no_ask")]
    pub capture_max_no_ask: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_no_price: default_min_no_price(),
            max_spread: default_max_spread(),
            min_liquidity_usd: default_min_liquidity_usd(),
            max_time_to_resolution_hours: default_max_time_to_resolution_hours(),
            capture_min_no_ask: default_capture_min_no_ask(),
            capture_max_no_ask: default_capture_max_no_ask(),
        }
    }
}

/// EV model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeesConfig {
    #[serde(default)]
    pub fee_bps: f64,
    #[serde(default = "default_p_tail")]
    pub p_tail: f64,
    #[serde(default = "default_tail_loss_fraction")]
    pub tail_loss_fraction: f64,
    /// Multiplier applied to p_tail when resolution rules look ambiguous.
    #[serde(default = "default_ambiguous_multiplier")]
    pub ambiguous_resolution_p_tail_multiplier: f64,
    /// "baseline" or "capture".
    #[serde(default = "default_ev_mode")]
    pub ev_mode: String,
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            fee_bps: 0.0,
            p_tail: default_p_tail(),
            tail_loss_fraction: default_tail_loss_fraction(),
            ambiguous_resolution_p_tail_multiplier: default_ambiguous_multiplier(),
            ev_mode: default_ev_mode(),
        }
    }
}

/// Fill simulation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_order_size_usd")]
    pub default_order_size_usd: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,
    #[serde(default = "default_max_fill_depth_levels")]
    pub max_fill_depth_levels: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_order_size_usd: default_order_size_usd(),
            slippage_bps: default_slippage_bps(),
            max_fill_depth_levels: default_max_fill_depth_levels(),
        }
    }
}

/// One legacy resolution-window bucket: the first bucket whose `max_hours`
/// covers the time left claims the position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionWindow {
    pub label: String,
    pub max_hours: f64,
}

/// Correlated-exposure caps, all in USD notional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_total_exposure_usd")]
    pub max_total_exposure_usd: f64,
    #[serde(default = "default_max_exposure_per_market_usd")]
    pub max_exposure_per_market_usd: f64,
    #[serde(default = "default_max_exposure_per_category_usd")]
    pub max_exposure_per_category_usd: f64,
    #[serde(default = "default_max_exposure_per_assumption_usd")]
    pub max_exposure_per_assumption_usd: f64,
    #[serde(default = "default_max_exposure_per_window_usd")]
    pub max_exposure_per_resolution_window_usd: f64,
    #[serde(default = "default_max_positions_open")]
    pub max_positions_open: usize,
    #[serde(default)]
    pub kill_switch_enabled: bool,
    #[serde(default = "default_resolution_windows")]
    pub resolution_windows: Vec<ResolutionWindow>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_total_exposure_usd: default_max_total_exposure_usd(),
            max_exposure_per_market_usd: default_max_exposure_per_market_usd(),
            max_exposure_per_category_usd: default_max_exposure_per_category_usd(),
            max_exposure_per_assumption_usd: default_max_exposure_per_assumption_usd(),
            max_exposure_per_resolution_window_usd: default_max_exposure_per_window_usd(),
            max_positions_open: default_max_positions_open(),
            kill_switch_enabled: false,
            resolution_windows: default_resolution_windows(),
        }
    }
}

/// YES resolution-carry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_roi_min_pct")]
    pub roi_min_pct: f64,
    #[serde(default = "default_roi_max_pct")]
    pub roi_max_pct: f64,
    #[serde(default = "default_max_spread")]
    pub max_spread: f64,
    #[serde(default = "default_carry_max_days")]
    pub max_days: f64,
    #[serde(default = "default_carry_min_days")]
    pub min_days_to_resolution: f64,
    /// Reject when spread exceeds edge_abs times this ratio.
    #[serde(default = "default_spread_edge_max_ratio")]
    pub spread_edge_max_ratio: f64,
    /// Minimum absolute edge (1 - yesAsk) worth holding for.
    #[serde(default = "default_spread_edge_min_abs")]
    pub spread_edge_min_abs: f64,
    #[serde(default = "default_min_ask_liq_usd")]
    pub min_ask_liq_usd: f64,
    #[serde(default = "default_true")]
    pub allow_synthetic_ask: bool,
    #[serde(default = "default_synthetic_tick")]
    pub synthetic_tick: f64,
    #[serde(default = "default_synthetic_max_ask")]
    pub synthetic_max_ask: f64,
    #[serde(default = "default_true")]
    pub allow_http_fallback: bool,
    #[serde(default)]
    pub allow_categories: Vec<String>,
    #[serde(default)]
    pub allow_keywords: Vec<String>,
}

impl Default for CarryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            roi_min_pct: default_roi_min_pct(),
            roi_max_pct: default_roi_max_pct(),
            max_spread: default_max_spread(),
            max_days: default_carry_max_days(),
            min_days_to_resolution: default_carry_min_days(),
            spread_edge_max_ratio: default_spread_edge_max_ratio(),
            spread_edge_min_abs: default_spread_edge_min_abs(),
            min_ask_liq_usd: default_min_ask_liq_usd(),
            allow_synthetic_ask: true,
            synthetic_tick: default_synthetic_tick(),
            synthetic_max_ask: default_synthetic_max_ask(),
            allow_http_fallback: true,
            allow_categories: Vec::new(),
            allow_keywords: Vec::new(),
        }
    }
}

/// Report rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    #[serde(default = "default_report_dir")]
    pub report_dir: String,
    #[serde(default = "default_daily_report_hour_local")]
    pub daily_report_hour_local: u32,
    #[serde(default = "default_report_interval_minutes")]
    pub report_interval_minutes: u64,
    #[serde(default = "default_print_top_n")]
    pub print_top_n: usize,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            report_dir: default_report_dir(),
            daily_report_hour_local: default_daily_report_hour_local(),
            report_interval_minutes: default_report_interval_minutes(),
            print_top_n: default_print_top_n(),
        }
    }
}

/// Control API binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlApiConfig {
    #[serde(default = "default_control_api_port")]
    pub port: u16,
}

impl Default for ControlApiConfig {
    fn default() -> Self {
        Self {
            port: default_control_api_port(),
        }
    }
}

/// Persisted-state file paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_positions_file")]
    pub positions_file: String,
    #[serde(default = "default_ledger_file")]
    pub ledger_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            positions_file: default_positions_file(),
            ledger_file: default_ledger_file(),
        }
    }
}

// =============================================================================
// BotConfig
// =============================================================================

/// Top-level configuration for the Vigil scanner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ws: WsConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub fees: FeesConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub carry: CarryConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub control_api: ControlApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Swap selection to a looser preset and record near-miss diagnostics.
    #[serde(default)]
    pub diagnostic_loose_filters: bool,
}

impl BotConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Missing file is an error so the caller can fall back to defaults with
    /// a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            ev_mode = %config.fees.ev_mode,
            carry_enabled = config.carry.enabled,
            "config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Selection thresholds with the diagnostic loose preset applied when
    /// `diagnostic_loose_filters` is on.
    pub fn effective_selection(&self) -> SelectionConfig {
        if !self.diagnostic_loose_filters {
            return self.selection.clone();
        }
        SelectionConfig {
            min_no_price: (self.selection.min_no_price - 0.05).max(0.5),
            max_spread: self.selection.max_spread * 2.0,
            min_liquidity_usd: self.selection.min_liquidity_usd * 0.2,
            max_time_to_resolution_hours: self.selection.max_time_to_resolution_hours * 2.0,
            capture_min_no_ask: (self.selection.capture_min_no_ask - 0.05).max(0.0),
            capture_max_no_ask: (self.selection.capture_max_no_ask + 0.05).min(1.0),
        }
    }
}
