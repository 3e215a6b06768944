// =============================================================================
// Control API Endpoints — Axum 0.7
// =============================================================================
//
// Read endpoints serve the plan store, the book store, and mode state. The
// POST endpoints are the only mutations: mode transitions, panic, and the
// confirm path (which re-runs fill and risk before opening anything).
//
// Every response carries X-Build-Id. `/plans` validates its query strictly:
// unknown parameters are a 400, because a typoed filter silently returning
// everything is how operators page themselves at 3am.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app_state::AppState;
use crate::fill;
use crate::market_data::normalize_key;
use crate::modes::ExecutionMode;
use crate::plans::TradePlan;
use crate::provider::RestBook;
use crate::scanner::{try_execute_plan, ExecutionOutcome};
use crate::types::{Outcome, Side, StrategyMode};

/// `/fill` notional clamp.
const FILL_SIZE_CAP_USD: f64 = 10_000.0;

/// `/plans` pagination bounds.
const PLANS_LIMIT_DEFAULT: usize = 50;
const PLANS_LIMIT_MAX: usize = 200;

// =============================================================================
// Router construction
// =============================================================================

/// Build the control API router with CORS and the build-id stamp.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(status))
        .route("/plans", get(plans))
        .route("/book", get(book))
        .route("/has-book", get(has_book))
        .route("/fill", get(fill_quote))
        .route("/books-debug", get(books_debug))
        .route("/confirm", post(confirm))
        .route("/disarm", post(disarm))
        .route("/arm_confirm", post(arm_confirm))
        .route("/arm_auto", post(arm_auto))
        .route("/panic", post(panic_stop))
        .layer(middleware::from_fn_with_state(state.clone(), stamp_build_id))
        .layer(cors)
        .with_state(state)
}

/// Middleware: every response carries X-Build-Id.
async fn stamp_build_id(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&state.build_id) {
        resp.headers_mut().insert("X-Build-Id", value);
    }
    resp
}

fn bad_request(details: Vec<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "invalid_query", "details": details })),
    )
        .into_response()
}

// =============================================================================
// GET /status
// =============================================================================

async fn status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode_state = state.mode_manager.state();
    let meta = state.last_scan.read().clone();
    let debug = params.get("debug").map(|v| v == "1").unwrap_or(false);

    let mut body = json!({
        "mode": mode_state.mode,
        "panic": mode_state.panic,
        "queue_len": state.plan_store.queue_len(),
        "plans": state.plan_store.count(),
        "positions_open": state.positions.open_count(),
        "last_scan_ts": meta.as_ref().map(|m| m.ts),
        "trades_proposed": meta.as_ref().map(|m| m.trades_proposed).unwrap_or(0),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "meta": meta.as_ref().map(|m| m.compact()),
    });
    if debug {
        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "meta_full".to_string(),
                serde_json::to_value(&meta).unwrap_or(Value::Null),
            );
        }
    }
    Json(body).into_response()
}

// =============================================================================
// GET /plans
// =============================================================================

const PLANS_ALLOWED_PARAMS: [&str; 7] = [
    "limit",
    "offset",
    "min_ev",
    "category",
    "assumption_key",
    "debug",
    "gate",
];

fn gate_allows(plan: &TradePlan) -> bool {
    matches!(
        (plan.outcome, plan.ev_breakdown.mode),
        (
            Outcome::No,
            StrategyMode::Capture | StrategyMode::Baseline | StrategyMode::MicroCaptureV1
        ) | (Outcome::Yes, StrategyMode::Carry)
    )
}

/// Serialize a plan row, stripping the EV breakdown to its headline fields
/// unless the caller asked for the full object.
fn plan_row(plan: &TradePlan, debug: bool) -> Value {
    let mut value = serde_json::to_value(plan).unwrap_or(Value::Null);
    if !debug {
        if let Some(obj) = value.as_object_mut() {
            let ev = &plan.ev_breakdown;
            let mut stripped = json!({
                "net_ev": ev.net_ev,
                "tail_risk_cost": ev.tail_risk_cost,
            });
            if let Some(s) = stripped.as_object_mut() {
                if let Some(byp) = &ev.tail_byp {
                    s.insert("tailByp".to_string(), json!(byp));
                }
                if let Some(reason) = &ev.tail_bypass_reason {
                    s.insert("tail_bypass_reason".to_string(), json!(reason));
                }
            }
            obj.insert("ev_breakdown".to_string(), stripped);
        }
    }
    value
}

async fn plans(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut details: Vec<String> = Vec::new();

    for key in params.keys() {
        if !PLANS_ALLOWED_PARAMS.contains(&key.as_str()) {
            details.push(format!("unknown parameter '{key}'"));
        }
    }

    let limit = match params.get("limit") {
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) => (n.clamp(1, PLANS_LIMIT_MAX as i64)) as usize,
            Err(_) => {
                details.push(format!("limit '{raw}' is not an integer"));
                PLANS_LIMIT_DEFAULT
            }
        },
        None => PLANS_LIMIT_DEFAULT,
    };
    let offset = match params.get("offset") {
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) if n >= 0 => n as usize,
            Ok(_) => {
                details.push("offset must be >= 0".to_string());
                0
            }
            Err(_) => {
                details.push(format!("offset '{raw}' is not an integer"));
                0
            }
        },
        None => 0,
    };
    let min_ev = match params.get("min_ev") {
        Some(raw) => match raw.parse::<f64>() {
            Ok(v) => Some(v),
            Err(_) => {
                details.push(format!("min_ev '{raw}' is not a number"));
                None
            }
        },
        None => None,
    };
    let debug = parse_flag(&params, "debug", &mut details).unwrap_or(false);
    let gate = parse_flag(&params, "gate", &mut details).unwrap_or(false);

    // Trimmed-empty string filters are treated as absent.
    let category = params
        .get("category")
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    let assumption_key = params
        .get("assumption_key")
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());

    if !details.is_empty() {
        return bad_request(details);
    }

    let total = state.plan_store.count();
    let mut list = state.plan_store.all();

    if gate {
        list.retain(gate_allows);
    }
    if let Some(cat) = &category {
        list.retain(|p| &p.category == cat);
    }
    if let Some(key) = &assumption_key {
        list.retain(|p| &p.assumption_key == key);
    }
    if let Some(floor) = min_ev {
        list.retain(|p| p.ev_breakdown.net_ev >= floor);
    }

    // net_ev desc, created_at desc, plan_id asc.
    list.sort_by(|a, b| {
        b.ev_breakdown
            .net_ev
            .partial_cmp(&a.ev_breakdown.net_ev)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.created_at.cmp(&a.created_at))
            .then(a.plan_id.cmp(&b.plan_id))
    });

    let count_total = list.len();
    let rows: Vec<Value> = list
        .iter()
        .skip(offset)
        .take(limit)
        .map(|p| plan_row(p, debug))
        .collect();

    let mut resp = Json(json!({ "count_total": count_total, "plans": rows })).into_response();
    if let Ok(v) = HeaderValue::from_str(&total.to_string()) {
        resp.headers_mut().insert("X-Plans-Total", v);
    }
    if let Ok(v) = HeaderValue::from_str(&count_total.to_string()) {
        resp.headers_mut().insert("X-Plans-Filtered", v);
    }
    resp
}

fn parse_flag(
    params: &HashMap<String, String>,
    name: &str,
    details: &mut Vec<String>,
) -> Option<bool> {
    match params.get(name).map(|s| s.as_str()) {
        None => None,
        Some("0") => Some(false),
        Some("1") => Some(true),
        Some(other) => {
            details.push(format!("{name} '{other}' must be 0 or 1"));
            None
        }
    }
}

// =============================================================================
// GET /book
// =============================================================================

fn rest_book_top(book: &RestBook) -> Value {
    let no_bid = book.best_bid();
    let no_ask = book.best_ask();
    let spread = match (no_bid, no_ask) {
        (Some(b), Some(a)) => Some(a - b),
        _ => None,
    };
    let bid_liquidity_usd: f64 = book.bids.iter().take(5).map(|l| l.price * l.size).sum();
    json!({
        "no_bid": no_bid,
        "no_ask": no_ask,
        "spread": spread,
        "depth": {
            "bid_liquidity_usd": bid_liquidity_usd,
            "ask_liquidity_usd": book.ask_liquidity_usd(5),
            "levels_count": book.bids.len() + book.asks.len(),
        },
    })
}

async fn book(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(token) = params
        .get("no_token_id")
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
    else {
        return bad_request(vec!["no_token_id is required".to_string()]);
    };

    if let Some(top) = state.book_store.top_of_book(token) {
        if top.no_bid.is_some() || top.no_ask.is_some() {
            let mut body = serde_json::to_value(&top).unwrap_or(Value::Null);
            if let Some(obj) = body.as_object_mut() {
                obj.insert("price_source".to_string(), json!("ws"));
                obj.insert("http_fallback_used".to_string(), json!(false));
            }
            return Json(body).into_response();
        }
    }

    // Store miss (or an empty mirror): try upstream once.
    if let Some(rest) = state.clob.fallback_book(token).await {
        let mut body = rest_book_top(&rest);
        if let Some(obj) = body.as_object_mut() {
            obj.insert("price_source".to_string(), json!("http"));
            obj.insert("http_fallback_used".to_string(), json!(true));
        }
        return Json(body).into_response();
    }

    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "book_not_found" })),
    )
        .into_response()
}

// =============================================================================
// GET /has-book
// =============================================================================

async fn has_book(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let token = params
        .get("token_id")
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    if token.is_empty() {
        return bad_request(vec!["token_id is required".to_string()]);
    }

    let normalized = normalize_key(&token);
    let present = !normalized.is_empty() && state.book_store.has_book(&normalized);
    let note = if normalized.is_empty() {
        "token id contains no digits"
    } else if present {
        "book present in live mirror"
    } else {
        "no book for this key; it may not be subscribed yet"
    };

    Json(json!({
        "token_id": token,
        "normalized_key": normalized,
        "has_book": present,
        "note": note,
    }))
    .into_response()
}

// =============================================================================
// GET /fill
// =============================================================================

async fn fill_quote(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut details: Vec<String> = Vec::new();

    let token = params
        .get("no_token_id")
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    if token.is_empty() {
        details.push("no_token_id is required".to_string());
    }
    let side = match params.get("side").map(|s| s.as_str()) {
        Some(raw) => match Side::parse(raw) {
            Some(s) => Some(s),
            None => {
                details.push(format!("side '{raw}' must be buy or sell"));
                None
            }
        },
        None => {
            details.push("side is required".to_string());
            None
        }
    };
    let size_usd = match params.get("size_usd") {
        Some(raw) => match raw.parse::<f64>() {
            Ok(v) if v > 0.0 => Some(v.min(FILL_SIZE_CAP_USD)),
            Ok(_) => {
                details.push("size_usd must be > 0".to_string());
                None
            }
            Err(_) => {
                details.push(format!("size_usd '{raw}' is not a number"));
                None
            }
        },
        None => {
            details.push("size_usd is required".to_string());
            None
        }
    };

    if !details.is_empty() {
        return bad_request(details);
    }
    let (side, size_usd) = (side.unwrap_or(Side::Buy), size_usd.unwrap_or(0.0));

    let sim = state.config.read().simulation.clone();

    if state.book_store.has_book(&token) {
        let (levels, result) = match side {
            Side::Buy => {
                let asks = state.book_store.depth(&token, Side::Sell);
                let r = fill::simulate_buy(&asks, size_usd, sim.slippage_bps, sim.max_fill_depth_levels);
                (asks, r)
            }
            Side::Sell => {
                let bids = state.book_store.depth(&token, Side::Buy);
                let r = fill::simulate_sell(&bids, size_usd, sim.slippage_bps, sim.max_fill_depth_levels);
                (bids, r)
            }
        };

        let top = levels.first().map(|l| l.price).unwrap_or(0.0);
        let slippage_pct = if result.filled && top > 0.0 {
            (result.avg_price / top - 1.0) * 100.0
        } else {
            0.0
        };

        return Json(json!({
            "filled": result.filled,
            "filled_usd": result.fill_size_usd,
            "filled_shares": result.fill_size_shares,
            "avg_price": result.avg_price,
            "levels_used": result.levels_used,
            "slippage_pct": slippage_pct,
            "price_source": "ws",
            "reason": result.reason,
        }))
        .into_response();
    }

    // No mirror: quote one synthetic level off the REST top.
    if let Some(rest) = state.clob.fallback_book(&token).await {
        let best = match side {
            Side::Buy => rest.best_ask(),
            Side::Sell => rest.best_bid(),
        };
        if let Some(price) = best {
            return Json(json!({
                "filled": true,
                "filled_usd": size_usd,
                "filled_shares": size_usd / price,
                "avg_price": price,
                "levels_used": 1,
                "slippage_pct": 0.0,
                "price_source": "http",
                "reason": "http fallback single level",
            }))
            .into_response();
        }
    }

    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "book_not_found" })),
    )
        .into_response()
}

// =============================================================================
// GET /books-debug
// =============================================================================

async fn books_debug(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !params.is_empty() {
        let details = params
            .keys()
            .map(|k| format!("unknown parameter '{k}'"))
            .collect();
        return bad_request(details);
    }

    Json(json!({
        "size": state.book_store.len(),
        "sampleKeys": state.book_store.sample_keys(10),
        "note": "keys are digits-only canonical token ids",
    }))
    .into_response()
}

// =============================================================================
// POST /confirm
// =============================================================================

async fn confirm(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let Some(plan_id) = body
        .get("plan_id")
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
    else {
        return bad_request(vec!["plan_id is required".to_string()]);
    };

    let Some(plan) = state.plan_store.get(plan_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "plan not found" })),
        )
            .into_response();
    };

    let outcome = try_execute_plan(&state, &plan);
    info!(plan_id, outcome = ?outcome, "confirm requested");

    let body = match outcome {
        ExecutionOutcome::Executed {
            position_id,
            size_usd,
        } => json!({
            "executed": true,
            "positionId": position_id,
            "size_usd": size_usd,
        }),
        ExecutionOutcome::AlreadyExecuted => {
            json!({ "executed": false, "reason": "already executed" })
        }
        ExecutionOutcome::Panic => json!({ "executed": false, "reason": "panic" }),
        ExecutionOutcome::Disarmed => json!({ "executed": false, "reason": "disarmed" }),
        ExecutionOutcome::PaperOnlySynthetic => {
            json!({ "executed": false, "reason": "synthetic_price_paper_only" })
        }
        ExecutionOutcome::NoFill { reason } => {
            json!({ "executed": false, "reason": format!("no_fill: {reason}") })
        }
        ExecutionOutcome::Blocked { reasons } => {
            json!({ "executed": false, "reason": "risk_blocked", "reasons": reasons })
        }
    };
    Json(body).into_response()
}

// =============================================================================
// POST /disarm, /arm_confirm, /arm_auto, /panic
// =============================================================================

fn mode_response(state: &AppState) -> Response {
    let s = state.mode_manager.state();
    Json(json!({
        "mode": s.mode,
        "panic": s.panic,
        "queue_len": state.plan_store.queue_len(),
    }))
    .into_response()
}

async fn disarm(State(state): State<Arc<AppState>>) -> Response {
    state.mode_manager.set_mode(ExecutionMode::Disarmed);
    info!("disarmed via API");
    mode_response(&state)
}

async fn arm_confirm(State(state): State<Arc<AppState>>) -> Response {
    state.mode_manager.set_mode(ExecutionMode::ArmedConfirm);
    info!("armed (confirm) via API");
    mode_response(&state)
}

async fn arm_auto(State(state): State<Arc<AppState>>) -> Response {
    state.mode_manager.set_mode(ExecutionMode::ArmedAuto);
    info!("armed (auto) via API");
    mode_response(&state)
}

async fn panic_stop(State(state): State<Arc<AppState>>) -> Response {
    state.mode_manager.panic();
    state.plan_store.clear_queue();
    info!("PANIC via API: disarmed, queue cleared");
    mode_response(&state)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;
    use crate::ev;
    use crate::keys::plan_id as make_plan_id;
    use crate::market_data::OrderLevel;
    use crate::plans::PlanStatus;
    use crate::risk::HeadroomSnapshot;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = BotConfig::default();
        cfg.storage.positions_file =
            dir.path().join("positions.json").to_string_lossy().into_owned();
        cfg.storage.ledger_file = dir.path().join("ledger.jsonl").to_string_lossy().into_owned();
        (AppState::new(cfg), dir)
    }

    fn seed_plan(market: &str, outcome: Outcome, mode: StrategyMode, net_ev: f64) -> TradePlan {
        let mut ev = ev::compute_carry(0.51, 100.0, &crate::config::FeesConfig::default());
        ev.mode = mode;
        ev.net_ev = net_ev;
        if mode == StrategyMode::Capture {
            ev.tail_byp = Some("Y".to_string());
            ev.tail_bypass_reason = Some("capture_mode".to_string());
        }
        TradePlan {
            plan_id: make_plan_id(market, outcome, mode),
            market_id: market.to_string(),
            condition_id: format!("c-{market}"),
            token_id: "200".to_string(),
            outcome,
            size_usd: 100.0,
            limit_price: 0.51,
            category: "Politics".to_string(),
            assumption_key: "a1_feedface0123".to_string(),
            window_key: "W0_0_72H".to_string(),
            ev_breakdown: ev,
            headroom: HeadroomSnapshot {
                global: 1_000.0,
                per_market: 500.0,
                category: 500.0,
                assumption: 500.0,
                window: 500.0,
            },
            status: PlanStatus::Proposed,
            price_source: None,
            synthetic_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            executed_at: None,
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value, axum::http::HeaderMap) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let value: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value, headers)
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let value: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn status_reports_mode_and_build_id() {
        let (state, _dir) = test_state();
        let (status, body, headers) = get_json(router(state.clone()), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "DISARMED");
        assert_eq!(body["panic"], false);
        assert_eq!(body["queue_len"], 0);
        assert!(headers.contains_key("X-Build-Id"));
        assert!(body.get("meta_full").is_none());

        let (_, body, _) = get_json(router(state), "/status?debug=1").await;
        assert!(body.get("meta_full").is_some());
    }

    #[tokio::test]
    async fn plans_orders_by_net_ev_and_sets_headers() {
        let (state, _dir) = test_state();
        state.plan_store.set_plans(vec![
            seed_plan("m1", Outcome::No, StrategyMode::Capture, 0.5),
            seed_plan("m2", Outcome::No, StrategyMode::Capture, 2.0),
            seed_plan("m3", Outcome::No, StrategyMode::Capture, 1.0),
        ]);

        let (status, body, headers) = get_json(router(state), "/plans").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count_total"], 3);
        assert_eq!(headers["X-Plans-Total"], "3");
        assert_eq!(headers["X-Plans-Filtered"], "3");

        let rows = body["plans"].as_array().unwrap();
        assert_eq!(rows[0]["market_id"], "m2");
        assert_eq!(rows[1]["market_id"], "m3");
        assert_eq!(rows[2]["market_id"], "m1");
        // Default response strips the breakdown to headline fields.
        let ev = rows[0]["ev_breakdown"].as_object().unwrap();
        assert!(ev.contains_key("net_ev"));
        assert!(ev.contains_key("tail_risk_cost"));
        assert!(ev.contains_key("tailByp"));
        assert!(!ev.contains_key("assumptions"));
    }

    #[tokio::test]
    async fn plans_debug_returns_full_breakdown() {
        let (state, _dir) = test_state();
        state
            .plan_store
            .set_plans(vec![seed_plan("m1", Outcome::No, StrategyMode::Capture, 0.5)]);
        let (_, body, _) = get_json(router(state), "/plans?debug=1").await;
        let ev = body["plans"][0]["ev_breakdown"].as_object().unwrap();
        assert!(ev.contains_key("assumptions"));
        assert!(ev.contains_key("explanation"));
    }

    #[tokio::test]
    async fn plans_rejects_unknown_params() {
        let (state, _dir) = test_state();
        let (status, body, _) = get_json(router(state), "/plans?bogus=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_query");
        assert!(body["details"][0].as_str().unwrap().contains("bogus"));
    }

    #[tokio::test]
    async fn plans_limit_clamps_and_offset_pages() {
        let (state, _dir) = test_state();
        let plans: Vec<TradePlan> = (0..5)
            .map(|i| seed_plan(&format!("m{i}"), Outcome::No, StrategyMode::Capture, i as f64))
            .collect();
        state.plan_store.set_plans(plans);

        let (_, body, _) = get_json(router(state.clone()), "/plans?limit=2").await;
        assert_eq!(body["plans"].as_array().unwrap().len(), 2);

        let (_, body, _) = get_json(router(state.clone()), "/plans?limit=0").await;
        // Clamped up to 1.
        assert_eq!(body["plans"].as_array().unwrap().len(), 1);

        let (_, body, _) = get_json(router(state.clone()), "/plans?limit=9999").await;
        assert_eq!(body["plans"].as_array().unwrap().len(), 5);

        let (_, body, _) = get_json(router(state), "/plans?offset=4").await;
        assert_eq!(body["plans"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn plans_gate_filters_mode_outcome_pairs() {
        let (state, _dir) = test_state();
        let mut stray = seed_plan("m3", Outcome::Yes, StrategyMode::Capture, 3.0);
        stray.plan_id = "p_stray".to_string();
        state.plan_store.set_plans(vec![
            seed_plan("m1", Outcome::No, StrategyMode::Capture, 1.0),
            seed_plan("m2", Outcome::Yes, StrategyMode::Carry, 2.0),
            stray,
        ]);

        let (_, body, headers) = get_json(router(state), "/plans?gate=1").await;
        assert_eq!(body["count_total"], 2);
        assert_eq!(headers["X-Plans-Total"], "3");
        assert_eq!(headers["X-Plans-Filtered"], "2");
        for row in body["plans"].as_array().unwrap() {
            let outcome = row["outcome"].as_str().unwrap();
            let mode = row["ev_breakdown"].get("mode");
            // Stripped rows do not carry mode; check via the gate outcome pairing.
            assert!(outcome == "NO" || outcome == "YES");
            assert!(mode.is_none());
        }
    }

    #[tokio::test]
    async fn plans_filters_by_category_and_min_ev() {
        let (state, _dir) = test_state();
        let mut other = seed_plan("m2", Outcome::No, StrategyMode::Capture, 5.0);
        other.category = "Sports".to_string();
        state.plan_store.set_plans(vec![
            seed_plan("m1", Outcome::No, StrategyMode::Capture, 1.0),
            other,
        ]);

        let (_, body, _) = get_json(router(state.clone()), "/plans?category=Sports").await;
        assert_eq!(body["count_total"], 1);
        assert_eq!(body["plans"][0]["market_id"], "m2");

        // Empty category filter is ignored.
        let (_, body, _) = get_json(router(state.clone()), "/plans?category=%20").await;
        assert_eq!(body["count_total"], 2);

        let (_, body, _) = get_json(router(state), "/plans?min_ev=2.0").await;
        assert_eq!(body["count_total"], 1);
    }

    #[tokio::test]
    async fn book_serves_store_and_404s_on_miss() {
        let (state, _dir) = test_state();
        state.book_store.apply_snapshot(
            "200",
            vec![OrderLevel { price: 0.96, size: 100.0 }],
            vec![OrderLevel { price: 0.97, size: 100.0 }],
        );

        let (status, body, _) = get_json(router(state.clone()), "/book?no_token_id=200").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["no_ask"], 0.97);
        assert_eq!(body["price_source"], "ws");
        assert_eq!(body["http_fallback_used"], false);

        // Unknown token: fallback fails against an unreachable base URL.
        state.clob.seed_cache("404404", None);
        let (status, body, _) = get_json(router(state), "/book?no_token_id=404404").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "book_not_found");
    }

    #[tokio::test]
    async fn book_uses_http_fallback_when_mirror_is_cold() {
        let (state, _dir) = test_state();
        state.clob.seed_cache(
            "777",
            Some(RestBook {
                bids: vec![OrderLevel { price: 0.93, size: 10.0 }],
                asks: vec![OrderLevel { price: 0.94, size: 10.0 }],
            }),
        );
        let (status, body, _) = get_json(router(state), "/book?no_token_id=777").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["price_source"], "http");
        assert_eq!(body["http_fallback_used"], true);
        assert_eq!(body["no_ask"], 0.94);
    }

    #[tokio::test]
    async fn has_book_normalizes_ids() {
        let (state, _dir) = test_state();
        state.book_store.apply_snapshot(
            "314159",
            Vec::new(),
            vec![OrderLevel { price: 0.5, size: 1.0 }],
        );
        let (_, body, _) =
            get_json(router(state), "/has-book?token_id=%5B%22314159%22%5D").await;
        assert_eq!(body["normalized_key"], "314159");
        assert_eq!(body["has_book"], true);
    }

    #[tokio::test]
    async fn fill_walks_the_stored_book() {
        let (state, _dir) = test_state();
        state.book_store.apply_snapshot(
            "200",
            vec![OrderLevel { price: 0.96, size: 1_000.0 }],
            vec![OrderLevel { price: 0.50, size: 1_000.0 }],
        );

        let (status, body, _) = get_json(
            router(state.clone()),
            "/fill?no_token_id=200&side=buy&size_usd=100",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["filled"], true);
        assert_eq!(body["avg_price"], 0.5);
        assert_eq!(body["levels_used"], 1);
        assert_eq!(body["slippage_pct"], 0.0);
        assert_eq!(body["price_source"], "ws");

        let (_, body, _) = get_json(
            router(state),
            "/fill?no_token_id=200&side=sell&size_usd=96",
        )
        .await;
        assert_eq!(body["filled"], true);
        let avg = body["avg_price"].as_f64().unwrap();
        assert!((avg - 0.96).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fill_validates_params() {
        let (state, _dir) = test_state();
        let (status, body, _) = get_json(
            router(state.clone()),
            "/fill?no_token_id=200&side=hold&size_usd=10",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_query");

        let (status, _, _) = get_json(
            router(state),
            "/fill?no_token_id=200&side=buy&size_usd=-5",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn books_debug_rejects_query_params() {
        let (state, _dir) = test_state();
        state.book_store.apply_snapshot(
            "200",
            Vec::new(),
            vec![OrderLevel { price: 0.5, size: 1.0 }],
        );

        let (status, body, _) = get_json(router(state.clone()), "/books-debug").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["size"], 1);
        assert!(body["sampleKeys"].as_array().unwrap().contains(&json!("200")));

        let (status, _, _) = get_json(router(state), "/books-debug?x=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn confirm_is_idempotent_end_to_end() {
        let (state, _dir) = test_state();
        state.book_store.apply_snapshot(
            "200",
            vec![OrderLevel { price: 0.50, size: 6_000.0 }],
            vec![OrderLevel { price: 0.51, size: 6_000.0 }],
        );
        let plan = seed_plan("m1", Outcome::No, StrategyMode::Capture, 1.0);
        state.plan_store.set_plans(vec![plan.clone()]);
        state.mode_manager.set_mode(ExecutionMode::ArmedConfirm);
        state.plan_store.enqueue(&plan);

        let (status, body) = post_json(
            router(state.clone()),
            "/confirm",
            json!({ "plan_id": plan.plan_id }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["executed"], true);
        assert!(body["positionId"].is_string());
        assert_eq!(state.positions.open_count(), 1);

        let (_, body) = post_json(
            router(state.clone()),
            "/confirm",
            json!({ "plan_id": plan.plan_id }),
        )
        .await;
        assert_eq!(body["executed"], false);
        assert_eq!(body["reason"], "already executed");
        assert_eq!(state.positions.open_count(), 1);
    }

    #[tokio::test]
    async fn confirm_unknown_plan_is_404() {
        let (state, _dir) = test_state();
        let (status, body) =
            post_json(router(state), "/confirm", json!({ "plan_id": "p_missing" })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "plan not found");
    }

    #[tokio::test]
    async fn panic_clears_queue_and_blocks_confirm() {
        let (state, _dir) = test_state();
        let p1 = seed_plan("m1", Outcome::No, StrategyMode::Capture, 1.0);
        let p2 = seed_plan("m2", Outcome::No, StrategyMode::Capture, 2.0);
        state.plan_store.set_plans(vec![p1.clone(), p2.clone()]);
        state.mode_manager.set_mode(ExecutionMode::ArmedConfirm);
        state.plan_store.enqueue(&p1);
        state.plan_store.enqueue(&p2);
        assert_eq!(state.plan_store.queue_len(), 2);

        let (status, body) = post_json(router(state.clone()), "/panic", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "DISARMED");
        assert_eq!(body["panic"], true);
        assert_eq!(body["queue_len"], 0);
        assert!(!state.mode_manager.may_execute());

        let (_, body) = post_json(
            router(state.clone()),
            "/confirm",
            json!({ "plan_id": p1.plan_id }),
        )
        .await;
        assert_eq!(body["executed"], false);
        assert_eq!(body["reason"], "panic");

        // Idempotent.
        let (status, body) = post_json(router(state), "/panic", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["panic"], true);
    }

    #[tokio::test]
    async fn arm_endpoints_set_modes() {
        let (state, _dir) = test_state();

        let (_, body) = post_json(router(state.clone()), "/arm_confirm", json!({})).await;
        assert_eq!(body["mode"], "ARMED_CONFIRM");
        assert!(state.mode_manager.is_confirm_mode());

        let (_, body) = post_json(router(state.clone()), "/arm_auto", json!({})).await;
        assert_eq!(body["mode"], "ARMED_AUTO");
        assert!(state.mode_manager.is_auto_execute());

        let (_, body) = post_json(router(state.clone()), "/disarm", json!({})).await;
        assert_eq!(body["mode"], "DISARMED");
        assert!(!state.mode_manager.may_execute());
    }

    #[tokio::test]
    async fn confirm_rejects_synthetic_carry() {
        let (state, _dir) = test_state();
        let mut plan = seed_plan("m1", Outcome::Yes, StrategyMode::Carry, 1.0);
        plan.price_source = Some(crate::types::PriceSource::SyntheticAsk);
        plan.synthetic_reason = Some("no_ask_using_noBid_plus_tick".to_string());
        state.plan_store.set_plans(vec![plan.clone()]);
        state.mode_manager.set_mode(ExecutionMode::ArmedConfirm);

        let (status, body) = post_json(
            router(state),
            "/confirm",
            json!({ "plan_id": plan.plan_id }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["executed"], false);
        assert_eq!(body["reason"], "synthetic_price_paper_only");
    }
}
