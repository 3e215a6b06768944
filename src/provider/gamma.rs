// =============================================================================
// Gamma Client — paginated market metadata listing
// =============================================================================
//
// Gamma serializes several fields as *stringified* JSON arrays (`outcomes`,
// `clobTokenIds`), and older markets spell the end date under different
// names. Normalization happens here, once, so everything downstream works
// with one clean record.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::NormalizedMarket;

/// End-date candidate fields, tried in order.
const END_DATE_FIELDS: [&str; 4] = ["endDate", "end_date_iso", "endDateIso", "end_date"];

/// REST client for the market metadata API.
pub struct GammaClient {
    base_url: String,
    client: reqwest::Client,
}

impl GammaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// List active, unresolved markets, walking at most `max_pages` pages of
    /// `page_size`. Stops early on a short page.
    pub async fn list_active_markets(
        &self,
        max_pages: usize,
        page_size: usize,
    ) -> Result<Vec<NormalizedMarket>> {
        let mut markets = Vec::new();

        for page in 0..max_pages {
            let offset = page * page_size;
            let url = format!(
                "{}/markets?active=true&closed=false&limit={}&offset={}",
                self.base_url, page_size, offset
            );

            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .context("GET /markets request failed")?;

            let status = resp.status();
            let body: Value = resp
                .json()
                .await
                .context("failed to parse /markets response")?;
            if !status.is_success() {
                anyhow::bail!("GET /markets returned {status}: {body}");
            }

            let Some(arr) = body.as_array() else {
                warn!(page, "markets page was not an array, stopping pagination");
                break;
            };

            let page_len = arr.len();
            for entry in arr {
                if let Some(market) = parse_market(entry) {
                    markets.push(market);
                }
            }

            if page_len < page_size {
                break;
            }
        }

        debug!(count = markets.len(), "active markets listed");
        Ok(markets)
    }
}

impl std::fmt::Debug for GammaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GammaClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Parsing
// -----------------------------------------------------------------------------

/// Normalize one raw market entry. Entries without an id are dropped.
pub fn parse_market(entry: &Value) -> Option<NormalizedMarket> {
    let market_id = string_field(entry, "id")?;

    let condition_id = string_field(entry, "conditionId")
        .or_else(|| string_field(entry, "condition_id"))
        .unwrap_or_default();

    let question = string_field(entry, "question").unwrap_or_default();

    let outcomes = stringified_array(entry.get("outcomes"));
    let token_ids = stringified_array(entry.get("clobTokenIds"));

    // Token order matches outcome order; map YES/NO by outcome name.
    let mut yes_token_id = None;
    let mut no_token_id = None;
    for (i, outcome) in outcomes.iter().enumerate() {
        let token = token_ids.get(i).cloned();
        match outcome.to_lowercase().as_str() {
            "yes" => yes_token_id = token,
            "no" => no_token_id = token,
            _ => {}
        }
    }
    // Binary markets without Yes/No labels still expose two tokens in order.
    if yes_token_id.is_none() && no_token_id.is_none() && token_ids.len() == 2 {
        yes_token_id = Some(token_ids[0].clone());
        no_token_id = Some(token_ids[1].clone());
    }

    let end_date = extract_end_date(entry);

    let liquidity_hint = entry
        .get("liquidity")
        .or_else(|| entry.get("liquidityNum"))
        .and_then(number_field);

    Some(NormalizedMarket {
        market_id,
        condition_id,
        question,
        outcomes,
        end_date,
        category: string_field(entry, "category"),
        rules: string_field(entry, "description"),
        yes_token_id,
        no_token_id,
        liquidity_hint,
        closed: entry.get("closed").and_then(|v| v.as_bool()).unwrap_or(false),
    })
}

/// Walk the end-date candidate fields, then `events[0].endDate`.
fn extract_end_date(entry: &Value) -> Option<DateTime<Utc>> {
    for field in END_DATE_FIELDS {
        if let Some(parsed) = entry.get(field).and_then(parse_datetime) {
            return Some(parsed);
        }
    }
    entry
        .get("events")
        .and_then(|v| v.as_array())
        .and_then(|events| events.first())
        .and_then(|e| e.get("endDate"))
        .and_then(parse_datetime)
}

fn parse_datetime(v: &Value) -> Option<DateTime<Utc>> {
    let s = v.as_str()?;
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn string_field(entry: &Value, field: &str) -> Option<String> {
    let s = match entry.get(field)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn number_field(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Fields like `outcomes` arrive either as a real array or as a stringified
/// one (`"[\"Yes\", \"No\"]"`).
fn stringified_array(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        Some(Value::String(s)) => serde_json::from_str::<Vec<String>>(s).unwrap_or_default(),
        _ => Vec::new(),
    }
}
