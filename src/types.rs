// =============================================================================
// Shared types used across the Vigil scanner
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which outcome token a plan or position is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "YES")]
    Yes,
    #[serde(rename = "NO")]
    No,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "YES"),
            Self::No => write!(f, "NO"),
        }
    }
}

/// Strategy family a plan was produced by. Drives the EV tail model and the
/// `/plans?gate=1` outcome/mode pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyMode {
    #[serde(rename = "capture")]
    Capture,
    #[serde(rename = "baseline")]
    Baseline,
    #[serde(rename = "carry")]
    Carry,
    #[serde(rename = "micro_capture_v1")]
    MicroCaptureV1,
}

impl std::fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capture => write!(f, "capture"),
            Self::Baseline => write!(f, "baseline"),
            Self::Carry => write!(f, "carry"),
            Self::MicroCaptureV1 => write!(f, "micro_capture_v1"),
        }
    }
}

impl StrategyMode {
    /// Parse the config-level `ev_mode` string ("capture" | "baseline").
    pub fn from_ev_mode(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "capture" => Self::Capture,
            _ => Self::Baseline,
        }
    }
}

/// Book side for incremental updates and the `/fill` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY", alias = "buy")]
    Buy,
    #[serde(rename = "SELL", alias = "sell")]
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Where a quoted price came from. Synthetic prices are paper-only and must
/// never reach the confirm path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    #[serde(rename = "ws")]
    Ws,
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "synthetic_ask")]
    SyntheticAsk,
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ws => write!(f, "ws"),
            Self::Http => write!(f, "http"),
            Self::SyntheticAsk => write!(f, "synthetic_ask"),
        }
    }
}

/// A market as normalized from the upstream metadata listing. Built fresh
/// every scan cycle and read-only downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMarket {
    pub market_id: String,
    pub condition_id: String,
    pub question: String,
    #[serde(default)]
    pub outcomes: Vec<String>,
    /// Resolution time, when the listing carries one.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category: Option<String>,
    /// Free-text resolution rules, scanned for ambiguity phrases.
    #[serde(default)]
    pub rules: Option<String>,
    #[serde(default)]
    pub yes_token_id: Option<String>,
    #[serde(default)]
    pub no_token_id: Option<String>,
    #[serde(default)]
    pub liquidity_hint: Option<f64>,
    #[serde(default)]
    pub closed: bool,
}

/// A sized trade candidate handed to the risk engine.
#[derive(Debug, Clone, Serialize)]
pub struct TradeProposal {
    pub market_id: String,
    pub condition_id: String,
    pub token_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub size_usd: f64,
    pub best_ask: f64,
    pub category: String,
    pub assumption_key: String,
    pub window_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Outcome::No).unwrap(), "\"NO\"");
        assert_eq!(serde_json::to_string(&Outcome::Yes).unwrap(), "\"YES\"");
    }

    #[test]
    fn strategy_mode_round_trips() {
        for mode in [
            StrategyMode::Capture,
            StrategyMode::Baseline,
            StrategyMode::Carry,
            StrategyMode::MicroCaptureV1,
        ] {
            let json = serde_json::to_string(&mode).unwrap();
            let back: StrategyMode = serde_json::from_str(&json).unwrap();
            assert_eq!(mode, back);
        }
        assert_eq!(
            serde_json::to_string(&StrategyMode::MicroCaptureV1).unwrap(),
            "\"micro_capture_v1\""
        );
    }

    #[test]
    fn side_parses_query_case() {
        assert_eq!(Side::parse("buy"), Some(Side::Buy));
        assert_eq!(Side::parse("SELL"), Some(Side::Sell));
        assert_eq!(Side::parse("hold"), None);
    }

    #[test]
    fn ev_mode_defaults_to_baseline() {
        assert_eq!(StrategyMode::from_ev_mode("capture"), StrategyMode::Capture);
        assert_eq!(StrategyMode::from_ev_mode("baseline"), StrategyMode::Baseline);
        assert_eq!(StrategyMode::from_ev_mode("???"), StrategyMode::Baseline);
    }
}
