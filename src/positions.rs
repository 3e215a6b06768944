// =============================================================================
// Paper Positions — open/close lifecycle and the JSON snapshot file
// =============================================================================
//
// "Executed" in this system always means a paper position recorded here;
// nothing ever reaches a real venue. A position contributes its full
// `size_usd` to exposure while open. Closing stamps `closed_at` and freezes
// `expected_pnl`.
//
// The snapshot file is the full position list (open and closed) as one JSON
// array, rewritten atomically after every mutation.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::Outcome;

/// A single simulated position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperPosition {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub market_id: String,
    pub condition_id: String,
    pub token_id: String,
    pub outcome: Outcome,
    /// Question text, kept for the report and for legacy risk grouping.
    #[serde(default)]
    pub question: String,
    /// VWAP entry from the fill simulation.
    pub entry_price: f64,
    pub size_usd: f64,
    pub size_shares: f64,
    pub category: String,
    /// Deterministic keys; empty on positions recorded before keying existed.
    #[serde(default)]
    pub assumption_key: String,
    #[serde(default)]
    pub window_key: String,
    pub opened_at: String,
    #[serde(default)]
    pub closed_at: Option<String>,
    #[serde(default)]
    pub expected_pnl: f64,
}

impl PaperPosition {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// Parameters for opening a new position.
#[derive(Debug, Clone)]
pub struct OpenPositionArgs {
    pub market_id: String,
    pub condition_id: String,
    pub token_id: String,
    pub outcome: Outcome,
    pub question: String,
    pub entry_price: f64,
    pub size_usd: f64,
    pub size_shares: f64,
    pub category: String,
    pub assumption_key: String,
    pub window_key: String,
    pub expected_pnl: f64,
}

/// Thread-safe owner of the position list and its snapshot file.
pub struct PositionBook {
    positions: RwLock<Vec<PaperPosition>>,
    path: PathBuf,
}

impl PositionBook {
    /// Load the snapshot file; a missing file starts an empty book.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let positions = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<PaperPosition>>(&content) {
                Ok(list) => {
                    info!(path = %path.display(), count = list.len(), "positions loaded");
                    list
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "positions file unreadable, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Self {
            positions: RwLock::new(positions),
            path,
        }
    }

    /// Open a paper position and persist the snapshot. Returns the new id.
    pub fn open_position(&self, args: OpenPositionArgs) -> String {
        let id = Uuid::new_v4().to_string();
        let pos = PaperPosition {
            id: id.clone(),
            market_id: args.market_id,
            condition_id: args.condition_id,
            token_id: args.token_id,
            outcome: args.outcome,
            question: args.question,
            entry_price: args.entry_price,
            size_usd: args.size_usd,
            size_shares: args.size_shares,
            category: args.category,
            assumption_key: args.assumption_key,
            window_key: args.window_key,
            opened_at: Utc::now().to_rfc3339(),
            closed_at: None,
            expected_pnl: args.expected_pnl,
        };

        info!(
            id = %id,
            market_id = %pos.market_id,
            outcome = %pos.outcome,
            size_usd = pos.size_usd,
            entry_price = pos.entry_price,
            "paper position opened"
        );

        self.positions.write().push(pos);
        self.persist();
        id
    }

    /// Close a position: stamp `closed_at`, freeze `expected_pnl`. Returns
    /// the closed position, or `None` when the id is unknown or already
    /// closed.
    pub fn close_position(&self, id: &str) -> Option<PaperPosition> {
        let closed = {
            let mut positions = self.positions.write();
            let pos = positions
                .iter_mut()
                .find(|p| p.id == id && p.is_open())?;
            pos.closed_at = Some(Utc::now().to_rfc3339());
            pos.clone()
        };
        info!(id, market_id = %closed.market_id, "paper position closed");
        self.persist();
        Some(closed)
    }

    /// Snapshot of all currently open positions.
    pub fn open_positions(&self) -> Vec<PaperPosition> {
        self.positions
            .read()
            .iter()
            .filter(|p| p.is_open())
            .cloned()
            .collect()
    }

    /// Snapshot of every recorded position, open and closed.
    pub fn all_positions(&self) -> Vec<PaperPosition> {
        self.positions.read().clone()
    }

    pub fn open_count(&self) -> usize {
        self.positions.read().iter().filter(|p| p.is_open()).count()
    }

    /// Write the snapshot file; IO errors are surfaced in logs and the
    /// process keeps scanning.
    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!(path = %self.path.display(), error = %e, "failed to persist positions");
        }
    }

    fn save(&self) -> Result<()> {
        let content = {
            let positions = self.positions.read();
            serde_json::to_string_pretty(&*positions)
                .context("failed to serialise positions")?
        };

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp positions to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename tmp positions to {}", self.path.display()))?;
        Ok(())
    }
}

impl std::fmt::Debug for PositionBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionBook")
            .field("open", &self.open_count())
            .field("total", &self.positions.read().len())
            .finish()
    }
}
