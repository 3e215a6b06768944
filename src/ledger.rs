// =============================================================================
// Ledger — append-only JSONL audit trail
// =============================================================================
//
// One JSON object per line: timestamp, action, market id, free-form
// metadata. Append-only by construction; nothing in the process ever
// rewrites a line. IO failures are logged and swallowed so a full disk
// cannot stop the scanner.
// =============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Every auditable event in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    ScanPass,
    ScanFail,
    TradeBlocked,
    TradeOpened,
    TradeClosed,
    PlanCreated,
    PlanExecuted,
    ModeChange,
}

/// One ledger line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub ts: String,
    pub action: LedgerAction,
    pub market_id: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Append-only writer. The mutex serializes concurrent appends from the
/// scan task and the control API.
pub struct Ledger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Append an entry, logging (not propagating) any IO failure.
    pub fn append(&self, action: LedgerAction, market_id: &str, metadata: serde_json::Value) {
        if let Err(e) = self.try_append(action, market_id, metadata) {
            warn!(path = %self.path.display(), error = %e, "ledger append failed");
        }
    }

    fn try_append(
        &self,
        action: LedgerAction,
        market_id: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let entry = LedgerEntry {
            ts: Utc::now().to_rfc3339(),
            action,
            market_id: market_id.to_string(),
            metadata,
        };
        let line = serde_json::to_string(&entry).context("failed to serialise ledger entry")?;

        let _guard = self.write_lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open ledger at {}", self.path.display()))?;
        writeln!(file, "{line}").context("failed to write ledger line")?;
        Ok(())
    }

    /// Read every entry back, skipping unparseable lines. Used by tests and
    /// the report.
    pub fn read_all(&self) -> Vec<LedgerEntry> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("path", &self.path).finish()
    }
}
