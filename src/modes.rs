// =============================================================================
// Mode Manager — disarmed / armed-confirm / armed-auto, plus the panic flag
// =============================================================================
//
// Mode transitions are free via the control API. Panic is one-way until the
// operator explicitly disarms: it forces the stored mode to DISARMED, sets
// the flag, and `may_execute` stays false while the flag is up even if a
// later transition arms the scanner again. POST /disarm is the explicit
// toggle that clears it.
//
// Every transition invokes the audit callback so the orchestrator can append
// a mode_change ledger entry.
// =============================================================================

use parking_lot::RwLock;
use serde::Serialize;

/// Operator-selected execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionMode {
    #[serde(rename = "DISARMED")]
    Disarmed,
    #[serde(rename = "ARMED_CONFIRM")]
    ArmedConfirm,
    #[serde(rename = "ARMED_AUTO")]
    ArmedAuto,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disarmed => write!(f, "DISARMED"),
            Self::ArmedConfirm => write!(f, "ARMED_CONFIRM"),
            Self::ArmedAuto => write!(f, "ARMED_AUTO"),
        }
    }
}

/// Mode plus the panic override.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModeState {
    pub mode: ExecutionMode,
    pub panic: bool,
}

impl ModeState {
    /// What the rest of the system obeys: panic always reads as DISARMED.
    pub fn effective_mode(&self) -> ExecutionMode {
        if self.panic {
            ExecutionMode::Disarmed
        } else {
            self.mode
        }
    }
}

/// Called on every transition with the new state and a short action note.
pub type ModeChangeCallback = Box<dyn Fn(&ModeState, &str) + Send + Sync>;

/// Single source of truth for the execution mode.
pub struct ModeManager {
    state: RwLock<ModeState>,
    on_change: ModeChangeCallback,
}

impl ModeManager {
    /// Boot state is always DISARMED with panic clear; mode is deliberately
    /// not persisted so a restart is safe.
    pub fn new(on_change: ModeChangeCallback) -> Self {
        Self {
            state: RwLock::new(ModeState {
                mode: ExecutionMode::Disarmed,
                panic: false,
            }),
            on_change,
        }
    }

    pub fn state(&self) -> ModeState {
        *self.state.read()
    }

    /// Set the mode. Disarming clears panic (the explicit toggle out);
    /// arming while panicked stores the mode but execution stays off until
    /// the flag is cleared.
    pub fn set_mode(&self, mode: ExecutionMode) {
        let new_state = {
            let mut s = self.state.write();
            s.mode = mode;
            if mode == ExecutionMode::Disarmed {
                s.panic = false;
            }
            *s
        };
        (self.on_change)(&new_state, &format!("mode set to {mode}"));
    }

    /// Panic: force DISARMED and raise the flag. Idempotent.
    pub fn panic(&self) {
        let new_state = {
            let mut s = self.state.write();
            s.mode = ExecutionMode::Disarmed;
            s.panic = true;
            *s
        };
        (self.on_change)(&new_state, "panic");
    }

    pub fn is_panicked(&self) -> bool {
        self.state.read().panic
    }

    /// Any execution path open?
    pub fn may_execute(&self) -> bool {
        let s = self.state.read();
        !s.panic
            && matches!(
                s.mode,
                ExecutionMode::ArmedConfirm | ExecutionMode::ArmedAuto
            )
    }

    pub fn is_auto_execute(&self) -> bool {
        let s = self.state.read();
        !s.panic && s.mode == ExecutionMode::ArmedAuto
    }

    pub fn is_confirm_mode(&self) -> bool {
        let s = self.state.read();
        !s.panic && s.mode == ExecutionMode::ArmedConfirm
    }
}

impl std::fmt::Debug for ModeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state();
        f.debug_struct("ModeManager")
            .field("mode", &s.mode)
            .field("panic", &s.panic)
            .finish()
    }
}
