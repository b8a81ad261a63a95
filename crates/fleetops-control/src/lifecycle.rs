//! Instance lifecycle state machine.
//!
//! This module decides, from an instance's observed power state, whether a
//! lifecycle verb should be sent to the provider, is already satisfied, or is
//! not allowed.
//!
//! # State Machine
//!
//! ```text
//!   Unknown / Stopped ──power-on──▶ Transitioning ──▶ Running
//!   Running ──────────power-off──▶ Transitioning ──▶ Stopped
//!   Running ──────────reboot─────▶ Transitioning ──▶ Running
//!   any but Cancelled ─reload────▶ Transitioning ──▶ Running
//!   any but Cancelled ─cancel────▶ Cancelled (terminal)
//! ```

use std::fmt;
use std::str::FromStr;

use fleetops_provider::PowerState;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// A lifecycle verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Power the instance on.
    PowerOn,
    /// Power the instance off.
    PowerOff,
    /// Reboot a running instance.
    Reboot,
    /// Reinstall the operating system. Destroys boot-disk data.
    Reload,
    /// Cancel the instance. Irreversible.
    Cancel,
}

impl OperationKind {
    /// Every lifecycle verb.
    pub const ALL: [Self; 5] = [
        Self::PowerOn,
        Self::PowerOff,
        Self::Reboot,
        Self::Reload,
        Self::Cancel,
    ];

    /// Stable kebab-case name, matching the CLI subcommand.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PowerOn => "power-on",
            Self::PowerOff => "power-off",
            Self::Reboot => "reboot",
            Self::Reload => "reload",
            Self::Cancel => "cancel",
        }
    }

    /// State the instance settles in once the provider completes the verb.
    #[must_use]
    pub const fn final_state(self) -> PowerState {
        match self {
            Self::PowerOn | Self::Reboot | Self::Reload => PowerState::Running,
            Self::PowerOff => PowerState::Stopped,
            Self::Cancel => PowerState::Cancelled,
        }
    }

    /// Returns true if the provider runs the verb as a tracked transaction.
    #[must_use]
    pub const fn is_async(self) -> bool {
        !matches!(self, Self::Cancel)
    }

    /// Returns true if the verb destroys data or the instance.
    #[must_use]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Reload | Self::Cancel)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ControlError::InvalidInput(format!("unknown operation: {s:?}")))
    }
}

/// What to do with a verb given the instance's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Send the verb to the provider.
    Issue,
    /// The instance is already in the verb's final state.
    AlreadySatisfied,
}

/// Check if a verb may be issued from a state.
#[must_use]
pub const fn is_valid_transition(kind: OperationKind, from: PowerState) -> bool {
    use OperationKind::{Cancel, PowerOff, PowerOn, Reboot, Reload};
    use PowerState::{Running, Stopped, Transitioning, Unknown};

    matches!(
        (kind, from),
        (PowerOn, Unknown | Stopped)
            | (PowerOff | Reboot, Running)
            | (Reload, Unknown | Running | Stopped)
            | (Cancel, Unknown | Running | Stopped | Transitioning)
    )
}

/// Returns true if issuing the verb from this state would change nothing.
#[must_use]
pub const fn is_idempotent(kind: OperationKind, from: PowerState) -> bool {
    matches!(
        (kind, from),
        (OperationKind::PowerOn, PowerState::Running)
            | (OperationKind::PowerOff, PowerState::Stopped)
    )
}

/// Decide whether to issue a verb against an instance in state `from`.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the verb is not allowed.
pub fn plan(target: impl fmt::Display, kind: OperationKind, from: PowerState) -> Result<Plan> {
    if is_idempotent(kind, from) {
        return Ok(Plan::AlreadySatisfied);
    }
    if is_valid_transition(kind, from) {
        return Ok(Plan::Issue);
    }

    let reason = match from {
        PowerState::Cancelled => format!("cannot {kind}: instance is cancelled"),
        PowerState::Transitioning => {
            format!("cannot {kind}: another operation is in flight")
        }
        _ => format!("cannot {kind} an instance that is {from}"),
    };
    Err(ControlError::invalid_state(target, reason))
}
