//! Critical-alert state machine.
//!
//! ```text
//!            0 < d < critical
//!  Cleared ───────────────────▶ Active
//!     ▲                            │
//!     └────────────────────────────┘
//!          otherwise (incl. no echo)
//! ```
//!
//! Only the local sensor drives transitions, and only transitions produce an
//! outbound message.  The remote flag raised by the hub feeds `alert_active`
//! (what the indicators show) but is never published back as a local alert.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Active,
    Cleared,
}

/// An edge of the local critical condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertTransition {
    /// Entered `Active`; carries the distance that triggered it.
    Activated { distance_cm: f32 },
    Cleared,
}

impl AlertTransition {
    pub fn status(&self) -> AlertStatus {
        match self {
            Self::Activated { .. } => AlertStatus::Active,
            Self::Cleared => AlertStatus::Cleared,
        }
    }
}

/// One per process, starts all-false at boot.
#[derive(Debug, Clone, Default)]
pub struct RiskState {
    pub local_condition: bool,
    pub remote_flag: bool,
}

impl RiskState {
    /// Level-triggered aggregate used by the indicators.
    pub fn alert_active(&self) -> bool {
        self.local_condition || self.remote_flag
    }

    /// Recompute the local condition from this tick's distance and report
    /// the edge, if any.  Not smoothed: one sample decides.
    pub fn evaluate(&mut self, distance_cm: f32, critical_cm: f32) -> Option<AlertTransition> {
        let condition = distance_cm > 0.0 && distance_cm < critical_cm;
        if condition == self.local_condition {
            return None;
        }
        self.local_condition = condition;
        Some(if condition {
            AlertTransition::Activated { distance_cm }
        } else {
            AlertTransition::Cleared
        })
    }

    /// Apply the hub's command.  Never produces a transition.
    pub fn set_remote(&mut self, flag: bool) {
        self.remote_flag = flag;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
