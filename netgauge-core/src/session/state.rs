//! Session state machine
//!
//! ```text
//! Init -> Latency -> Download -> Upload -> Finalize -> Completed
//!   \________\__________\_________\
//!                                   Cancel -> Aborted -> Salvage -> Finalize
//!                                                    \-> Fail -> Failed
//! ```
//!
//! Every state change goes through [`SessionState::transition`]; no stage
//! is ever revisited.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::progress::ProgressKind;
use crate::sample::Phase;

/// Position of a measurement session in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Latency,
    Download,
    Upload,
    Finalize,
    Completed,
    Failed,
    /// Cancelled; `during` names the stage that was running
    Aborted { during: String },
}

/// Events driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The current stage finished; move to the next one
    Advance,
    Cancel,
    /// Finalize with the partial data of an aborted session
    Salvage,
    Fail,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::Cancel => "cancel",
            Self::Salvage => "salvage",
            Self::Fail => "fail",
        }
    }
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Latency => "latency",
            Self::Download => "download",
            Self::Upload => "upload",
            Self::Finalize => "finalize",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted { .. } => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The measurement phase this state runs, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Latency => Some(Phase::Latency),
            Self::Download => Some(Phase::Download),
            Self::Upload => Some(Phase::Upload),
            _ => None,
        }
    }

    /// The state that measures `phase`
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Latency => Self::Latency,
            Phase::Download => Self::Download,
            Phase::Upload => Self::Upload,
        }
    }

    /// Percent range progress events of this state fall into
    pub fn percent_band(&self) -> (u8, u8) {
        match self {
            Self::Init => (0, 5),
            Self::Latency => (5, 20),
            Self::Download => (20, 60),
            Self::Upload => (60, 90),
            Self::Finalize => (90, 99),
            Self::Completed => (100, 100),
            Self::Failed | Self::Aborted { .. } => (0, 100),
        }
    }

    /// Wire event type used for progress emitted in this state
    pub fn progress_kind(&self) -> ProgressKind {
        match self {
            Self::Init | Self::Latency => ProgressKind::Latency,
            Self::Download => ProgressKind::Download,
            Self::Upload | Self::Finalize => ProgressKind::Upload,
            Self::Completed => ProgressKind::Completed,
            Self::Failed | Self::Aborted { .. } => ProgressKind::Error,
        }
    }

    /// Compute the state after `transition`
    pub fn transition(&self, transition: Transition) -> Result<SessionState, SessionError> {
        use SessionState::*;

        let next = match (self, transition) {
            (Init, Transition::Advance) => Latency,
            (Latency, Transition::Advance) => Download,
            (Download, Transition::Advance) => Upload,
            (Upload, Transition::Advance) => Finalize,
            (Finalize, Transition::Advance) => Completed,

            (Init | Latency | Download | Upload, Transition::Cancel) => Aborted {
                during: self.as_str().to_string(),
            },

            (Aborted { .. }, Transition::Salvage) => Finalize,

            (state, Transition::Fail) if !state.is_terminal() => Failed,

            _ => {
                return Err(SessionError::InvalidStateTransition {
                    from: self.as_str().to_string(),
                    event: transition.as_str().to_string(),
                });
            }
        };

        Ok(next)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted { during } => write!(f, "aborted during {during}"),
            other => f.write_str(other.as_str()),
        }
    }
}
