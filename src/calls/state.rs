//! Call state machine implementation.

use callcore::Reason;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which side initiated the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// Current state of a call.
#[derive(Debug, Clone, Serialize)]
pub enum CallState {
    /// Outgoing call: session-initiate sent, no answer yet.
    Invited { sent_at: DateTime<Utc> },
    /// Outgoing call: the callee reported it is ringing.
    Ringing { ringing_at: DateTime<Utc> },
    /// Incoming call: offer validated, waiting for the local user to answer.
    Negotiating { received_at: DateTime<Utc> },
    /// Both sides agreed on the session.
    Active { connected_at: DateTime<Utc> },
    Terminated {
        reason: Reason,
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    },
}

impl CallState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::Ringing { .. })
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }

    pub fn can_accept(&self) -> bool {
        matches!(self, Self::Negotiating { .. })
    }

    pub fn reason(&self) -> Option<Reason> {
        match self {
            Self::Terminated { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Compute the state reached by applying `transition`.
    pub fn apply(&self, transition: CallTransition) -> Result<CallState, InvalidTransition> {
        let next = match (self, transition) {
            (Self::Invited { .. }, CallTransition::RemoteRinging) => Self::Ringing {
                ringing_at: Utc::now(),
            },
            (Self::Invited { .. } | Self::Ringing { .. }, CallTransition::RemoteAccepted) => {
                Self::Active {
                    connected_at: Utc::now(),
                }
            }
            (Self::Negotiating { .. }, CallTransition::LocalAccepted) => Self::Active {
                connected_at: Utc::now(),
            },
            (Self::Active { connected_at }, CallTransition::Terminated { reason }) => {
                let duration = Utc::now().signed_duration_since(*connected_at).num_seconds();
                Self::Terminated {
                    reason,
                    ended_at: Utc::now(),
                    duration_secs: Some(duration),
                }
            }
            (
                Self::Invited { .. } | Self::Ringing { .. } | Self::Negotiating { .. },
                CallTransition::Terminated { reason },
            ) => Self::Terminated {
                reason,
                ended_at: Utc::now(),
                duration_secs: None,
            },
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        Ok(next)
    }
}

/// State transitions for calls.
#[derive(Debug, Clone, Copy)]
pub enum CallTransition {
    RemoteRinging,
    RemoteAccepted,
    LocalAccepted,
    Terminated { reason: Reason },
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
