//! Call-related error types.

use crate::send::SendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("invalid call target: {0}")]
    InvalidTarget(String),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("failed to send call stanza: {0}")]
    Send(#[from] SendError),
}
