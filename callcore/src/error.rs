use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid jid: {0}")]
    InvalidJid(String),

    #[error("unknown jingle action: {0}")]
    UnknownAction(String),

    #[error("unknown termination reason: {0}")]
    UnknownReason(String),

    #[error("unknown content creator: {0}")]
    UnknownCreator(String),

    #[error("unsupported media kind: {0}")]
    UnsupportedMedia(String),
}
