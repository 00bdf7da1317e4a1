//! Muji (XEP-0272) group-session payloads.

use crate::jingle::ContentDescriptor;
use serde::{Deserialize, Serialize};

/// The `<muji/>` element a presence carries into a group conversation.
///
/// A set `preparing` flag announces that the sender is about to negotiate.
/// A non-empty `contents` list announces the contents the sender is ready
/// to take part in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MujiPayload {
    pub preparing: bool,
    pub contents: Vec<ContentDescriptor>,
}

impl MujiPayload {
    pub fn preparing() -> Self {
        Self {
            preparing: true,
            contents: Vec::new(),
        }
    }

    pub fn ready(contents: Vec<ContentDescriptor>) -> Self {
        Self {
            preparing: false,
            contents,
        }
    }
}

/// Negotiation state of one remote participant of a group session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantState {
    /// Announced intent to negotiate, contents not yet published.
    Preparing,
    /// Published the contents it supports.
    Ready(Vec<ContentDescriptor>),
}

impl ParticipantState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn contents(&self) -> &[ContentDescriptor] {
        match self {
            Self::Preparing => &[],
            Self::Ready(contents) => contents,
        }
    }
}
