//! Platform-agnostic data model for Jingle calls and Muji group sessions.
//!
//! Nothing in this crate performs I/O. The runtime crate owns the sockets,
//! the event loop and the call state; this crate only describes what travels
//! on the wire and the values the negotiation logic reasons about.

pub mod error;
pub mod jid;
pub mod jingle;
pub mod muji;
pub mod ns;
pub mod stanza;

pub use error::Error;
pub use jid::Jid;
pub use jingle::{
    Candidate, CandidateKind, ContentCreator, ContentDescriptor, IceTransport, JingleAction, JingleIq, MediaKind,
    PayloadType, Reason, Sid,
};
pub use muji::{MujiPayload, ParticipantState};
pub use stanza::{Iq, IqType, Presence, PresenceType, Stanza};
