//! Jingle call signaling and Muji group-session negotiation.
//!
//! # Architecture
//!
//! - [`CallManager`]: entry point; creates calls and routes inbound stanzas
//! - [`PeerCall`]: one one-to-one call and its negotiation
//! - [`CallState`]: call state machine
//! - [`CallRegistry`]: non-owning index of live calls by session id
//! - [`MujiCoordinator`]: participant tracking and two-round preparation for
//!   group sessions
//! - [`TransportConfig`]: STUN/TURN settings for new media streams
//! - [`MediaBackend`]: seam to the media engine

mod call;
mod context;
mod error;
mod handler;
mod manager;
mod media;
mod muji;
mod registry;
mod state;
mod transport;

pub use call::PeerCall;
pub use error::CallError;
pub use handler::{JingleIqHandler, PresenceHandler};
pub use manager::{CallManager, CallManagerConfig};
pub use media::{ContentStream, DefaultMediaBackend, MediaBackend, create_stream};
pub use muji::{GroupSession, MujiCoordinator, PrepareState, PrepareToken};
pub use registry::CallRegistry;
pub use state::{CallDirection, CallState, CallTransition, InvalidTransition};
pub use transport::{DEFAULT_STUN_PORT, TransportConfig};
