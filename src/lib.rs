// Re-export the wire model so applications only need one dependency
pub use callcore;

// Events (with EventBus) live here since they carry runtime call handles
pub mod types {
    pub mod events;
}

pub mod calls;
pub mod handlers;
pub mod send;

pub use calls::{CallError, CallManager, CallManagerConfig, PeerCall};
pub use send::{ChannelSender, SendError, StanzaSender};
