use crate::calls::{CallDirection, CallState, PeerCall};
use callcore::{Jid, Reason, Sid};
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// A call reached its terminated state.
#[derive(Debug, Clone)]
pub struct CallEnded {
    pub sid: Sid,
    pub direction: CallDirection,
    pub remote: Jid,
    pub reason: Reason,
}

#[derive(Debug, Clone)]
pub struct CallStateChanged {
    pub sid: Sid,
    pub direction: CallDirection,
    pub state: CallState,
}

/// Every known participant of a group session published its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupParticipantsPrepared {
    pub group: Jid,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus that provides separate broadcast channels for each event type.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self::with_capacity(CHANNEL_CAPACITY)
            }

            /// `capacity` is clamped to at least one slot per channel.
            pub fn with_capacity(capacity: usize) -> Self {
                let capacity = capacity.max(1);
                Self {
                    $(
                        $field: broadcast::channel(capacity).0,
                    )*
                }
            }
        }
    };
}

// Calls travel as strong handles: whoever receives `call_received` owns the
// incoming call from then on.
define_event_bus! {
    (call_received, Arc<PeerCall>),
    (call_started, Arc<PeerCall>),
    (call_state_changed, Arc<CallStateChanged>),
    (call_ended, Arc<CallEnded>),
    (group_participants_prepared, Arc<GroupParticipantsPrepared>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
