use crate::calls::CallManager;
use async_trait::async_trait;
use callcore::Stanza;
use std::sync::Arc;

/// Trait for handling one kind of inbound stanza.
///
/// Each handler is responsible for a single top-level stanza tag ("iq",
/// "presence"). New stanza kinds are supported by registering another handler
/// rather than growing the manager's dispatch logic.
#[async_trait]
pub trait StanzaHandler: Send + Sync {
    /// Returns the stanza tag this handler is responsible for.
    fn tag(&self) -> &'static str;

    /// Asynchronously handle the incoming stanza.
    ///
    /// Returns `true` if the stanza was consumed, `false` if it was not meant
    /// for this handler or was dropped.
    async fn handle(&self, manager: Arc<CallManager>, stanza: &Stanza) -> bool;
}
