use super::traits::StanzaHandler;
use crate::calls::CallManager;
use callcore::Stanza;
use std::collections::HashMap;
use std::sync::Arc;

/// Central router for dispatching stanzas to their handlers by tag.
pub struct StanzaRouter {
    handlers: HashMap<&'static str, Arc<dyn StanzaHandler>>,
}

impl StanzaRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for its tag.
    ///
    /// # Panics
    /// Panics if a handler is already registered for the same tag to prevent
    /// accidental overwrites during initialization.
    pub fn register(&mut self, handler: Arc<dyn StanzaHandler>) {
        let tag = handler.tag();
        if self.handlers.insert(tag, handler).is_some() {
            panic!("Handler for tag '{}' already registered", tag);
        }
    }

    /// Dispatch a stanza to its handler.
    ///
    /// Returns `false` if no handler is registered for the stanza's tag or the
    /// handler did not consume it.
    pub async fn dispatch(&self, manager: Arc<CallManager>, stanza: &Stanza) -> bool {
        match self.handlers.get(stanza.tag()) {
            Some(handler) => handler.handle(manager, stanza).await,
            None => false,
        }
    }

    /// Get the number of registered handlers (useful for testing).
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for StanzaRouter {
    fn default() -> Self {
        Self::new()
    }
}
