use super::media::MediaBackend;
use super::registry::CallRegistry;
use super::transport::TransportConfig;
use crate::send::{RequestIds, StanzaSender};
use crate::types::events::EventBus;
use callcore::Jid;
use std::sync::Arc;
use tokio::sync::RwLock;

/// State shared between the call manager and every call it creates.
pub(crate) struct CallContext {
    pub local_jid: Jid,
    pub sender: Arc<dyn StanzaSender>,
    pub events: Arc<EventBus>,
    pub registry: CallRegistry,
    pub media: Arc<dyn MediaBackend>,
    pub transport: RwLock<TransportConfig>,
    pub request_ids: RequestIds,
}

impl CallContext {
    pub(crate) fn new(
        local_jid: Jid,
        sender: Arc<dyn StanzaSender>,
        events: Arc<EventBus>,
        media: Arc<dyn MediaBackend>,
        transport: TransportConfig,
    ) -> Self {
        Self {
            local_jid,
            sender,
            events,
            registry: CallRegistry::new(),
            media,
            transport: RwLock::new(transport),
            request_ids: RequestIds::new(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> Arc<CallContext> {
    test_context_with_outbox().0
}

/// Test context whose outgoing stanzas can be read back.
#[cfg(test)]
pub(crate) fn test_context_with_outbox() -> (
    Arc<CallContext>,
    tokio::sync::mpsc::UnboundedReceiver<callcore::Stanza>,
) {
    use super::media::DefaultMediaBackend;
    use crate::send::ChannelSender;

    let (sender, rx) = ChannelSender::new();
    let ctx = Arc::new(CallContext::new(
        Jid::new("alice", "example.com").with_resource("laptop"),
        Arc::new(sender),
        Arc::new(EventBus::new()),
        Arc::new(DefaultMediaBackend),
        TransportConfig::default(),
    ));
    (ctx, rx)
}
