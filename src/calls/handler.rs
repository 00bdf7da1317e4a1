//! Stanza handlers feeding the call manager.

use super::manager::CallManager;
use crate::handlers::traits::StanzaHandler;
use async_trait::async_trait;
use callcore::Stanza;
use log::debug;
use std::sync::Arc;

/// Handler for Jingle `<iq>` requests and the results answering ours.
#[derive(Debug, Default)]
pub struct JingleIqHandler;

#[async_trait]
impl StanzaHandler for JingleIqHandler {
    fn tag(&self) -> &'static str {
        "iq"
    }

    async fn handle(&self, manager: Arc<CallManager>, stanza: &Stanza) -> bool {
        let Stanza::Iq(iq) = stanza else {
            return false;
        };
        if let Some(jingle) = &iq.jingle {
            debug!("Received {} for {} from {}", jingle.action, jingle.sid, iq.from);
        }
        manager.handle_iq(iq).await
    }
}

/// Handler for `<presence>`: Muji state and peers going offline.
#[derive(Debug, Default)]
pub struct PresenceHandler;

#[async_trait]
impl StanzaHandler for PresenceHandler {
    fn tag(&self) -> &'static str {
        "presence"
    }

    async fn handle(&self, manager: Arc<CallManager>, stanza: &Stanza) -> bool {
        match stanza {
            Stanza::Presence(presence) => manager.handle_presence(presence).await,
            _ => false,
        }
    }
}
