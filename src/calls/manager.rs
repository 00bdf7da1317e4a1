//! Call manager: entry point for one-to-one calls and Muji group sessions.

use super::call::PeerCall;
use super::context::CallContext;
use super::error::CallError;
use super::handler::{JingleIqHandler, PresenceHandler};
use super::media::{DefaultMediaBackend, MediaBackend};
use super::muji::{MujiCoordinator, PrepareState, PrepareToken};
use super::registry::CallRegistry;
use super::state::CallDirection;
use super::transport::TransportConfig;
use crate::handlers::router::StanzaRouter;
use crate::send::{SendError, StanzaSender};
use crate::types::events::{EventBus, GroupParticipantsPrepared};
use callcore::{
    ContentCreator, ContentDescriptor, Iq, IqType, JingleAction, Jid, MujiPayload, Presence, Reason,
    Sid, Stanza,
};
use log::{debug, info, warn};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Configuration for the call manager.
#[derive(Debug, Clone)]
pub struct CallManagerConfig {
    /// Our own full address.
    pub local_jid: Jid,
    /// STUN/TURN settings handed to every new media stream.
    pub transport: TransportConfig,
    /// Buffer size of each event channel.
    pub event_capacity: usize,
}

impl CallManagerConfig {
    pub fn new(local_jid: Jid) -> Self {
        Self {
            local_jid,
            ..Default::default()
        }
    }
}

impl Default for CallManagerConfig {
    fn default() -> Self {
        Self {
            local_jid: Jid::default(),
            transport: TransportConfig::default(),
            event_capacity: 100,
        }
    }
}

/// Orchestrates call lifecycle and group-session negotiation.
///
/// Feed it every inbound stanza through [`CallManager::handle_stanza`] and
/// tell it when the connection drops with [`CallManager::handle_disconnected`].
pub struct CallManager {
    ctx: Arc<CallContext>,
    /// Never held across an await point.
    muji: Mutex<MujiCoordinator>,
    router: StanzaRouter,
}

/// Retires a preparation when `prepare` returns or its future is dropped.
struct PendingPrepare<'a> {
    muji: &'a Mutex<MujiCoordinator>,
    token: PrepareToken,
    succeeded: bool,
}

impl Drop for PendingPrepare<'_> {
    fn drop(&mut self) {
        let state = self
            .muji
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish(self.token, self.succeeded);
        debug!("Preparation {:?} retired as {:?}", self.token, state);
    }
}

impl std::fmt::Debug for CallManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallManager")
            .field("local_jid", &self.ctx.local_jid)
            .field("calls", &self.ctx.registry.len())
            .finish()
    }
}

impl CallManager {
    pub fn new(config: CallManagerConfig, sender: Arc<dyn StanzaSender>) -> Arc<Self> {
        Self::with_media_backend(config, sender, Arc::new(DefaultMediaBackend))
    }

    pub fn with_media_backend(
        config: CallManagerConfig,
        sender: Arc<dyn StanzaSender>,
        media: Arc<dyn MediaBackend>,
    ) -> Arc<Self> {
        let events = Arc::new(EventBus::with_capacity(config.event_capacity));
        let ctx = Arc::new(CallContext::new(
            config.local_jid,
            sender,
            events,
            media,
            config.transport,
        ));

        let mut router = StanzaRouter::new();
        router.register(Arc::new(JingleIqHandler));
        router.register(Arc::new(PresenceHandler));

        Arc::new(Self {
            ctx,
            muji: Mutex::new(MujiCoordinator::new()),
            router,
        })
    }

    fn muji(&self) -> MutexGuard<'_, MujiCoordinator> {
        self.muji.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_jid(&self) -> &Jid {
        &self.ctx.local_jid
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.ctx.registry
    }

    pub fn find_call(&self, sid: &Sid) -> Option<Arc<PeerCall>> {
        self.ctx.registry.find(sid)
    }

    /// Service discovery features to advertise for this client.
    pub fn discovery_features(&self) -> &'static [&'static str] {
        &callcore::ns::CALL_FEATURES
    }

    pub async fn transport(&self) -> TransportConfig {
        self.ctx.transport.read().await.clone()
    }

    pub async fn set_stun_servers(&self, servers: Vec<(IpAddr, u16)>) {
        self.ctx.transport.write().await.set_stun_servers(servers);
    }

    pub async fn set_stun_server(&self, host: IpAddr, port: u16) {
        self.ctx.transport.write().await.set_stun_server(host, port);
    }

    pub async fn set_turn_server(&self, host: IpAddr, port: u16) {
        self.ctx.transport.write().await.set_turn_server(host, port);
    }

    pub async fn set_turn_user(&self, user: &str) {
        self.ctx.transport.write().await.set_turn_user(user);
    }

    pub async fn set_turn_password(&self, password: &str) {
        self.ctx.transport.write().await.set_turn_password(password);
    }

    /// Start an audio call to `to`.
    ///
    /// The returned handle owns the call: dropping every handle ends its
    /// registration.
    pub async fn call(&self, to: &Jid) -> Result<Arc<PeerCall>, CallError> {
        if to.is_empty() {
            warn!("Refusing to call an empty address");
            return Err(CallError::InvalidTarget(String::new()));
        }
        let local = &self.ctx.local_jid;
        if to == local || *to == local.to_bare() {
            warn!("Refusing to call ourselves ({})", to);
            return Err(CallError::InvalidTarget(to.to_string()));
        }

        let sid = loop {
            let sid = Sid::generate();
            if !self.ctx.registry.contains(&sid) {
                break sid;
            }
        };

        let config = self.transport().await;
        let mut call = PeerCall::new(self.ctx.clone(), to.clone(), CallDirection::Outgoing, sid);
        if !call.add_stream("audio", ContentCreator::Initiator, "microphone", &config) {
            return Err(CallError::UnsupportedMedia("audio".to_string()));
        }
        let call = Arc::new(call);
        self.ctx.registry.register(&call);

        if let Err(e) = call.send_invite().await {
            warn!("Failed to send session-initiate for call {}: {}", call.sid(), e);
            call.close();
            return Err(e.into());
        }

        info!("Started call {} to {}", call.sid(), to);
        let _ = self.ctx.events.call_started.send(call.clone());
        Ok(call)
    }

    /// Route an inbound stanza to the matching handler.
    pub async fn handle_stanza(self: &Arc<Self>, stanza: &Stanza) -> bool {
        self.router.dispatch(self.clone(), stanza).await
    }

    pub(crate) async fn handle_iq(&self, iq: &Iq) -> bool {
        match iq.kind {
            IqType::Result | IqType::Error => {
                if iq.kind == IqType::Error {
                    debug!("Error response {} from {}", iq.id, iq.from);
                }
                let mut matched = false;
                for call in self.ctx.registry.active() {
                    matched |= call.handle_ack(iq).await;
                }
                matched
            }
            IqType::Set => {
                let Some(jingle) = iq.jingle.as_ref() else {
                    return false;
                };
                if jingle.action == JingleAction::SessionInitiate {
                    self.handle_session_initiate(iq).await
                } else {
                    match self.ctx.registry.find(&jingle.sid) {
                        Some(call) => {
                            call.handle_request(iq).await;
                            true
                        }
                        None => {
                            warn!(
                                "Dropping {} for unknown session {} from {}",
                                jingle.action, jingle.sid, iq.from
                            );
                            false
                        }
                    }
                }
            }
            IqType::Get => false,
        }
    }

    async fn handle_session_initiate(&self, iq: &Iq) -> bool {
        let Some(jingle) = iq.jingle.as_ref() else {
            return false;
        };
        if self
            .ctx
            .registry
            .find_with_direction(&jingle.sid, CallDirection::Incoming)
            .is_some()
        {
            warn!("Duplicate session-initiate for {} from {}", jingle.sid, iq.from);
            return false;
        }

        let content = jingle.contents.first().cloned().unwrap_or_default();
        let config = self.transport().await;
        let mut call = PeerCall::new(
            self.ctx.clone(),
            iq.from.clone(),
            CallDirection::Incoming,
            jingle.sid.clone(),
        );
        if !call.add_stream(&content.media, content.creator, &content.name, &config) {
            debug!(
                "Ignoring call {} from {}: cannot handle media '{}'",
                jingle.sid, iq.from, content.media
            );
            return false;
        }
        let call = Arc::new(call);

        if let Err(e) = call.send_ack(iq).await {
            warn!("Failed to acknowledge session-initiate {}: {}", jingle.sid, e);
        }

        if !call.handle_offer(&content).await {
            warn!("Rejecting call {} from {}: unusable offer", jingle.sid, iq.from);
            if let Err(e) = call.terminate(Reason::FailedApplication).await {
                debug!("Call {}: {}", jingle.sid, e);
            }
            return true;
        }

        self.ctx.registry.register(&call);
        if let Err(e) = call.send_ringing().await {
            warn!("Failed to send ringing for call {}: {}", jingle.sid, e);
        }

        info!("Incoming call {} from {}", jingle.sid, iq.from);
        if self.ctx.events.call_received.send(call).is_err() {
            debug!("Nobody took incoming call {}", jingle.sid);
        }
        true
    }

    /// The connection is gone: end every call and fail pending preparations.
    pub async fn handle_disconnected(&self) {
        let calls = self.ctx.registry.active();
        if !calls.is_empty() {
            info!("Disconnected, terminating {} calls", calls.len());
        }
        for call in calls {
            call.terminate_locally(Reason::Gone).await;
        }

        let failed = self.muji().fail_pending(SendError::ConnectionLost);
        if failed > 0 {
            debug!("Failed {} pending group preparations", failed);
        }
    }

    pub(crate) async fn handle_presence(&self, presence: &Presence) -> bool {
        let converged = self.muji().observe(presence, &self.ctx.local_jid);
        if let Some(group) = converged {
            info!("All participants of {} are prepared", group);
            let _ = self
                .ctx
                .events
                .group_participants_prepared
                .send(Arc::new(GroupParticipantsPrepared { group }));
        }

        if presence.is_unavailable() {
            for call in self.ctx.registry.active() {
                if call.remote() == &presence.from {
                    debug!("Peer {} went away, ending call {}", presence.from, call.sid());
                    if let Err(e) = call.terminate(Reason::Gone).await {
                        debug!("Call {}: {}", call.sid(), e);
                    }
                }
            }
        }
        true
    }

    /// Register one of our occupant addresses in a group so presence
    /// reflected from it is recognised as our own.
    pub async fn set_group_occupant(&self, occupant: Jid) {
        self.muji().add_own_occupant(occupant);
    }

    pub async fn group_contents(&self, group: &Jid) -> Vec<ContentDescriptor> {
        self.muji()
            .group(group)
            .map(|session| session.contents().to_vec())
            .unwrap_or_default()
    }

    pub async fn prepare_states(&self, group: &Jid) -> Vec<PrepareState> {
        self.muji().prepare_states(group)
    }

    /// Run one two-round negotiation for `group`.
    ///
    /// Announces that we are preparing, waits until our announcement has come
    /// back from the group and every known participant has published its
    /// contents, then applies `mutate` to the group's content list and the
    /// outgoing presence and sends it. Resolves with the outcome of the last
    /// send; a failed first send ends the negotiation right away. Losing the
    /// connection while waiting resolves with [`SendError::ConnectionLost`].
    ///
    /// Dropping the returned future abandons the preparation.
    pub async fn prepare<F>(&self, group: &Jid, mutate: F) -> Result<(), SendError>
    where
        F: FnOnce(&mut Vec<ContentDescriptor>, &mut Presence) + Send,
    {
        let token = self.muji().begin(group);
        let mut pending = PendingPrepare {
            muji: &self.muji,
            token,
            succeeded: false,
        };

        let preparing = Presence {
            from: self.ctx.local_jid.clone(),
            ..Presence::to(group.clone()).with_muji(MujiPayload::preparing())
        };
        if let Err(e) = self.ctx.sender.send(preparing.into()).await {
            warn!("Failed to announce preparation in {}: {}", group, e);
            return Err(e);
        }

        let converged = self.muji().await_convergence(token);
        let outcome = match converged {
            Some(rx) => rx.await.unwrap_or(Err(SendError::ConnectionLost)),
            None => Err(SendError::ConnectionLost),
        };
        if let Err(e) = outcome {
            debug!("Preparation in {} aborted: {}", group, e);
            return Err(e);
        }

        let presence = self.muji().second_round(token, mutate);
        let Some(mut presence) = presence else {
            return Err(SendError::ConnectionLost);
        };
        presence.from = self.ctx.local_jid.clone();

        let result = self.ctx.sender.send(presence.into()).await;
        if let Err(e) = &result {
            warn!("Failed to publish contents in {}: {}", group, e);
        }
        pending.succeeded = result.is_ok();
        result
    }

    /// Add `content` to the group's content list.
    pub async fn add_content(&self, group: &Jid, content: ContentDescriptor) -> Result<(), SendError> {
        self.prepare(group, move |contents, presence| {
            contents.push(content);
            presence.muji = MujiPayload::ready(contents.clone());
        })
        .await
    }

    /// Remove the first content matching `creator` and `name`. Missing
    /// entries are not an error.
    pub async fn remove_content(
        &self,
        group: &Jid,
        creator: ContentCreator,
        name: &str,
    ) -> Result<(), SendError> {
        let name = name.to_string();
        self.prepare(group, move |contents, presence| {
            if let Some(pos) = contents
                .iter()
                .position(|c| c.creator == creator && c.name == name)
            {
                contents.remove(pos);
            }
            presence.muji = MujiPayload::ready(contents.clone());
        })
        .await
    }

    /// Join the group call with one audio and one video content.
    pub async fn start_group_call(&self, group: &Jid) -> Result<(), SendError> {
        let config = self.transport().await;
        let ctx = self.ctx.clone();
        let group_jid = group.clone();
        self.prepare(group, move |contents, presence| {
            // Never registered; only used to produce local offers.
            let mut call = PeerCall::new(ctx, group_jid, CallDirection::Outgoing, Sid::generate());
            call.add_stream("audio", ContentCreator::Initiator, "microphone", &config);
            call.add_stream("video", ContentCreator::Initiator, "camera", &config);
            *contents = call.local_contents_mut();
            presence.muji = MujiPayload::ready(contents.clone());
        })
        .await
    }

    /// Leave the group call. Sent at once, without a preparing round.
    pub async fn end_group_call(&self, group: &Jid) -> Result<(), SendError> {
        self.muji().clear_contents(group);
        let presence = Presence {
            from: self.ctx.local_jid.clone(),
            ..Presence::to(group.clone()).with_muji(MujiPayload::ready(Vec::new()))
        };
        self.ctx.sender.send(presence.into()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::send::ChannelSender;
    use callcore::{JingleIq, MediaKind, PresenceType};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn alice() -> Jid {
        "alice@example.com/laptop".parse().unwrap()
    }

    fn bob() -> Jid {
        "bob@example.com/phone".parse().unwrap()
    }

    fn room() -> Jid {
        "room@conf.example.com".parse().unwrap()
    }

    fn manager() -> (Arc<CallManager>, UnboundedReceiver<Stanza>) {
        let (sender, rx) = ChannelSender::new();
        (
            CallManager::new(CallManagerConfig::new(alice()), Arc::new(sender)),
            rx,
        )
    }

    async fn next_iq(rx: &mut UnboundedReceiver<Stanza>) -> Iq {
        match rx.recv().await {
            Some(Stanza::Iq(iq)) => iq,
            other => panic!("expected iq, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_rejects_bare_self() {
        let (manager, mut rx) = manager();
        let result = manager.call(&alice().to_bare()).await;
        assert!(matches!(result, Err(CallError::InvalidTarget(_))));
        assert!(manager.registry().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_call_generates_distinct_sids() {
        let (manager, _rx) = manager();
        let first = manager.call(&bob()).await.unwrap();
        let second = manager.call(&bob()).await.unwrap();
        assert_ne!(first.sid(), second.sid());
        assert_eq!(manager.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_invite_send_failure_is_reported() {
        let (manager, rx) = manager();
        let mut started = manager.events().call_started.subscribe();
        drop(rx);
        assert!(matches!(
            manager.call(&bob()).await,
            Err(CallError::Send(SendError::NotConnected))
        ));
        assert!(manager.registry().is_empty());
        assert!(started.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_call_started_after_invite_is_sent() {
        let (manager, mut rx) = manager();
        let mut started = manager.events().call_started.subscribe();
        let call = manager.call(&bob()).await.unwrap();
        assert_eq!(
            next_iq(&mut rx).await.jingle.unwrap().action,
            JingleAction::SessionInitiate
        );
        assert_eq!(started.try_recv().unwrap().sid(), call.sid());
    }

    #[tokio::test]
    async fn test_remote_ringing_and_accept() {
        let (manager, mut rx) = manager();
        let call = manager.call(&bob()).await.unwrap();
        let invite = next_iq(&mut rx).await;
        let offered = invite.jingle.as_ref().unwrap().contents[0].clone();

        let mut ringing = Iq::set(
            "r1",
            alice(),
            JingleIq::new(JingleAction::SessionInfo, call.sid().clone()).ringing(),
        );
        ringing.from = bob();
        assert!(manager.handle_iq(&ringing).await);
        assert!(call.state().await.is_ringing());
        assert_eq!(next_iq(&mut rx).await.kind, IqType::Result);

        let mut accept = Iq::set(
            "a1",
            alice(),
            JingleIq::new(JingleAction::SessionAccept, call.sid().clone())
                .with_contents(vec![offered]),
        );
        accept.from = bob();
        assert!(manager.handle_iq(&accept).await);
        assert!(call.state().await.is_active());
    }

    #[tokio::test]
    async fn test_unusable_answer_fails_application() {
        let (manager, mut rx) = manager();
        let call = manager.call(&bob()).await.unwrap();
        let _invite = next_iq(&mut rx).await;

        let mut video =
            ContentDescriptor::new(ContentCreator::Initiator, "microphone", MediaKind::Video);
        video.payload_types = DefaultMediaBackend.payload_types(MediaKind::Video);
        let mut accept = Iq::set(
            "a1",
            alice(),
            JingleIq::new(JingleAction::SessionAccept, call.sid().clone())
                .with_contents(vec![video]),
        );
        accept.from = bob();
        manager.handle_iq(&accept).await;

        assert_eq!(
            call.termination_reason().await,
            Some(Reason::FailedApplication)
        );
    }

    #[tokio::test]
    async fn test_peer_unavailable_ends_call_with_gone() {
        let (manager, mut rx) = manager();
        let call = manager.call(&bob()).await.unwrap();
        let _invite = next_iq(&mut rx).await;

        let gone = Presence {
            from: bob(),
            to: alice(),
            kind: PresenceType::Unavailable,
            ..Default::default()
        };
        manager.handle_presence(&gone).await;
        assert_eq!(call.termination_reason().await, Some(Reason::Gone));

        let terminate = next_iq(&mut rx).await;
        assert_eq!(
            terminate.jingle.unwrap().action,
            JingleAction::SessionTerminate
        );
    }

    #[tokio::test]
    async fn test_transport_setters_feed_new_calls() {
        let (manager, _rx) = manager();
        let stun: IpAddr = "192.0.2.1".parse().unwrap();
        manager
            .set_stun_server(stun, super::super::transport::DEFAULT_STUN_PORT)
            .await;
        manager.set_turn_server("192.0.2.2".parse().unwrap(), 3478).await;
        manager.set_turn_user("alice").await;
        manager.set_turn_password("secret").await;

        let call = manager.call(&bob()).await.unwrap();
        let streams = call.streams().await;
        assert_eq!(streams[0].stun_servers, vec![(stun, 3478)]);
        assert!(streams[0].turn_server.is_some());
        assert_eq!(manager.transport().await.turn_user, "alice");
    }

    #[tokio::test]
    async fn test_end_group_call_sends_empty_contents() {
        let (manager, mut rx) = manager();
        manager.end_group_call(&room()).await.unwrap();
        let Some(Stanza::Presence(presence)) = rx.recv().await else {
            panic!("expected presence");
        };
        assert_eq!(presence.to, room());
        assert_eq!(presence.from, alice());
        assert!(!presence.muji.preparing);
        assert!(presence.muji.contents.is_empty());
        assert!(manager.group_contents(&room()).await.is_empty());
    }

    #[tokio::test]
    async fn test_prepare_fails_fast_when_first_send_fails() {
        let (manager, rx) = manager();
        drop(rx);
        let mut mutated = false;
        let result = manager
            .prepare(&room(), |_, _| {
                mutated = true;
            })
            .await;
        assert_eq!(result, Err(SendError::NotConnected));
        assert!(!mutated);
        assert!(manager.prepare_states(&room()).await.is_empty());
    }

    #[test]
    fn test_discovery_features() {
        let (manager, _rx) = manager();
        assert!(manager.discovery_features().contains(&callcore::ns::JINGLE));
        assert!(
            manager
                .discovery_features()
                .contains(&callcore::ns::JINGLE_ICE_UDP)
        );
    }
}
