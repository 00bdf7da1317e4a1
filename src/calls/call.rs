//! A single one-to-one Jingle call.

use super::context::CallContext;
use super::error::CallError;
use super::media::{self, ContentStream};
use super::state::{CallDirection, CallState, CallTransition};
use super::transport::TransportConfig;
use crate::send::SendError;
use crate::types::events::{CallEnded, CallStateChanged};
use callcore::{ContentCreator, ContentDescriptor, Iq, JingleAction, JingleIq, Jid, Reason, Sid};
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

struct CallInner {
    state: CallState,
    streams: Vec<ContentStream>,
    /// Requests we sent and whose acknowledgement is still pending, by id.
    outstanding: HashMap<String, JingleAction>,
}

/// Handle to one call.
///
/// The registry only indexes calls; the call stays alive as long as a handle
/// is held somewhere. Dropping the last handle (or calling [`PeerCall::close`])
/// removes it from the registry.
pub struct PeerCall {
    sid: Sid,
    direction: CallDirection,
    remote: Jid,
    ctx: Arc<CallContext>,
    inner: Mutex<CallInner>,
}

impl std::fmt::Debug for PeerCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerCall")
            .field("sid", &self.sid)
            .field("direction", &self.direction)
            .field("remote", &self.remote)
            .finish()
    }
}

impl PeerCall {
    pub(crate) fn new(
        ctx: Arc<CallContext>,
        remote: Jid,
        direction: CallDirection,
        sid: Sid,
    ) -> Self {
        let state = match direction {
            CallDirection::Outgoing => CallState::Invited {
                sent_at: Utc::now(),
            },
            CallDirection::Incoming => CallState::Negotiating {
                received_at: Utc::now(),
            },
        };
        Self {
            sid,
            direction,
            remote,
            ctx,
            inner: Mutex::new(CallInner {
                state,
                streams: Vec::new(),
                outstanding: HashMap::new(),
            }),
        }
    }

    pub fn sid(&self) -> &Sid {
        &self.sid
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    /// Address of the other party.
    pub fn remote(&self) -> &Jid {
        &self.remote
    }

    pub async fn state(&self) -> CallState {
        self.inner.lock().await.state.clone()
    }

    pub async fn streams(&self) -> Vec<ContentStream> {
        self.inner.lock().await.streams.clone()
    }

    pub async fn termination_reason(&self) -> Option<Reason> {
        self.inner.lock().await.state.reason()
    }

    /// Answer an incoming call.
    pub async fn accept(&self) -> Result<(), CallError> {
        let contents = {
            let mut inner = self.inner.lock().await;
            if self.direction != CallDirection::Incoming || !inner.state.can_accept() {
                return Err(CallError::InvalidTransition(
                    super::state::InvalidTransition {
                        current_state: format!("{:?}", inner.state),
                        attempted: "LocalAccepted".to_string(),
                    },
                ));
            }
            inner.state = inner.state.apply(CallTransition::LocalAccepted)?;
            inner
                .streams
                .iter()
                .map(|s| s.local_content())
                .collect::<Vec<_>>()
        };
        self.notify_state().await;

        let mut accept = JingleIq::new(JingleAction::SessionAccept, self.sid.clone())
            .with_contents(contents);
        accept.responder = Some(self.ctx.local_jid.clone());
        self.send_request(accept).await?;
        info!("Accepted call {} from {}", self.sid, self.remote);
        Ok(())
    }

    /// End the call normally.
    pub async fn hangup(&self) -> Result<(), CallError> {
        self.terminate(Reason::Success).await
    }

    /// Drop this call from the registry. Stanzas for it are ignored afterwards.
    pub fn close(&self) {
        if self.ctx.registry.remove(self) {
            debug!("Call {} closed", self.sid);
        }
    }

    /// Add a stream before the call is shared.
    pub(crate) fn add_stream(
        &mut self,
        media: &str,
        creator: ContentCreator,
        name: &str,
        config: &TransportConfig,
    ) -> bool {
        match media::create_stream(self.ctx.media.as_ref(), media, creator, name, config) {
            Some(stream) => {
                self.inner.get_mut().streams.push(stream);
                true
            }
            None => false,
        }
    }

    pub(crate) fn local_contents_mut(&mut self) -> Vec<ContentDescriptor> {
        self.inner
            .get_mut()
            .streams
            .iter()
            .map(|s| s.local_content())
            .collect()
    }

    pub(crate) async fn send_invite(&self) -> Result<(), SendError> {
        let contents = self
            .inner
            .lock()
            .await
            .streams
            .iter()
            .map(|s| s.local_content())
            .collect();
        let mut initiate = JingleIq::new(JingleAction::SessionInitiate, self.sid.clone())
            .with_contents(contents);
        initiate.initiator = Some(self.ctx.local_jid.clone());
        self.send_request(initiate).await?;
        Ok(())
    }

    pub(crate) async fn send_ringing(&self) -> Result<(), SendError> {
        let ringing = JingleIq::new(JingleAction::SessionInfo, self.sid.clone()).ringing();
        self.send_request(ringing).await?;
        Ok(())
    }

    pub(crate) async fn send_ack(&self, request: &Iq) -> Result<(), SendError> {
        self.ctx.sender.send(Iq::result_for(request).into()).await
    }

    /// Send a Jingle request and remember it until it is acknowledged.
    async fn send_request(&self, jingle: JingleIq) -> Result<String, SendError> {
        let id = self.ctx.request_ids.next();
        let action = jingle.action;
        let mut iq = Iq::set(id.clone(), self.remote.clone(), jingle);
        iq.from = self.ctx.local_jid.clone();

        self.inner
            .lock()
            .await
            .outstanding
            .insert(id.clone(), action);

        if let Err(e) = self.ctx.sender.send(iq.into()).await {
            self.inner.lock().await.outstanding.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Validate the description and transport the peer offered for the
    /// stream with the same creator and name.
    pub(crate) async fn handle_offer(&self, content: &ContentDescriptor) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(stream) = inner
            .streams
            .iter_mut()
            .find(|s| s.creator == content.creator && s.name == content.name)
        else {
            return false;
        };
        stream.apply_description(content) && stream.apply_transport(content)
    }

    /// Terminate the call, telling the peer why.
    ///
    /// The call leaves the registry once the peer acknowledges the
    /// session-terminate, or right away if it cannot be sent.
    pub(crate) async fn terminate(&self, reason: Reason) -> Result<(), CallError> {
        if !self.finish(reason).await {
            return Ok(());
        }

        let jingle = JingleIq::new(JingleAction::SessionTerminate, self.sid.clone())
            .with_reason(reason);
        if let Err(e) = self.send_request(jingle).await {
            warn!("Failed to send session-terminate for call {}: {}", self.sid, e);
            self.close();
            return Err(e.into());
        }
        Ok(())
    }

    /// Terminate without sending anything, as when the connection is gone.
    pub(crate) async fn terminate_locally(&self, reason: Reason) {
        self.finish(reason).await;
        self.close();
    }

    /// Move to `Terminated` and announce it. Returns false if already there.
    async fn finish(&self, reason: Reason) -> bool {
        {
            let mut inner = self.inner.lock().await;
            if inner.state.is_terminated() {
                return false;
            }
            match inner.state.apply(CallTransition::Terminated { reason }) {
                Ok(next) => inner.state = next,
                Err(e) => {
                    warn!("Call {}: {}", self.sid, e);
                    return false;
                }
            }
        }
        info!("Call {} with {} terminated ({})", self.sid, self.remote, reason);
        self.notify_state().await;
        let _ = self.ctx.events.call_ended.send(Arc::new(CallEnded {
            sid: self.sid.clone(),
            direction: self.direction,
            remote: self.remote.clone(),
            reason,
        }));
        true
    }

    async fn transition(&self, transition: CallTransition) -> bool {
        {
            let mut inner = self.inner.lock().await;
            match inner.state.apply(transition) {
                Ok(next) => inner.state = next,
                Err(e) => {
                    debug!("Call {}: ignoring {}", self.sid, e);
                    return false;
                }
            }
        }
        self.notify_state().await;
        true
    }

    async fn notify_state(&self) {
        let state = self.inner.lock().await.state.clone();
        let _ = self
            .ctx
            .events
            .call_state_changed
            .send(Arc::new(CallStateChanged {
                sid: self.sid.clone(),
                direction: self.direction,
                state,
            }));
    }

    /// Handle a Jingle request routed to this call by session id.
    pub(crate) async fn handle_request(&self, iq: &Iq) {
        let Some(jingle) = iq.jingle.as_ref() else {
            return;
        };

        if let Err(e) = self.send_ack(iq).await {
            warn!("Failed to acknowledge {} for call {}: {}", jingle.action, self.sid, e);
        }

        match jingle.action {
            JingleAction::SessionAccept => self.handle_session_accept(jingle).await,
            JingleAction::SessionInfo => {
                if jingle.ringing && self.direction == CallDirection::Outgoing {
                    debug!("Call {}: remote party is ringing", self.sid);
                    self.transition(CallTransition::RemoteRinging).await;
                }
            }
            JingleAction::SessionTerminate => {
                let reason = jingle.reason.unwrap_or(Reason::Success);
                debug!("Call {} terminated by {} ({})", self.sid, self.remote, reason);
                self.finish(reason).await;
                self.close();
            }
            JingleAction::TransportInfo => {
                let mut inner = self.inner.lock().await;
                for content in &jingle.contents {
                    let Some(transport) = &content.transport else {
                        continue;
                    };
                    match inner
                        .streams
                        .iter_mut()
                        .find(|s| s.creator == content.creator && s.name == content.name)
                    {
                        Some(stream) => stream.add_remote_candidates(&transport.candidates),
                        None => debug!(
                            "Call {}: transport-info for unknown content {}",
                            self.sid, content.name
                        ),
                    }
                }
            }
            other => {
                debug!("Call {}: unhandled jingle action {}", self.sid, other);
            }
        }
    }

    async fn handle_session_accept(&self, jingle: &JingleIq) {
        if self.direction != CallDirection::Outgoing {
            warn!("Call {}: session-accept for an incoming call", self.sid);
            return;
        }

        let content = jingle.contents.first().cloned().unwrap_or_default();
        if !self.handle_offer(&content).await {
            warn!("Call {}: unusable answer from {}", self.sid, self.remote);
            if let Err(e) = self.terminate(Reason::FailedApplication).await {
                debug!("Call {}: {}", self.sid, e);
            }
            return;
        }

        if self.transition(CallTransition::RemoteAccepted).await {
            info!("Call {} accepted by {}", self.sid, self.remote);
        }
    }

    /// Offer an acknowledgement to this call. Returns true if it answered one
    /// of our outstanding requests.
    pub(crate) async fn handle_ack(&self, ack: &Iq) -> bool {
        let Some(action) = self.inner.lock().await.outstanding.remove(&ack.id) else {
            return false;
        };

        debug!("Call {}: {} acknowledged", self.sid, action);
        if action == JingleAction::SessionTerminate {
            self.close();
        }
        true
    }
}

impl Drop for PeerCall {
    fn drop(&mut self) {
        self.ctx.registry.remove(self);
    }
}
