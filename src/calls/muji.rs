//! Muji group-session coordination.
//!
//! Participants of a group conversation negotiate a shared content list over
//! presence. Before changing the list, a participant broadcasts a presence
//! with the "preparing" flag; once every known participant has answered with
//! its contents, the change itself is broadcast. This module tracks those
//! participant states per group and the in-flight preparations waiting for
//! them to converge.

use crate::send::SendError;
use callcore::{ContentDescriptor, Jid, ParticipantState, Presence};
use log::debug;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Per-group negotiation state.
#[derive(Debug, Default)]
pub struct GroupSession {
    participants: HashMap<Jid, ParticipantState>,
    contents: Vec<ContentDescriptor>,
    /// Set when convergence was announced; cleared by a new round.
    converged: bool,
}

impl GroupSession {
    pub fn participant(&self, jid: &Jid) -> Option<&ParticipantState> {
        self.participants.get(jid)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// The content list we last agreed to broadcast for this group.
    pub fn contents(&self) -> &[ContentDescriptor] {
        &self.contents
    }

    fn all_ready(&self) -> bool {
        self.participants.values().all(ParticipantState::is_ready)
    }
}

/// Identifies one call to [`crate::calls::CallManager::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrepareToken(u64);

/// Progress of one preparation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareState {
    AwaitingFirstSend,
    AwaitingConvergence,
    AwaitingSecondSend,
    Done,
    Failed,
}

type Convergence = Result<(), SendError>;

struct PendingPrepare {
    group: Jid,
    state: PrepareState,
    /// Our preparing presence for this round came back from the group.
    echoed: bool,
    converged_tx: Option<oneshot::Sender<Convergence>>,
    converged_rx: Option<oneshot::Receiver<Convergence>>,
}

/// Tracks participant states and pending preparations for every group.
#[derive(Default)]
pub struct MujiCoordinator {
    groups: HashMap<Jid, GroupSession>,
    pending: HashMap<PrepareToken, PendingPrepare>,
    /// Our own occupant addresses, so their echoes count as self presence.
    own_occupants: Vec<Jid>,
    next_token: u64,
}

impl MujiCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, group: &Jid) -> Option<&GroupSession> {
        self.groups.get(group)
    }

    pub(crate) fn add_own_occupant(&mut self, occupant: Jid) {
        if !self.own_occupants.contains(&occupant) {
            self.own_occupants.push(occupant);
        }
    }

    /// Start a preparation for `group`. Opens a new negotiation round.
    pub(crate) fn begin(&mut self, group: &Jid) -> PrepareToken {
        let token = PrepareToken(self.next_token);
        self.next_token += 1;

        self.groups.entry(group.clone()).or_default().converged = false;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            token,
            PendingPrepare {
                group: group.clone(),
                state: PrepareState::AwaitingFirstSend,
                echoed: false,
                converged_tx: Some(tx),
                converged_rx: Some(rx),
            },
        );
        token
    }

    /// The preparing presence went out; hand back the receiver that resolves
    /// once the group converges after its echo.
    ///
    /// A convergence observed while the send was still in flight is not lost:
    /// it is already buffered in the returned channel.
    pub(crate) fn await_convergence(
        &mut self,
        token: PrepareToken,
    ) -> Option<oneshot::Receiver<Convergence>> {
        let pending = self.pending.get_mut(&token)?;
        if pending.state == PrepareState::AwaitingFirstSend {
            pending.state = PrepareState::AwaitingConvergence;
        }
        pending.converged_rx.take()
    }

    /// Apply the caller's mutation and build the presence for the second
    /// round.
    pub(crate) fn second_round<F>(&mut self, token: PrepareToken, mutate: F) -> Option<Presence>
    where
        F: FnOnce(&mut Vec<ContentDescriptor>, &mut Presence),
    {
        let pending = self.pending.get_mut(&token)?;
        pending.state = PrepareState::AwaitingSecondSend;
        let group = pending.group.clone();

        let mut presence = Presence::to(group.clone());
        let session = self.groups.entry(group).or_default();
        mutate(&mut session.contents, &mut presence);
        Some(presence)
    }

    /// Retire a preparation.
    pub(crate) fn finish(&mut self, token: PrepareToken, succeeded: bool) -> PrepareState {
        self.pending.remove(&token);
        if succeeded {
            PrepareState::Done
        } else {
            PrepareState::Failed
        }
    }

    /// States of the preparations still in flight for `group`, oldest first.
    pub fn prepare_states(&self, group: &Jid) -> Vec<PrepareState> {
        let mut states: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, p)| &p.group == group)
            .map(|(token, p)| (*token, p.state))
            .collect();
        states.sort_by_key(|(token, _)| *token);
        states.into_iter().map(|(_, state)| state).collect()
    }

    /// Resolve every pending preparation with `error`.
    pub(crate) fn fail_pending(&mut self, error: SendError) -> usize {
        let mut failed = 0;
        for pending in self.pending.values_mut() {
            if let Some(tx) = pending.converged_tx.take() {
                let _ = tx.send(Err(error.clone()));
                pending.state = PrepareState::Failed;
                failed += 1;
            }
        }
        failed
    }

    /// Forget the stored content list of `group`.
    pub(crate) fn clear_contents(&mut self, group: &Jid) {
        if let Some(session) = self.groups.get_mut(group) {
            session.contents.clear();
        }
    }

    fn is_self(&self, from: &Jid, local: &Jid) -> bool {
        from == local || self.own_occupants.contains(from)
    }

    /// Update participant state from an incoming presence.
    ///
    /// Returns the group whose participants just converged, if any.
    pub(crate) fn observe(&mut self, presence: &Presence, local: &Jid) -> Option<Jid> {
        let from = &presence.from;

        if self.is_self(from, local) {
            // Our own broadcast came back. Direct echoes name the group in
            // `to`; occupant echoes carry it as their bare address.
            let group = if from == local && !presence.to.is_empty() {
                presence.to.to_bare()
            } else {
                from.to_bare()
            };
            // Plain presence of our own is not a group echo.
            if !self.groups.contains_key(&group) {
                return None;
            }
            if presence.muji.preparing {
                self.mark_echoed(&group);
            }
            return self.evaluate(&group);
        }

        let group = from.to_bare();

        if presence.is_unavailable() {
            let session = self.groups.get_mut(&group)?;
            session.participants.remove(from)?;
            debug!("Muji participant {} left {}", from, group);
            return self.evaluate(&group);
        }

        if presence.muji.preparing {
            debug!("Muji participant {} is preparing in {}", from, group);
            let session = self.groups.entry(group).or_default();
            session
                .participants
                .insert(from.clone(), ParticipantState::Preparing);
            session.converged = false;
            None
        } else if !presence.muji.contents.is_empty() {
            debug!(
                "Muji participant {} is ready in {} with {} contents",
                from,
                group,
                presence.muji.contents.len()
            );
            self.groups.entry(group.clone()).or_default().participants.insert(
                from.clone(),
                ParticipantState::Ready(presence.muji.contents.clone()),
            );
            self.evaluate(&group)
        } else {
            None
        }
    }

    /// Preparing echoes come back in the order they were sent, so each one
    /// belongs to the oldest preparation of the group still waiting for it.
    fn mark_echoed(&mut self, group: &Jid) {
        let oldest = self
            .pending
            .iter_mut()
            .filter(|(_, p)| &p.group == group && !p.echoed)
            .min_by_key(|(token, _)| **token);
        if let Some((token, pending)) = oldest {
            debug!("Preparation {:?} in {} echoed", token, group);
            pending.echoed = true;
        }
    }

    /// Release the echoed preparations of `group` if every participant is
    /// ready. Returns the group when this is a new convergence.
    fn evaluate(&mut self, group: &Jid) -> Option<Jid> {
        let session = self.groups.entry(group.clone()).or_default();
        if !session.all_ready() {
            return None;
        }
        let announce = !session.converged;
        session.converged = true;

        for pending in self
            .pending
            .values_mut()
            .filter(|p| &p.group == group && p.echoed)
        {
            if let Some(tx) = pending.converged_tx.take() {
                let _ = tx.send(Ok(()));
            }
        }
        announce.then(|| group.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callcore::{ContentCreator, MediaKind, MujiPayload, PresenceType};

    fn room() -> Jid {
        "room@conf.example.com".parse().unwrap()
    }

    fn me() -> Jid {
        "alice@example.com/laptop".parse().unwrap()
    }

    fn occupant(nick: &str) -> Jid {
        room().with_resource(nick)
    }

    fn content(name: &str) -> ContentDescriptor {
        ContentDescriptor::new(ContentCreator::Initiator, name, MediaKind::Audio)
    }

    fn preparing_from(from: Jid) -> Presence {
        Presence {
            from,
            to: me(),
            kind: PresenceType::Available,
            muji: MujiPayload::preparing(),
        }
    }

    fn ready_from(from: Jid, contents: Vec<ContentDescriptor>) -> Presence {
        Presence {
            from,
            to: me(),
            kind: PresenceType::Available,
            muji: MujiPayload::ready(contents),
        }
    }

    fn self_echo() -> Presence {
        Presence {
            from: me(),
            to: room(),
            ..Default::default()
        }
    }

    fn preparing_echo() -> Presence {
        Presence {
            muji: MujiPayload::preparing(),
            ..self_echo()
        }
    }

    #[test]
    fn test_converges_once_all_participants_ready() {
        let mut muji = MujiCoordinator::new();
        let p1 = occupant("p1");
        let p2 = occupant("p2");

        assert_eq!(muji.observe(&preparing_from(p1.clone()), &me()), None);
        assert_eq!(
            muji.observe(
                &ready_from(p2.clone(), vec![content("a"), content("b")]),
                &me()
            ),
            None
        );
        assert_eq!(
            muji.observe(&ready_from(p1.clone(), vec![content("a")]), &me()),
            Some(room())
        );

        // Further ready presences do not announce the same convergence again.
        assert_eq!(
            muji.observe(&ready_from(p2.clone(), vec![content("a")]), &me()),
            None
        );

        let session = muji.group(&room()).unwrap();
        assert_eq!(session.participant_count(), 2);
        assert_eq!(session.participant(&p1).unwrap().contents().len(), 1);
    }

    #[test]
    fn test_new_round_rearms_convergence() {
        let mut muji = MujiCoordinator::new();
        let p1 = occupant("p1");

        assert_eq!(
            muji.observe(&ready_from(p1.clone(), vec![content("a")]), &me()),
            Some(room())
        );
        assert_eq!(muji.observe(&preparing_from(p1.clone()), &me()), None);
        assert_eq!(
            muji.group(&room()).unwrap().participant(&p1),
            Some(&ParticipantState::Preparing)
        );
        assert_eq!(
            muji.observe(&ready_from(p1, vec![content("b")]), &me()),
            Some(room())
        );
    }

    #[test]
    fn test_presence_without_muji_payload_is_ignored() {
        let mut muji = MujiCoordinator::new();
        let plain = Presence {
            from: occupant("p1"),
            ..Default::default()
        };
        assert_eq!(muji.observe(&plain, &me()), None);
        assert!(muji.group(&room()).is_none());
    }

    #[test]
    fn test_self_echo_evaluates_group_named_in_to() {
        let mut muji = MujiCoordinator::new();
        muji.begin(&room());
        assert_eq!(muji.observe(&self_echo(), &me()), Some(room()));
    }

    #[test]
    fn test_self_presence_outside_groups_is_ignored() {
        let mut muji = MujiCoordinator::new();
        let own = Presence {
            from: me(),
            ..Default::default()
        };
        assert_eq!(muji.observe(&own, &me()), None);
        assert!(muji.group(&me().to_bare()).is_none());
    }

    #[test]
    fn test_occupant_echo_counts_as_self() {
        let mut muji = MujiCoordinator::new();
        muji.add_own_occupant(occupant("alice"));
        muji.observe(&preparing_from(occupant("p1")), &me());

        // Our own preparing echo must not register us as a participant.
        assert_eq!(muji.observe(&preparing_from(occupant("alice")), &me()), None);
        assert!(
            muji.group(&room())
                .unwrap()
                .participant(&occupant("alice"))
                .is_none()
        );
    }

    #[test]
    fn test_departed_participant_no_longer_blocks() {
        let mut muji = MujiCoordinator::new();
        let p1 = occupant("p1");
        let p2 = occupant("p2");
        muji.observe(&preparing_from(p1.clone()), &me());
        muji.observe(&ready_from(p2, vec![content("a")]), &me());

        let gone = Presence {
            from: p1,
            kind: PresenceType::Unavailable,
            ..Default::default()
        };
        assert_eq!(muji.observe(&gone, &me()), Some(room()));
    }

    #[tokio::test]
    async fn test_pending_prepare_lifecycle() {
        let mut muji = MujiCoordinator::new();
        let token = muji.begin(&room());
        assert_eq!(
            muji.prepare_states(&room()),
            vec![PrepareState::AwaitingFirstSend]
        );

        let rx = muji.await_convergence(token).unwrap();
        assert_eq!(
            muji.prepare_states(&room()),
            vec![PrepareState::AwaitingConvergence]
        );

        assert_eq!(muji.observe(&preparing_echo(), &me()), Some(room()));
        assert_eq!(rx.await.unwrap(), Ok(()));

        let presence = muji
            .second_round(token, |contents, presence| {
                contents.push(content("a"));
                presence.muji = MujiPayload::ready(contents.clone());
            })
            .unwrap();
        assert_eq!(presence.to, room());
        assert_eq!(presence.muji.contents.len(), 1);
        assert_eq!(
            muji.prepare_states(&room()),
            vec![PrepareState::AwaitingSecondSend]
        );

        assert_eq!(muji.finish(token, true), PrepareState::Done);
        assert!(muji.prepare_states(&room()).is_empty());
        assert_eq!(muji.group(&room()).unwrap().contents().len(), 1);
    }

    #[tokio::test]
    async fn test_convergence_during_first_send_is_buffered() {
        let mut muji = MujiCoordinator::new();
        let token = muji.begin(&room());
        assert_eq!(muji.observe(&preparing_echo(), &me()), Some(room()));

        let rx = muji.await_convergence(token).unwrap();
        assert_eq!(rx.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_each_preparation_waits_for_its_own_echo() {
        let mut muji = MujiCoordinator::new();
        let first = muji.begin(&room());
        let second = muji.begin(&room());
        let rx1 = muji.await_convergence(first).unwrap();
        let mut rx2 = muji.await_convergence(second).unwrap();

        assert_eq!(muji.observe(&preparing_echo(), &me()), Some(room()));
        assert_eq!(rx1.await.unwrap(), Ok(()));
        assert!(rx2.try_recv().is_err());

        // The first round's publication is not the second one's echo.
        muji.second_round(first, |_, _| {}).unwrap();
        muji.finish(first, true);
        assert_eq!(muji.observe(&self_echo(), &me()), None);
        assert!(rx2.try_recv().is_err());

        // Same convergence, so no second announcement, but it is released.
        assert_eq!(muji.observe(&preparing_echo(), &me()), None);
        assert_eq!(rx2.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_echoed_preparation_waits_for_late_preparer() {
        let mut muji = MujiCoordinator::new();
        let token = muji.begin(&room());
        let mut rx = muji.await_convergence(token).unwrap();
        muji.observe(&preparing_from(occupant("p1")), &me());

        assert_eq!(muji.observe(&preparing_echo(), &me()), None);
        assert!(rx.try_recv().is_err());

        assert_eq!(
            muji.observe(&ready_from(occupant("p1"), vec![content("a")]), &me()),
            Some(room())
        );
        assert_eq!(rx.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_prepares_for_other_groups_are_untouched() {
        let mut muji = MujiCoordinator::new();
        let other: Jid = "other@conf.example.com".parse().unwrap();
        let token = muji.begin(&other);
        let mut rx = muji.await_convergence(token).unwrap();
        muji.begin(&room());

        assert_eq!(muji.observe(&preparing_echo(), &me()), Some(room()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fail_pending_resolves_with_error() {
        let mut muji = MujiCoordinator::new();
        let first = muji.begin(&room());
        let second = muji.begin(&room());
        let rx1 = muji.await_convergence(first).unwrap();
        let rx2 = muji.await_convergence(second).unwrap();

        assert_eq!(muji.fail_pending(SendError::ConnectionLost), 2);
        assert_eq!(rx1.await.unwrap(), Err(SendError::ConnectionLost));
        assert_eq!(rx2.await.unwrap(), Err(SendError::ConnectionLost));
        assert_eq!(
            muji.prepare_states(&room()),
            vec![PrepareState::Failed, PrepareState::Failed]
        );
    }
}
