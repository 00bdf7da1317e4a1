//! Index of live calls keyed by session id.

use super::call::PeerCall;
use super::state::CallDirection;
use callcore::Sid;
use dashmap::DashMap;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CallKey {
    sid: Sid,
    direction: CallDirection,
}

/// Non-owning index of the calls the engine routes stanzas to.
///
/// Entries hold weak references: a call lives only as long as its owner (the
/// application, or whoever received it from a call event) keeps a handle.
/// Lookups for unknown or already disposed sessions return `None`.
#[derive(Debug, Clone, Default)]
pub struct CallRegistry {
    calls: Arc<DashMap<CallKey, Weak<PeerCall>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, call: &Arc<PeerCall>) {
        let key = CallKey {
            sid: call.sid().clone(),
            direction: call.direction(),
        };
        self.calls.insert(key, Arc::downgrade(call));
    }

    /// Find a call by session id, whichever side started it.
    pub fn find(&self, sid: &Sid) -> Option<Arc<PeerCall>> {
        self.find_with_direction(sid, CallDirection::Outgoing)
            .or_else(|| self.find_with_direction(sid, CallDirection::Incoming))
    }

    pub fn find_with_direction(&self, sid: &Sid, direction: CallDirection) -> Option<Arc<PeerCall>> {
        let key = CallKey {
            sid: sid.clone(),
            direction,
        };
        self.calls.get(&key).and_then(|entry| entry.value().upgrade())
    }

    pub fn contains(&self, sid: &Sid) -> bool {
        self.find(sid).is_some()
    }

    /// Remove `call`'s entry, if the entry still refers to that call.
    pub(crate) fn remove(&self, call: &PeerCall) -> bool {
        let key = CallKey {
            sid: call.sid().clone(),
            direction: call.direction(),
        };
        self.calls
            .remove_if(&key, |_, weak| std::ptr::eq(weak.as_ptr(), call))
            .is_some()
    }

    /// Strong handles to every live call.
    pub fn active(&self) -> Vec<Arc<PeerCall>> {
        self.calls
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::context::test_context;
    use callcore::Jid;

    fn make_call(sid: &str, direction: CallDirection) -> Arc<PeerCall> {
        Arc::new(PeerCall::new(
            test_context(),
            Jid::new("bob", "example.com"),
            direction,
            Sid::from(sid),
        ))
    }

    #[test]
    fn test_find_unknown_sid_is_none() {
        let registry = CallRegistry::new();
        assert!(registry.find(&Sid::from("missing")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_by_sid_and_direction() {
        let ctx = test_context();
        let registry = ctx.registry.clone();
        let outgoing = Arc::new(PeerCall::new(
            ctx.clone(),
            Jid::new("bob", "example.com"),
            CallDirection::Outgoing,
            Sid::from("same"),
        ));
        let incoming = Arc::new(PeerCall::new(
            ctx,
            Jid::new("carol", "example.com"),
            CallDirection::Incoming,
            Sid::from("same"),
        ));
        registry.register(&outgoing);
        registry.register(&incoming);

        assert_eq!(registry.len(), 2);
        let found = registry
            .find_with_direction(&Sid::from("same"), CallDirection::Incoming)
            .unwrap();
        assert!(Arc::ptr_eq(&found, &incoming));
        assert!(registry.find(&Sid::from("same")).is_some());
    }

    #[test]
    fn test_dropping_last_handle_deregisters() {
        let ctx = test_context();
        let registry = ctx.registry.clone();
        let call = Arc::new(PeerCall::new(
            ctx,
            Jid::new("bob", "example.com"),
            CallDirection::Outgoing,
            Sid::from("short-lived"),
        ));
        registry.register(&call);
        assert_eq!(registry.len(), 1);

        drop(call);
        assert!(registry.is_empty());
        assert!(registry.find(&Sid::from("short-lived")).is_none());
    }

    #[test]
    fn test_remove_ignores_foreign_call_with_same_key() {
        let ctx = test_context();
        let registry = ctx.registry.clone();
        let registered = Arc::new(PeerCall::new(
            ctx.clone(),
            Jid::new("bob", "example.com"),
            CallDirection::Outgoing,
            Sid::from("dup"),
        ));
        registry.register(&registered);

        // Not registered, but shares sid and direction.
        let impostor = make_call("dup", CallDirection::Outgoing);
        assert!(!registry.remove(&impostor));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&registered));
        assert!(registry.is_empty());
    }
}
