//! Per-characteristic subscriber registry, keyed by session id rather than holding a back-pointer
//! into the owning session.

use std::collections::BTreeSet;

/// Opaque identifier for a connected session, assigned by the server on accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

/// The set of sessions currently subscribed to a characteristic's change events.
#[derive(Debug, Clone, Default)]
pub struct SubscriberRegistry {
    sessions: BTreeSet<SessionId>,
}

impl SubscriberRegistry {
    /// Register `session` as a subscriber. Idempotent.
    pub fn subscribe(&mut self, session: SessionId) {
        self.sessions.insert(session);
    }

    /// Remove `session` as a subscriber. No-op if it wasn't subscribed.
    pub fn unsubscribe(&mut self, session: SessionId) {
        self.sessions.remove(&session);
    }

    /// `true` if any session is currently subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// `true` if `session` specifically is subscribed, for rendering `GET /characteristics`'s
    /// per-session `ev` flag.
    #[must_use]
    pub fn is_subscribed(&self, session: SessionId) -> bool {
        self.sessions.contains(&session)
    }

    /// Every currently subscribed session, in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_and_unsubscribe_are_idempotent() {
        let mut registry = SubscriberRegistry::default();
        registry.subscribe(SessionId(1));
        registry.subscribe(SessionId(1));
        assert_eq!(registry.iter().count(), 1);

        registry.unsubscribe(SessionId(1));
        registry.unsubscribe(SessionId(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn is_subscribed_reflects_only_that_session() {
        let mut registry = SubscriberRegistry::default();
        registry.subscribe(SessionId(1));
        assert!(registry.is_subscribed(SessionId(1)));
        assert!(!registry.is_subscribed(SessionId(2)));
    }

    #[test]
    fn tracks_multiple_sessions_independently() {
        let mut registry = SubscriberRegistry::default();
        registry.subscribe(SessionId(1));
        registry.subscribe(SessionId(2));
        registry.unsubscribe(SessionId(1));

        let remaining: Vec<_> = registry.iter().collect();
        assert_eq!(remaining, vec![SessionId(2)]);
    }
}
