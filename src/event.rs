//! Asynchronous characteristic-change delivery: the bounded per-session queues that each
//! session's loop drains into `EVENT/1.0` frames.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::model::{CharacteristicValue, SessionId, SubscriberRegistry};

/// A single characteristic's new value, addressed by `aid.iid`.
#[derive(Debug, Clone)]
pub struct CharacteristicEvent {
    pub aid: u64,
    pub iid: u64,
    pub value: CharacteristicValue,
}

/// The event queue capacity mandated by the concurrency model: missed events are tolerated
/// because a controller re-reads on its next interaction.
pub const EVENT_QUEUE_CAPACITY: usize = 20;

/// Routes characteristic-change events to every subscribed session's bounded queue.
///
/// Sessions register a receiver on accept (or on first verify) and deregister on teardown;
/// `publish` never blocks the caller — a full queue silently drops the new event, per the
/// concurrency model's "tolerates missed events" allowance.
#[derive(Default)]
pub struct EventBus {
    senders: Mutex<HashMap<SessionId, mpsc::Sender<CharacteristicEvent>>>,
}

impl EventBus {
    /// Register `session`, returning the receiving half it should poll from its event pump.
    pub fn register(&self, session: SessionId) -> mpsc::Receiver<CharacteristicEvent> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        self.senders.lock().expect("event bus mutex poisoned").insert(session, tx);
        rx
    }

    /// Deregister `session`; its queue is dropped and any further publishes addressed to it are
    /// silently ignored.
    pub fn unregister(&self, session: SessionId) {
        self.senders.lock().expect("event bus mutex poisoned").remove(&session);
    }

    /// Deliver `event` to every session named in `subscribers`.
    pub fn publish(&self, subscribers: &SubscriberRegistry, event: CharacteristicEvent) {
        let senders = self.senders.lock().expect("event bus mutex poisoned");
        for session in subscribers.iter() {
            if let Some(sender) = senders.get(&session) {
                // try_send: a full queue means the session's event pump is behind; drop rather
                // than block the writer that triggered the change.
                let _ = sender.try_send(event.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_event_reaches_registered_session() {
        let bus = EventBus::default();
        let mut rx = bus.register(SessionId(1));

        let mut subscribers = SubscriberRegistry::default();
        subscribers.subscribe(SessionId(1));

        bus.publish(
            &subscribers,
            CharacteristicEvent {
                aid: 1,
                iid: 4,
                value: CharacteristicValue::Int(42),
            },
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.aid, 1);
        assert_eq!(event.iid, 4);
        assert_eq!(event.value, CharacteristicValue::Int(42));
    }

    #[tokio::test]
    async fn unregistered_session_receives_nothing() {
        let bus = EventBus::default();
        bus.unregister(SessionId(1));

        let mut subscribers = SubscriberRegistry::default();
        subscribers.subscribe(SessionId(1));

        bus.publish(
            &subscribers,
            CharacteristicEvent {
                aid: 1,
                iid: 4,
                value: CharacteristicValue::Bool(true),
            },
        );
        // No receiver was ever created for session 1; publishing must not panic.
    }

    #[tokio::test]
    async fn full_queue_drops_rather_than_blocks() {
        let bus = EventBus::default();
        let _rx = bus.register(SessionId(1));
        let mut subscribers = SubscriberRegistry::default();
        subscribers.subscribe(SessionId(1));

        for i in 0..EVENT_QUEUE_CAPACITY as u64 + 5 {
            bus.publish(
                &subscribers,
                CharacteristicEvent {
                    aid: 1,
                    iid: i,
                    value: CharacteristicValue::UInt(i),
                },
            );
        }
        // Publishing more than the queue capacity must not panic or block.
    }
}
