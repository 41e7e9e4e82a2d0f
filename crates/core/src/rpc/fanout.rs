//! Event fan-out: every connection is a subscriber with a bounded queue.
//!
//! Emitters push onto per-connection queues; the transport's single writer
//! drains the receiver. Delivery is best-effort: a consumer whose queue
//! fills is dropped rather than allowed to stall the emitters. Ordering per
//! `(connection, session)` follows emit order.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use sb_protocol::ServerEvent;

struct Subscription {
    tx: mpsc::Sender<ServerEvent>,
    /// Session ids this connection wants. `None` = everything.
    interests: Option<HashSet<String>>,
}

pub struct EventFanout {
    connections: RwLock<HashMap<String, Subscription>>,
    capacity: usize,
}

impl EventFanout {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a connection. The returned receiver is the connection's
    /// outbound queue; hand it to the transport writer task.
    pub fn subscribe(
        &self,
        connection_id: &str,
        interests: Option<HashSet<String>>,
    ) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.connections
            .write()
            .insert(connection_id.to_owned(), Subscription { tx, interests });
        rx
    }

    pub fn unsubscribe(&self, connection_id: &str) {
        self.connections.write().remove(connection_id);
    }

    /// Narrow or widen a connection's session filter.
    pub fn set_interests(&self, connection_id: &str, interests: Option<HashSet<String>>) {
        if let Some(sub) = self.connections.write().get_mut(connection_id) {
            sub.interests = interests;
        }
    }

    /// Deliver an event to every interested connection. A full queue drops
    /// the connection (slow consumer), a closed queue cleans it up.
    pub fn emit(&self, event: ServerEvent) {
        let mut doomed: Vec<String> = Vec::new();
        {
            let connections = self.connections.read();
            for (id, sub) in connections.iter() {
                let interested = match (&event.session_id, &sub.interests) {
                    (_, None) => true,
                    (None, Some(_)) => true,
                    (Some(sid), Some(set)) => set.contains(sid),
                };
                if !interested {
                    continue;
                }
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            connection_id = %id,
                            "dropping slow consumer: event queue full"
                        );
                        doomed.push(id.clone());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        doomed.push(id.clone());
                    }
                }
            }
        }
        if !doomed.is_empty() {
            let mut connections = self.connections.write();
            for id in doomed {
                connections.remove(&id);
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_protocol::ServerEventKind;

    fn event(session_id: Option<&str>, n: u64) -> ServerEvent {
        ServerEvent::new(
            ServerEventKind::AgentTextDelta,
            session_id.map(|s| s.to_owned()),
            serde_json::json!({"n": n}),
        )
    }

    #[tokio::test]
    async fn per_connection_order_is_preserved() {
        let fanout = EventFanout::new(16);
        let mut rx = fanout.subscribe("c1", None);

        for n in 0..5 {
            fanout.emit(event(Some("s1"), n));
        }
        for n in 0..5 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.data["n"], n);
        }
    }

    #[tokio::test]
    async fn interest_filter_limits_delivery() {
        let fanout = EventFanout::new(16);
        let mut only_s1 = fanout.subscribe("c1", Some(HashSet::from(["s1".to_owned()])));
        let mut all = fanout.subscribe("c2", None);

        fanout.emit(event(Some("s1"), 1));
        fanout.emit(event(Some("s2"), 2));

        assert_eq!(only_s1.recv().await.unwrap().data["n"], 1);
        assert_eq!(all.recv().await.unwrap().data["n"], 1);
        assert_eq!(all.recv().await.unwrap().data["n"], 2);
        // c1 never sees the s2 event.
        assert!(only_s1.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_consumer_is_dropped() {
        let fanout = EventFanout::new(2);
        let _rx = fanout.subscribe("slow", None); // never drained
        assert_eq!(fanout.connection_count(), 1);

        fanout.emit(event(Some("s1"), 1));
        fanout.emit(event(Some("s1"), 2));
        // Third emit finds the queue full and drops the connection.
        fanout.emit(event(Some("s1"), 3));
        assert_eq!(fanout.connection_count(), 0);
    }

    #[tokio::test]
    async fn closed_receiver_is_cleaned_up() {
        let fanout = EventFanout::new(4);
        let rx = fanout.subscribe("gone", None);
        drop(rx);
        fanout.emit(event(None, 1));
        assert_eq!(fanout.connection_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_connection() {
        let fanout = EventFanout::new(4);
        let _rx = fanout.subscribe("c1", None);
        fanout.unsubscribe("c1");
        assert_eq!(fanout.connection_count(), 0);
    }
}
