//! Persist-then-notify message delivery.
//!
//! The stored row is what the receiver will always see on their next history
//! fetch. Pushing a `new-message` event to their live connections is a
//! best-effort extra and never changes the outcome of a send.

use std::sync::Arc;

use tracing::{debug, info};

use parley_shared::protocol::ServerEvent;
use parley_shared::Message;

use crate::persistence::{MessageStore, PersistError};
use crate::presence::PresenceBroadcaster;
use crate::sessions::SessionStore;

/// Outcome of pushing one message to the receiver's live connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct Delivery {
    sessions: Arc<SessionStore>,
    store: Arc<dyn MessageStore>,
    presence: Arc<PresenceBroadcaster>,
}

impl Delivery {
    pub fn new(
        sessions: Arc<SessionStore>,
        store: Arc<dyn MessageStore>,
        presence: Arc<PresenceBroadcaster>,
    ) -> Self {
        Self {
            sessions,
            store,
            presence,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Save `message`, then push it to the receiver if they are online.
    ///
    /// A failed save aborts the send before anything is pushed.
    pub async fn send(&self, message: &Message) -> Result<DeliveryReport, PersistError> {
        self.store.save(message).await?;
        Ok(self.deliver(message))
    }

    /// Push an already stored message to every live connection of its
    /// receiver. Each connection is tried independently; the ones that fail
    /// are closed and deregistered, followed by a presence update.
    pub fn deliver(&self, message: &Message) -> DeliveryReport {
        let targets = self.sessions.connections_for(message.receiver_id);
        if targets.is_empty() {
            debug!(
                message = %message.id,
                receiver = %message.receiver_id,
                "Receiver offline, stored only"
            );
            return DeliveryReport::default();
        }

        let event = Arc::new(ServerEvent::NewMessage(message.clone()));
        let mut report = DeliveryReport {
            attempted: targets.len(),
            ..Default::default()
        };
        let mut removed = false;

        for handle in &targets {
            match handle.send(Arc::clone(&event)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    debug!(
                        conn = %handle.id(),
                        receiver = %message.receiver_id,
                        error = %e,
                        "Push failed, closing connection"
                    );
                    removed |= self.sessions.deregister(handle);
                }
            }
        }

        if removed {
            self.presence.broadcast();
        }

        info!(
            message = %message.id,
            receiver = %message.receiver_id,
            delivered = report.delivered,
            failed = report.failed,
            "Message pushed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use parley_shared::UserId;
    use parley_store::StoreError;

    use crate::sessions::ConnectionHandle;

    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageStore for RecordingStore {
        async fn save(&self, message: &Message) -> Result<(), PersistError> {
            self.saved.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn fetch_history(
            &self,
            a: UserId,
            b: UserId,
        ) -> Result<Vec<Message>, PersistError> {
            Ok(self
                .saved
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.is_between(a, b))
                .cloned()
                .collect())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn save(&self, _: &Message) -> Result<(), PersistError> {
            Err(PersistError::Store(StoreError::Migration("disk gone".into())))
        }

        async fn fetch_history(&self, _: UserId, _: UserId) -> Result<Vec<Message>, PersistError> {
            Ok(Vec::new())
        }
    }

    fn delivery(store: Arc<dyn MessageStore>) -> (Delivery, Arc<SessionStore>) {
        let sessions = Arc::new(SessionStore::new());
        let presence = Arc::new(PresenceBroadcaster::new(Arc::clone(&sessions)));
        (Delivery::new(Arc::clone(&sessions), store, presence), sessions)
    }

    fn pushed(rx: &mut tokio::sync::mpsc::Receiver<Arc<ServerEvent>>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::NewMessage(m) = event.as_ref() {
                out.push(m.clone());
            }
        }
        out
    }

    #[tokio::test]
    async fn offline_receiver_is_stored_only() {
        let store = Arc::new(RecordingStore::default());
        let (delivery, _) = delivery(store.clone());
        let (alice, bob) = (UserId::new(), UserId::new());
        let msg = Message::new(alice, bob, Some("later".into()), None);

        let report = delivery.send(&msg).await.unwrap();

        assert_eq!(report, DeliveryReport::default());
        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert_eq!(
            delivery.store().fetch_history(bob, alice).await.unwrap(),
            vec![msg]
        );
    }

    #[tokio::test]
    async fn every_receiver_connection_is_tried() {
        let store = Arc::new(RecordingStore::default());
        let (delivery, sessions) = delivery(store);
        let (alice, bob) = (UserId::new(), UserId::new());

        let (phone, mut phone_rx) = ConnectionHandle::new(bob, 8);
        let (laptop, laptop_rx) = ConnectionHandle::new(bob, 8);
        sessions.register(phone);
        sessions.register(laptop.clone());
        drop(laptop_rx);

        let msg = Message::new(alice, bob, Some("hi".into()), None);
        let report = delivery.send(&msg).await.unwrap();

        assert_eq!(
            report,
            DeliveryReport {
                attempted: 2,
                delivered: 1,
                failed: 1
            }
        );
        assert_eq!(pushed(&mut phone_rx), vec![msg]);
        assert!(laptop.is_closed());
        assert_eq!(sessions.connection_count_for(bob), 1);
    }

    #[tokio::test]
    async fn sender_connections_get_nothing() {
        let (delivery, sessions) = delivery(Arc::new(RecordingStore::default()));
        let (alice, bob) = (UserId::new(), UserId::new());
        let (h, mut rx) = ConnectionHandle::new(alice, 8);
        sessions.register(h);

        delivery
            .send(&Message::new(alice, bob, Some("x".into()), None))
            .await
            .unwrap();
        assert!(pushed(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn failed_save_pushes_nothing() {
        let (delivery, sessions) = delivery(Arc::new(FailingStore));
        let bob = UserId::new();
        let (h, mut rx) = ConnectionHandle::new(bob, 8);
        sessions.register(h);

        let msg = Message::new(UserId::new(), bob, Some("lost".into()), None);
        assert!(delivery.send(&msg).await.is_err());
        assert!(rx.try_recv().is_err());
    }
}
