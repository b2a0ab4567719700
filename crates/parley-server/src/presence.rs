use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use parley_shared::protocol::ServerEvent;
use parley_shared::UserId;

use crate::sessions::SessionStore;

/// Pushes the online-identity snapshot to every live connection.
pub struct PresenceBroadcaster {
    sessions: Arc<SessionStore>,
    // Serializes broadcasts so a stale snapshot never overtakes a newer one.
    order: Mutex<()>,
}

impl PresenceBroadcaster {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self {
            sessions,
            order: Mutex::new(()),
        }
    }

    /// Send a `presence-update` to every registered connection, including the
    /// one whose change triggered it.
    ///
    /// A connection that cannot take the event is deregistered and the
    /// survivors get a fresh snapshot. Returns the last snapshot sent.
    pub fn broadcast(&self) -> Vec<UserId> {
        let _order = self.order.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            let online = self.sessions.online_identities();
            let event = Arc::new(ServerEvent::presence(online.clone()));
            let recipients = self.sessions.all_connections();

            let mut dropped = 0usize;
            for handle in &recipients {
                if let Err(e) = handle.send(Arc::clone(&event)) {
                    debug!(
                        user = %handle.user_id(),
                        conn = %handle.id(),
                        error = %e,
                        "Dropping connection that missed a presence update"
                    );
                    if self.sessions.deregister(handle) {
                        dropped += 1;
                    }
                }
            }

            debug!(
                online = online.len(),
                recipients = recipients.len(),
                dropped,
                "Presence broadcast"
            );

            if dropped == 0 {
                return online;
            }
        }
    }
}
