//! Which users are online, and through which live connections.
//!
//! [`SessionStore`] maps a [`UserId`] to the set of [`ConnectionHandle`]s it
//! currently owns. An identity is online exactly when it has an entry, and an
//! entry is never left empty. Each identity's set is only touched under its
//! dashmap shard guard, and no guard outlives a method call, so callers can
//! snapshot handles and then send to them without holding anything.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use parley_shared::protocol::ServerEvent;
use parley_shared::UserId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique, monotonically increasing connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why an event could not be queued on a connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    Full,
}

/// One live connection as seen by the rest of the server.
///
/// Cloning is cheap and every clone refers to the same connection. Events
/// go into a bounded queue drained by the connection's own task; closing
/// the handle tells that task to shut the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Arc<ServerEvent>>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    /// A fresh handle for `user_id` plus the receiving end of its queue.
    pub fn new(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<Arc<ServerEvent>>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::next(),
            user_id,
            connected_at: Utc::now(),
            outbound,
            closed: CancellationToken::new(),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue an event without waiting.
    pub fn send(&self, event: Arc<ServerEvent>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outbound.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Signal the connection task to shut down. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called on any clone.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// Online users and their live connections.
#[derive(Default)]
pub struct SessionStore {
    by_user: DashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handle` under its owner. Returns `false` when nothing changed:
    /// the handle was already registered, or it has been closed.
    pub fn register(&self, handle: ConnectionHandle) -> bool {
        let (user, conn) = (handle.user_id(), handle.id());

        let entry = self.by_user.entry(user);

        // Checked under the shard guard; deregister closes before it locks.
        if handle.is_closed() {
            return false;
        }

        let inserted = match entry {
            Entry::Occupied(mut set) => {
                if set.get().contains_key(&conn) {
                    false
                } else {
                    set.get_mut().insert(conn, handle);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(HashMap::from([(conn, handle)]));
                true
            }
        };

        if inserted {
            debug!(user = %user, conn = %conn, "Connection registered");
        }
        inserted
    }

    /// Close `handle` and drop it from the store, removing its owner when it
    /// was the last one. Safe to call any number of times; only the call
    /// that actually removed the handle returns `true`.
    pub fn deregister(&self, handle: &ConnectionHandle) -> bool {
        handle.close();
        let (user, conn) = (handle.user_id(), handle.id());

        let removed = match self.by_user.entry(user) {
            Entry::Occupied(mut set) => {
                let removed = set.get_mut().remove(&conn).is_some();
                if set.get().is_empty() {
                    set.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        };

        if removed {
            debug!(user = %user, conn = %conn, "Connection deregistered");
        }
        removed
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.by_user.contains_key(&user)
    }

    /// Copies of every live handle owned by `user`.
    pub fn connections_for(&self, user: UserId) -> Vec<ConnectionHandle> {
        self.by_user
            .get(&user)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Sorted snapshot of online identities.
    pub fn online_identities(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.by_user.iter().map(|entry| *entry.key()).collect();
        users.sort_unstable();
        users
    }

    pub fn all_connections(&self) -> Vec<ConnectionHandle> {
        self.by_user
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.by_user.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn connection_count_for(&self, user: UserId) -> usize {
        self.by_user.get(&user).map(|set| set.len()).unwrap_or(0)
    }
}
