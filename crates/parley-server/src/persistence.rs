//! Async access to the synchronous SQLite store.
//!
//! Every query runs on tokio's blocking pool behind a single mutex; no store
//! call ever happens while session state is borrowed.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

use parley_shared::{Message, UserId};
use parley_store::{Database, StoreError};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Storage worker failed: {0}")]
    Worker(String),
}

/// Shared handle to the [`Database`].
#[derive(Clone)]
pub struct Db(Arc<Mutex<Database>>);

impl Db {
    pub fn new(database: Database) -> Self {
        Self(Arc::new(Mutex::new(database)))
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> Result<T, PersistError>
    where
        F: FnOnce(&Database) -> parley_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.0);
        let result = tokio::task::spawn_blocking(move || {
            // Poisoning is ignored; the connection holds no partial state.
            let guard = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| PersistError::Worker(e.to_string()))?;

        Ok(result?)
    }
}

/// Where messages are kept. The delivery path writes through this before it
/// notifies anyone.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save(&self, message: &Message) -> Result<(), PersistError>;

    /// Both directions of the conversation between `a` and `b`, oldest first.
    async fn fetch_history(&self, a: UserId, b: UserId) -> Result<Vec<Message>, PersistError>;
}

pub struct SqliteMessageStore {
    db: Db,
}

impl SqliteMessageStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn save(&self, message: &Message) -> Result<(), PersistError> {
        let message = message.clone();
        self.db.call(move |db| db.insert_message(&message)).await
    }

    async fn fetch_history(&self, a: UserId, b: UserId) -> Result<Vec<Message>, PersistError> {
        self.db.call(move |db| db.get_conversation(a, b)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_store::User;

    async fn seeded() -> (Db, UserId, UserId) {
        let db = Db::new(Database::open_in_memory().unwrap());
        let alice = User::new("alice@example.com", "Alice", "h".into());
        let bob = User::new("bob@example.com", "Bob", "h".into());
        let (a, b) = (alice.id, bob.id);
        db.call(move |db| {
            db.insert_user(&alice)?;
            db.insert_user(&bob)
        })
        .await
        .unwrap();
        (db, a, b)
    }

    #[tokio::test]
    async fn saved_messages_come_back_in_history() {
        let (db, alice, bob) = seeded().await;
        let store = SqliteMessageStore::new(db);

        let hello = Message::new(alice, bob, Some("hello".into()), None);
        let reply = Message::new(bob, alice, Some("hey".into()), None);
        store.save(&hello).await.unwrap();
        store.save(&reply).await.unwrap();

        let history = store.fetch_history(alice, bob).await.unwrap();
        assert_eq!(history, vec![hello, reply]);
    }

    #[tokio::test]
    async fn save_reports_store_errors() {
        let (db, alice, _) = seeded().await;
        let store = SqliteMessageStore::new(db);

        let orphan = Message::new(alice, UserId::new(), Some("?".into()), None);
        assert!(matches!(
            store.save(&orphan).await,
            Err(PersistError::Store(_))
        ));
    }

    #[tokio::test]
    async fn call_maps_not_found() {
        let (db, _, _) = seeded().await;
        let missing = UserId::new();
        let err = db.call(move |db| db.get_user(missing)).await.unwrap_err();
        assert!(matches!(err, PersistError::Store(StoreError::NotFound)));
    }
}
