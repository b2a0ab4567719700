//! # parley-store
//!
//! Durable storage for the Parley server, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for user accounts and
//! direct messages.  Callers on an async runtime are expected to run these
//! helpers on a blocking thread.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
