//! # parley-shared
//!
//! Types shared by the Parley store and server: user identities, the
//! persisted message record, the realtime wire protocol and the signed
//! session tokens that carry an identity claim from the HTTP layer to the
//! realtime gateway.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod token;
pub mod types;

pub use error::TokenError;
pub use models::{Message, PublicUser};
pub use types::UserId;
