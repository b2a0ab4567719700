//! Domain model structs persisted in the SQLite database.
//!
//! [`Message`] lives in `parley-shared` because it also travels over the
//! realtime connection; it is re-exported here for convenience.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::constants::DEFAULT_PROFILE_PIC;
use parley_shared::{PublicUser, UserId};

pub use parley_shared::Message;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.  The primary key is a random UUID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Stable identity handed out in session tokens.
    pub id: UserId,
    /// Login name, always lower-cased.
    pub email: String,
    /// Display name.
    pub full_name: String,
    /// Argon2id PHC string.  Never leaves the server.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Avatar URL.
    pub profile_pic: String,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// Last profile change.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A fresh account with the default avatar.
    pub fn new(email: &str, full_name: &str, password_hash: String) -> Self {
        let now = Utc::now().trunc_subsecs(6);
        Self {
            id: UserId::new(),
            email: normalize_email(email),
            full_name: full_name.trim().to_string(),
            password_hash,
            profile_pic: DEFAULT_PROFILE_PIC.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Client-facing view without the credential hash.
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            profile_pic: self.profile_pic.clone(),
            created_at: self.created_at,
        }
    }
}

/// Emails are unique case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
