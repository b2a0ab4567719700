//! Identity claims: issuing and checking session tokens, resolving a claim
//! to a known user, and password hashing.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::Utc;
use ed25519_dalek::{SigningKey, VerifyingKey};
use thiserror::Error;
use tracing::debug;

use parley_shared::constants::SESSION_COOKIE;
use parley_shared::token::{create_session_token, verify_session_token, SessionToken};
use parley_shared::{TokenError, UserId};

use crate::api::AppState;
use crate::error::ServerError;
use crate::persistence::Db;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No session token provided")]
    MissingClaim,

    #[error("Invalid session token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("User not found")]
    UnknownUser,

    #[error("Auth backend error: {0}")]
    Backend(String),
}

/// Turns the claim a client presents into the identity it stands for.
#[async_trait]
pub trait AuthResolver: Send + Sync {
    async fn resolve(&self, claim: &str) -> Result<UserId, AuthError>;
}

/// Signs and checks session tokens with the server's Ed25519 key.
pub struct SessionTokens {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    ttl: chrono::Duration,
}

impl SessionTokens {
    pub fn new(signing_key: SigningKey, ttl: chrono::Duration) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
            ttl,
        }
    }

    /// A fresh encoded token for `user_id`, valid for the configured TTL.
    pub fn issue(&self, user_id: UserId) -> String {
        create_session_token(user_id, Utc::now() + self.ttl, &self.signing_key).encode()
    }

    pub fn verify(&self, claim: &str) -> Result<UserId, TokenError> {
        let token = SessionToken::decode(claim)?;
        verify_session_token(&token, &self.verifying_key)
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }
}

/// Accepts a claim only if the token checks out and its user still exists.
pub struct TokenAuthResolver {
    tokens: Arc<SessionTokens>,
    db: Db,
}

impl TokenAuthResolver {
    pub fn new(tokens: Arc<SessionTokens>, db: Db) -> Self {
        Self { tokens, db }
    }
}

#[async_trait]
impl AuthResolver for TokenAuthResolver {
    async fn resolve(&self, claim: &str) -> Result<UserId, AuthError> {
        let user = self.tokens.verify(claim)?;

        let exists = self
            .db
            .call(move |db| db.user_exists(user))
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        if !exists {
            debug!(user = %user, "Token for unknown user");
            return Err(AuthError::UnknownUser);
        }
        Ok(user)
    }
}

/// Session token from `Authorization: Bearer`, else from the session cookie.
pub fn claim_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// The authenticated caller of an HTTP handler.
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let claim = claim_from_headers(&parts.headers).ok_or(AuthError::MissingClaim)?;
        let user = state.auth.resolve(&claim).await?;
        Ok(AuthUser(user))
    }
}

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

/// Argon2id PHC string for `password`. Runs on the blocking pool.
pub async fn hash_password(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(rand::thread_rng());
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Backend(format!("Failed to hash password: {e}")))
    })
    .await
    .map_err(|e| AuthError::Backend(e.to_string()))?
}

/// Whether `password` matches the stored `hash`. A malformed hash never
/// matches.
pub async fn verify_password(password: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || {
        let Ok(parsed) = PasswordHash::new(&hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .map_err(|e| AuthError::Backend(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use parley_store::{Database, User};
    use rand::rngs::OsRng;

    fn tokens(ttl: chrono::Duration) -> Arc<SessionTokens> {
        Arc::new(SessionTokens::new(SigningKey::generate(&mut OsRng), ttl))
    }

    #[test]
    fn issued_token_verifies() {
        let tokens = tokens(chrono::Duration::days(7));
        let user = UserId::new();
        assert_eq!(tokens.verify(&tokens.issue(user)).unwrap(), user);
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = tokens(chrono::Duration::seconds(-5));
        let claim = tokens.issue(UserId::new());
        assert_eq!(tokens.verify(&claim), Err(TokenError::Expired));
    }

    #[test]
    fn token_from_another_server_is_rejected() {
        let ours = tokens(chrono::Duration::days(1));
        let theirs = tokens(chrono::Duration::days(1));
        assert_eq!(
            ours.verify(&theirs.issue(UserId::new())),
            Err(TokenError::BadSignature)
        );
    }

    #[tokio::test]
    async fn resolver_requires_existing_user() {
        let db = Db::new(Database::open_in_memory().unwrap());
        let user = User::new("erin@example.com", "Erin", "h".into());
        let known = user.id;
        db.call(move |db| db.insert_user(&user)).await.unwrap();

        let tokens = tokens(chrono::Duration::days(1));
        let resolver = TokenAuthResolver::new(Arc::clone(&tokens), db);

        assert_eq!(resolver.resolve(&tokens.issue(known)).await.unwrap(), known);
        assert!(matches!(
            resolver.resolve(&tokens.issue(UserId::new())).await,
            Err(AuthError::UnknownUser)
        ));
        assert!(matches!(
            resolver.resolve("garbage").await,
            Err(AuthError::InvalidToken(TokenError::Malformed))
        ));
    }

    #[test]
    fn claim_from_bearer_or_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(claim_from_headers(&headers), None);

        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; jwt=abc.1.ff; lang=en"));
        assert_eq!(claim_from_headers(&headers).as_deref(), Some("abc.1.ff"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(claim_from_headers(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn empty_cookie_is_no_claim() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("jwt="));
        assert_eq!(claim_from_headers(&headers), None);
    }

    #[tokio::test]
    async fn password_round_trip() {
        let hash = hash_password("hunter22".into()).await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter22".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("hunter23".into(), hash).await.unwrap());
        assert!(!verify_password("x".into(), "not-a-hash".into()).await.unwrap());
    }
}
