use thiserror::Error;

/// Reasons a session token is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed session token")]
    Malformed,

    #[error("Session token expired")]
    Expired,

    #[error("Session token signature is invalid")]
    BadSignature,
}
