use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SIGNATURE_LENGTH};
use uuid::Uuid;

use crate::error::TokenError;
use crate::types::UserId;

// Token signed by the server at login/signup, presented back on every
// authenticated request and on the realtime connection handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub user_id: UserId,
    pub valid_until: DateTime<Utc>,
    pub signature: [u8; SIGNATURE_LENGTH],
}

impl SessionToken {
    /// Compact text form: `<user uuid>.<expiry unix secs>.<signature hex>`.
    pub fn encode(&self) -> String {
        format!(
            "{}.{}.{}",
            self.user_id.0.simple(),
            self.valid_until.timestamp(),
            hex::encode(self.signature)
        )
    }

    /// Parse the compact text form. Does not check expiry or signature.
    pub fn decode(raw: &str) -> Result<Self, TokenError> {
        let mut parts = raw.trim().split('.');
        let (Some(user), Some(expiry), Some(sig), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let user_id = Uuid::parse_str(user)
            .map(UserId)
            .map_err(|_| TokenError::Malformed)?;
        let secs: i64 = expiry.parse().map_err(|_| TokenError::Malformed)?;
        let valid_until = DateTime::from_timestamp(secs, 0).ok_or(TokenError::Malformed)?;

        let sig_bytes = hex::decode(sig).map_err(|_| TokenError::Malformed)?;
        let signature: [u8; SIGNATURE_LENGTH] =
            sig_bytes.try_into().map_err(|_| TokenError::Malformed)?;

        Ok(Self {
            user_id,
            valid_until,
            signature,
        })
    }
}

// payload = user_id (16 bytes) || valid_until (unix seconds, big endian)
fn signing_payload(user_id: &UserId, valid_until: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::with_capacity(24);
    payload.extend_from_slice(user_id.as_bytes());
    payload.extend_from_slice(&valid_until.timestamp().to_be_bytes());
    payload
}

pub fn create_session_token(
    user_id: UserId,
    valid_until: DateTime<Utc>,
    server_signing_key: &SigningKey,
) -> SessionToken {
    // The text form carries whole seconds only.
    let valid_until = DateTime::from_timestamp(valid_until.timestamp(), 0).unwrap_or(valid_until);
    let signature = server_signing_key.sign(&signing_payload(&user_id, &valid_until));

    SessionToken {
        user_id,
        valid_until,
        signature: signature.to_bytes(),
    }
}

/// Check expiry and signature, returning the identity the token vouches for.
pub fn verify_session_token(
    token: &SessionToken,
    server_key: &VerifyingKey,
) -> Result<UserId, TokenError> {
    if Utc::now() > token.valid_until {
        return Err(TokenError::Expired);
    }

    let signature = Signature::from_bytes(&token.signature);
    server_key
        .verify(&signing_payload(&token.user_id, &token.valid_until), &signature)
        .map_err(|_| TokenError::BadSignature)?;

    Ok(token.user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::rngs::OsRng;

    #[test]
    fn test_session_token_valid() {
        let server_key = SigningKey::generate(&mut OsRng);
        let user = UserId::new();

        let token = create_session_token(user, Utc::now() + Duration::days(7), &server_key);

        assert_eq!(
            verify_session_token(&token, &server_key.verifying_key()),
            Ok(user)
        );
    }

    #[test]
    fn test_session_token_expired() {
        let server_key = SigningKey::generate(&mut OsRng);

        let token = create_session_token(UserId::new(), Utc::now() - Duration::days(1), &server_key);

        assert_eq!(
            verify_session_token(&token, &server_key.verifying_key()),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_session_token_wrong_server_key() {
        let server_key = SigningKey::generate(&mut OsRng);
        let wrong_key = SigningKey::generate(&mut OsRng);

        let token = create_session_token(UserId::new(), Utc::now() + Duration::days(7), &server_key);

        assert_eq!(
            verify_session_token(&token, &wrong_key.verifying_key()),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_tampered_identity_is_rejected() {
        let server_key = SigningKey::generate(&mut OsRng);
        let mut token =
            create_session_token(UserId::new(), Utc::now() + Duration::days(7), &server_key);
        token.user_id = UserId::new();

        assert_eq!(
            verify_session_token(&token, &server_key.verifying_key()),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_encoded_form_survives_parsing() {
        let server_key = SigningKey::generate(&mut OsRng);
        let token = create_session_token(UserId::new(), Utc::now() + Duration::hours(1), &server_key);

        let parsed = SessionToken::decode(&token.encode()).unwrap();
        assert_eq!(parsed, token);
        assert!(verify_session_token(&parsed, &server_key.verifying_key()).is_ok());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(SessionToken::decode(""), Err(TokenError::Malformed));
        assert_eq!(SessionToken::decode("a.b.c"), Err(TokenError::Malformed));
        assert_eq!(SessionToken::decode("a.b.c.d"), Err(TokenError::Malformed));

        let user = UserId::new().0.simple().to_string();
        assert_eq!(
            SessionToken::decode(&format!("{user}.100.abcd")),
            Err(TokenError::Malformed)
        );
    }
}
