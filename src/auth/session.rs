//! Session credentials
//!
//! HS256 JWTs signed with the server secret. A credential binds an internal
//! account id to its Telegram id and carries the admin flag as it was at
//! issue time; the flag is a hint, the store stays authoritative.

use crate::config::Secret;
use crate::store::Account;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ISSUER: &str = "ai-knowledge-base";
pub const AUDIENCE: &str = "telegram-mini-app";
/// Credential lifetime (7 days)
pub const SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Telegram id, duplicated in `telegram_id`
    pub sub: String,
    pub user_id: i64,
    pub telegram_id: String,
    pub is_admin: bool,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Credential signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for SessionIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIssuer")
            .field("algorithm", &Algorithm::HS256)
            .field("issuer", &ISSUER)
            .field("audience", &AUDIENCE)
            .finish_non_exhaustive()
    }
}

impl SessionIssuer {
    pub fn new(secret: &Secret) -> Self {
        let key = secret.expose().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);
        // expiry is checked against an explicit clock in verify_at
        validation.validate_exp = false;
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
        }
    }

    /// Mint a credential for `account`, valid for [`SESSION_TTL_SECS`]
    pub fn issue(&self, account: &Account) -> Result<String, SessionError> {
        self.issue_at(account, super::now_unix())
    }

    pub fn issue_at(&self, account: &Account, now: i64) -> Result<String, SessionError> {
        let claims = Credential {
            sub: account.telegram_id.clone(),
            user_id: account.id,
            telegram_id: account.telegram_id.clone(),
            is_admin: account.is_admin,
            iat: now,
            exp: now.saturating_add(SESSION_TTL_SECS),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Decode and check a credential. Any failure yields `None`.
    pub fn verify(&self, token: &str) -> Option<Credential> {
        self.verify_at(token, super::now_unix())
    }

    /// Valid while `now < exp`, with no leeway.
    pub fn verify_at(&self, token: &str, now: i64) -> Option<Credential> {
        let data = match decode::<Credential>(token, &self.decoding, &self.validation) {
            Ok(data) => data,
            Err(err) => {
                tracing::debug!(
                    token = %super::create_safe_token_preview(token),
                    error = %err,
                    "credential rejected"
                );
                return None;
            }
        };
        let claims = data.claims;
        if now >= claims.exp {
            tracing::debug!(telegram_id = %claims.telegram_id, "credential expired");
            return None;
        }
        if claims.sub != claims.telegram_id {
            return None;
        }
        Some(claims)
    }
}
