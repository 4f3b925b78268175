//! Telegram WebApp authentication
//!
//! This module turns an untrusted launch payload into a trusted identity:
//!
//! 1. [`signature::verify`] checks the payload's HMAC against the bot token
//! 2. [`replay::is_expired`] enforces the `auth_date` window
//! 3. [`launch`] extracts the identity claim from the verified payload
//! 4. [`session::SessionIssuer`] mints the 7-day credential
//! 5. [`carrier`] and [`bearer`] move identity and credential between the
//!    client and the server on every later request
//!
//! Verification functions return `bool`/`Option`/`Result` values and never
//! panic on hostile input; only the HTTP layer maps failures to statuses.

pub mod bearer;
pub mod carrier;
pub mod launch;
pub mod replay;
pub mod session;
pub mod signature;

use crate::config::{AppConfig, Secret};
use crate::identity::IdentityClaim;

pub use carrier::TrustArtifacts;
pub use session::{Credential, SessionIssuer};

/// Current unix time in seconds
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Safely create a preview of tokens and payloads for logging
pub fn create_safe_token_preview(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 16 {
        format!("{}...", chars.iter().take(4).collect::<String>())
    } else {
        format!(
            "{}...{}",
            chars[..6].iter().collect::<String>(),
            chars[chars.len() - 4..].iter().collect::<String>()
        )
    }
}

/// Why a launch payload was refused.
///
/// The variants exist for logs only. Callers must present all of them to
/// clients identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LaunchRejection {
    #[error("launch payload signature invalid")]
    SignatureInvalid,
    #[error("launch payload expired")]
    Expired,
    #[error("launch payload carries no usable identity")]
    Malformed,
}

/// Signature, replay and identity checks for a raw launch payload.
#[derive(Debug, Clone)]
pub struct LaunchVerifier {
    bot_token: Option<Secret>,
    max_age_secs: i64,
}

impl LaunchVerifier {
    pub fn new(bot_token: Option<Secret>, max_age_secs: i64) -> Self {
        Self {
            bot_token,
            max_age_secs,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.bot_token.clone(), config.init_data_max_age_secs)
    }

    /// Verify `raw` and return the identity it asserts.
    pub fn check(&self, raw: &str) -> Result<IdentityClaim, LaunchRejection> {
        self.check_at(raw, now_unix())
    }

    pub fn check_at(&self, raw: &str, now: i64) -> Result<IdentityClaim, LaunchRejection> {
        let bot_token = self.bot_token.as_ref().map(Secret::expose).unwrap_or("");
        if !signature::verify(raw, bot_token) {
            return Err(LaunchRejection::SignatureInvalid);
        }
        if replay::is_expired(raw, self.max_age_secs, now) {
            return Err(LaunchRejection::Expired);
        }
        launch::identity_claim(raw).ok_or(LaunchRejection::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT_TOKEN: &str = "123456:TEST-bot-token";

    fn payload(auth_date: i64) -> String {
        let unsigned = format!(
            "auth_date={auth_date}&query_id=AAF&user={}",
            urlencoding::encode(r#"{"id":111,"first_name":"Ann","username":"ann"}"#)
        );
        let hash = signature::sign(&unsigned, BOT_TOKEN).unwrap();
        format!("{unsigned}&hash={hash}")
    }

    #[test]
    fn test_token_preview_hides_middle() {
        let preview = create_safe_token_preview("eyJhbGciOiJIUzI1NiJ9.payload-section.signature-part");
        assert!(preview.starts_with("eyJhbG"));
        assert!(preview.ends_with("part"));
        assert!(!preview.contains("payload-section"));
        assert_eq!(create_safe_token_preview("short"), "shor...");
        assert_eq!(create_safe_token_preview(""), "...");
    }

    #[test]
    fn test_launch_verifier_accepts_fresh_signed_payload() {
        let verifier = LaunchVerifier::new(Some(Secret::new(BOT_TOKEN)), 86_400);
        let now = 1_700_000_000;
        let claim = verifier.check_at(&payload(now - 10), now).unwrap();
        assert_eq!(claim.telegram_id, "111");
        assert_eq!(claim.profile.first_name, "Ann");
    }

    #[test]
    fn test_launch_verifier_rejections() {
        let now = 1_700_000_000;
        let verifier = LaunchVerifier::new(Some(Secret::new(BOT_TOKEN)), 86_400);
        assert_eq!(
            verifier.check_at(&payload(now - 86_401), now),
            Err(LaunchRejection::Expired)
        );

        let wrong_bot = LaunchVerifier::new(Some(Secret::new("999:other")), 86_400);
        assert_eq!(
            wrong_bot.check_at(&payload(now), now),
            Err(LaunchRejection::SignatureInvalid)
        );

        let no_bot = LaunchVerifier::new(None, 86_400);
        assert_eq!(
            no_bot.check_at(&payload(now), now),
            Err(LaunchRejection::SignatureInvalid)
        );
    }

    #[test]
    fn test_launch_verifier_requires_identity() {
        let now = 1_700_000_000;
        let unsigned = format!("auth_date={now}&query_id=AAF");
        let hash = signature::sign(&unsigned, BOT_TOKEN).unwrap();
        let verifier = LaunchVerifier::new(Some(Secret::new(BOT_TOKEN)), 86_400);
        assert_eq!(
            verifier.check_at(&format!("{unsigned}&hash={hash}"), now),
            Err(LaunchRejection::Malformed)
        );
    }
}
