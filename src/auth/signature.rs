//! Launch payload signature verification
//!
//! Canonicalization, step by step:
//!
//! 1. split the raw payload on `&`, each segment on its first `=`
//! 2. drop the `hash` segment (and only that one; `signature` stays)
//! 3. percent-decode every remaining value
//! 4. sort by key
//! 5. join as `key=value` lines separated by `\n`
//!
//! The check string is signed with `HMAC-SHA256(secret_key, check_string)`
//! where `secret_key = HMAC-SHA256("WebAppData", bot_token)`, and the hex
//! digest is compared with `hash` in constant time.

use super::launch::{decode_value, segments};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashSet;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HMAC key used to derive the per-bot secret
const WEBAPP_DATA_KEY: &[u8] = b"WebAppData";
const HASH_FIELD: &str = "hash";
const DIGEST_LEN: usize = 32;

fn hmac_sha256(key: &[u8], message: &[u8]) -> Option<[u8; DIGEST_LEN]> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(message);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Some(out)
}

fn derive_secret_key(bot_token: &str) -> Option<[u8; DIGEST_LEN]> {
    hmac_sha256(WEBAPP_DATA_KEY, bot_token.as_bytes())
}

/// Build the data-check string and pull out the raw `hash` value.
///
/// Returns `None` for malformed segments, undecodable values, repeated keys,
/// or a missing `hash`.
pub fn check_string(raw: &str) -> Option<(String, &str)> {
    let mut seen = HashSet::new();
    let mut hash = None;
    let mut fields = Vec::new();

    for segment in segments(raw) {
        let (key, value) = segment?;
        if !seen.insert(key) {
            return None;
        }
        if key == HASH_FIELD {
            hash = Some(value);
            continue;
        }
        fields.push((key, decode_value(value)?));
    }

    fields.sort_unstable_by(|a, b| a.0.cmp(b.0));
    let check = fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n");
    Some((check, hash?))
}

/// Compute the hex signature for a payload that has no `hash` field yet.
///
/// Used to produce fixtures and by tooling that emulates the Telegram client.
pub fn sign(unsigned_payload: &str, bot_token: &str) -> Option<String> {
    if bot_token.is_empty() {
        return None;
    }
    // a placeholder hash lets check_string run unchanged; it is dropped again
    let (check, _) = check_string(&format!("{unsigned_payload}&{HASH_FIELD}=0"))?;
    let secret = derive_secret_key(bot_token)?;
    hmac_sha256(&secret, check.as_bytes()).map(hex::encode)
}

/// Verify a raw launch payload against the bot token.
///
/// Never panics and never reports why verification failed: a missing token,
/// a malformed payload and a wrong signature all yield `false`.
pub fn verify(raw_payload: &str, bot_token: &str) -> bool {
    if bot_token.is_empty() || raw_payload.is_empty() {
        return false;
    }
    let Some((check, provided_hex)) = check_string(raw_payload) else {
        return false;
    };
    let Ok(provided) = hex::decode(provided_hex) else {
        return false;
    };
    if provided.len() != DIGEST_LEN {
        return false;
    }
    let Some(secret) = derive_secret_key(bot_token) else {
        return false;
    };
    let Some(expected) = hmac_sha256(&secret, check.as_bytes()) else {
        return false;
    };
    bool::from(expected.as_slice().ct_eq(provided.as_slice()))
}
