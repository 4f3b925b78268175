//! Replay window for launch payloads
//!
//! A payload is stale once `now - auth_date` exceeds the configured maximum
//! age. A payload without a parseable `auth_date` is always stale.

use super::launch::field;

/// The payload's `auth_date` in unix seconds
pub fn auth_date(raw: &str) -> Option<i64> {
    field(raw, "auth_date")?.trim().parse::<i64>().ok()
}

/// Whether the payload falls outside the replay window at `now`.
///
/// Timestamps ahead of `now` are accepted; clock skew between the Telegram
/// client and this host is common.
pub fn is_expired(raw: &str, max_age_secs: i64, now: i64) -> bool {
    match auth_date(raw) {
        Some(issued) => now.saturating_sub(issued) > max_age_secs,
        None => true,
    }
}
