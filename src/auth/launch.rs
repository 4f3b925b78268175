//! Launch payload field access
//!
//! A launch payload is the raw `initData` query string exactly as the
//! Telegram client produced it. Everything here works on that raw string by
//! splitting on `&` and the first `=`; nothing goes through a generic
//! query-string parser, so no value is decoded before the signature check
//! has seen its exact bytes.

use crate::identity::{IdentityClaim, TelegramUser};
use std::borrow::Cow;

/// Iterate `(key, raw_value)` segments. `None` items mark malformed
/// segments (no `=` or an empty key).
pub(crate) fn segments(raw: &str) -> impl Iterator<Item = Option<(&str, &str)>> {
    raw.split('&').map(|segment| {
        segment
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
    })
}

/// Literal scan for the first raw (still encoded) value of `key`
pub fn field_raw<'a>(raw: &'a str, key: &str) -> Option<&'a str> {
    segments(raw)
        .flatten()
        .find(|(k, _)| *k == key)
        .map(|(_, value)| value)
}

/// Decode one form-urlencoded value: `+` is a space, `%XX` is a byte.
///
/// Returns `None` when the decoded bytes are not UTF-8.
pub fn decode_value(value: &str) -> Option<Cow<'_, str>> {
    if value.contains('+') {
        let spaced = value.replace('+', " ");
        urlencoding::decode(&spaced)
            .ok()
            .map(|decoded| Cow::Owned(decoded.into_owned()))
    } else {
        urlencoding::decode(value).ok()
    }
}

/// Decoded value of `key`
pub fn field(raw: &str, key: &str) -> Option<String> {
    field_raw(raw, key)
        .and_then(decode_value)
        .map(Cow::into_owned)
}

/// Identity asserted by a payload.
///
/// Mini App payloads carry a JSON `user` field; Login Widget payloads carry
/// flat `id`, `first_name`, ... fields. Only call this on a payload whose
/// signature has been verified.
pub fn identity_claim(raw: &str) -> Option<IdentityClaim> {
    if let Some(user_json) = field(raw, "user") {
        let user: TelegramUser = serde_json::from_str(&user_json).ok()?;
        return Some(user.into());
    }

    let id: i64 = field(raw, "id")?.trim().parse().ok()?;
    let user = TelegramUser {
        id,
        username: field(raw, "username"),
        first_name: field(raw, "first_name").unwrap_or_default(),
        last_name: field(raw, "last_name"),
        photo_url: field(raw, "photo_url"),
    };
    Some(user.into())
}
