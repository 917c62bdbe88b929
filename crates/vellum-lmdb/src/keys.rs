//! Byte layout of record and event keys
//!
//! Keys are `location \x1f partition_key \x1f id`. Record ids and partition
//! keys never contain control characters, so the separator keeps prefix scans
//! exact and lexicographic order groups a location's keys together.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use vellum_core::types::event_id_prefix;
use vellum_core::{Result, VellumError};

pub const SEPARATOR: u8 = 0x1f;

pub fn item_key(location: &str, partition_key: &str, id: &str) -> Vec<u8> {
    let mut key = partition_prefix(location, partition_key);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Prefix shared by every key of one location
pub fn location_prefix(location: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(location.len() + 1);
    key.extend_from_slice(location.as_bytes());
    key.push(SEPARATOR);
    key
}

/// Prefix shared by every key of one partition in a location
pub fn partition_prefix(location: &str, partition_key: &str) -> Vec<u8> {
    let mut key = location_prefix(location);
    key.extend_from_slice(partition_key.as_bytes());
    key.push(SEPARATOR);
    key
}

/// Prefix of the event keys of one record, in sequence order
pub fn history_prefix(location: &str, partition_key: &str, record_id: &str) -> Vec<u8> {
    item_key(location, partition_key, &event_id_prefix(record_id))
}

/// Opaque continuation token for the last key of a page
pub fn encode_continuation(key: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(key)
}

/// Decode a continuation token, rejecting keys outside `location`
pub fn decode_continuation(location: &str, token: &str) -> Result<Vec<u8>> {
    let key = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| VellumError::Serialization(format!("invalid continuation token: {e}")))?;
    if !key.starts_with(&location_prefix(location)) {
        return Err(VellumError::Serialization(format!(
            "continuation token does not belong to {location}"
        )));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_keys_sort_together() {
        let a = item_key("widgets", "p", "z");
        let b = item_key("widgets", "q", "a");
        let other = item_key("widgets2", "a", "a");
        assert!(a < b);
        assert!(a.starts_with(&location_prefix("widgets")));
        assert!(!other.starts_with(&location_prefix("widgets")));
    }

    #[test]
    fn test_continuation_is_scoped_to_location() {
        let token = encode_continuation(&item_key("widgets", "p", "x"));
        assert_eq!(
            decode_continuation("widgets", &token).unwrap(),
            item_key("widgets", "p", "x")
        );
        assert!(decode_continuation("gadgets", &token).is_err());
        assert!(decode_continuation("widgets", "***").is_err());
    }

    #[test]
    fn test_history_prefix_covers_one_record() {
        let prefix = history_prefix("widgets", "p", "a");
        assert!(item_key("widgets", "p", "EVENT^a^00000001").starts_with(&prefix));
        assert!(!item_key("widgets", "p", "EVENT^ab^00000001").starts_with(&prefix));
        assert!(!item_key("widgets", "q", "EVENT^a^00000001").starts_with(&prefix));
    }
}
