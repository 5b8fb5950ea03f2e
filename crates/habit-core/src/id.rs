//! ID generation for habit documents
//!
//! Format: <prefix>-xxxxxxxxxx (10 lowercase Crockford base32 chars)

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Error, Result};

/// Number of encoded characters after the prefix
pub const ID_HASH_LEN: usize = 10;

/// Generate a unique document ID
///
/// Uses UUID + timestamp hash, encoded as base32 lowercase.
pub fn generate_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4();
    let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);

    let mut hasher = Sha256::new();
    hasher.update(uuid.as_bytes());
    hasher.update(timestamp.to_le_bytes());

    let hash = hasher.finalize();

    // 8 bytes give 13 base32 chars, enough for the 10 we keep
    let encoded = base32::encode(base32::Alphabet::Crockford, &hash[..8])
        .to_lowercase()
        .chars()
        .take(ID_HASH_LEN)
        .collect::<String>();

    format!("{}-{}", prefix, encoded)
}

/// Parse an ID to extract prefix and hash
pub fn parse_id(id: &str) -> Option<(&str, &str)> {
    let (prefix, hash) = id.split_once('-')?;
    if prefix.is_empty() || hash.is_empty() {
        return None;
    }
    Some((prefix, hash))
}

/// Check that a caller-supplied ID is well formed.
///
/// Only the shape is checked; the prefix is not, so ids minted under an
/// older prefix configuration stay addressable.
pub fn validate_id(id: &str) -> Result<()> {
    let valid = parse_id(id).is_some_and(|(prefix, hash)| {
        prefix.chars().all(|c| c.is_ascii_alphanumeric())
            && hash.len() == ID_HASH_LEN
            && hash
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
    });

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("malformed id: {id:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id() {
        let id = generate_id("hab");
        assert!(id.starts_with("hab-"));
        assert_eq!(id.len(), 4 + ID_HASH_LEN);
        assert!(validate_id(&id).is_ok());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(generate_id("usr"), generate_id("usr"));
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("trk-abc"), Some(("trk", "abc")));
        assert_eq!(parse_id("trk"), None);
        assert_eq!(parse_id("-abc"), None);
    }

    #[test]
    fn test_validate_rejects_malformed() {
        assert!(validate_id("").is_err());
        assert!(validate_id("hab-short").is_err());
        assert!(validate_id("hab-ABCDEFGHJK").is_err());
        assert!(validate_id("h b-abcdefghjk").is_err());
        assert!(validate_id("hab-abcdefghjk").is_ok());
    }
}
