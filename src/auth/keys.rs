use crate::models::{ApiKey, NewApiKey, Tier};
use crate::storage::KeyStore;
use anyhow::Result;
use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};

/// Marker every issued token starts with.
pub const KEY_MARKER: &str = "zse_";

const PREFIX_LEN: usize = 8;

/// 32 random bytes, hex encoded, behind the marker.
pub fn generate_key() -> String {
    let bytes: [u8; 32] = rand::random();
    format!("{}{}", KEY_MARKER, hex::encode(bytes))
}

/// One-way digest stored in place of the token.
pub fn hash_key(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Short display prefix, e.g. `zse_3f9a`.
pub fn key_prefix(raw: &str) -> String {
    raw.chars().take(PREFIX_LEN).collect()
}

/// A freshly issued key. `token` exists only here; the store keeps the hash.
#[derive(Debug)]
pub struct IssuedKey {
    pub token: String,
    pub key: ApiKey,
}

pub fn issue_key(
    store: &impl KeyStore,
    user_email: &str,
    tier: Tier,
    now: NaiveDateTime,
) -> Result<IssuedKey> {
    let token = generate_key();
    let key = store.insert_api_key(
        &NewApiKey {
            key_hash: hash_key(&token),
            key_prefix: key_prefix(&token),
            user_email: user_email.trim().to_string(),
            tier,
        },
        now,
    )?;
    Ok(IssuedKey { token, key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Repository;
    use chrono::Utc;

    #[test]
    fn test_generate_key_shape() {
        let a = generate_key();
        let b = generate_key();
        assert!(a.starts_with(KEY_MARKER));
        assert_eq!(a.len(), KEY_MARKER.len() + 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_is_stable_and_irreversible_form() {
        let h = hash_key("zse_test");
        assert_eq!(h, hash_key("zse_test"));
        assert_ne!(h, hash_key("zse_test2"));
        assert_eq!(h.len(), 64);
        assert!(!h.contains("zse_"));
    }

    #[test]
    fn test_issue_key_stores_hash_only() {
        let repo = Repository::open_in_memory().unwrap();
        let issued = repo
            .session(|s| issue_key(s, " ops@example.com ", Tier::Pro, Utc::now().naive_utc()))
            .unwrap();

        assert_eq!(issued.key.user_email, "ops@example.com");
        assert_eq!(issued.key.key_prefix, key_prefix(&issued.token));
        assert_eq!((issued.key.daily_limit, issued.key.monthly_limit), (1_000, 50_000));

        let by_hash = repo
            .session(|s| s.find_api_key_by_hash(&hash_key(&issued.token)))
            .unwrap();
        assert_eq!(by_hash.map(|k| k.id), Some(issued.key.id));

        let by_token = repo.session(|s| s.find_api_key_by_hash(&issued.token)).unwrap();
        assert!(by_token.is_none());
    }
}
