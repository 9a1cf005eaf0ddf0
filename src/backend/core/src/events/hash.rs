//! Content and chain hashing for tamper evidence.
//!
//! Every event carries two hex-encoded SHA-256 digests:
//!
//! - `content_hash` over the canonical payload bytes
//! - `chain_hash` over `content_hash || prev_chain_hash`
//!
//! The first event in a stream chains from a fixed genesis seed. Any
//! modification of a stored payload breaks every chain hash from that
//! position onward, which is what verification looks for.

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::events::event::Payload;

/// Seed hashed into the first link of every stream.
const GENESIS_SEED: &[u8] = b"veritas-chain-genesis-v1";

/// Chain value a stream starts from, before any event exists.
pub fn genesis_hash() -> String {
    hex::encode(Sha256::digest(GENESIS_SEED))
}

/// Hash the canonical serialization of a payload.
pub fn content_hash(payload: &Payload) -> Result<String> {
    let bytes = payload.canonical_bytes()?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Extend the chain: hash this event's content hash together with the
/// previous link. `prev` is `None` only for the first event of a stream.
pub fn chain_hash(content_hash: &str, prev: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_hash.as_bytes());
    match prev {
        Some(prev) => hasher.update(prev.as_bytes()),
        None => hasher.update(genesis_hash().as_bytes()),
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_hash_is_deterministic() {
        let payload = Payload::new("diary_entry", 1, json!({"text": "mild headache"}));
        assert_eq!(
            content_hash(&payload).unwrap(),
            content_hash(&payload).unwrap()
        );
    }

    #[test]
    fn test_content_hash_detects_payload_change() {
        let a = Payload::new("diary_entry", 1, json!({"text": "mild headache"}));
        let b = Payload::new("diary_entry", 1, json!({"text": "mild headachf"}));
        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_chain_links_depend_on_prev() {
        let payload = Payload::new("diary_entry", 1, json!({"text": "ok"}));
        let content = content_hash(&payload).unwrap();
        let first = chain_hash(&content, None);
        let second = chain_hash(&content, Some(&first));
        assert_ne!(first, second);
        // Genesis chaining is explicit, not an empty prev.
        assert_eq!(first, chain_hash(&content, Some(&genesis_hash())));
    }
}
