//! Commit-reveal codec.
//!
//! A commitment binds a player to a noun without disclosing it:
//!
//! ```text
//! payload    = "{player_id}{round_key}{choice}{nonce}"
//! commitment = hex(SHA-256(payload))          // 64 lowercase hex chars
//! ```
//!
//! Only the commitment leaves the client at commit time. On reveal the
//! server recomputes the digest from `(choice, nonce)` and rejects the
//! reveal if it differs, so derivation must be byte-for-byte deterministic.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes per nonce (192 bits, 32 URL-safe characters).
pub const NONCE_BYTES: usize = 24;

/// Derive the commitment for a choice.
pub fn derive_commitment(player_id: u64, round_key: &str, choice: usize, nonce: &str) -> String {
    let payload = format!("{player_id}{round_key}{choice}{nonce}");
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Produce a fresh nonce from the operating system's CSPRNG.
///
/// There is deliberately no fallback generator: if the OS source fails the
/// caller gets [`CodecError::EntropyUnavailable`] and must abort the commit.
pub fn fresh_nonce() -> Result<String, CodecError> {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CodecError::EntropyUnavailable(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// A sealed choice ready to commit: the preimage plus its digest.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedChoice {
    pub choice: usize,
    pub nonce: String,
    pub hash: String,
}

impl SealedChoice {
    /// Generate a nonce and derive the commitment in one step.
    pub fn seal(player_id: u64, round_key: &str, choice: usize) -> Result<Self, CodecError> {
        let nonce = fresh_nonce()?;
        let hash = derive_commitment(player_id, round_key, choice, &nonce);
        Ok(Self { choice, nonce, hash })
    }

    /// Whether this preimage still opens `hash` for the given identity and round.
    pub fn verifies(&self, player_id: u64, round_key: &str) -> bool {
        derive_commitment(player_id, round_key, self.choice, &self.nonce) == self.hash
    }
}

impl std::fmt::Debug for SealedChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedChoice")
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

/// Codec errors. Entropy failure is fatal for the commit that hit it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("Secure random source unavailable: {0}")]
    EntropyUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_is_deterministic() {
        let a = derive_commitment(42, "r1", 0, "nonce");
        let b = derive_commitment(42, "r1", 0, "nonce");
        assert_eq!(a, b);
    }

    #[test]
    fn test_commitment_is_digest_of_concatenation() {
        let mut hasher = Sha256::new();
        hasher.update(b"7r23xyz");
        let expected = format!("{:x}", hasher.finalize());
        assert_eq!(derive_commitment(7, "r2", 3, "xyz"), expected);
    }

    #[test]
    fn test_commitment_binds_every_input() {
        let base = derive_commitment(1, "r1", 0, "n");
        assert_ne!(base, derive_commitment(2, "r1", 0, "n"));
        assert_ne!(base, derive_commitment(1, "r2", 0, "n"));
        assert_ne!(base, derive_commitment(1, "r1", 1, "n"));
        assert_ne!(base, derive_commitment(1, "r1", 0, "m"));
    }

    #[test]
    fn test_commitment_is_lowercase_hex() {
        let hash = derive_commitment(99, "round", 2, "abc");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_nonce_shape() {
        let nonce = fresh_nonce().unwrap();
        assert_eq!(nonce.len(), 32);
        assert!(nonce
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_nonces_differ() {
        let a = fresh_nonce().unwrap();
        let b = fresh_nonce().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_sealed_choice_verifies() {
        let sealed = SealedChoice::seal(5, "r9", 1).unwrap();
        assert!(sealed.verifies(5, "r9"));
        assert!(!sealed.verifies(5, "r10"));
        assert!(!sealed.verifies(6, "r9"));
    }

    #[test]
    fn test_sealed_choice_debug_redacts_nonce() {
        let sealed = SealedChoice::seal(5, "r9", 1).unwrap();
        let printed = format!("{sealed:?}");
        assert!(printed.contains(&sealed.hash));
        assert!(!printed.contains(&sealed.nonce));
    }
}
