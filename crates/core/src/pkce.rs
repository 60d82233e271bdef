//! PKCE (Proof Key for Code Exchange) material, RFC 7636.
//!
//! The challenge method is fixed to `S256`; the downgradeable `plain` method
//! is never offered. Random material comes from the operating system RNG;
//! if that fails the process cannot safely mint credentials and aborts.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokenbridge_domain::constants::{STATE_ENTROPY_BYTES, VERIFIER_ENTROPY_BYTES};

/// Verifier/challenge pair for one authorization attempt.
///
/// The verifier stays server-side (inside the pending authorization record)
/// until the code exchange; only the challenge is embedded in the
/// authorization URL.
#[derive(Clone)]
pub struct PkcePair {
    /// base64url of 64 random bytes → 86 chars, inside RFC 7636's 43..=128.
    pub code_verifier: String,
    /// `base64url(SHA256(code_verifier))`.
    pub code_challenge: String,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("code_verifier", &"[REDACTED]")
            .field("code_challenge", &self.code_challenge)
            .finish()
    }
}

impl PkcePair {
    /// Generate a fresh pair from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let code_verifier = random_urlsafe(VERIFIER_ENTROPY_BYTES);
        let code_challenge = challenge_for(&code_verifier);
        Self { code_verifier, code_challenge }
    }

    /// The only supported challenge method.
    #[must_use]
    pub fn challenge_method() -> &'static str {
        "S256"
    }
}

/// Compute the S256 challenge for a verifier.
#[must_use]
pub fn challenge_for(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Random state parameter for CSRF protection (256 bits of entropy).
#[must_use]
pub fn generate_state_id() -> String {
    random_urlsafe(STATE_ENTROPY_BYTES)
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
