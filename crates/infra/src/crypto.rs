//! AES-256-GCM credential encryption.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use tokenbridge_core::ports::CredentialCipher;
use tokenbridge_domain::{BrokerError, EncryptedData, Result};

const ALGORITHM: &str = "AES-256-GCM";
const NONCE_LEN: usize = 12;

/// Encrypts token material at rest with a single symmetric key.
///
/// The key comes from the deployment's secret store (base64-encoded, exactly
/// 32 bytes). A wrong or rotated key makes every stored credential
/// undecryptable, so key validation failures are fatal at startup rather
/// than deferred to the first decrypt.
pub struct AesGcmCredentialCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmCredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCredentialCipher").field("key", &"[REDACTED]").finish()
    }
}

impl AesGcmCredentialCipher {
    /// Build the cipher from a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(BrokerError::Security(format!(
                "credential key must be exactly 32 bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|err| BrokerError::Security(format!("cipher initialisation failed: {err}")))?;
        Ok(Self { cipher })
    }

    /// Build the cipher from the base64-encoded key in configuration.
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|err| BrokerError::Security(format!("credential key is not valid base64: {err}")))?;
        Self::new(&key)
    }

    /// Generate a random 32-byte key, base64-encoded for configuration.
    #[must_use]
    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }
}

impl CredentialCipher for AesGcmCredentialCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedData> {
        // Fresh random nonce per encryption; GCM nonce reuse under one key
        // breaks confidentiality and authenticity.
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| BrokerError::Security("encryption failed".into()))?;

        Ok(EncryptedData {
            nonce: nonce_bytes.to_vec(),
            ciphertext,
            algorithm: ALGORITHM.to_string(),
        })
    }

    fn decrypt(&self, data: &EncryptedData) -> Result<Vec<u8>> {
        if data.algorithm != ALGORITHM {
            return Err(BrokerError::Security(format!(
                "unsupported encryption algorithm: {}",
                data.algorithm
            )));
        }
        if data.nonce.len() != NONCE_LEN {
            return Err(BrokerError::Security("invalid nonce length".into()));
        }

        let nonce = Nonce::from_slice(&data.nonce);
        self.cipher
            .decrypt(nonce, data.ciphertext.as_ref())
            .map_err(|_| BrokerError::Security("decryption failed: wrong key or tampered data".into()))
    }
}
