//! Serializable container for encrypted credential material.

use serde::{Deserialize, Serialize};

/// Ciphertext plus the parameters needed to decrypt it later.
///
/// The storage layer treats this as an opaque blob (serialized JSON). The
/// algorithm tag guards against silently decrypting with the wrong scheme
/// after a future migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub algorithm: String,
}
