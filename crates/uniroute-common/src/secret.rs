//! AEAD encryption for BYOK provider keys (§4.7, §9 "Encrypted provider
//! keys"). The process key is loaded once at startup; a nonce is generated
//! per write and stored alongside the ciphertext. Key rotation would require
//! re-encrypting every row and is out of scope.

use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("invalid secret key length, expected 32 bytes")]
    BadKeyLength,
    #[error("decryption failed (wrong key or corrupted ciphertext)")]
    DecryptFailed,
    #[error("invalid hex encoding: {0}")]
    BadHex(String),
}

/// A ciphertext + its nonce, as stored in the `ciphertext` column of a
/// provider-key row.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SecretBox {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Process-wide AEAD key, derived once at startup from a hex-encoded
/// 32-byte secret (config `secret_key_hex`).
#[derive(Clone)]
pub struct SecretCipher {
    cipher: ChaCha20Poly1305,
}

impl SecretCipher {
    pub fn from_hex(hex_key: &str) -> Result<Self, SecretError> {
        let bytes = hex_decode(hex_key)?;
        if bytes.len() != 32 {
            return Err(SecretError::BadKeyLength);
        }
        let key = Key::from_slice(&bytes);
        Ok(Self {
            cipher: ChaCha20Poly1305::new(key),
        })
    }

    pub fn generate_hex_key() -> String {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut bytes);
        hex_encode(&bytes)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> SecretBox {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        // ChaCha20Poly1305 is infallible for well-formed keys/nonces of the
        // correct length, which `Nonce` guarantees here.
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .expect("encryption with a validly-sized nonce cannot fail");
        SecretBox {
            nonce: nonce.to_vec(),
            ciphertext,
        }
    }

    pub fn decrypt(&self, secret: &SecretBox) -> Result<Vec<u8>, SecretError> {
        if secret.nonce.len() != 12 {
            return Err(SecretError::DecryptFailed);
        }
        let nonce = Nonce::from_slice(&secret.nonce);
        self.cipher
            .decrypt(nonce, secret.ciphertext.as_slice())
            .map_err(|_| SecretError::DecryptFailed)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, SecretError> {
    if s.len() % 2 != 0 {
        return Err(SecretError::BadHex(s.to_string()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| SecretError::BadHex(s.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext() {
        let key = SecretCipher::generate_hex_key();
        let cipher = SecretCipher::from_hex(&key).unwrap();
        let secret = cipher.encrypt(b"sk-example-provider-key");
        let plain = cipher.decrypt(&secret).unwrap();
        assert_eq!(plain, b"sk-example-provider-key");
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let key = SecretCipher::generate_hex_key();
        let cipher = SecretCipher::from_hex(&key).unwrap();
        let mut secret = cipher.encrypt(b"sk-example-provider-key");
        secret.ciphertext[0] ^= 0xff;
        assert!(cipher.decrypt(&secret).is_err());
    }

    #[test]
    fn distinct_nonce_per_encryption() {
        let key = SecretCipher::generate_hex_key();
        let cipher = SecretCipher::from_hex(&key).unwrap();
        let a = cipher.encrypt(b"same-plaintext");
        let b = cipher.encrypt(b"same-plaintext");
        assert_ne!(a.nonce, b.nonce);
    }
}
