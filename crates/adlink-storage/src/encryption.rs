//! Token blob encryption.
//!
//! Access and refresh tokens are sealed with AES-256-GCM before they are
//! written to a connection row. The 12-byte nonce is prefixed to the
//! ciphertext so a blob is self-contained.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;

const NONCE_SIZE: usize = 12;

pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn new(master_key: &[u8]) -> Result<Self> {
        if master_key.len() != 32 {
            return Err(anyhow::anyhow!(
                "Master key must be 32 bytes, got {}",
                master_key.len()
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(master_key)
            .map_err(|err| anyhow::anyhow!("Invalid master key length: {:?}", err))?;

        Ok(Self { cipher })
    }

    /// Build a cipher from a base64-encoded 32-byte key, as carried in
    /// deployment configuration.
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|err| anyhow::anyhow!("Master key is not valid base64: {err}"))?;
        Self::new(&key)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|err| anyhow::anyhow!("Failed to seal token: {:?}", err))?;
        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.append(&mut ciphertext);
        Ok(output)
    }

    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_SIZE {
            return Err(anyhow::anyhow!("Token blob is too short"));
        }

        let (nonce_bytes, payload) = blob.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, payload)
            .map_err(|err| anyhow::anyhow!("Failed to open token blob: {:?}", err))?;
        Ok(plaintext)
    }

    /// Seal a token string into a blob suitable for a `*_token_enc` column.
    pub fn seal_str(&self, token: &str) -> Result<Vec<u8>> {
        self.seal(token.as_bytes())
    }

    /// Recover a token string from a sealed blob.
    pub fn open_str(&self, blob: &[u8]) -> Result<String> {
        let bytes = self.open(blob)?;
        String::from_utf8(bytes).map_err(|err| anyhow::anyhow!("Token is not valid UTF-8: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        [0x5C; 32]
    }

    #[test]
    fn token_roundtrip() {
        let cipher = TokenCipher::new(&test_key()).unwrap();
        let blob = cipher.seal_str("ya29.access-token").unwrap();
        assert_eq!(cipher.open_str(&blob).unwrap(), "ya29.access-token");
    }

    #[test]
    fn wrong_key_size_rejected() {
        let err = TokenCipher::new(&[0u8; 16]).err().expect("16-byte key must fail");
        assert!(err.to_string().contains("32"), "unexpected error: {err}");
    }

    #[test]
    fn base64_key_roundtrip() {
        let encoded = BASE64.encode(test_key());
        let cipher = TokenCipher::from_base64_key(&encoded).unwrap();
        let blob = cipher.seal_str("1//refresh").unwrap();
        assert_eq!(cipher.open_str(&blob).unwrap(), "1//refresh");
    }

    #[test]
    fn base64_key_invalid() {
        assert!(TokenCipher::from_base64_key("not base64!!").is_err());
    }

    #[test]
    fn tampered_blob_rejected() {
        let cipher = TokenCipher::new(&test_key()).unwrap();
        let mut blob = cipher.seal_str("EAAB-facebook-token").unwrap();

        // Flip a byte in the authenticated payload (after the nonce)
        let idx = NONCE_SIZE + 2;
        blob[idx] ^= 0xFF;
        assert!(cipher.open(&blob).is_err());
    }

    #[test]
    fn truncated_blob_rejected() {
        let cipher = TokenCipher::new(&test_key()).unwrap();
        assert!(cipher.open(&[0u8; 4]).is_err());
    }

    #[test]
    fn different_key_cannot_open() {
        let sealer = TokenCipher::new(&[0x11; 32]).unwrap();
        let opener = TokenCipher::new(&[0x22; 32]).unwrap();
        let blob = sealer.seal_str("secret").unwrap();
        assert!(opener.open(&blob).is_err());
    }

    #[test]
    fn nonces_are_unique() {
        let cipher = TokenCipher::new(&test_key()).unwrap();
        let a = cipher.seal_str("same token").unwrap();
        let b = cipher.seal_str("same token").unwrap();
        assert_ne!(a, b);
    }
}
