// Secret encryption keyed by a component's `CryptoKey`.
//
// `ENCv1:` is this engine's own format: AES-256-GCM with key = SHA-256(CryptoKey), stored as
// prefix + base64(nonce || ciphertext). It is not the panel's own cipher, which is not
// reproduced here. Values the panel encrypted carry no prefix and cannot be read; callers
// check `is_encrypted` before trusting a decrypted value.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result};
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};

use crate::security::crypto::sha256;

const ENC_PREFIX: &str = "ENCv1:";
const NONCE_BYTES: usize = 12;

pub struct SecretProtector {
    key: [u8; 32],
}

impl std::fmt::Debug for SecretProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretProtector").finish_non_exhaustive()
    }
}

impl SecretProtector {
    pub fn from_crypto_key(crypto_key: &str) -> Result<Self> {
        if crypto_key.trim().is_empty() {
            anyhow::bail!("Crypto key is empty");
        }
        Ok(Self {
            key: sha256(crypto_key.as_bytes()),
        })
    }

    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENC_PREFIX)
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| anyhow::anyhow!("Internal error: invalid AES-256 key length"))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(ENC_PREFIX.to_string());
        }

        let mut nonce_bytes = [0u8; NONCE_BYTES];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate nonce"))?;

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("Secret encryption failed"))?;

        // nonce || ciphertext (ciphertext includes the GCM tag)
        let mut blob = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}{}",
            ENC_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(blob)
        ))
    }

    pub fn decrypt(&self, value: &str) -> Result<String> {
        if !Self::is_encrypted(value) {
            return Ok(value.to_string());
        }

        let encoded = value.trim_start_matches(ENC_PREFIX);
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("Failed to base64-decode encrypted secret")?;
        if blob.len() < NONCE_BYTES {
            anyhow::bail!("Encrypted secret blob is too short");
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_BYTES);
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow::anyhow!("Secret decryption failed"))?;
        String::from_utf8(plaintext).context("Decrypted secret is not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypts_what_it_encrypts() {
        let p = SecretProtector::from_crypto_key("component-crypto-key").expect("key");
        let enc = p.encrypt("serveradmin-secret").expect("encrypt");
        assert!(SecretProtector::is_encrypted(&enc));
        assert!(!enc.contains("serveradmin-secret"));
        assert_eq!(p.decrypt(&enc).expect("decrypt"), "serveradmin-secret");
    }

    #[test]
    fn wrong_key_fails() {
        let enc = SecretProtector::from_crypto_key("a")
            .expect("key")
            .encrypt("x")
            .expect("encrypt");
        assert!(SecretProtector::from_crypto_key("b")
            .expect("key")
            .decrypt(&enc)
            .is_err());
    }

    #[test]
    fn plaintext_passes_through_and_empty_key_rejected() {
        let p = SecretProtector::from_crypto_key("k").expect("key");
        assert_eq!(p.decrypt("plain").expect("plain"), "plain");
        assert!(SecretProtector::from_crypto_key("  ").is_err());
    }
}
