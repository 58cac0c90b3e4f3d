// Cryptographic utilities

use anyhow::Result;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789!#$%*+-=?@_";

/// SHA-256 hex digest (lowercase).
pub fn sha256_hex(input: &[u8]) -> String {
    sha256(input).iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Random password of `len` characters drawn from an unambiguous alphabet.
pub fn generate_password(len: usize) -> Result<String> {
    let mut raw = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut raw)
        .map_err(|_| anyhow::anyhow!("Failed to generate random password"))?;
    Ok(raw
        .iter()
        .map(|b| PASSWORD_ALPHABET[usize::from(*b) % PASSWORD_ALPHABET.len()] as char)
        .collect())
}
