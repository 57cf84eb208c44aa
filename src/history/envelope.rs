//! AEAD sealing with a random nonce prepended to the ciphertext

use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SealError {
    #[error("key must be {KEY_LEN} bytes")]
    InvalidKey,
    #[error("sealed data shorter than nonce")]
    Truncated,
    #[error("encryption failed")]
    Encrypt,
    #[error("authentication failed")]
    Authentication,
}

/// Fresh random 256-bit key
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encrypt `plaintext`, returning `nonce || ciphertext`
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
    let cipher = Aes256GcmSiv::new_from_slice(key).map_err(|_| SealError::InvalidKey)?;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| SealError::Encrypt)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Split off the nonce, then decrypt and authenticate
pub fn open(key: &[u8], sealed: &[u8]) -> Result<Vec<u8>, SealError> {
    let cipher = Aes256GcmSiv::new_from_slice(key).map_err(|_| SealError::InvalidKey)?;
    if sealed.len() < NONCE_LEN {
        return Err(SealError::Truncated);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SealError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_reverses_seal_and_nonces_differ() {
        let key = generate_key();
        let a = seal(&key, b"hello").unwrap();
        let b = seal(&key, b"hello").unwrap();
        assert_ne!(a, b);
        assert_eq!(open(&key, &a).unwrap(), b"hello");
    }

    #[test]
    fn any_bit_flip_fails_authentication() {
        let key = generate_key();
        let sealed = seal(&key, b"transcript bytes").unwrap();
        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            assert_eq!(open(&key, &tampered), Err(SealError::Authentication), "byte {i}");
        }
    }

    #[test]
    fn wrong_key_and_short_input_are_rejected() {
        let sealed = seal(&generate_key(), b"x").unwrap();
        assert_eq!(open(&generate_key(), &sealed), Err(SealError::Authentication));
        assert_eq!(open(&generate_key(), &[0u8; 4]), Err(SealError::Truncated));
        assert_eq!(seal(&[0u8; 16], b"x"), Err(SealError::InvalidKey));
    }
}
