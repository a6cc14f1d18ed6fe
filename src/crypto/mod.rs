//! Cryptographic primitives for frontd
//!
//! This module provides:
//! - OpenSSL-compatible AES-256-CBC token codec (`Salted__` format)
//! - EVP_BytesToKey (MD5) key and IV derivation
//! - Secure random salt generation
//!
//! The codec is deliberately unauthenticated (no MAC): bit-exact interop
//! with `openssl enc -aes-256-cbc -a -salt` is the contract, and clients
//! mint tokens with the stock OpenSSL CLI.

mod openssl;

pub use openssl::{decrypt, decrypt_raw, encrypt, encrypt_raw};

use thiserror::Error;

/// Length of the AES-256 key in bytes
pub const KEY_LEN: usize = 32;

/// Length of the CBC initialization vector in bytes
pub const IV_LEN: usize = 16;

/// Length of the embedded salt in bytes
pub const SALT_LEN: usize = 8;

/// AES block size in bytes
pub const BLOCK_LEN: usize = 16;

/// Cryptographic errors
///
/// Every variant is a handshake-fatal credential failure; callers report
/// them to the client under a single code so padding errors stay
/// indistinguishable from any other decryption error.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("token too short: {0} bytes")]
    TooShort(usize),

    #[error("salt header missing")]
    MissingSaltHeader,

    #[error("bad ciphertext length: {0} bytes")]
    BadBlockSize(usize),

    #[error("invalid padding")]
    BadPadding,

    #[error("decrypted address is not usable")]
    BadAddress,
}

/// Generate cryptographically secure random bytes
pub fn random_bytes(buf: &mut [u8]) {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    rng.fill(buf).expect("Failed to generate random bytes");
}

/// Generate a random encryption salt
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    random_bytes(&mut salt);
    salt
}
