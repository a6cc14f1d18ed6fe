//! OpenSSL `enc -aes-256-cbc -a -salt` compatible codec
//!
//! A token is the base64 encoding of `Salted__` + 8-byte salt + ciphertext.
//! Key and IV come from OpenSSL's legacy EVP_BytesToKey chain over MD5:
//! D_i = MD5(D_{i-1} || passphrase || salt), concatenated until 48 bytes
//! are available (32 for the key, 16 for the IV).

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};

use super::{CryptoError, BLOCK_LEN, IV_LEN, KEY_LEN, SALT_LEN};

/// OpenSSL salt header, always this literal plus 8 bytes of actual salt
const SALT_HEADER: &[u8; 8] = b"Salted__";

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Decrypt a base64 text token to its plaintext
pub fn decrypt(secret: &[u8], token: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let blob = BASE64.decode(token)?;
    decrypt_raw(secret, &blob)
}

/// Decrypt a raw `Salted__`+salt+ciphertext blob to its plaintext
pub fn decrypt_raw(secret: &[u8], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < SALT_HEADER.len() + SALT_LEN {
        return Err(CryptoError::TooShort(blob.len()));
    }
    if &blob[..SALT_HEADER.len()] != SALT_HEADER {
        return Err(CryptoError::MissingSaltHeader);
    }
    let salt = &blob[SALT_HEADER.len()..SALT_HEADER.len() + SALT_LEN];
    let ciphertext = &blob[SALT_HEADER.len() + SALT_LEN..];
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::BadBlockSize(ciphertext.len()));
    }

    let (key, iv) = bytes_to_key(secret, salt);
    let mut buf = ciphertext.to_vec();
    let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| CryptoError::BadPadding)?;

    Ok(plaintext.to_vec())
}

/// Encrypt a plaintext into a base64 text token
///
/// Test surface: production traffic only ever decrypts, but round-trip
/// tests and tooling need the encoder.
pub fn encrypt(secret: &[u8], plaintext: &[u8]) -> Vec<u8> {
    BASE64.encode(encrypt_raw(secret, plaintext)).into_bytes()
}

/// Encrypt a plaintext into a raw `Salted__`+salt+ciphertext blob
pub fn encrypt_raw(secret: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let salt = super::random_salt();
    let (key, iv) = bytes_to_key(secret, &salt);

    let ciphertext =
        Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut blob = Vec::with_capacity(SALT_HEADER.len() + SALT_LEN + ciphertext.len());
    blob.extend_from_slice(SALT_HEADER);
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&ciphertext);
    blob
}

/// OpenSSL's EVP_BytesToKey with MD5 and no extra iterations
fn bytes_to_key(secret: &[u8], salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut derived = [0u8; KEY_LEN + IV_LEN];
    let mut prev: Vec<u8> = Vec::new();
    let mut written = 0;

    while written < derived.len() {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(secret);
        hasher.update(salt);
        prev = hasher.finalize().to_vec();

        let n = prev.len().min(derived.len() - written);
        derived[written..written + n].copy_from_slice(&prev[..n]);
        written += n;
    }

    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&derived[..KEY_LEN]);
    iv.copy_from_slice(&derived[KEY_LEN..]);
    (key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::block_padding::NoPadding;

    // > echo -n "127.0.0.1:62863" | openssl aes-256-cbc -pass "pass:p0S8rX680*48" -a -salt
    const OPENSSL_TOKEN: &[u8] = b"U2FsdGVkX19KIJ9OQJKT/yHGMrS+5SsBAAjetomptQ0=";
    const OPENSSL_SECRET: &[u8] = b"p0S8rX680*48";

    #[test]
    fn test_openssl_interop() {
        let plaintext = decrypt(OPENSSL_SECRET, OPENSSL_TOKEN).unwrap();
        assert_eq!(plaintext, b"127.0.0.1:62863");
    }

    #[test]
    fn test_openssl_interop_second_vector() {
        // > echo -n "hallowelt" | openssl aes-256-cbc -pass pass:z4yH36a6zerhfE5427ZV -a -salt
        let plaintext = decrypt(
            b"z4yH36a6zerhfE5427ZV",
            b"U2FsdGVkX19ZM5qQJGe/d5A/4pccgH+arBGTp+QnWPU=",
        )
        .unwrap();
        assert_eq!(plaintext, b"hallowelt");
    }

    #[test]
    fn test_round_trip() {
        let secrets: &[&[u8]] = &[b"p0S8rX680*48", b"z4yH36a6zerhfE5427ZV", b"x"];
        for secret in secrets {
            for len in [1usize, 2, 15, 16, 17, 31, 32, 255, 256, 1024, 4096] {
                let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
                let token = encrypt(secret, &plaintext);
                let decrypted = decrypt(secret, &token).unwrap();
                assert_eq!(decrypted, plaintext, "len {}", len);
            }
        }
    }

    #[test]
    fn test_round_trip_raw() {
        let blob = encrypt_raw(b"secret", b"127.0.0.1:8080");
        assert_eq!(&blob[..8], b"Salted__");
        let decrypted = decrypt_raw(b"secret", &blob).unwrap();
        assert_eq!(decrypted, b"127.0.0.1:8080");
    }

    #[test]
    fn test_same_token_same_plaintext() {
        // The salt is embedded, so one token always decrypts identically.
        let token = encrypt(b"secret", b"10.0.0.1:80");
        let a = decrypt(b"secret", &token).unwrap();
        let b = decrypt(b"secret", &token).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let err = decrypt(b"wrong-secret", OPENSSL_TOKEN).unwrap_err();
        assert!(matches!(err, CryptoError::BadPadding));
    }

    #[test]
    fn test_bad_base64() {
        let err = decrypt(b"secret", b"!!!notbase64!!!").unwrap_err();
        assert!(matches!(err, CryptoError::Base64(_)));
    }

    #[test]
    fn test_blob_too_short() {
        let err = decrypt_raw(b"secret", b"Salted__1234").unwrap_err();
        assert!(matches!(err, CryptoError::TooShort(12)));
    }

    #[test]
    fn test_missing_salt_header() {
        let mut blob = encrypt_raw(b"secret", b"addr");
        blob[0] ^= 0xff;
        let err = decrypt_raw(b"secret", &blob).unwrap_err();
        assert!(matches!(err, CryptoError::MissingSaltHeader));
    }

    #[test]
    fn test_empty_ciphertext() {
        let mut blob = Vec::new();
        blob.extend_from_slice(b"Salted__");
        blob.extend_from_slice(&[0u8; 8]);
        let err = decrypt_raw(b"secret", &blob).unwrap_err();
        assert!(matches!(err, CryptoError::BadBlockSize(0)));
    }

    #[test]
    fn test_partial_block_ciphertext() {
        let mut blob = encrypt_raw(b"secret", b"addr");
        blob.truncate(blob.len() - 1);
        let err = decrypt_raw(b"secret", &blob).unwrap_err();
        assert!(matches!(err, CryptoError::BadBlockSize(15)));
    }

    /// Build a blob whose final decrypted block is exactly `block`, bypassing
    /// the padding the normal encoder would add.
    fn forge_blob(secret: &[u8], block: &[u8; 16]) -> Vec<u8> {
        let salt = [7u8; SALT_LEN];
        let (key, iv) = bytes_to_key(secret, &salt);
        let mut buf = *block;
        Aes256CbcEnc::new(&key.into(), &iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut buf, 16)
            .unwrap();

        let mut blob = Vec::new();
        blob.extend_from_slice(SALT_HEADER);
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&buf);
        blob
    }

    #[test]
    fn test_padding_byte_zero_rejected() {
        let blob = forge_blob(b"secret", &[0u8; 16]);
        let err = decrypt_raw(b"secret", &blob).unwrap_err();
        assert!(matches!(err, CryptoError::BadPadding));
    }

    #[test]
    fn test_padding_byte_oversize_rejected() {
        let blob = forge_blob(b"secret", &[17u8; 16]);
        let err = decrypt_raw(b"secret", &blob).unwrap_err();
        assert!(matches!(err, CryptoError::BadPadding));
    }

    #[test]
    fn test_padding_fill_bytes_checked() {
        // Final byte claims two bytes of padding but the byte before it
        // does not match.
        let mut block = [1u8; 16];
        block[14] = 0xff;
        block[15] = 0x02;
        let blob = forge_blob(b"secret", &block);
        let err = decrypt_raw(b"secret", &blob).unwrap_err();
        assert!(matches!(err, CryptoError::BadPadding));
    }

    #[test]
    fn test_bytes_to_key_deterministic() {
        let (k1, iv1) = bytes_to_key(b"pass", b"saltsalt");
        let (k2, iv2) = bytes_to_key(b"pass", b"saltsalt");
        assert_eq!(k1, k2);
        assert_eq!(iv1, iv2);

        let (k3, _) = bytes_to_key(b"pass", b"SALTSALT");
        assert_ne!(k1, k3);
    }
}
