// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Low-level AES-256-GCM seal/open operations.
//!
//! Every call to [`seal`] generates a fresh random 96-bit nonce via the system
//! CSPRNG. Nonce reuse would be catastrophic for GCM security.
//!
//! Callers bind ciphertext to its session by passing the session id as
//! associated data, so a blob cannot be replayed under another session id.
//!
//! Working buffers that hold plaintext are [`Zeroizing`] and sized up front,
//! so no unzeroed copy is left behind by a reallocation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ephem_core::EphemError;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

fn less_safe_key(key: &[u8; 32]) -> Result<LessSafeKey, EphemError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| EphemError::Crypto("failed to create AES-256-GCM key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt plaintext with AES-256-GCM using a random 96-bit nonce.
///
/// Returns `(ciphertext_with_tag, nonce_bytes)`.
pub fn seal(
    key: &[u8; 32],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_LEN]), EphemError> {
    let key = less_safe_key(key)?;

    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| EphemError::Crypto("failed to generate random nonce".to_string()))?;

    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    // Seal in place: the buffer is extended with the authentication tag.
    let mut in_out = Zeroizing::new(Vec::with_capacity(plaintext.len() + AES_256_GCM.tag_len()));
    in_out.extend_from_slice(plaintext);
    key.seal_in_place_append_tag(nonce, Aad::from(aad), &mut *in_out)
        .map_err(|_| EphemError::Crypto("AES-256-GCM encryption failed".to_string()))?;

    Ok((std::mem::take(&mut *in_out), nonce_bytes))
}

/// Decrypt ciphertext produced by [`seal`] with the same key and associated data.
///
/// Fails if the key is wrong, the associated data differs, or the data was tampered with.
pub fn open(
    key: &[u8; 32],
    aad: &[u8],
    nonce_bytes: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, EphemError> {
    let key = less_safe_key(key)?;
    let nonce = Nonce::assume_unique_for_key(*nonce_bytes);

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = key
        .open_in_place(nonce, Aad::from(aad), &mut *in_out)
        .map_err(|_| EphemError::Crypto("AES-256-GCM decryption failed".to_string()))?
        .len();
    in_out.truncate(plaintext_len);

    Ok(in_out)
}

/// Seal into the persisted text form: base64 of `nonce || ciphertext || tag`.
pub fn seal_to_text(key: &[u8; 32], aad: &[u8], plaintext: &[u8]) -> Result<String, EphemError> {
    let (ciphertext, nonce) = seal(key, aad, plaintext)?;
    let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    framed.extend_from_slice(&nonce);
    framed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(framed))
}

/// Open the text form written by [`seal_to_text`].
///
/// Every failure (bad base64, truncated frame, authentication failure) maps to
/// [`EphemError::CorruptBlob`].
pub fn open_from_text(
    key: &[u8; 32],
    aad: &[u8],
    text: &str,
) -> Result<Zeroizing<Vec<u8>>, EphemError> {
    let framed = BASE64.decode(text.trim()).map_err(|_| EphemError::CorruptBlob)?;
    if framed.len() < NONCE_LEN {
        return Err(EphemError::CorruptBlob);
    }
    let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
    let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| EphemError::CorruptBlob)?;
    open(key, aad, &nonce, ciphertext).map_err(|_| EphemError::CorruptBlob)
}

/// Generate a random 32-byte key suitable for AES-256-GCM.
pub fn generate_random_key() -> Result<[u8; 32], EphemError> {
    let rng = SystemRandom::new();
    let mut key = [0u8; 32];
    rng.fill(&mut key)
        .map_err(|_| EphemError::Crypto("failed to generate random key".to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = generate_random_key().unwrap();
        let (ciphertext, nonce) = seal(&key, b"sess-1", b"tenant credential").unwrap();
        let decrypted = open(&key, b"sess-1", &nonce, &ciphertext).unwrap();
        assert_eq!(decrypted.as_slice(), b"tenant credential");
    }

    #[test]
    fn buffers_are_sized_once_and_plaintext_comes_back_zeroizing() {
        let key = generate_random_key().unwrap();
        let plaintext = vec![0x5au8; 4096];
        let (ciphertext, nonce) = seal(&key, b"sess-1", &plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + AES_256_GCM.tag_len());
        // Appending the tag never grew the buffer past its first allocation.
        assert_eq!(ciphertext.capacity(), ciphertext.len());

        let decrypted: Zeroizing<Vec<u8>> = open(&key, b"sess-1", &nonce, &ciphertext).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn seal_uses_fresh_nonce_each_time() {
        let key = generate_random_key().unwrap();
        let (ct1, nonce1) = seal(&key, b"", b"same input twice").unwrap();
        let (ct2, nonce2) = seal(&key, b"", b"same input twice").unwrap();
        assert_ne!(nonce1, nonce2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let key1 = generate_random_key().unwrap();
        let key2 = generate_random_key().unwrap();
        let (ciphertext, nonce) = seal(&key1, b"", b"secret data").unwrap();
        assert!(open(&key2, b"", &nonce, &ciphertext).is_err());
    }

    #[test]
    fn open_with_other_session_aad_fails() {
        let key = generate_random_key().unwrap();
        let (ciphertext, nonce) = seal(&key, b"sess-a", b"secret").unwrap();
        assert!(open(&key, b"sess-b", &nonce, &ciphertext).is_err());
    }

    #[test]
    fn text_form_roundtrip() {
        let key = generate_random_key().unwrap();
        let text = seal_to_text(&key, b"sess-1", b"{\"project\":\"p-123\"}").unwrap();
        assert!(text.is_ascii());
        let plain = open_from_text(&key, b"sess-1", &text).unwrap();
        assert_eq!(plain.as_slice(), b"{\"project\":\"p-123\"}");
    }

    #[test]
    fn tampered_text_is_corrupt_blob() {
        let key = generate_random_key().unwrap();
        let text = seal_to_text(&key, b"sess-1", b"do not tamper").unwrap();
        let mut raw = BASE64.decode(&text).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(raw);

        let err = open_from_text(&key, b"sess-1", &tampered).unwrap_err();
        assert!(matches!(err, EphemError::CorruptBlob));
    }

    #[test]
    fn garbage_text_is_corrupt_blob() {
        let key = generate_random_key().unwrap();
        assert!(matches!(
            open_from_text(&key, b"", "not base64 at all!"),
            Err(EphemError::CorruptBlob)
        ));
        assert!(matches!(
            open_from_text(&key, b"", &BASE64.encode([1u8; 4])),
            Err(EphemError::CorruptBlob)
        ));
    }
}
