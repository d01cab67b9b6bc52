//! ECIES for the secure-element backend: cofactor ECDH on P-256, X9.63 KDF
//! with SHA-256, AES-128-GCM.
//!
//! Wire format: SEC1 uncompressed ephemeral point (65 bytes) followed by the
//! AEAD ciphertext and tag. The KDF shared info is the ephemeral point, so a
//! ciphertext only opens with the key agreement it was produced under.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{HsmError, Result};

const POINT_LEN: usize = 65;
const KEY_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Encrypt `plaintext` to the holder of `recipient`'s private half.
pub(crate) fn encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_point = ephemeral.public_key().to_encoded_point(false);
    tracing::trace!(ephemeral = %hex::encode(ephemeral_point.as_bytes()), "derived ephemeral point");

    let shared = ephemeral.diffie_hellman(recipient);
    let mut keying = x963_kdf_sha256(
        shared.raw_secret_bytes().as_slice(),
        ephemeral_point.as_bytes(),
        KEY_LEN + NONCE_LEN,
    );

    let cipher = Aes128Gcm::new_from_slice(&keying[..KEY_LEN])
        .map_err(|_| HsmError::SealFailed("bad derived key length".into()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&keying[KEY_LEN..]), plaintext)
        .map_err(|_| HsmError::SealFailed("AEAD encryption failed".into()))?;
    keying.zeroize();

    let mut sealed = Vec::with_capacity(POINT_LEN + ciphertext.len());
    sealed.extend_from_slice(ephemeral_point.as_bytes());
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a ciphertext produced by [`encrypt`] with the recipient key.
pub(crate) fn decrypt(recipient: &SecretKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() <= POINT_LEN {
        return Err(HsmError::UnsealFailed("ciphertext too short".into()));
    }
    let (point_bytes, ciphertext) = sealed.split_at(POINT_LEN);
    let ephemeral = PublicKey::from_sec1_bytes(point_bytes)
        .map_err(|_| HsmError::UnsealFailed("malformed ephemeral point".into()))?;

    let shared = p256::ecdh::diffie_hellman(recipient.to_nonzero_scalar(), ephemeral.as_affine());
    let mut keying = x963_kdf_sha256(
        shared.raw_secret_bytes().as_slice(),
        point_bytes,
        KEY_LEN + NONCE_LEN,
    );

    let cipher = Aes128Gcm::new_from_slice(&keying[..KEY_LEN])
        .map_err(|_| HsmError::UnsealFailed("bad derived key length".into()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&keying[KEY_LEN..]), ciphertext)
        .map_err(|_| HsmError::UnsealFailed("authenticated decryption failed".into()));
    keying.zeroize();
    plaintext
}

/// ANSI X9.63 KDF: SHA-256 over `Z || counter || shared_info`, counter
/// starting at 1.
fn x963_kdf_sha256(shared: &[u8], shared_info: &[u8], len: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(len);
    let mut counter: u32 = 1;
    while output.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(shared);
        hasher.update(counter.to_be_bytes());
        hasher.update(shared_info);
        output.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    output.truncate(len);
    output
}
