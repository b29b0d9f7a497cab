//! Toy symmetric stream cipher keyed by a QKD-derived bit string.
//!
//! Not cryptography: the ciphertext is the payload XOR the key material,
//! with the key cycled to the payload length. Encryption and decryption are
//! the same operation.

use serde::{Deserialize, Serialize};

/// Shared secret produced by key agreement, one bit per element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedKey {
    bits: Vec<u8>,
}

impl SharedKey {
    /// Build a key from a bit sequence. Any non-zero element counts as a 1.
    pub fn from_bits(bits: impl IntoIterator<Item = u8>) -> Self {
        Self {
            bits: bits.into_iter().map(|bit| u8::from(bit != 0)).collect(),
        }
    }

    /// Key length in bits.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Whether the key has no bits.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// The raw bit sequence.
    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    /// Pack the bits MSB-first into bytes, padding the last byte with zeros.
    pub fn material(&self) -> Vec<u8> {
        self.bits
            .chunks(8)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u8, |byte, (i, bit)| byte | (*bit << (7 - i)))
            })
            .collect()
    }
}

/// XOR `payload` with the key material repeated to its length.
///
/// An empty key leaves the payload unchanged.
pub fn encrypt(payload: &[u8], key: &SharedKey) -> Vec<u8> {
    let material = key.material();
    if material.is_empty() {
        return payload.to_vec();
    }
    payload
        .iter()
        .zip(material.iter().cycle())
        .map(|(byte, k)| byte ^ k)
        .collect()
}

/// Inverse of [`encrypt`]; the cipher is self-inverse.
pub fn decrypt(ciphertext: &[u8], key: &SharedKey) -> Vec<u8> {
    encrypt(ciphertext, key)
}
