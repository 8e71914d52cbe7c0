//! Challenge hashing and key material for the authentication handshake.

use std::fmt;

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::types::{AuthError, Result, CHALLENGE_LEN, RESPONSE_LEN, SHARED_KEY_LEN};

/// Compile-time default shared key.
///
/// In a production system the shared key should come from a secure hardware
/// store; callers override this value at session init.
pub const DEFAULT_SHARED_KEY: [u8; SHARED_KEY_LEN] = [
    0xBD, 0x84, 0xDC, 0x6E, 0x5C, 0x77, 0x41, 0x58, 0xE8, 0xFB, 0x1D, 0xB9, 0x95, 0x39, 0x20,
    0xE4, 0xC5, 0x03, 0x69, 0x9D, 0xBC, 0x53, 0x08, 0x20, 0x1E, 0xF4, 0x72, 0x8E, 0x90, 0x56,
    0x49, 0xA8,
];

/// A 32-byte pre-shared key, immutable for the lifetime of a session.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; SHARED_KEY_LEN]);

impl SharedKey {
    /// Creates a key from raw bytes.
    pub const fn new(bytes: [u8; SHARED_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates a key from a slice, rejecting wrong lengths.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SHARED_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| AuthError::InvalidParam("shared key must be 32 bytes"))?;
        Ok(Self(bytes))
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_KEY_LEN] {
        &self.0
    }
}

impl Default for SharedKey {
    fn default() -> Self {
        Self(DEFAULT_SHARED_KEY)
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// Hash a random challenge with the shared key.
///
/// Defined as SHA-256 over `challenge || key`, in that order. Both sides
/// compute this to prove and verify possession of the key.
pub fn challenge_hash(challenge: &[u8; CHALLENGE_LEN], key: &SharedKey) -> [u8; RESPONSE_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

/// Generate a fresh 32-byte random challenge.
///
/// Uses a CSPRNG; challenges must be unpredictable and are never reused
/// across sessions on the same side.
pub fn generate_challenge() -> [u8; CHALLENGE_LEN] {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// Compare a received response against the expected hash in constant time.
pub fn responses_match(received: &[u8; RESPONSE_LEN], expected: &[u8; RESPONSE_LEN]) -> bool {
    received.ct_eq(expected).into()
}
