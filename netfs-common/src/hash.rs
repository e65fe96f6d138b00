//! SHA-512 hashing utilities
//!
//! netfs identifies file content by a raw 64-byte SHA-512 digest, never hex-encoded
//! on the wire (see [`crate::protocol`]). [`RunningHash`] is fed one chunk at a
//! time as data streams through a connection, so the digest is ready the
//! instant the last byte has been read or written — the client hashes what it
//! sends, the server hashes what it writes, and the two must agree at
//! `finish()`/`commit()` time.

use sha2::{Digest, Sha512};

/// Length in bytes of a SHA-512 digest.
pub const DIGEST_LEN: usize = 64;

/// A raw SHA-512 digest, as it appears on the wire.
pub type Digest512 = [u8; DIGEST_LEN];

/// An incremental SHA-512 hash, updated as chunks of a transfer arrive.
#[derive(Default)]
pub struct RunningHash(Sha512);

impl RunningHash {
    /// Start a new, empty running hash.
    #[must_use]
    pub fn new() -> Self {
        Self(Sha512::new())
    }

    /// Feed the next chunk of data into the hash.
    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    /// Consume the hash and return the final digest.
    #[must_use]
    pub fn finalize(self) -> Digest512 {
        self.0.finalize().into()
    }
}
