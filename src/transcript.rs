//! Domain-separated Fiat-Shamir transcript.
//!
//! Adapts the `Chain`/`Hashable` idiom used by `synedrion`'s hashing
//! tools (there built on a Shake256 XOF) to a fixed-output Blake3 hash,
//! per this crate's choice of Blake3 as its transcript primitive.

use crate::group::{Point, Scalar};
use crate::party::PartyId;

/// A digest object that absorbs raw bytes or [`Hashable`] values.
pub trait Chain: Sized {
    fn chain_raw_bytes(self, bytes: &[u8]) -> Self;

    /// Absorbs a byte string together with its length, to prevent
    /// concatenation ambiguity (`H(AB|CD) != H(ABC|D)`).
    fn chain_bytes(self, bytes: &(impl AsRef<[u8]> + ?Sized)) -> Self {
        let len = (bytes.as_ref().len() as u64).to_be_bytes();
        self.chain_raw_bytes(&len).chain_raw_bytes(bytes.as_ref())
    }

    fn chain(self, hashable: &impl Hashable) -> Self {
        hashable.chain(self)
    }
}

/// A value that knows how to feed its contents into a [`Chain`].
pub trait Hashable {
    fn chain<C: Chain>(&self, digest: C) -> C;
}

impl Hashable for Scalar {
    fn chain<C: Chain>(&self, digest: C) -> C {
        digest.chain_bytes(&self.to_canonical_bytes())
    }
}

impl Hashable for Point {
    fn chain<C: Chain>(&self, digest: C) -> C {
        digest.chain_bytes(&self.to_canonical_bytes())
    }
}

impl Hashable for PartyId {
    fn chain<C: Chain>(&self, digest: C) -> C {
        digest.chain_bytes(self.as_bytes())
    }
}

impl Hashable for u32 {
    fn chain<C: Chain>(&self, digest: C) -> C {
        digest.chain_bytes(&self.to_be_bytes())
    }
}

impl Hashable for [u8] {
    fn chain<C: Chain>(&self, digest: C) -> C {
        digest.chain_bytes(self)
    }
}

impl<T: Hashable> Hashable for [T] {
    fn chain<C: Chain>(&self, digest: C) -> C {
        let mut digest = digest.chain_bytes(&(self.len() as u64).to_be_bytes());
        for item in self {
            digest = digest.chain(item);
        }
        digest
    }
}

/// Wraps a Blake3 hasher, standardizing domain separation.
pub struct Transcript(blake3::Hasher);

impl Chain for Transcript {
    fn chain_raw_bytes(self, bytes: &[u8]) -> Self {
        let mut hasher = self.0;
        hasher.update(bytes);
        Self(hasher)
    }
}

impl Transcript {
    /// Starts a new transcript tagged with a fixed, ASCII domain string.
    ///
    /// Every call site uses a distinct `dst` (e.g.
    /// `"lss-core/keygen/round1/rid"`) so that transcripts for unrelated
    /// purposes can never collide even if fed the same inputs.
    pub fn new(dst: &'static str) -> Self {
        Self(blake3::Hasher::new()).chain_bytes(dst.as_bytes())
    }

    /// Finalizes into a 32-byte digest.
    pub fn finalize_bytes(self) -> [u8; 32] {
        *self.0.finalize().as_bytes()
    }

    /// Finalizes and reduces the output into a scalar (e.g. to derive a
    /// Fiat-Shamir challenge).
    pub fn finalize_to_scalar(self) -> Scalar {
        Scalar::from_bytes_reduced(&self.finalize_bytes())
    }
}
