//! The prime-order group abstraction.
//!
//! This is an adapter over a concrete elliptic-curve backend, isolating
//! the rest of the crate from `k256`'s API the same way a thin
//! curve-wrapping module isolates its users from whichever backend it
//! wraps. `Scalar` is an element of F_q (the secp256k1 scalar field)
//! and `Point` is an element of the secp256k1 group G; every other
//! module only ever talks to these two types, never to `k256` directly,
//! which is what keeps the round framework and the LSS protocol generic
//! "over any prime-order group" in spirit even though only one concrete
//! instantiation is wired up here.

use std::iter::Sum;
use std::ops::{Add, Mul, Neg, Sub};

use k256::elliptic_curve::group::GroupEncoding;
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::{Field, PrimeField};
use k256::{ProjectivePoint, Scalar as BackendScalar, U256};
use rand_core::CryptoRngCore;
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// The byte length of a canonically-encoded [`Scalar`].
pub const SCALAR_BYTES: usize = 32;
/// The byte length of a canonically-encoded (SEC1 compressed) [`Point`].
pub const POINT_BYTES: usize = 33;

/// An element of the scalar field F_q of the secp256k1 group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroize)]
pub struct Scalar(BackendScalar);

impl Scalar {
    pub const ZERO: Self = Self(BackendScalar::ZERO);
    pub const ONE: Self = Self(BackendScalar::ONE);

    /// Samples a uniformly random non-zero element of F_q.
    pub fn random(rng: &mut impl CryptoRngCore) -> Self {
        loop {
            let candidate = Self(BackendScalar::random(&mut *rng));
            if !candidate.is_zero() {
                return candidate;
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        bool::from(k256::elliptic_curve::Field::is_zero(&self.0))
    }

    /// Multiplicative inverse. Returns `None` for zero.
    pub fn invert(&self) -> Option<Self> {
        Option::from(self.0.invert()).map(Self)
    }

    /// Scalar action on the group generator: `self * G`.
    pub fn mul_by_generator(&self) -> Point {
        Point(ProjectivePoint::GENERATOR * self.0)
    }

    /// Reduces an arbitrary byte string into a scalar (used to inject
    /// [`crate::party::PartyId`]s into F_q, which must land on a non-zero
    /// element.
    pub fn from_bytes_reduced(bytes: &[u8]) -> Self {
        let mut padded = [0u8; 32];
        let n = bytes.len().min(32);
        padded[32 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
        Self(<BackendScalar as Reduce<U256>>::reduce_bytes(&padded.into()))
    }

    pub fn to_canonical_bytes(self) -> [u8; SCALAR_BYTES] {
        self.0.to_bytes().into()
    }

    pub fn try_from_canonical_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SCALAR_BYTES {
            return None;
        }
        let mut arr = [0u8; SCALAR_BYTES];
        arr.copy_from_slice(bytes);
        Option::from(BackendScalar::from_repr(arr.into())).map(Self)
    }

    pub fn from_u64(value: u64) -> Self {
        Self(BackendScalar::from(value))
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_canonical_bytes())
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        Self::try_from_canonical_bytes(&bytes).ok_or_else(|| D::Error::custom("invalid scalar encoding"))
    }
}

impl Add for Scalar {
    type Output = Scalar;
    fn add(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 + rhs.0)
    }
}

impl Add<&Scalar> for &Scalar {
    type Output = Scalar;
    fn add(self, rhs: &Scalar) -> Scalar {
        Scalar(self.0 + rhs.0)
    }
}

impl Sub for Scalar {
    type Output = Scalar;
    fn sub(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 - rhs.0)
    }
}

impl Sub<&Scalar> for &Scalar {
    type Output = Scalar;
    fn sub(self, rhs: &Scalar) -> Scalar {
        Scalar(self.0 - rhs.0)
    }
}

impl Neg for Scalar {
    type Output = Scalar;
    fn neg(self) -> Scalar {
        Scalar(-self.0)
    }
}

impl Mul for Scalar {
    type Output = Scalar;
    fn mul(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 * rhs.0)
    }
}

impl Mul<&Scalar> for &Scalar {
    type Output = Scalar;
    fn mul(self, rhs: &Scalar) -> Scalar {
        Scalar(self.0 * rhs.0)
    }
}

impl Sum for Scalar {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Scalar::ZERO, |a, b| a + b)
    }
}

/// An element of the secp256k1 group G.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point(ProjectivePoint);

impl Point {
    pub const GENERATOR: Self = Self(ProjectivePoint::GENERATOR);
    pub const IDENTITY: Self = Self(ProjectivePoint::IDENTITY);

    pub fn is_identity(&self) -> bool {
        bool::from(self.0.is_identity())
    }

    pub fn to_canonical_bytes(self) -> [u8; POINT_BYTES] {
        let encoded = self.0.to_affine().to_bytes();
        let mut out = [0u8; POINT_BYTES];
        out.copy_from_slice(encoded.as_slice());
        out
    }

    pub fn try_from_canonical_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != POINT_BYTES {
            return None;
        }
        let mut repr = <ProjectivePoint as GroupEncoding>::Repr::default();
        repr.as_mut().copy_from_slice(bytes);
        Option::from(ProjectivePoint::from_bytes(&repr)).map(Self)
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Serialize for Point {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_canonical_bytes())
    }
}

impl<'de> Deserialize<'de> for Point {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        Self::try_from_canonical_bytes(&bytes).ok_or_else(|| D::Error::custom("invalid point encoding"))
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point(self.0 + rhs.0)
    }
}

impl Add<&Point> for &Point {
    type Output = Point;
    fn add(self, rhs: &Point) -> Point {
        Point(self.0 + rhs.0)
    }
}

impl Sum for Point {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Point::IDENTITY, |a, b| a + b)
    }
}

impl Mul<Scalar> for Point {
    type Output = Point;
    fn mul(self, rhs: Scalar) -> Point {
        Point(self.0 * rhs.0)
    }
}

impl Mul<&Scalar> for &Point {
    type Output = Point;
    fn mul(self, rhs: &Scalar) -> Point {
        Point(self.0 * rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_action_round_trips() {
        let s = Scalar::from_u64(7);
        let p = s.mul_by_generator();
        let bytes = p.to_canonical_bytes();
        let p2 = Point::try_from_canonical_bytes(&bytes).unwrap();
        assert_eq!(p, p2);
    }

    #[test]
    fn scalar_inverse() {
        let s = Scalar::from_u64(42);
        let inv = s.invert().unwrap();
        assert_eq!(s * inv, Scalar::ONE);
    }

    #[test]
    fn identity_is_identity() {
        assert!(Point::IDENTITY.is_identity());
        assert!(!Point::GENERATOR.is_identity());
    }
}
