//! Party identity and polynomials over F_q.

use std::collections::BTreeMap;
use std::fmt;

use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::group::{Point, Scalar};

/// A participant label.
///
/// `PartyId` is opaque to the protocol layer; it is only ever used as a
/// map key and as the source of a canonical, non-zero injection into
/// F_q that is never zero. Short byte strings (e.g. a 4-byte little-endian
/// party index, or a public key fingerprint) are the expected shape.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartyId(Vec<u8>);

impl PartyId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_index(index: u32) -> Self {
        Self(index.to_be_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The canonical injection `PartyId -> F_q \ {0}`.
    ///
    /// Domain-separated so that the same bytes used elsewhere (e.g. as a
    /// session id fragment) don't collide with this specific mapping.
    pub fn to_scalar(&self) -> Scalar {
        let mut tagged = Vec::with_capacity(self.0.len() + 16);
        tagged.extend_from_slice(b"lss-core/party-id-to-scalar/v1/");
        tagged.extend_from_slice(&self.0);
        loop {
            let candidate = Scalar::from_bytes_reduced(&tagged);
            if !candidate.is_zero() {
                return candidate;
            }
            // Vanishingly unlikely; re-tag deterministically rather than loop forever
            // on a fixed point of the reduction.
            tagged.push(0);
        }
    }
}

impl fmt::Debug for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartyId({})", hex::encode(&self.0))
    }
}

/// Checks that a party set's injection into F_q is pairwise distinct and
/// never zero.
pub fn validate_injective(parties: &[PartyId]) -> bool {
    let mut seen = std::collections::BTreeSet::new();
    for party in parties {
        let x = party.to_scalar();
        if x.is_zero() {
            return false;
        }
        if !seen.insert(x.to_canonical_bytes()) {
            return false;
        }
    }
    true
}

/// A degree-`d` polynomial over F_q, `f(X) = c_0 + c_1 X + ... + c_d X^d`.
///
/// `c_0` is the "secret" in the VSS sense. Coefficients zeroize on drop.
#[derive(Clone)]
pub struct Polynomial {
    // Coefficients, lowest degree first.
    coefficients: Vec<Scalar>,
}

impl Drop for Polynomial {
    fn drop(&mut self) {
        for c in self.coefficients.iter_mut() {
            c.zeroize();
        }
    }
}

impl Polynomial {
    /// Samples `degree` uniformly random coefficients, fixing `c_0` to
    /// `constant` (or a fresh random scalar if `None`).
    pub fn new(rng: &mut impl CryptoRngCore, degree: usize, constant: Option<Scalar>) -> Self {
        let mut coefficients = Vec::with_capacity(degree + 1);
        coefficients.push(constant.unwrap_or_else(|| Scalar::random(rng)));
        for _ in 0..degree {
            coefficients.push(Scalar::random(rng));
        }
        Self { coefficients }
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn constant_term(&self) -> Scalar {
        self.coefficients[0]
    }

    /// Evaluates `f(x)` using Horner's scheme.
    pub fn evaluate(&self, x: &Scalar) -> Scalar {
        let mut acc = Scalar::ZERO;
        for c in self.coefficients.iter().rev() {
            acc = &(&acc * x) + c;
        }
        acc
    }

    /// The Feldman commitments `c_k · G` to every coefficient, in
    /// ascending degree order. Not used directly by the evaluation-form
    /// LSS keygen, but kept as the textbook Feldman VSS building block
    /// and used by `resharing.rs`'s JVSS sub-protocol.
    pub fn coefficient_commitments(&self) -> Vec<Point> {
        self.coefficients.iter().map(|c| c.mul_by_generator()).collect()
    }
}

/// Computes the Lagrange coefficients `{x_i -> lambda_i(0)}` for
/// reconstructing `f(0)` from the evaluations `{f(x_i)}` at the given
/// points.
///
/// `lambda_i(0) = product_{j != i} x_j / (x_j - x_i)`.
///
/// Panics-free: returns `None` if any two points coincide (degenerate
/// interpolation set), which should never happen for a well-formed party
/// set.
pub fn lagrange_coefficients_at_zero(xs: &[Scalar]) -> Option<BTreeMap<usize, Scalar>> {
    let mut result = BTreeMap::new();
    for (i, xi) in xs.iter().enumerate() {
        let mut numerator = Scalar::ONE;
        let mut denominator = Scalar::ONE;
        for (j, xj) in xs.iter().enumerate() {
            if i == j {
                continue;
            }
            numerator = numerator * *xj;
            let diff = xj - xi;
            if diff.is_zero() {
                return None;
            }
            denominator = denominator * diff;
        }
        let inv = denominator.invert()?;
        result.insert(i, numerator * inv);
    }
    Some(result)
}

/// [`lagrange_coefficients_at_zero`], keyed by `PartyId` rather than by
/// index into `parties`. Used wherever a coefficient needs to be looked
/// up by the party it belongs to rather than by position (`resharing`'s
/// dealer-side interpolation).
pub fn lagrange_coefficients_for_parties(parties: &[PartyId]) -> Option<BTreeMap<PartyId, Scalar>> {
    let xs: Vec<Scalar> = parties.iter().map(|p| p.to_scalar()).collect();
    let by_index = lagrange_coefficients_at_zero(&xs)?;
    Some(parties.iter().enumerate().map(|(idx, p)| (p.clone(), by_index[&idx])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn evaluate_at_zero_is_constant_term() {
        let poly = Polynomial::new(&mut OsRng, 3, Some(Scalar::from_u64(5)));
        assert_eq!(poly.evaluate(&Scalar::ZERO), Scalar::from_u64(5));
    }

    #[test]
    fn lagrange_sum_is_one_even_subset() {
        let xs: Vec<Scalar> = (1..=10u64).map(Scalar::from_u64).collect();
        let coeffs = lagrange_coefficients_at_zero(&xs).unwrap();
        let sum: Scalar = coeffs.values().copied().sum();
        assert_eq!(sum, Scalar::ONE);
    }

    #[test]
    fn lagrange_sum_is_one_odd_subset() {
        let xs: Vec<Scalar> = (1..=9u64).map(Scalar::from_u64).collect();
        let coeffs = lagrange_coefficients_at_zero(&xs).unwrap();
        let sum: Scalar = coeffs.values().copied().sum();
        assert_eq!(sum, Scalar::ONE);
    }

    #[test]
    fn party_id_injection_is_non_zero_and_distinct() {
        let parties: Vec<PartyId> = (0..8).map(PartyId::from_index).collect();
        assert!(validate_injective(&parties));
    }

    #[test]
    fn coefficients_for_parties_match_index_keyed_variant() {
        let parties: Vec<PartyId> = (0..4).map(PartyId::from_index).collect();
        let xs: Vec<Scalar> = parties.iter().map(|p| p.to_scalar()).collect();
        let by_index = lagrange_coefficients_at_zero(&xs).unwrap();
        let by_party = lagrange_coefficients_for_parties(&parties).unwrap();
        for (idx, party) in parties.iter().enumerate() {
            assert_eq!(by_party[party], by_index[&idx]);
        }
    }
}
