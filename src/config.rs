//! Persisted long-term key material.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::group::Point;
use crate::group::Scalar;
use crate::party::PartyId;

/// Long-term LSS key material produced by keygen and updated in place
/// by resharing (`generation` increments, `threshold`/`public_shares`
/// may change, `secret_share`/`public_key` are preserved).
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    pub id: PartyId,
    pub group_id: &'static str,
    pub threshold: u16,
    pub generation: u32,
    pub secret_share: Scalar,
    pub public_key: Point,
    pub public_shares: BTreeMap<PartyId, Point>,
    pub chain_key: [u8; 32],
    pub rid: [u8; 32],
}

impl Config {
    /// Rejects (a) threshold out of range, (b) missing public share for
    /// self, (c) `secret_share * G != public_shares[self]`, (d)
    /// non-canonical encodings (checked by construction: every `Scalar`
    /// and `Point` in this crate only ever holds a canonically-decoded
    /// value, so there is nothing further to check here beyond re-encoding
    /// round-trips, which the type system already guarantees).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.public_shares.len();
        if self.threshold == 0 || usize::from(self.threshold) > n {
            return Err(ConfigError::ThresholdOutOfRange { threshold: self.threshold, n });
        }
        let own_public_share = self
            .public_shares
            .get(&self.id)
            .ok_or_else(|| ConfigError::MissingOwnPublicShare(self.id.clone()))?;
        if self.secret_share.mul_by_generator() != *own_public_share {
            return Err(ConfigError::SecretShareMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::party::PartyId;

    fn sample_config() -> Config {
        let id = PartyId::from_index(0);
        let secret_share = Scalar::from_u64(7);
        let mut public_shares = BTreeMap::new();
        public_shares.insert(id.clone(), secret_share.mul_by_generator());
        Config {
            id,
            group_id: "secp256k1",
            threshold: 1,
            generation: 0,
            secret_share,
            public_key: secret_share.mul_by_generator(),
            public_shares,
            chain_key: [0u8; 32],
            rid: [0u8; 32],
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn mismatched_secret_share_is_rejected() {
        let mut config = sample_config();
        config.secret_share = Scalar::from_u64(9);
        assert!(matches!(config.validate(), Err(ConfigError::SecretShareMismatch)));
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let mut config = sample_config();
        config.threshold = 5;
        assert!(matches!(config.validate(), Err(ConfigError::ThresholdOutOfRange { .. })));
    }

    #[test]
    fn missing_own_public_share_is_rejected() {
        let mut config = sample_config();
        config.public_shares.clear();
        assert!(matches!(config.validate(), Err(ConfigError::MissingOwnPublicShare(_))));
    }
}
