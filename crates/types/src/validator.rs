//! Validator identities and the permissioned validator set.

use std::collections::BTreeMap;

use crate::crypto::PublicKey;

/// Voting power of a validator.
pub type VotePower = u64;

/// A validator identity: the raw bytes of its Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sbor::prelude::BasicSbor)]
pub struct ValidatorId(pub [u8; 32]);

impl ValidatorId {
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0)
    }
}

impl std::fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v:{}", &hex::encode(self.0)[..8])
    }
}

/// A single validator's entry in the set.
#[derive(Clone, Debug, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct ValidatorInfo {
    pub validator_id: ValidatorId,
    pub public_key: PublicKey,
    pub voting_power: VotePower,
}

/// The active validator set for an epoch.
///
/// Iteration order is deterministic (sorted by validator id) so that every
/// node derives the same proposer schedule and the same quorum arithmetic.
#[derive(Clone, Debug, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct ValidatorSet {
    validators: Vec<ValidatorInfo>,
    total_power: VotePower,
}

impl ValidatorSet {
    pub fn new(mut validators: Vec<ValidatorInfo>) -> Self {
        validators.sort_by_key(|v| v.validator_id);
        validators.dedup_by_key(|v| v.validator_id);
        let total_power = validators.iter().map(|v| v.voting_power).sum();
        Self {
            validators,
            total_power,
        }
    }

    pub fn validators(&self) -> &[ValidatorInfo] {
        &self.validators
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_power(&self) -> VotePower {
        self.total_power
    }

    /// Maximum tolerated faulty voting power: `f = (n - 1) / 3`.
    pub fn max_faulty_power(&self) -> VotePower {
        self.total_power.saturating_sub(1) / 3
    }

    /// Minimum voting power for a quorum (the 2f+1 equivalent by weight):
    /// any two quorums intersect in at least one honest validator.
    pub fn quorum_power(&self) -> VotePower {
        self.total_power - self.max_faulty_power()
    }

    pub fn contains(&self, id: &ValidatorId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn index_of(&self, id: &ValidatorId) -> Option<usize> {
        self.validators
            .binary_search_by_key(id, |v| v.validator_id)
            .ok()
    }

    pub fn power_of(&self, id: &ValidatorId) -> Option<VotePower> {
        self.index_of(id).map(|i| self.validators[i].voting_power)
    }

    pub fn public_key_of(&self, id: &ValidatorId) -> Option<PublicKey> {
        self.index_of(id).map(|i| self.validators[i].public_key)
    }

    /// Sum the voting power of the given signers, ignoring unknown ids.
    pub fn power_of_signers<'a>(&self, signers: impl Iterator<Item = &'a ValidatorId>) -> VotePower {
        // Dedup so a repeated signer cannot inflate the tally.
        let unique: BTreeMap<&ValidatorId, ()> = signers.map(|s| (s, ())).collect();
        unique
            .keys()
            .filter_map(|id| self.power_of(id))
            .sum()
    }
}
