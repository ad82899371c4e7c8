//! Foundational types for Vertebra consensus.
//!
//! This crate provides the data model shared by every other layer:
//!
//! - **Primitives**: [`Hash`], keys and signatures
//! - **Identity**: [`ValidatorId`], [`ValidatorSet`]
//! - **Consensus**: [`Vertex`], [`BFTHeader`], [`Vote`],
//!   [`QuorumCertificate`], [`TimeoutCertificate`], [`HighQC`]
//! - **Ledger**: [`Txn`], [`AccumulatorState`], [`LedgerHeader`]
//! - **Durability**: [`VerifiedVertexStoreState`], [`SafetyState`]
//! - **Wire messages**: [`Proposal`], the `GetVertices*` family
//!
//! It depends on no other workspace crate.

mod certificates;
mod crypto;
mod hash;
mod ledger;
mod messages;
pub mod signing;
mod store_state;
mod validator;
mod vertex;
mod view;

pub use certificates::{
    CertificateError, HighQC, QuorumCertificate, TimeoutCertificate, TimestampedSignature,
    TimestampedSignatures,
};
pub use crypto::{KeyPair, PublicKey, Signature};
pub use hash::{hash_sbor, Hash};
pub use ledger::{AccumulatorState, LedgerHeader, Txn};
pub use messages::{
    GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, Proposal, ProposalError,
};
pub use store_state::{genesis_package, GenesisPackage, SafetyState, VerifiedVertexStoreState};
pub use validator::{ValidatorId, ValidatorInfo, ValidatorSet, VotePower};
pub use vertex::{BFTHeader, Vertex, Vote, VoteData};
pub use view::{Epoch, View};

/// Test helpers shared by unit and integration tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Deterministic keypair from a seed byte.
    pub fn test_keypair(seed: u8) -> KeyPair {
        KeyPair::from_seed(&[seed; 32])
    }

    /// A validator set of `n` equal-power validators with seeds `1..=n`.
    pub fn test_validator_set(n: u8) -> (Vec<KeyPair>, ValidatorSet) {
        let keys: Vec<KeyPair> = (1..=n).map(test_keypair).collect();
        let set = ValidatorSet::new(
            keys.iter()
                .map(|k| ValidatorInfo {
                    validator_id: k.validator_id(),
                    public_key: k.public_key(),
                    voting_power: 1,
                })
                .collect(),
        );
        (keys, set)
    }

    /// A transaction with a recognizable payload.
    pub fn test_txn(seed: u8) -> Txn {
        Txn::new(vec![seed, seed.wrapping_add(1), seed.wrapping_add(2)])
    }
}
