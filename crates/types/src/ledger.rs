//! Ledger-side commitments: transactions, the running accumulator, and
//! the per-vertex ledger header.

use crate::hash::Hash;
use crate::validator::ValidatorSet;
use crate::view::{Epoch, View};

/// An opaque transaction payload. Validation and execution of the contents
/// is the external state computer's concern; consensus only orders them.
#[derive(Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct Txn {
    payload: Vec<u8>,
}

impl Txn {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Content id of this transaction.
    pub fn id(&self) -> Hash {
        Hash::of_bytes(&self.payload)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl std::fmt::Debug for Txn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Txn({})", self.id())
    }
}

/// Running cryptographic accumulator over all committed transactions.
///
/// `state_version` counts committed transactions; `accumulator_hash` chains
/// each committed transaction id onto the previous digest, proving an
/// append-only, gap-free sequence.
#[derive(Clone, Copy, PartialEq, Eq, Debug, sbor::prelude::BasicSbor)]
pub struct AccumulatorState {
    pub state_version: u64,
    pub accumulator_hash: Hash,
}

impl AccumulatorState {
    pub fn zero() -> Self {
        Self {
            state_version: 0,
            accumulator_hash: Hash::ZERO,
        }
    }
}

/// A compact commitment to the ledger state resulting from executing a
/// vertex. Present in every `BFTHeader`.
#[derive(Clone, PartialEq, Eq, Debug, sbor::prelude::BasicSbor)]
pub struct LedgerHeader {
    pub epoch: Epoch,
    pub view: View,
    pub accumulator_state: AccumulatorState,
    pub timestamp_ms: u64,
    /// Present only on the last header of an epoch; activates the next
    /// validator set at the epoch boundary.
    pub next_validator_set: Option<ValidatorSet>,
}

impl LedgerHeader {
    pub fn genesis(epoch: Epoch, timestamp_ms: u64) -> Self {
        Self {
            epoch,
            view: View::genesis(),
            accumulator_state: AccumulatorState::zero(),
            timestamp_ms,
            next_validator_set: None,
        }
    }

    pub fn is_end_of_epoch(&self) -> bool {
        self.next_validator_set.is_some()
    }

    pub fn state_version(&self) -> u64 {
        self.accumulator_state.state_version
    }
}
