//! The ledger side of consensus: the transaction accumulator and the
//! bridge between the BFT machine and the external state computer.
//!
//! Consensus orders opaque transactions; executing them is the state
//! computer's job. The bridge speculatively executes each proposed vertex
//! (`prepare`) so votes certify a concrete post-execution ledger header,
//! and durably applies a branch only once a commit QC proves it final.

mod accumulator;
mod bridge;
mod state_computer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use accumulator::LedgerAccumulator;
pub use bridge::{Ledger, PreparedVertex, StateComputerLedger};
pub use state_computer::{Mempool, RejectedTxn, StateComputer, StateComputerResult};

use vertebra_types::AccumulatorState;

/// Ways a batch of transactions can fail to extend the ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The claimed accumulator does not match what re-execution produces.
    /// A branch carrying this header can never be committed.
    #[error("accumulator mismatch: computed {computed:?}, claimed {claimed:?}")]
    AccumulatorMismatch {
        computed: AccumulatorState,
        claimed: AccumulatorState,
    },

    /// The batch does not connect to the ledger's current version.
    #[error("version gap: ledger at {ledger}, batch covers {base}..={claimed}")]
    VersionGap { ledger: u64, base: u64, claimed: u64 },
}
