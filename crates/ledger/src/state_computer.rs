//! External collaborator traits: the state computer that executes ordered
//! transactions and the mempool that supplies candidates.

use vertebra_types::{Hash, LedgerHeader, Txn, ValidatorSet, View};

/// A transaction rejected during speculative execution, with the reason
/// the state computer gave.
#[derive(Debug, Clone)]
pub struct RejectedTxn {
    pub txn: Txn,
    pub reason: String,
}

/// Outcome of speculatively executing a batch on top of a parent header.
#[derive(Debug, Clone)]
pub struct StateComputerResult {
    /// Transactions accepted into the ledger, in execution order.
    pub accepted: Vec<Txn>,
    /// Transactions dropped from the batch. Rejection is deterministic:
    /// every node rejects the same transactions at the same position.
    pub rejected: Vec<RejectedTxn>,
    /// Set when this execution closes the epoch.
    pub next_validator_set: Option<ValidatorSet>,
}

/// The external execution engine.
///
/// Consensus treats transactions as opaque bytes; the state computer gives
/// them meaning. `prepare` must be deterministic and side-effect-free so
/// speculative branches can be executed and discarded freely. `commit` is
/// invoked exactly once per committed batch, in ledger order.
pub trait StateComputer: Send {
    fn prepare(
        &self,
        parent: &LedgerHeader,
        txns: &[Txn],
        view: View,
        timestamp_ms: u64,
    ) -> StateComputerResult;

    fn commit(&mut self, txns: &[Txn], proof: &LedgerHeader);
}

/// Transaction source and sink for proposals.
pub trait Mempool: Send {
    /// Offer a transaction; false if it was a duplicate or rejected.
    fn add(&mut self, txn: Txn) -> bool;

    /// Candidates for the next proposal, excluding `in_flight` transactions
    /// already claimed by uncommitted ancestors.
    fn next_txns(&mut self, limit: usize, in_flight: &[Txn]) -> Vec<Txn>;

    /// Drop committed transactions.
    fn committed(&mut self, txn_ids: &[Hash]);
}
