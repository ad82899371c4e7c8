//! In-memory state computer and mempool for tests and simulation.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use vertebra_types::{Epoch, Hash, LedgerHeader, Txn, ValidatorSet, View};

use crate::bridge::StateComputerLedger;
use crate::state_computer::{Mempool, StateComputer, StateComputerResult};

/// Shared view of everything a [`MockStateComputer`] has committed, in
/// order. Cloneable so test harnesses can keep a handle after moving the
/// computer into a node.
pub type CommittedLog = Arc<Mutex<Vec<(Txn, LedgerHeader)>>>;

/// Deterministic accept-all state computer. Optionally closes the epoch
/// once a configured view is reached.
pub struct MockStateComputer {
    epoch_end_view: Option<View>,
    next_validator_set: Option<ValidatorSet>,
    committed: CommittedLog,
}

impl MockStateComputer {
    pub fn new() -> Self {
        Self {
            epoch_end_view: None,
            next_validator_set: None,
            committed: Arc::default(),
        }
    }

    /// Close the epoch at `view`, handing over to `next`.
    pub fn with_epoch_end(view: View, next: ValidatorSet) -> Self {
        Self {
            epoch_end_view: Some(view),
            next_validator_set: Some(next),
            committed: Arc::default(),
        }
    }

    pub fn committed_log(&self) -> CommittedLog {
        Arc::clone(&self.committed)
    }
}

impl Default for MockStateComputer {
    fn default() -> Self {
        Self::new()
    }
}

impl StateComputer for MockStateComputer {
    fn prepare(
        &self,
        _parent: &LedgerHeader,
        txns: &[Txn],
        view: View,
        _timestamp_ms: u64,
    ) -> StateComputerResult {
        let next_validator_set = match self.epoch_end_view {
            Some(end) if view >= end => self.next_validator_set.clone(),
            _ => None,
        };
        StateComputerResult {
            accepted: txns.to_vec(),
            rejected: Vec::new(),
            next_validator_set,
        }
    }

    fn commit(&mut self, txns: &[Txn], proof: &LedgerHeader) {
        let mut log = self.committed.lock().unwrap();
        for txn in txns {
            log.push((txn.clone(), proof.clone()));
        }
    }
}

/// FIFO mempool with duplicate suppression.
#[derive(Default)]
pub struct SimpleMempool {
    txns: Vec<Txn>,
}

impl Mempool for SimpleMempool {
    fn add(&mut self, txn: Txn) -> bool {
        if self.txns.iter().any(|t| t.id() == txn.id()) {
            return false;
        }
        self.txns.push(txn);
        true
    }

    fn next_txns(&mut self, limit: usize, in_flight: &[Txn]) -> Vec<Txn> {
        let claimed: BTreeSet<Hash> = in_flight.iter().map(|t| t.id()).collect();
        self.txns
            .iter()
            .filter(|t| !claimed.contains(&t.id()))
            .take(limit)
            .cloned()
            .collect()
    }

    fn committed(&mut self, txn_ids: &[Hash]) {
        self.txns.retain(|t| !txn_ids.contains(&t.id()));
    }
}

/// A ledger at genesis backed by the mock computer and a fresh mempool.
pub fn mock_ledger() -> (StateComputerLedger, CommittedLog) {
    mock_ledger_at(LedgerHeader::genesis(Epoch(1), 0))
}

/// Same as [`mock_ledger`] but resuming from an arbitrary header.
pub fn mock_ledger_at(header: LedgerHeader) -> (StateComputerLedger, CommittedLog) {
    let computer = MockStateComputer::new();
    let log = computer.committed_log();
    let ledger = StateComputerLedger::new(
        header,
        Box::new(computer),
        Box::new(SimpleMempool::default()),
    );
    (ledger, log)
}
