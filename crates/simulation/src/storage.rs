//! Per-node simulated durable storage.
//!
//! Captures what the runner is told to persist, so tests can assert on
//! committed history and crashed nodes can be rebuilt from exactly what
//! they had persisted before the crash.

use vertebra_types::{BFTHeader, SafetyState, Txn, VerifiedVertexStoreState};

/// One committed extension as emitted by the node: the finalized headers
/// along the root path and the transactions the ledger appended.
#[derive(Debug, Clone)]
pub struct CommittedBatch {
    pub headers: Vec<BFTHeader>,
    pub txns: Vec<Txn>,
}

#[derive(Debug, Default)]
pub struct SimStorage {
    safety_state: Option<SafetyState>,
    vertex_store_state: Option<VerifiedVertexStoreState>,
    committed: Vec<CommittedBatch>,
    epoch_change: Option<BFTHeader>,
}

impl SimStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_safety_state(&mut self, state: SafetyState) {
        self.safety_state = Some(state);
    }

    pub fn safety_state(&self) -> Option<&SafetyState> {
        self.safety_state.as_ref()
    }

    pub fn put_vertex_store_state(&mut self, state: VerifiedVertexStoreState) {
        self.vertex_store_state = Some(state);
    }

    pub fn vertex_store_state(&self) -> Option<&VerifiedVertexStoreState> {
        self.vertex_store_state.as_ref()
    }

    pub fn append_committed(&mut self, headers: Vec<BFTHeader>, txns: Vec<Txn>) {
        self.committed.push(CommittedBatch { headers, txns });
    }

    pub fn committed_batches(&self) -> &[CommittedBatch] {
        &self.committed
    }

    /// All committed transactions in ledger order.
    pub fn committed_txns(&self) -> Vec<Txn> {
        self.committed
            .iter()
            .flat_map(|b| b.txns.iter().cloned())
            .collect()
    }

    /// All finalized headers in commit order.
    pub fn committed_headers(&self) -> Vec<BFTHeader> {
        self.committed
            .iter()
            .flat_map(|b| b.headers.iter().cloned())
            .collect()
    }

    pub fn latest_committed_header(&self) -> Option<&BFTHeader> {
        self.committed.last().and_then(|b| b.headers.last())
    }

    pub fn set_epoch_change(&mut self, header: BFTHeader) {
        self.epoch_change = Some(header);
    }

    pub fn epoch_change(&self) -> Option<&BFTHeader> {
        self.epoch_change.as_ref()
    }
}
