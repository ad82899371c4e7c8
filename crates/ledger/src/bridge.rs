//! Bridge between the BFT machine and the external state computer.
//!
//! Every vertex inserted into the store is first executed speculatively
//! through [`Ledger::prepare`], so the vote it earns certifies a concrete
//! post-execution [`LedgerHeader`]. Commit re-verifies the batch against
//! the running accumulator before anything reaches durable state.

use tracing::{debug, warn};

use vertebra_types::{
    AccumulatorState, BFTHeader, Hash, LedgerHeader, Txn, Vertex, View,
};

use crate::accumulator::LedgerAccumulator;
use crate::state_computer::{Mempool, StateComputer};
use crate::LedgerError;

/// A vertex together with its speculative execution result.
#[derive(Debug, Clone)]
pub struct PreparedVertex {
    vertex_id: Hash,
    view: View,
    parent_accumulator: AccumulatorState,
    txns: Vec<Txn>,
    ledger_header: LedgerHeader,
}

impl PreparedVertex {
    /// View an already-committed vertex (a store root) as prepared. Its
    /// transactions are spent, so only the resulting header remains.
    pub fn committed(vertex_id: Hash, view: View, ledger_header: LedgerHeader) -> Self {
        Self {
            vertex_id,
            view,
            parent_accumulator: ledger_header.accumulator_state,
            txns: Vec::new(),
            ledger_header,
        }
    }

    pub fn vertex_id(&self) -> Hash {
        self.vertex_id
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Accepted transactions, in execution order.
    pub fn txns(&self) -> &[Txn] {
        &self.txns
    }

    pub fn parent_accumulator(&self) -> &AccumulatorState {
        &self.parent_accumulator
    }

    pub fn ledger_header(&self) -> &LedgerHeader {
        &self.ledger_header
    }

    /// The header a vote on this vertex certifies.
    pub fn header(&self) -> BFTHeader {
        BFTHeader::new(self.view, self.vertex_id, self.ledger_header.clone())
    }
}

/// What the BFT layer needs from the ledger side.
pub trait Ledger {
    /// Speculatively execute `vertex` on top of its prepared ancestors
    /// (root-exclusive path, parent-first; empty when the vertex extends
    /// the root directly).
    fn prepare(
        &mut self,
        ancestors: &[&PreparedVertex],
        vertex: &Vertex,
    ) -> Result<PreparedVertex, LedgerError>;

    /// Durably apply a committed batch proven by `proof`. Returns the
    /// transactions actually appended (already-committed prefixes are
    /// skipped). Idempotent for stale proofs.
    fn commit(&mut self, txns: Vec<Txn>, proof: LedgerHeader) -> Result<Vec<Txn>, LedgerError>;

    /// Adopt a quorum-certified committed header without its transactions.
    /// Used when sync lands on a root beyond the locally replayable window;
    /// recovering the executed history is the embedder's concern. Returns
    /// the header being replaced so a caller can restore it if the rest of
    /// the jump fails. Callers check staleness before calling.
    fn fast_forward(&mut self, header: LedgerHeader) -> LedgerHeader;

    /// The last committed ledger header.
    fn committed_header(&self) -> &LedgerHeader;

    /// Proposal candidates from the mempool, excluding transactions already
    /// claimed by uncommitted ancestors.
    fn next_txns(&mut self, limit: usize, in_flight: &[Txn]) -> Vec<Txn>;

    /// Offer a locally submitted transaction to the mempool.
    fn add_txn(&mut self, txn: Txn) -> bool;
}

/// The production [`Ledger`]: a committed header, the external state
/// computer, and the mempool.
pub struct StateComputerLedger {
    header: LedgerHeader,
    state_computer: Box<dyn StateComputer>,
    mempool: Box<dyn Mempool>,
}

impl StateComputerLedger {
    pub fn new(
        header: LedgerHeader,
        state_computer: Box<dyn StateComputer>,
        mempool: Box<dyn Mempool>,
    ) -> Self {
        Self {
            header,
            state_computer,
            mempool,
        }
    }
}

impl Ledger for StateComputerLedger {
    fn prepare(
        &mut self,
        ancestors: &[&PreparedVertex],
        vertex: &Vertex,
    ) -> Result<PreparedVertex, LedgerError> {
        let parent_header = match ancestors.last() {
            Some(parent) => parent.ledger_header().clone(),
            None => self.header.clone(),
        };

        // The QC-certified parent header must agree with our own execution
        // of the parent branch; a disagreement means the branch was built
        // on state we can never reproduce.
        let claimed = &vertex.parent_header().ledger_header;
        if claimed.accumulator_state != parent_header.accumulator_state {
            warn!(
                vertex = ?vertex.id(),
                computed = ?parent_header.accumulator_state,
                claimed = ?claimed.accumulator_state,
                "parent accumulator mismatch, discarding branch"
            );
            return Err(LedgerError::AccumulatorMismatch {
                computed: parent_header.accumulator_state,
                claimed: claimed.accumulator_state,
            });
        }

        // Nothing executes past the epoch boundary: descendants of the
        // closing header carry it forward unchanged so every branch commits
        // the same final state.
        if parent_header.is_end_of_epoch() {
            let ledger_header = LedgerHeader {
                view: vertex.view,
                ..parent_header.clone()
            };
            return Ok(PreparedVertex {
                vertex_id: vertex.id(),
                view: vertex.view,
                parent_accumulator: parent_header.accumulator_state,
                txns: Vec::new(),
                ledger_header,
            });
        }

        let timestamp_ms = vertex_timestamp_ms(vertex, &parent_header);
        let result =
            self.state_computer
                .prepare(&parent_header, &vertex.txns, vertex.view, timestamp_ms);
        if !result.rejected.is_empty() {
            debug!(
                vertex = ?vertex.id(),
                rejected = result.rejected.len(),
                "state computer rejected transactions during prepare"
            );
        }
        let accumulator_state = LedgerAccumulator::accumulate_all(
            &parent_header.accumulator_state,
            &result.accepted,
        );
        let ledger_header = LedgerHeader {
            epoch: parent_header.epoch,
            view: vertex.view,
            accumulator_state,
            timestamp_ms,
            next_validator_set: result.next_validator_set,
        };
        Ok(PreparedVertex {
            vertex_id: vertex.id(),
            view: vertex.view,
            parent_accumulator: parent_header.accumulator_state,
            txns: result.accepted,
            ledger_header,
        })
    }

    fn commit(&mut self, txns: Vec<Txn>, proof: LedgerHeader) -> Result<Vec<Txn>, LedgerError> {
        if proof.state_version() < self.header.state_version() {
            // A replayed commit from before our current version.
            return Ok(Vec::new());
        }
        let extension = LedgerAccumulator::verify_and_get_extension(
            &self.header.accumulator_state,
            &txns,
            &proof.accumulator_state,
        )?;
        if !extension.is_empty() {
            let ids: Vec<Hash> = extension.iter().map(|t| t.id()).collect();
            self.state_computer.commit(&extension, &proof);
            self.mempool.committed(&ids);
        }
        debug!(
            view = ?proof.view,
            version = proof.state_version(),
            appended = extension.len(),
            "ledger committed"
        );
        self.header = proof;
        Ok(extension)
    }

    fn fast_forward(&mut self, header: LedgerHeader) -> LedgerHeader {
        debug!(
            view = ?header.view,
            version = header.state_version(),
            "ledger fast-forwarded to certified header"
        );
        std::mem::replace(&mut self.header, header)
    }

    fn committed_header(&self) -> &LedgerHeader {
        &self.header
    }

    fn next_txns(&mut self, limit: usize, in_flight: &[Txn]) -> Vec<Txn> {
        self.mempool.next_txns(limit, in_flight)
    }

    fn add_txn(&mut self, txn: Txn) -> bool {
        self.mempool.add(txn)
    }
}

/// Timestamp for a vertex: the median of its QC's signature timestamps,
/// clamped to never move backwards. A genesis QC carries no signatures, so
/// the parent's timestamp is reused.
fn vertex_timestamp_ms(vertex: &Vertex, parent: &LedgerHeader) -> u64 {
    let mut stamps: Vec<u64> = vertex
        .qc
        .signatures()
        .signatures
        .values()
        .map(|s| s.timestamp_ms)
        .collect();
    if stamps.is_empty() {
        return parent.timestamp_ms;
    }
    stamps.sort_unstable();
    stamps[stamps.len() / 2].max(parent.timestamp_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_ledger, MockStateComputer, SimpleMempool};
    use vertebra_types::test_utils::{test_txn, test_validator_set};
    use vertebra_types::{genesis_package, Epoch};

    fn test_ledger() -> StateComputerLedger {
        mock_ledger().0
    }

    fn vertex_on_genesis(txns: Vec<Txn>) -> Vertex {
        let (keys, _) = test_validator_set(4);
        let pkg = genesis_package(LedgerHeader::genesis(Epoch(1), 0));
        Vertex::new(pkg.qc, View::of(1), txns, keys[0].validator_id())
    }

    #[test]
    fn prepare_accumulates_accepted_txns() {
        let mut ledger = test_ledger();
        let txns: Vec<Txn> = (0..3).map(test_txn).collect();
        let vertex = vertex_on_genesis(txns.clone());
        let prepared = ledger.prepare(&[], &vertex).unwrap();
        assert_eq!(prepared.txns(), txns.as_slice());
        assert_eq!(prepared.ledger_header().state_version(), 3);
        assert_eq!(prepared.ledger_header().view, View::of(1));
    }

    #[test]
    fn prepare_rejects_foreign_parent_accumulator() {
        let mut ledger = test_ledger();
        // A vertex whose QC claims a different genesis ledger state.
        let foreign = genesis_package(LedgerHeader {
            accumulator_state: AccumulatorState {
                state_version: 7,
                accumulator_hash: Hash::of_bytes(b"foreign"),
            },
            ..LedgerHeader::genesis(Epoch(1), 0)
        });
        let (keys, _) = test_validator_set(4);
        let vertex = Vertex::new(foreign.qc, View::of(1), vec![], keys[0].validator_id());
        let err = ledger.prepare(&[], &vertex).unwrap_err();
        assert!(matches!(err, LedgerError::AccumulatorMismatch { .. }));
    }

    #[test]
    fn commit_applies_extension_and_advances_header() {
        let mut ledger = test_ledger();
        let txns: Vec<Txn> = (0..2).map(test_txn).collect();
        let vertex = vertex_on_genesis(txns.clone());
        let prepared = ledger.prepare(&[], &vertex).unwrap();
        let proof = prepared.ledger_header().clone();
        let appended = ledger.commit(txns.clone(), proof.clone()).unwrap();
        assert_eq!(appended, txns);
        assert_eq!(ledger.committed_header(), &proof);
        // Replaying the same commit appends nothing.
        let replay = ledger.commit(txns, proof).unwrap();
        assert!(replay.is_empty());
    }

    #[test]
    fn fast_forward_swaps_and_returns_the_prior_header() {
        let mut ledger = test_ledger();
        let genesis = ledger.committed_header().clone();
        let ahead = LedgerHeader {
            view: View::of(9),
            accumulator_state: AccumulatorState {
                state_version: 12,
                accumulator_hash: Hash::of_bytes(b"certified"),
            },
            ..LedgerHeader::genesis(Epoch(1), 0)
        };
        let prior = ledger.fast_forward(ahead.clone());
        assert_eq!(prior, genesis);
        assert_eq!(ledger.committed_header(), &ahead);

        // The returned header restores the ledger after an aborted jump.
        ledger.fast_forward(prior);
        assert_eq!(ledger.committed_header(), &genesis);
    }

    #[test]
    fn mempool_excludes_in_flight_txns() {
        let mut ledger = test_ledger();
        let a = test_txn(1);
        let b = test_txn(2);
        assert!(ledger.add_txn(a.clone()));
        assert!(ledger.add_txn(b.clone()));
        assert!(!ledger.add_txn(a.clone()));
        let next = ledger.next_txns(10, &[a]);
        assert_eq!(next, vec![b]);
    }

    #[test]
    fn epoch_boundary_halts_execution() {
        let (_, next_set) = test_validator_set(4);
        let mut ledger = StateComputerLedger::new(
            LedgerHeader::genesis(Epoch(1), 0),
            Box::new(MockStateComputer::with_epoch_end(View::of(1), next_set.clone())),
            Box::new(SimpleMempool::default()),
        );
        let closing = vertex_on_genesis(vec![test_txn(1)]);
        let prepared_close = ledger.prepare(&[], &closing).unwrap();
        assert!(prepared_close.ledger_header().is_end_of_epoch());

        // A child of the closing vertex executes nothing and carries the
        // boundary header forward.
        let child_qc_header =
            BFTHeader::new(View::of(1), closing.id(), prepared_close.ledger_header().clone());
        let child = Vertex::new(
            vertebra_types::QuorumCertificate::genesis(child_qc_header),
            View::of(2),
            vec![test_txn(2)],
            closing.proposer,
        );
        let prepared_child = ledger.prepare(&[&prepared_close], &child).unwrap();
        assert!(prepared_child.txns().is_empty());
        assert_eq!(
            prepared_child.ledger_header().accumulator_state,
            prepared_close.ledger_header().accumulator_state
        );
        assert_eq!(
            prepared_child.ledger_header().next_validator_set,
            Some(next_set)
        );
    }
}
