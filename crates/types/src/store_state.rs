//! Durable consensus state: the vertex store snapshot and the safety
//! rules' voting state. Both must be write-ahead-durable before any vote
//! derived from them leaves the node.

use crate::certificates::{HighQC, QuorumCertificate};
use crate::hash::Hash;
use crate::ledger::LedgerHeader;
use crate::vertex::{BFTHeader, Vertex, Vote};
use crate::view::View;

/// Persisted snapshot of the speculative DAG, used to resume after
/// restart and to rebuild after sync closes a gap.
#[derive(Clone, PartialEq, Eq, Debug, sbor::prelude::BasicSbor)]
pub struct VerifiedVertexStoreState {
    pub root: Vertex,
    pub high_qc: HighQC,
    /// Unexecuted (speculative) vertices above the root, parent-first.
    pub vertices: Vec<Vertex>,
}

/// Everything required to bootstrap a node at genesis.
#[derive(Clone, Debug)]
pub struct GenesisPackage {
    pub vertex: Vertex,
    pub header: BFTHeader,
    pub qc: QuorumCertificate,
    pub store_state: VerifiedVertexStoreState,
}

/// Build the deterministic genesis structures for a given ledger header.
///
/// The genesis vertex's own QC refers to zero vertex ids (there is nothing
/// below genesis); the certifying genesis QC then names the real vertex id
/// in all three header positions.
pub fn genesis_package(ledger_header: LedgerHeader) -> GenesisPackage {
    let placeholder = BFTHeader::new(View::genesis(), Hash::ZERO, ledger_header.clone());
    let embedded_qc = QuorumCertificate::genesis(placeholder);
    let vertex = Vertex {
        qc: embedded_qc,
        view: View::genesis(),
        txns: Vec::new(),
        proposer: crate::validator::ValidatorId([0u8; 32]),
    };
    let header = BFTHeader::new(View::genesis(), vertex.id(), ledger_header);
    let qc = QuorumCertificate::genesis(header.clone());
    let store_state = VerifiedVertexStoreState {
        root: vertex.clone(),
        high_qc: HighQC::from_qcs(qc.clone(), qc.clone(), None),
        vertices: Vec::new(),
    };
    GenesisPackage {
        vertex,
        header,
        qc,
        store_state,
    }
}

/// The safety rules' durable state. Persisting this before emitting the
/// corresponding vote is what makes equivocation impossible across crashes.
#[derive(Clone, PartialEq, Eq, Debug, Default, sbor::prelude::BasicSbor)]
pub struct SafetyState {
    pub last_voted_view: View,
    pub locked_view: View,
    pub last_vote: Option<Vote>,
}
