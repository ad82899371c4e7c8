//! Vertices, headers, and votes: the units the DAG is built from.

use crate::certificates::{HighQC, QuorumCertificate};
use crate::crypto::Signature;
use crate::hash::{hash_sbor, Hash};
use crate::ledger::{LedgerHeader, Txn};
use crate::validator::ValidatorId;
use crate::view::View;

/// A proposed unit of work: a batch of transactions extending the vertex
/// certified by `qc`. Immutable once created; identified by content hash.
#[derive(Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct Vertex {
    pub qc: QuorumCertificate,
    pub view: View,
    pub txns: Vec<Txn>,
    pub proposer: ValidatorId,
}

impl Vertex {
    pub fn new(
        qc: QuorumCertificate,
        view: View,
        txns: Vec<Txn>,
        proposer: ValidatorId,
    ) -> Self {
        Self {
            qc,
            view,
            txns,
            proposer,
        }
    }

    /// Content id of this vertex.
    pub fn id(&self) -> Hash {
        hash_sbor(self)
    }

    /// Header of the vertex this one extends.
    pub fn parent_header(&self) -> &BFTHeader {
        self.qc.proposed()
    }

    pub fn parent_id(&self) -> Hash {
        self.qc.proposed().vertex_id
    }

    pub fn parent_view(&self) -> View {
        self.qc.proposed().view
    }

    /// Header two links up the chain.
    pub fn grandparent_header(&self) -> &BFTHeader {
        self.qc.parent()
    }

    /// Whether the parent link skips no views.
    pub fn has_direct_parent(&self) -> bool {
        self.view == self.parent_header().view.next()
    }

    /// Whether the parent's own parent link skips no views.
    pub fn parent_has_direct_parent(&self) -> bool {
        self.qc.proposed().view == self.qc.parent().view.next()
    }

    /// True if this vertex, its parent, or its grandparent is the genesis
    /// vertex. Commit derivation never reaches below genesis.
    pub fn touches_genesis(&self) -> bool {
        self.view.is_genesis()
            || self.parent_header().view.is_genesis()
            || self.grandparent_header().view.is_genesis()
    }
}

impl std::fmt::Debug for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vertex")
            .field("id", &self.id())
            .field("view", &self.view)
            .field("parent", &self.parent_id())
            .field("txns", &self.txns.len())
            .field("proposer", &self.proposer)
            .finish()
    }
}

/// A compact commitment to a vertex and its post-execution ledger state.
#[derive(Clone, PartialEq, Eq, Debug, sbor::prelude::BasicSbor)]
pub struct BFTHeader {
    pub view: View,
    pub vertex_id: Hash,
    pub ledger_header: LedgerHeader,
}

impl BFTHeader {
    pub fn new(view: View, vertex_id: Hash, ledger_header: LedgerHeader) -> Self {
        Self {
            view,
            vertex_id,
            ledger_header,
        }
    }
}

/// What a vote certifies: the proposed header, its parent, and (when the
/// locally reconstructed chain allows it) the header that becomes final
/// once this vote's QC reaches quorum.
#[derive(Clone, PartialEq, Eq, Debug, sbor::prelude::BasicSbor)]
pub struct VoteData {
    pub proposed: BFTHeader,
    pub parent: BFTHeader,
    pub committed: Option<BFTHeader>,
}

impl VoteData {
    pub fn view(&self) -> View {
        self.proposed.view
    }
}

/// A signed vote on a proposal. A vote carrying a timeout signature doubles
/// as a timeout vote for its view.
#[derive(Clone, PartialEq, Eq, Debug, sbor::prelude::BasicSbor)]
pub struct Vote {
    pub voter: ValidatorId,
    pub vote_data: VoteData,
    pub timestamp_ms: u64,
    /// Signature over the domain-tagged vote message.
    pub signature: Signature,
    /// The voter's current sync state, piggy-backed so the recipient can
    /// catch up if it is behind.
    pub high_qc: HighQC,
    /// Present iff the voter has timed out this view.
    pub timeout_signature: Option<Signature>,
}

impl Vote {
    pub fn view(&self) -> View {
        self.vote_data.view()
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout_signature.is_some()
    }
}
