//! The speculative vertex DAG between the last commit and the live edge.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use vertebra_ledger::{Ledger, PreparedVertex};
use vertebra_types::{
    BFTHeader, Hash, HighQC, QuorumCertificate, TimeoutCertificate, Txn,
    VerifiedVertexStoreState, Vertex, View,
};

use crate::error::VertexStoreError;

struct ExecutedVertex {
    vertex: Vertex,
    prepared: PreparedVertex,
}

/// One committed extension of the ledger: the headers finalized along the
/// root path and the transactions the ledger actually appended.
#[derive(Debug, Clone)]
pub struct CommitBatch {
    pub headers: Vec<BFTHeader>,
    pub txns: Vec<Txn>,
    /// The header whose QC proved the batch final.
    pub proof: BFTHeader,
}

/// Outcome of inserting a certificate.
#[derive(Debug)]
pub enum InsertQcStatus {
    /// Certificate absorbed; a commit may have resulted.
    Inserted(Option<CommitBatch>),
    /// The certified vertex is unknown; the caller should sync to it.
    MissingVertex(Hash),
}

/// Arena of speculatively executed vertices rooted at the last committed
/// one. Every vertex present descends from the root; commits advance the
/// root along the certified path and prune the branches left behind.
pub struct VertexStore {
    root_id: Hash,
    vertices: BTreeMap<Hash, ExecutedVertex>,
    children: BTreeMap<Hash, Vec<Hash>>,
    highest_qc: QuorumCertificate,
    highest_committed_qc: QuorumCertificate,
    highest_tc: Option<TimeoutCertificate>,
    /// Bumped on every durable-state change; lets callers persist only
    /// when something actually moved.
    version: u64,
}

impl VertexStore {
    /// Build from a persisted snapshot, re-executing the speculative
    /// vertices. The ledger must be at the snapshot root's header.
    pub fn new(
        state: VerifiedVertexStoreState,
        ledger: &mut dyn Ledger,
    ) -> Result<Self, VertexStoreError> {
        let root_id = state.root.id();
        let root_prepared = PreparedVertex::committed(
            root_id,
            state.root.view,
            ledger.committed_header().clone(),
        );
        let mut store = Self {
            root_id,
            vertices: BTreeMap::new(),
            children: BTreeMap::new(),
            highest_qc: state.high_qc.highest_qc,
            highest_committed_qc: state.high_qc.highest_committed_qc,
            highest_tc: state.high_qc.highest_tc,
            version: 0,
        };
        store.vertices.insert(
            root_id,
            ExecutedVertex {
                vertex: state.root,
                prepared: root_prepared,
            },
        );
        for vertex in state.vertices {
            store.insert_vertex(vertex, ledger)?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Vertex {
        &self.vertices[&self.root_id].vertex
    }

    pub fn root_view(&self) -> View {
        self.root().view
    }

    pub fn contains(&self, id: Hash) -> bool {
        self.vertices.contains_key(&id)
    }

    pub fn get_vertex(&self, id: Hash) -> Option<&Vertex> {
        self.vertices.get(&id).map(|e| &e.vertex)
    }

    pub fn highest_qc(&self) -> &QuorumCertificate {
        &self.highest_qc
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Transactions claimed by the uncommitted branch ending at `id`.
    /// Proposal building excludes these from the mempool draw.
    pub fn uncommitted_txns(&self, id: Hash) -> Vec<Txn> {
        self.path_ids_from_root(id)
            .unwrap_or_default()
            .iter()
            .flat_map(|id| self.vertices[id].prepared.txns().iter().cloned())
            .collect()
    }

    pub fn high_qc(&self) -> HighQC {
        HighQC::from_qcs(
            self.highest_qc.clone(),
            self.highest_committed_qc.clone(),
            self.highest_tc.clone(),
        )
    }

    /// Insert a vertex, executing it speculatively on top of its branch.
    /// Idempotent: re-inserting returns the stored execution header.
    pub fn insert_vertex(
        &mut self,
        vertex: Vertex,
        ledger: &mut dyn Ledger,
    ) -> Result<BFTHeader, VertexStoreError> {
        let id = vertex.id();
        if let Some(existing) = self.vertices.get(&id) {
            return Ok(existing.prepared.header());
        }
        let root_view = self.root_view();
        if vertex.view <= root_view {
            return Err(VertexStoreError::StaleVertex {
                view: vertex.view,
                root_view,
            });
        }
        let parent_id = vertex.parent_id();
        if !self.vertices.contains_key(&parent_id) {
            return Err(VertexStoreError::MissingParent {
                vertex: id,
                parent: parent_id,
            });
        }
        if vertex.view <= vertex.parent_view() {
            return Err(VertexStoreError::ConflictingVertex {
                vertex: id,
                view: vertex.view,
                parent_view: vertex.parent_view(),
            });
        }

        let ancestors = self.prepared_path(parent_id);
        let prepared = ledger.prepare(&ancestors, &vertex)?;
        drop(ancestors);

        self.children.entry(parent_id).or_default().push(id);
        self.vertices.insert(id, ExecutedVertex { vertex, prepared });
        self.version += 1;
        Ok(self.vertices[&id].prepared.header())
    }

    /// Absorb a quorum certificate. Updates the high QC and, when the
    /// certificate's commit target lies above the root, commits the path
    /// to it through the ledger.
    pub fn insert_qc(
        &mut self,
        qc: QuorumCertificate,
        ledger: &mut dyn Ledger,
    ) -> Result<InsertQcStatus, VertexStoreError> {
        let proposed_id = qc.proposed().vertex_id;
        if !self.vertices.contains_key(&proposed_id) {
            return Ok(InsertQcStatus::MissingVertex(proposed_id));
        }
        if qc.view() > self.highest_qc.view() {
            self.highest_qc = qc.clone();
            self.version += 1;
        }
        let mut batch = None;
        if let Some(committed) = qc.committed_header().cloned() {
            if committed.view > self.root_view() {
                self.highest_committed_qc = qc;
                self.version += 1;
                batch = self.commit(&committed, ledger)?;
            }
        }
        Ok(InsertQcStatus::Inserted(batch))
    }

    pub fn insert_timeout_certificate(&mut self, tc: TimeoutCertificate) {
        match &self.highest_tc {
            Some(existing) if existing.view >= tc.view => {}
            _ => {
                self.highest_tc = Some(tc);
                self.version += 1;
            }
        }
    }

    /// The requested vertex followed by up to `count - 1` ancestors, in
    /// walk order. `None` when the vertex itself is unknown.
    pub fn get_vertices(&self, id: Hash, count: u32) -> Option<Vec<Vertex>> {
        if count == 0 {
            return Some(Vec::new());
        }
        let mut executed = self.vertices.get(&id)?;
        let mut out = Vec::new();
        loop {
            out.push(executed.vertex.clone());
            if out.len() >= count as usize {
                break;
            }
            match self.vertices.get(&executed.vertex.parent_id()) {
                Some(parent) => executed = parent,
                None => break,
            }
        }
        Some(out)
    }

    /// Snapshot for persistence: the root, the certificates, and every
    /// speculative vertex in parent-first order.
    pub fn state(&self) -> VerifiedVertexStoreState {
        VerifiedVertexStoreState {
            root: self.root().clone(),
            high_qc: self.high_qc(),
            vertices: self.descendants_parent_first(),
        }
    }

    /// Replace the whole DAG with a fresh snapshot. Fails (leaving the
    /// store untouched) if any vertex does not re-execute, which includes
    /// snapshots rooted ahead of the ledger.
    pub fn try_rebuild(
        &mut self,
        state: VerifiedVertexStoreState,
        ledger: &mut dyn Ledger,
    ) -> bool {
        match Self::new(state, ledger) {
            Ok(mut rebuilt) => {
                rebuilt.version = self.version + 1;
                *self = rebuilt;
                true
            }
            Err(error) => {
                warn!(%error, "vertex store rebuild failed, keeping current state");
                false
            }
        }
    }

    fn commit(
        &mut self,
        header: &BFTHeader,
        ledger: &mut dyn Ledger,
    ) -> Result<Option<CommitBatch>, VertexStoreError> {
        if header.view <= self.root_view() {
            return Ok(None);
        }
        let Some(path) = self.path_ids_from_root(header.vertex_id) else {
            warn!(target_view = ?header.view, "commit target not connected to root");
            return Ok(None);
        };
        let mut headers = Vec::with_capacity(path.len());
        let mut txns = Vec::new();
        for id in &path {
            let executed = &self.vertices[id];
            headers.push(executed.prepared.header());
            txns.extend_from_slice(executed.prepared.txns());
        }
        let appended = ledger.commit(txns, header.ledger_header.clone())?;
        self.advance_root(header.vertex_id);
        debug!(
            view = ?header.view,
            vertices = path.len(),
            txns = appended.len(),
            "committed"
        );
        Ok(Some(CommitBatch {
            headers,
            txns: appended,
            proof: header.clone(),
        }))
    }

    /// Ids from the first vertex above the root down to `id` inclusive.
    fn path_ids_from_root(&self, id: Hash) -> Option<Vec<Hash>> {
        let mut path = Vec::new();
        let mut cursor = id;
        while cursor != self.root_id {
            let executed = self.vertices.get(&cursor)?;
            path.push(cursor);
            cursor = executed.vertex.parent_id();
        }
        path.reverse();
        Some(path)
    }

    /// Prepared execution results along the root-exclusive path to `id`.
    fn prepared_path(&self, id: Hash) -> Vec<&PreparedVertex> {
        let ids = self.path_ids_from_root(id).unwrap_or_default();
        ids.iter().map(|id| &self.vertices[id].prepared).collect()
    }

    fn advance_root(&mut self, new_root: Hash) {
        let mut keep = BTreeSet::new();
        let mut frontier = vec![new_root];
        while let Some(id) = frontier.pop() {
            if keep.insert(id) {
                if let Some(kids) = self.children.get(&id) {
                    frontier.extend(kids.iter().copied());
                }
            }
        }
        self.vertices.retain(|id, _| keep.contains(id));
        self.children.retain(|id, _| keep.contains(id));
        self.root_id = new_root;
    }

    fn descendants_parent_first(&self) -> Vec<Vertex> {
        let mut out = Vec::new();
        let mut frontier: Vec<Hash> = self
            .children
            .get(&self.root_id)
            .cloned()
            .unwrap_or_default();
        while let Some(id) = frontier.pop() {
            out.push(self.vertices[&id].vertex.clone());
            if let Some(kids) = self.children.get(&id) {
                frontier.extend(kids.iter().copied());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vertebra_ledger::test_utils::mock_ledger;
    use vertebra_ledger::StateComputerLedger;
    use vertebra_types::test_utils::{test_keypair, test_txn};
    use vertebra_types::{
        genesis_package, Epoch, LedgerHeader, TimestampedSignatures, ValidatorId, VoteData,
    };

    struct Fixture {
        store: VertexStore,
        ledger: StateComputerLedger,
    }

    impl Fixture {
        fn new() -> Self {
            let pkg = genesis_package(LedgerHeader::genesis(Epoch(1), 0));
            let (mut ledger, _) = mock_ledger();
            let store = VertexStore::new(pkg.store_state, &mut ledger).unwrap();
            Self { store, ledger }
        }

        fn proposer() -> ValidatorId {
            test_keypair(1).validator_id()
        }

        /// Extend the vertex certified by `qc` with a direct child.
        fn extend(&mut self, qc: QuorumCertificate, view: u64, txn_seed: u8) -> (Vertex, BFTHeader) {
            let vertex = Vertex::new(qc, View::of(view), vec![test_txn(txn_seed)], Self::proposer());
            let header = self
                .store
                .insert_vertex(vertex.clone(), &mut self.ledger)
                .unwrap();
            (vertex, header)
        }

        /// An unsigned QC certifying `header` with a chosen commit target.
        fn qc(
            &self,
            vertex: &Vertex,
            header: &BFTHeader,
            committed: Option<BFTHeader>,
        ) -> QuorumCertificate {
            QuorumCertificate::new(
                VoteData {
                    proposed: header.clone(),
                    parent: vertex.parent_header().clone(),
                    committed,
                },
                TimestampedSignatures::default(),
            )
        }
    }

    fn genesis_qc() -> QuorumCertificate {
        genesis_package(LedgerHeader::genesis(Epoch(1), 0)).qc
    }

    #[test]
    fn inserting_a_chain_executes_each_vertex() {
        let mut fx = Fixture::new();
        let (v1, h1) = fx.extend(genesis_qc(), 1, 1);
        assert_eq!(h1.ledger_header.state_version(), 1);
        let qc1 = fx.qc(&v1, &h1, None);
        let (_, h2) = fx.extend(qc1, 2, 2);
        assert_eq!(h2.ledger_header.state_version(), 2);
        assert!(fx.store.contains(v1.id()));
    }

    #[test]
    fn insert_is_idempotent() {
        let mut fx = Fixture::new();
        let (v1, h1) = fx.extend(genesis_qc(), 1, 1);
        let again = fx.store.insert_vertex(v1, &mut fx.ledger).unwrap();
        assert_eq!(h1, again);
    }

    #[test]
    fn unknown_parent_is_reported_for_sync() {
        let mut fx = Fixture::new();
        let (v1, h1) = fx.extend(genesis_qc(), 1, 1);
        let qc1 = fx.qc(&v1, &h1, None);
        // Build v2 on v1 but only offer its child v3 to the store.
        let v2 = Vertex::new(qc1, View::of(2), vec![], Fixture::proposer());
        let h2 = BFTHeader::new(View::of(2), v2.id(), h1.ledger_header.clone());
        let qc2 = fx.qc(&v2, &h2, None);
        let v3 = Vertex::new(qc2, View::of(3), vec![], Fixture::proposer());

        let err = fx.store.insert_vertex(v3, &mut fx.ledger).unwrap_err();
        assert!(matches!(
            err,
            VertexStoreError::MissingParent { parent, .. } if parent == v2.id()
        ));
    }

    #[test]
    fn qc_with_commit_target_advances_root_and_prunes() {
        let mut fx = Fixture::new();
        let (v1, h1) = fx.extend(genesis_qc(), 1, 1);
        let qc1 = fx.qc(&v1, &h1, None);

        // A competing branch off genesis that will lose.
        let loser = Vertex::new(genesis_qc(), View::of(4), vec![test_txn(9)], Fixture::proposer());
        fx.store.insert_vertex(loser.clone(), &mut fx.ledger).unwrap();

        let (v2, h2) = fx.extend(qc1, 2, 2);
        let qc2 = fx.qc(&v2, &h2, None);
        let (v3, h3) = fx.extend(qc2, 3, 3);
        let qc3 = fx.qc(&v3, &h3, Some(h1.clone()));

        let status = fx.store.insert_qc(qc3, &mut fx.ledger).unwrap();
        let InsertQcStatus::Inserted(Some(batch)) = status else {
            panic!("commit expected");
        };
        assert_eq!(batch.headers, vec![h1.clone()]);
        assert_eq!(batch.txns, vec![test_txn(1)]);
        assert_eq!(fx.store.root_view(), View::of(1));
        assert_eq!(fx.store.root().id(), v1.id());
        // The losing branch is gone; the winning descendants remain.
        assert!(!fx.store.contains(loser.id()));
        assert!(fx.store.contains(v2.id()));
        assert!(fx.store.contains(v3.id()));
        assert_eq!(fx.ledger.committed_header(), &h1.ledger_header);
    }

    #[test]
    fn commit_is_idempotent() {
        let mut fx = Fixture::new();
        let (v1, h1) = fx.extend(genesis_qc(), 1, 1);
        let qc1 = fx.qc(&v1, &h1, None);
        let (v2, h2) = fx.extend(qc1, 2, 2);
        let qc2 = fx.qc(&v2, &h2, None);
        let (v3, h3) = fx.extend(qc2, 3, 3);

        let qc3 = fx.qc(&v3, &h3, Some(h1.clone()));
        fx.store.insert_qc(qc3.clone(), &mut fx.ledger).unwrap();
        // Replay: the commit target is no longer above the root.
        let status = fx.store.insert_qc(qc3, &mut fx.ledger).unwrap();
        assert!(matches!(status, InsertQcStatus::Inserted(None)));
    }

    #[test]
    fn stale_vertices_are_refused_after_commit() {
        let mut fx = Fixture::new();
        let (v1, h1) = fx.extend(genesis_qc(), 1, 1);
        let qc1 = fx.qc(&v1, &h1, None);
        let (v2, h2) = fx.extend(qc1, 2, 2);
        let qc2 = fx.qc(&v2, &h2, None);
        let (v3, h3) = fx.extend(qc2, 3, 3);
        let qc3 = fx.qc(&v3, &h3, Some(h1));
        fx.store.insert_qc(qc3, &mut fx.ledger).unwrap();

        let late = Vertex::new(genesis_qc(), View::of(1), vec![test_txn(5)], Fixture::proposer());
        let err = fx.store.insert_vertex(late, &mut fx.ledger).unwrap_err();
        assert!(matches!(err, VertexStoreError::StaleVertex { .. }));
    }

    #[test]
    fn qc_for_unknown_vertex_requests_sync() {
        let mut fx = Fixture::new();
        let (v1, h1) = fx.extend(genesis_qc(), 1, 1);
        let qc1 = fx.qc(&v1, &h1, None);
        let foreign = Vertex::new(qc1.clone(), View::of(2), vec![test_txn(7)], Fixture::proposer());
        let foreign_header = BFTHeader::new(View::of(2), foreign.id(), h1.ledger_header.clone());
        let qc = fx.qc(&foreign, &foreign_header, None);

        let status = fx.store.insert_qc(qc, &mut fx.ledger).unwrap();
        assert!(matches!(
            status,
            InsertQcStatus::MissingVertex(id) if id == foreign.id()
        ));
    }

    #[test]
    fn get_vertices_walks_ancestors() {
        let mut fx = Fixture::new();
        let (v1, h1) = fx.extend(genesis_qc(), 1, 1);
        let qc1 = fx.qc(&v1, &h1, None);
        let (v2, _) = fx.extend(qc1, 2, 2);

        let vertices = fx.store.get_vertices(v2.id(), 3).unwrap();
        assert_eq!(vertices.len(), 3);
        assert_eq!(vertices[0].id(), v2.id());
        assert_eq!(vertices[1].id(), v1.id());
        assert_eq!(vertices[2].id(), fx.store.root().id());

        assert!(fx.store.get_vertices(Hash::of_bytes(b"nope"), 1).is_none());
    }

    #[test]
    fn snapshot_roundtrips_through_rebuild() {
        let mut fx = Fixture::new();
        let (v1, h1) = fx.extend(genesis_qc(), 1, 1);
        let qc1 = fx.qc(&v1, &h1, None);
        fx.extend(qc1, 2, 2);

        let snapshot = fx.store.state();
        assert_eq!(snapshot.vertices.len(), 2);

        let (mut fresh_ledger, _) = mock_ledger();
        let rebuilt = VertexStore::new(snapshot.clone(), &mut fresh_ledger).unwrap();
        assert_eq!(rebuilt.state(), snapshot);
    }

    #[test]
    fn rebuild_ahead_of_the_ledger_is_refused() {
        // Build a store that has committed view 1, then snapshot it.
        let mut fx = Fixture::new();
        let (v1, h1) = fx.extend(genesis_qc(), 1, 1);
        let qc1 = fx.qc(&v1, &h1, None);
        let (v2, h2) = fx.extend(qc1, 2, 2);
        let qc2 = fx.qc(&v2, &h2, None);
        let (v3, h3) = fx.extend(qc2, 3, 3);
        let qc3 = fx.qc(&v3, &h3, Some(h1));
        fx.store.insert_qc(qc3, &mut fx.ledger).unwrap();
        let snapshot = fx.store.state();

        // A node whose ledger is still at genesis cannot adopt it: the
        // snapshot's descendants build on state it does not have.
        let mut behind = Fixture::new();
        assert!(!behind.store.try_rebuild(snapshot, &mut behind.ledger));
        assert_eq!(behind.store.root_view(), View::genesis());
    }

    #[test]
    fn timeout_certificates_keep_the_highest() {
        let mut fx = Fixture::new();
        let tc = |view: u64| TimeoutCertificate {
            view: View::of(view),
            signatures: TimestampedSignatures::default(),
            high_qc: genesis_qc(),
        };
        fx.store.insert_timeout_certificate(tc(3));
        fx.store.insert_timeout_certificate(tc(2));
        assert_eq!(fx.store.high_qc().highest_tc.unwrap().view, View::of(3));
    }
}
