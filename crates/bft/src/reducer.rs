//! The event reducer: one serialized processing path through every
//! consensus component.
//!
//! All proposals, votes, timeouts, and sync traffic funnel through here,
//! so the vertex store, safety state, and pacemaker never see interleaved
//! mutation. Each entry point returns the actions the runner must execute;
//! within a batch, persistence actions precede the sends that depend on
//! them.

use std::time::Duration;

use tracing::{debug, info, warn};

use vertebra_core::{Action, Event, OutboundMessage, TimerId};
use vertebra_ledger::Ledger;
use vertebra_types::{
    signing, GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, Hash, HighQC,
    KeyPair, Proposal, QuorumCertificate, SafetyState, Txn, ValidatorId, ValidatorSet,
    VerifiedVertexStoreState, Vertex, View, Vote,
};

use crate::config::BftConfig;
use crate::error::{SafetyViolation, VertexStoreError};
use crate::pacemaker::{Pacemaker, ProposerElection, ViewUpdate};
use crate::pending_votes::{PendingVotes, VoteProcessingResult};
use crate::safety::SafetyRules;
use crate::sync::{BFTSync, SyncResult};
use crate::vertex_store::{CommitBatch, InsertQcStatus, VertexStore};

pub struct BFTEventReducer {
    key: KeyPair,
    self_id: ValidatorId,
    validator_set: ValidatorSet,
    config: BftConfig,
    pacemaker: Pacemaker,
    safety: SafetyRules,
    vertex_store: VertexStore,
    pending_votes: PendingVotes,
    sync: BFTSync,
    ledger: Box<dyn Ledger>,
    now: Duration,
    /// Set once a committed header closes the epoch; the node stops
    /// proposing on the old validator set. Voting continues so every
    /// peer can still learn the committing certificates.
    epoch_closed: bool,
}

impl BFTEventReducer {
    pub fn new(
        key: KeyPair,
        validator_set: ValidatorSet,
        config: BftConfig,
        store_state: VerifiedVertexStoreState,
        safety_state: SafetyState,
        mut ledger: Box<dyn Ledger>,
    ) -> Result<Self, VertexStoreError> {
        let self_id = key.validator_id();
        let vertex_store = VertexStore::new(store_state, ledger.as_mut())?;
        let epoch_closed = ledger.committed_header().is_end_of_epoch();
        Ok(Self {
            self_id,
            pacemaker: Pacemaker::new(
                config.pacemaker.clone(),
                ProposerElection::new(validator_set.clone()),
            ),
            safety: SafetyRules::new(key.clone(), safety_state),
            pending_votes: PendingVotes::new(validator_set.clone()),
            sync: BFTSync::new(config.sync.clone(), validator_set.clone(), self_id),
            key,
            validator_set,
            config,
            vertex_store,
            ledger,
            now: Duration::ZERO,
            epoch_closed,
        })
    }

    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn current_view(&self) -> View {
        self.pacemaker.current_view()
    }

    pub fn vertex_store(&self) -> &VertexStore {
        &self.vertex_store
    }

    pub fn safety_state(&self) -> &SafetyState {
        self.safety.state()
    }

    pub fn committed_ledger_header(&self) -> &vertebra_types::LedgerHeader {
        self.ledger.committed_header()
    }

    /// Enter the first view justified by the recovered certificates.
    /// Called once, before any event is delivered.
    pub fn start(&mut self) -> Vec<Action> {
        let highest = self.vertex_store.high_qc().highest_view();
        self.advance_view(highest)
    }

    pub fn process_proposal(&mut self, proposal: Proposal) -> Vec<Action> {
        let store_version = self.vertex_store.version();
        if let Err(error) = proposal.verify(&self.validator_set) {
            warn!(%error, "invalid proposal dropped");
            return Vec::new();
        }
        let vertex = proposal.vertex.clone();
        let expected = self.pacemaker.leader_for(vertex.view);
        if vertex.proposer != expected {
            warn!(view = ?vertex.view, proposer = ?vertex.proposer, "proposal from non-leader dropped");
            return Vec::new();
        }

        // Absorb the proposer's certificates first; this may advance our
        // view to the proposal's or start a sync conversation.
        let mut actions = self.absorb_high_qc(proposal.high_qc, Some(vertex.proposer));

        match self
            .vertex_store
            .insert_vertex(vertex.clone(), self.ledger.as_mut())
        {
            Ok(header) => {
                if vertex.view == self.pacemaker.current_view() {
                    match self.safety.vote_for(
                        &vertex,
                        header,
                        self.now_ms(),
                        self.vertex_store.high_qc(),
                    ) {
                        Ok(vote) => {
                            let next_leader = self.pacemaker.leader_for(vertex.view.next());
                            actions.push(Action::PersistSafetyState {
                                state: self.safety.state().clone(),
                            });
                            actions.push(Action::Send {
                                to: next_leader,
                                message: OutboundMessage::Vote(Box::new(vote)),
                            });
                        }
                        Err(violation) => debug!(%violation, "not voting"),
                    }
                }
            }
            Err(VertexStoreError::MissingParent { .. }) => {
                // The sync conversation opened above will recover the
                // branch; this proposal itself is dropped.
                debug!(view = ?vertex.view, "proposal parent missing, deferring to sync");
            }
            Err(error) => debug!(%error, "proposal vertex rejected"),
        }
        self.finish(actions, store_version)
    }

    pub fn process_vote(&mut self, vote: Vote) -> Vec<Action> {
        let store_version = self.vertex_store.version();
        let mut actions = Vec::new();

        // The vote piggy-backs the voter's certificates; catch up first if
        // it knows more than we do.
        if vote.high_qc.highest_view() > self.vertex_store.high_qc().highest_view()
            && self.verify_high_qc(&vote.high_qc)
        {
            actions.extend(self.absorb_high_qc(vote.high_qc.clone(), Some(vote.voter)));
        }

        match self.pending_votes.insert_vote(&vote) {
            VoteProcessingResult::Quorum(qc) => {
                info!(view = ?qc.view(), "quorum certificate formed");
                let target = HighQC::from_qcs(
                    qc,
                    self.vertex_store.high_qc().highest_committed_qc,
                    None,
                );
                actions.extend(self.absorb_high_qc(target, Some(vote.voter)));
            }
            VoteProcessingResult::Timeout(tc) => {
                info!(view = ?tc.view, "timeout certificate formed");
                self.vertex_store.insert_timeout_certificate(tc);
                let highest = self.vertex_store.high_qc().highest_view();
                actions.extend(self.advance_view(highest));
            }
            VoteProcessingResult::Accepted => {}
            VoteProcessingResult::Rejected(rejection) => debug!(%rejection, "vote rejected"),
        }
        self.finish(actions, store_version)
    }

    pub fn process_local_timeout(&mut self, view: View) -> Vec<Action> {
        let store_version = self.vertex_store.version();
        let root_view = self.vertex_store.root_view();
        let Some(rearm) = self.pacemaker.process_local_timeout(view, root_view) else {
            return Vec::new();
        };
        info!(?view, "view timed out");
        let mut actions = vec![Action::SetTimer {
            id: TimerId::Pacemaker,
            duration: rearm,
            event: Event::LocalTimeout { view },
        }];
        let vote = match self.safety.timeout_vote(view) {
            Ok(vote) => Some(vote),
            Err(SafetyViolation::NoVoteToTimeout(_)) => self.vote_on_empty_timeout_vertex(view),
            Err(violation) => {
                debug!(%violation, "cannot form timeout vote");
                None
            }
        };
        if let Some(vote) = vote {
            actions.push(Action::PersistSafetyState {
                state: self.safety.state().clone(),
            });
            actions.push(Action::Broadcast {
                message: OutboundMessage::Vote(Box::new(vote)),
            });
        }
        self.finish(actions, store_version)
    }

    pub fn process_vertex_request(
        &mut self,
        from: ValidatorId,
        request: GetVerticesRequest,
    ) -> Vec<Action> {
        match self.vertex_store.get_vertices(request.vertex_id, request.count) {
            Some(vertices) => vec![Action::Send {
                to: from,
                message: OutboundMessage::VertexResponse(GetVerticesResponse { vertices }),
            }],
            None => vec![Action::Send {
                to: from,
                message: OutboundMessage::VertexErrorResponse(GetVerticesErrorResponse {
                    requested: request.vertex_id,
                    high_qc: self.vertex_store.high_qc(),
                }),
            }],
        }
    }

    pub fn process_vertex_response(
        &mut self,
        from: ValidatorId,
        response: GetVerticesResponse,
    ) -> Vec<Action> {
        let store_version = self.vertex_store.version();
        let (mut actions, completed) = self.sync.process_response(
            from,
            &response,
            &mut self.vertex_store,
            self.ledger.as_mut(),
        );
        if let Some(target) = completed {
            actions.extend(self.absorb_certificates(target));
        }
        self.finish(actions, store_version)
    }

    pub fn process_vertex_error_response(
        &mut self,
        from: ValidatorId,
        response: GetVerticesErrorResponse,
    ) -> Vec<Action> {
        let store_version = self.vertex_store.version();
        let (mut actions, retarget) = self.sync.process_error_response(from, &response);
        if let Some(high_qc) = retarget {
            if self.verify_high_qc(&high_qc) {
                actions.extend(self.absorb_high_qc(high_qc, Some(from)));
            } else {
                warn!(?from, "peer sent unverifiable certificates, ignoring");
            }
        }
        self.finish(actions, store_version)
    }

    pub fn process_sync_timeout(&mut self, vertex_id: Hash) -> Vec<Action> {
        self.sync.process_timeout(vertex_id)
    }

    pub fn process_txn_submitted(&mut self, payload: Vec<u8>) -> Vec<Action> {
        self.ledger.add_txn(Txn::new(payload));
        Vec::new()
    }

    fn now_ms(&self) -> u64 {
        self.now.as_millis() as u64
    }

    /// Make sure the certified vertex is present (syncing if not), then
    /// absorb the certificates and let the pacemaker react.
    fn absorb_high_qc(&mut self, high_qc: HighQC, author: Option<ValidatorId>) -> Vec<Action> {
        let (result, mut actions) = self.sync.sync_to_qc(high_qc.clone(), author, &self.vertex_store);
        match result {
            SyncResult::Synced => actions.extend(self.absorb_certificates(high_qc)),
            SyncResult::InProgress | SyncResult::Invalid => {}
        }
        actions
    }

    fn absorb_certificates(&mut self, high_qc: HighQC) -> Vec<Action> {
        let mut actions = Vec::new();
        if let Some(tc) = high_qc.highest_tc.clone() {
            self.vertex_store.insert_timeout_certificate(tc);
        }
        actions.extend(self.insert_qc(high_qc.highest_committed_qc));
        actions.extend(self.insert_qc(high_qc.highest_qc));
        let highest = self.vertex_store.high_qc().highest_view();
        actions.extend(self.advance_view(highest));
        actions
    }

    fn insert_qc(&mut self, qc: QuorumCertificate) -> Vec<Action> {
        match self.vertex_store.insert_qc(qc, self.ledger.as_mut()) {
            Ok(InsertQcStatus::Inserted(Some(batch))) => self.on_commit(batch),
            Ok(InsertQcStatus::Inserted(None)) => Vec::new(),
            Ok(InsertQcStatus::MissingVertex(id)) => {
                // Below-root certificates land here after pruning; nothing
                // to do.
                debug!(vertex = ?id, "certificate for absent vertex");
                Vec::new()
            }
            Err(error) => {
                warn!(%error, "certified branch rejected by ledger");
                Vec::new()
            }
        }
    }

    fn on_commit(&mut self, batch: CommitBatch) -> Vec<Action> {
        info!(
            view = ?batch.proof.view,
            version = batch.proof.ledger_header.state_version(),
            txns = batch.txns.len(),
            "committed"
        );
        let mut actions = vec![Action::EmitCommitted {
            headers: batch.headers,
            txns: batch.txns,
        }];
        if batch.proof.ledger_header.is_end_of_epoch() && !self.epoch_closed {
            self.epoch_closed = true;
            info!(epoch = ?batch.proof.ledger_header.epoch, "epoch closed");
            actions.push(Action::EmitEpochChange {
                header: batch.proof,
            });
        }
        actions
    }

    fn advance_view(&mut self, certified: View) -> Vec<Action> {
        let root_view = self.vertex_store.root_view();
        match self.pacemaker.process_certified_view(certified, root_view) {
            Some(update) => self.on_view_update(update),
            None => Vec::new(),
        }
    }

    fn on_view_update(&mut self, update: ViewUpdate) -> Vec<Action> {
        self.pending_votes.garbage_collect_below(update.view);
        let mut actions = vec![
            Action::CancelTimer {
                id: TimerId::Pacemaker,
            },
            Action::SetTimer {
                id: TimerId::Pacemaker,
                duration: update.timeout,
                event: Event::LocalTimeout { view: update.view },
            },
        ];
        if update.leader == self.self_id && !self.epoch_closed {
            actions.extend(self.propose(update.view));
        }
        actions
    }

    fn propose(&mut self, view: View) -> Vec<Action> {
        let high_qc = self.vertex_store.high_qc();
        let parent = high_qc.highest_qc.proposed();
        let txns = if parent.ledger_header.is_end_of_epoch() {
            Vec::new()
        } else {
            let in_flight = self.vertex_store.uncommitted_txns(parent.vertex_id);
            self.ledger
                .next_txns(self.config.pacemaker.proposal_txn_limit, &in_flight)
        };
        let vertex = Vertex::new(high_qc.highest_qc.clone(), view, txns, self.self_id);
        let signature = self.key.sign(&signing::proposal_message(&vertex.id()));
        info!(?view, txns = vertex.txns.len(), "proposing");
        vec![Action::Broadcast {
            message: OutboundMessage::Proposal(Proposal {
                vertex,
                high_qc,
                signature,
            }),
        }]
    }

    /// On timeout with no vote cast this view, vote on a self-made empty
    /// vertex so the timeout vote still carries usable vote data.
    fn vote_on_empty_timeout_vertex(&mut self, view: View) -> Option<Vote> {
        let high_qc = self.vertex_store.high_qc();
        if high_qc.highest_qc.view() >= view {
            return None;
        }
        let vertex = Vertex::new(high_qc.highest_qc.clone(), view, Vec::new(), self.self_id);
        let header = match self
            .vertex_store
            .insert_vertex(vertex.clone(), self.ledger.as_mut())
        {
            Ok(header) => header,
            Err(error) => {
                debug!(%error, "timeout vertex rejected");
                return None;
            }
        };
        match self
            .safety
            .vote_for(&vertex, header, self.now_ms(), self.vertex_store.high_qc())
        {
            Ok(_) => self.safety.timeout_vote(view).ok(),
            Err(violation) => {
                debug!(%violation, "cannot vote on timeout vertex");
                None
            }
        }
    }

    fn verify_high_qc(&self, high_qc: &HighQC) -> bool {
        high_qc.highest_qc.verify(&self.validator_set).is_ok()
            && high_qc
                .highest_committed_qc
                .verify(&self.validator_set)
                .is_ok()
            && match &high_qc.highest_tc {
                Some(tc) => tc.verify(&self.validator_set).is_ok(),
                None => true,
            }
    }

    /// Append a vertex store snapshot when this event changed it.
    fn finish(&mut self, mut actions: Vec<Action>, version_before: u64) -> Vec<Action> {
        if self.vertex_store.version() != version_before {
            actions.push(Action::PersistVertexStoreState {
                state: self.vertex_store.state(),
            });
        }
        actions
    }
}
