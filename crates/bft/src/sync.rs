//! Fetching missing ancestor vertices from peers.
//!
//! A certificate can name a vertex we have never seen (dropped proposal,
//! partition, restart). Sync opens a conversation per missing vertex id:
//! ask a peer for the vertex and a few ancestors, walk deeper while the
//! chain still does not connect to our store, and rotate to the next peer
//! with backoff when a request times out.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, warn};

use vertebra_core::{Action, Event, OutboundMessage, TimerId};
use vertebra_ledger::Ledger;
use vertebra_types::{
    BFTHeader, GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, Hash, HighQC,
    ValidatorId, ValidatorSet, VerifiedVertexStoreState, Vertex,
};

use crate::error::VertexStoreError;
use crate::vertex_store::VertexStore;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Timeout for the first request of a conversation.
    pub request_timeout: Duration,
    /// Backoff multiplier per retry.
    pub backoff_factor: f64,
    /// Retries before a conversation is abandoned.
    pub max_attempts: u32,
    /// Ancestors requested per round trip.
    pub request_depth: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(500),
            backoff_factor: 1.5,
            max_attempts: 5,
            request_depth: 3,
        }
    }
}

/// Where a sync target stands relative to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    /// The target vertex is already present; the caller can proceed.
    Synced,
    /// A fetch conversation is running; the caller should drop the
    /// triggering message and wait.
    InProgress,
    /// The target lies at or below the committed root and can be ignored.
    Invalid,
}

struct Conversation {
    /// Certificates to absorb once the vertices are present.
    target: HighQC,
    request: GetVerticesRequest,
    /// Peers to try, in order; the author of the triggering message first.
    candidates: Vec<ValidatorId>,
    attempt: u32,
    /// Vertices gathered so far, child-first from the original target.
    collected: Vec<Vertex>,
}

pub struct BFTSync {
    config: SyncConfig,
    validator_set: ValidatorSet,
    self_id: ValidatorId,
    conversations: BTreeMap<Hash, Conversation>,
}

impl BFTSync {
    pub fn new(config: SyncConfig, validator_set: ValidatorSet, self_id: ValidatorId) -> Self {
        Self {
            config,
            validator_set,
            self_id,
            conversations: BTreeMap::new(),
        }
    }

    pub fn is_syncing(&self) -> bool {
        !self.conversations.is_empty()
    }

    /// Ensure the vertex certified by `target` is (or becomes) locally
    /// present. `author` is asked first since it claimed to have it.
    pub fn sync_to_qc(
        &mut self,
        target: HighQC,
        author: Option<ValidatorId>,
        store: &VertexStore,
    ) -> (SyncResult, Vec<Action>) {
        let vertex_id = target.proposed_vertex_id();
        if store.contains(vertex_id) {
            return (SyncResult::Synced, Vec::new());
        }
        if target.highest_qc.view() <= store.root_view() {
            return (SyncResult::Invalid, Vec::new());
        }
        // Deepening re-keys a conversation under the missing ancestor it
        // is currently fetching, so the original target id is checked
        // against every in-flight target, not just the map keys.
        if self.conversations.contains_key(&vertex_id)
            || self
                .conversations
                .values()
                .any(|c| c.target.proposed_vertex_id() == vertex_id)
        {
            return (SyncResult::InProgress, Vec::new());
        }
        let candidates = self.candidates(author, vertex_id);
        if candidates.is_empty() {
            warn!(?vertex_id, "no peers to sync from");
            return (SyncResult::Invalid, Vec::new());
        }
        let conversation = Conversation {
            request: GetVerticesRequest {
                vertex_id,
                count: self.config.request_depth,
            },
            candidates,
            attempt: 0,
            collected: Vec::new(),
            target,
        };
        debug!(?vertex_id, "starting sync conversation");
        let actions = self.request_actions(&conversation);
        self.conversations.insert(vertex_id, conversation);
        (SyncResult::InProgress, actions)
    }

    /// Handle a batch of vertices from a peer. Returns follow-up actions
    /// and, when the conversation just completed, the target certificates
    /// for the caller to absorb.
    pub fn process_response(
        &mut self,
        from: ValidatorId,
        response: &GetVerticesResponse,
        store: &mut VertexStore,
        ledger: &mut dyn Ledger,
    ) -> (Vec<Action>, Option<HighQC>) {
        let Some(first) = response.vertices.first() else {
            debug!(?from, "empty sync response ignored");
            return (Vec::new(), None);
        };
        let Some(mut conversation) = self.conversations.remove(&first.id()) else {
            // Superseded or never requested.
            return (Vec::new(), None);
        };
        let requested = conversation.request.vertex_id;
        let mut actions = vec![Action::CancelTimer {
            id: TimerId::Sync(requested),
        }];

        if !self.validate_chain(&response.vertices) {
            warn!(?from, ?requested, "invalid sync response, rotating peer");
            conversation.attempt += 1;
            if conversation.attempt >= self.config.max_attempts {
                warn!(?requested, "sync abandoned after invalid responses");
                return (actions, None);
            }
            actions.extend(self.request_actions(&conversation));
            self.conversations.insert(requested, conversation);
            return (actions, None);
        }

        conversation.collected.extend(response.vertices.clone());

        // Insert deepest-first; ancestors below the root are already
        // settled and skipped.
        let mut missing_parent = None;
        for vertex in conversation.collected.iter().rev() {
            if store.contains(vertex.id()) {
                continue;
            }
            match store.insert_vertex(vertex.clone(), ledger) {
                Ok(_) => {}
                Err(VertexStoreError::MissingParent { parent, .. }) => {
                    missing_parent = Some(parent);
                    break;
                }
                Err(VertexStoreError::StaleVertex { .. }) => continue,
                Err(error) => {
                    warn!(%error, ?from, "sync response vertex rejected, abandoning");
                    return (actions, None);
                }
            }
        }

        if let Some(parent) = missing_parent {
            // When the collected chain already reaches the target's
            // committed vertex, the missing ancestors are pruned on every
            // honest peer and deepening can never connect. Adopt the
            // certified committed vertex as the new root instead.
            if let Some(header) = self.try_root_jump(&conversation, store, ledger) {
                debug!(?requested, new_root = ?header.vertex_id, "sync jumped to certified root");
                actions.push(Action::EmitCommitted {
                    headers: vec![header],
                    txns: Vec::new(),
                });
                return (actions, Some(conversation.target));
            }
            conversation.request = GetVerticesRequest {
                vertex_id: parent,
                count: self.config.request_depth,
            };
            conversation.attempt = 0;
            debug!(?parent, "sync deepening");
            actions.extend(self.request_actions(&conversation));
            self.conversations.insert(parent, conversation);
            return (actions, None);
        }

        debug!(?requested, "sync conversation complete");
        (actions, Some(conversation.target))
    }

    /// The peer lacked the vertex. If it knows of a higher certificate,
    /// the conversation is abandoned and the caller should restart sync
    /// against the returned target; otherwise the next peer is tried.
    pub fn process_error_response(
        &mut self,
        from: ValidatorId,
        response: &GetVerticesErrorResponse,
    ) -> (Vec<Action>, Option<HighQC>) {
        let Some(mut conversation) = self.conversations.remove(&response.requested) else {
            return (Vec::new(), None);
        };
        let mut actions = vec![Action::CancelTimer {
            id: TimerId::Sync(response.requested),
        }];
        if response.high_qc.highest_qc.view() > conversation.target.highest_qc.view() {
            debug!(?from, "peer is ahead, retargeting sync");
            return (actions, Some(response.high_qc.clone()));
        }
        conversation.attempt += 1;
        if conversation.attempt >= self.config.max_attempts {
            warn!(requested = ?response.requested, "sync abandoned, no peer has the vertex");
            return (actions, None);
        }
        actions.extend(self.request_actions(&conversation));
        self.conversations.insert(response.requested, conversation);
        (actions, None)
    }

    /// The outstanding request timed out; rotate to the next candidate
    /// with backoff, up to the attempt budget.
    pub fn process_timeout(&mut self, vertex_id: Hash) -> Vec<Action> {
        let Some(mut conversation) = self.conversations.remove(&vertex_id) else {
            return Vec::new();
        };
        conversation.attempt += 1;
        if conversation.attempt >= self.config.max_attempts {
            warn!(?vertex_id, "sync abandoned after {} attempts", conversation.attempt);
            return Vec::new();
        }
        let actions = self.request_actions(&conversation);
        self.conversations.insert(vertex_id, conversation);
        actions
    }

    /// Rebuild the store on top of the target's committed vertex. Only
    /// possible when that vertex was fetched and its certified ledger
    /// header lies beyond the local ledger; the ledger is fast-forwarded
    /// without replaying the skipped transactions. Returns the adopted
    /// root header.
    fn try_root_jump(
        &self,
        conversation: &Conversation,
        store: &mut VertexStore,
        ledger: &mut dyn Ledger,
    ) -> Option<BFTHeader> {
        let committed = conversation
            .target
            .highest_committed_qc
            .committed_header()?;
        if committed.ledger_header.state_version() <= ledger.committed_header().state_version() {
            return None;
        }
        let root_at = conversation
            .collected
            .iter()
            .position(|v| v.id() == committed.vertex_id)?;
        let root = conversation.collected[root_at].clone();
        // `collected` is child-first, so everything before the root
        // descends from it; reverse into parent-first snapshot order.
        let vertices: Vec<Vertex> = conversation.collected[..root_at]
            .iter()
            .rev()
            .cloned()
            .collect();
        // The rebuild prepares the fetched descendants against the
        // fast-forwarded header, so the ledger moves first; a failed
        // rebuild restores the prior header to keep ledger and store in
        // agreement.
        let prior = ledger.fast_forward(committed.ledger_header.clone());
        let state = VerifiedVertexStoreState {
            root,
            high_qc: conversation.target.clone(),
            vertices,
        };
        if !store.try_rebuild(state, ledger) {
            warn!(vertex_id = ?committed.vertex_id, "certified root rejected by the store");
            ledger.fast_forward(prior);
            return None;
        }
        Some(committed.clone())
    }

    fn request_actions(&self, conversation: &Conversation) -> Vec<Action> {
        let to = conversation.candidates
            [conversation.attempt as usize % conversation.candidates.len()];
        let timeout = self
            .config
            .request_timeout
            .mul_f64(self.config.backoff_factor.powi(conversation.attempt as i32));
        vec![
            Action::Send {
                to,
                message: OutboundMessage::VertexRequest(conversation.request),
            },
            Action::SetTimer {
                id: TimerId::Sync(conversation.request.vertex_id),
                duration: timeout,
                event: Event::SyncRequestTimeout {
                    vertex_id: conversation.request.vertex_id,
                },
            },
        ]
    }

    /// The author first, then the rest of the set at an offset derived
    /// from the vertex id so repeated syncs spread across peers.
    fn candidates(&self, author: Option<ValidatorId>, vertex_id: Hash) -> Vec<ValidatorId> {
        let mut out: Vec<ValidatorId> = Vec::new();
        if let Some(author) = author {
            if author != self.self_id {
                out.push(author);
            }
        }
        let others: Vec<ValidatorId> = self
            .validator_set
            .validators()
            .iter()
            .map(|v| v.validator_id)
            .filter(|id| *id != self.self_id && Some(*id) != author)
            .collect();
        if !others.is_empty() {
            let start = vertex_id.as_bytes()[0] as usize % others.len();
            out.extend(others[start..].iter().chain(others[..start].iter()));
        }
        out
    }

    /// Child-first continuity plus certificate validity for every element.
    fn validate_chain(&self, vertices: &[Vertex]) -> bool {
        for window in vertices.windows(2) {
            if window[0].parent_id() != window[1].id() {
                return false;
            }
        }
        vertices
            .iter()
            .all(|v| v.qc.verify(&self.validator_set).is_ok())
    }
}
