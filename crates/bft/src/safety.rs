//! Safety rules: the only place votes are signed.
//!
//! The rules enforce the two HotStuff voting constraints (never vote twice
//! in a view, never vote for a branch below the lock) and derive the
//! commit target carried in each vote. The resulting [`SafetyState`] must
//! be persisted before the vote leaves the node; the caller is responsible
//! for ordering the persistence action ahead of the send.

use tracing::debug;

use vertebra_types::{
    signing, BFTHeader, HighQC, KeyPair, SafetyState, Vertex, View, Vote, VoteData,
};

use crate::error::SafetyViolation;

pub struct SafetyRules {
    key: KeyPair,
    state: SafetyState,
}

impl SafetyRules {
    /// Resume from persisted state (use `SafetyState::default()` for a
    /// fresh validator).
    pub fn new(key: KeyPair, state: SafetyState) -> Self {
        Self { key, state }
    }

    pub fn state(&self) -> &SafetyState {
        &self.state
    }

    /// Sign a vote for `vertex`, certifying `proposed` as its execution
    /// result.
    ///
    /// Voting again for the same vertex returns the stored vote unchanged,
    /// so retransmissions can never produce two different signatures for
    /// one view.
    pub fn vote_for(
        &mut self,
        vertex: &Vertex,
        proposed: BFTHeader,
        timestamp_ms: u64,
        high_qc: HighQC,
    ) -> Result<Vote, SafetyViolation> {
        if let Some(last) = &self.state.last_vote {
            if last.view() == vertex.view && last.vote_data.proposed.vertex_id == vertex.id() {
                return Ok(last.clone());
            }
        }
        if vertex.view <= self.state.last_voted_view {
            return Err(SafetyViolation::ViewNotNewer {
                requested: vertex.view,
                last_voted: self.state.last_voted_view,
            });
        }
        if vertex.parent_view() < self.state.locked_view {
            return Err(SafetyViolation::ParentBelowLock {
                parent: vertex.parent_view(),
                locked: self.state.locked_view,
            });
        }

        let vote_data = construct_vote_data(vertex, proposed);
        let message = signing::vote_message(&vote_data, timestamp_ms);
        let vote = Vote {
            voter: self.key.validator_id(),
            signature: self.key.sign(&message),
            vote_data,
            timestamp_ms,
            high_qc,
            timeout_signature: None,
        };

        self.state.last_voted_view = vertex.view;
        // Two consecutive QCs below the vertex pre-commit its grandparent;
        // the lock forbids ever voting around that chain.
        let grandparent_view = vertex.grandparent_header().view;
        if grandparent_view > self.state.locked_view {
            self.state.locked_view = grandparent_view;
        }
        self.state.last_vote = Some(vote.clone());
        debug!(
            view = ?vertex.view,
            locked = ?self.state.locked_view,
            committed = ?vote.vote_data.committed.as_ref().map(|h| h.view),
            "voted"
        );
        Ok(vote)
    }

    /// Upgrade the stored vote for `view` into a timeout vote by attaching
    /// a timeout signature. Idempotent; fails if no vote for `view` exists
    /// (the caller should then vote on an empty timeout vertex first).
    pub fn timeout_vote(&mut self, view: View) -> Result<Vote, SafetyViolation> {
        let last = self
            .state
            .last_vote
            .as_ref()
            .filter(|v| v.view() == view)
            .ok_or(SafetyViolation::NoVoteToTimeout(view))?;
        if last.is_timeout() {
            return Ok(last.clone());
        }
        let mut vote = last.clone();
        vote.timeout_signature = Some(self.key.sign(&signing::timeout_message(view)));
        self.state.last_vote = Some(vote.clone());
        Ok(vote)
    }
}

/// Derive what this vote certifies. The committed header is the
/// grandparent exactly when the chain `vertex -> parent -> grandparent`
/// skips no views and stays above genesis; anything weaker only extends
/// the speculative DAG.
fn construct_vote_data(vertex: &Vertex, proposed: BFTHeader) -> VoteData {
    let committed = if vertex.has_direct_parent()
        && vertex.parent_has_direct_parent()
        && !vertex.touches_genesis()
    {
        Some(vertex.grandparent_header().clone())
    } else {
        None
    };
    VoteData {
        proposed,
        parent: vertex.parent_header().clone(),
        committed,
    }
}
