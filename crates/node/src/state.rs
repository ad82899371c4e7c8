//! Node state machine.

use std::time::Duration;

use tracing::debug;

use vertebra_bft::{BFTEventReducer, BftConfig, VertexStore, VertexStoreError};
use vertebra_core::{Action, Event, StateMachine};
use vertebra_ledger::Ledger;
use vertebra_types::{
    GenesisPackage, KeyPair, LedgerHeader, SafetyState, ValidatorId, ValidatorSet,
    VerifiedVertexStoreState, View,
};

/// A single validator's state machine.
///
/// Wraps the BFT reducer and routes every [`Event`] to the handler it
/// belongs to. Deterministic: the same event sequence always produces the
/// same action sequence.
pub struct NodeStateMachine {
    validator_id: ValidatorId,
    reducer: BFTEventReducer,
    now: Duration,
}

impl std::fmt::Debug for NodeStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStateMachine")
            .field("validator", &self.validator_id)
            .field("view", &self.reducer.current_view())
            .field("now", &self.now)
            .finish()
    }
}

impl NodeStateMachine {
    /// Fresh validator bootstrapping from a genesis package.
    pub fn new(
        key: KeyPair,
        validator_set: ValidatorSet,
        config: BftConfig,
        genesis: GenesisPackage,
        ledger: Box<dyn Ledger>,
    ) -> Result<Self, VertexStoreError> {
        Self::from_recovered(
            key,
            validator_set,
            config,
            genesis.store_state,
            SafetyState::default(),
            ledger,
        )
    }

    /// Resume from persisted vertex store and safety state. The ledger
    /// must already be at the snapshot root's committed header.
    pub fn from_recovered(
        key: KeyPair,
        validator_set: ValidatorSet,
        config: BftConfig,
        store_state: VerifiedVertexStoreState,
        safety_state: SafetyState,
        ledger: Box<dyn Ledger>,
    ) -> Result<Self, VertexStoreError> {
        let validator_id = key.validator_id();
        let reducer =
            BFTEventReducer::new(key, validator_set, config, store_state, safety_state, ledger)?;
        Ok(Self {
            validator_id,
            reducer,
            now: Duration::ZERO,
        })
    }

    pub fn validator_id(&self) -> ValidatorId {
        self.validator_id
    }

    pub fn current_view(&self) -> View {
        self.reducer.current_view()
    }

    pub fn vertex_store(&self) -> &VertexStore {
        self.reducer.vertex_store()
    }

    pub fn safety_state(&self) -> &SafetyState {
        self.reducer.safety_state()
    }

    pub fn committed_ledger_header(&self) -> &LedgerHeader {
        self.reducer.committed_ledger_header()
    }

    /// Enter the first view and arm the pacemaker. Called once by the
    /// runner before any event is delivered.
    pub fn start(&mut self) -> Vec<Action> {
        self.reducer.start()
    }
}

impl StateMachine for NodeStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        debug!(validator = ?self.validator_id, event = event.type_name(), "handling");
        match event {
            Event::LocalTimeout { view } => self.reducer.process_local_timeout(view),
            Event::SyncRequestTimeout { vertex_id } => {
                self.reducer.process_sync_timeout(vertex_id)
            }
            Event::ProposalReceived { proposal } => self.reducer.process_proposal(proposal),
            Event::VoteReceived { vote } => self.reducer.process_vote(vote),
            Event::VertexRequestReceived { from, request } => {
                self.reducer.process_vertex_request(from, request)
            }
            Event::VertexResponseReceived { from, response } => {
                self.reducer.process_vertex_response(from, response)
            }
            Event::VertexErrorResponseReceived { from, response } => {
                self.reducer.process_vertex_error_response(from, response)
            }
            Event::TxnSubmitted { payload } => self.reducer.process_txn_submitted(payload),
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.reducer.set_time(now);
    }

    fn now(&self) -> Duration {
        self.now
    }
}
