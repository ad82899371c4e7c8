//! The discrete-event simulation loop.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use vertebra_bft::{BftConfig, ProposerElection};
use vertebra_core::{Action, Event, OutboundMessage, StateMachine, TimerId};
use vertebra_ledger::test_utils::{MockStateComputer, SimpleMempool};
use vertebra_ledger::{Ledger, StateComputerLedger};
use vertebra_node::NodeStateMachine;
use vertebra_types::test_utils::test_validator_set;
use vertebra_types::{
    genesis_package, Epoch, KeyPair, LedgerHeader, ValidatorId, ValidatorSet, View,
};

use crate::event_queue::EventKey;
use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::storage::SimStorage;
use crate::NodeIndex;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub num_validators: u8,
    pub network: NetworkConfig,
    pub seed: u64,
    /// When set, every node's state computer closes the epoch at the given
    /// view, handing over to the given validator set.
    pub epoch_end: Option<(View, ValidatorSet)>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_validators: 4,
            network: NetworkConfig::default(),
            seed: 0,
            epoch_end: None,
        }
    }
}

/// Counters over one simulation run. Deterministic per seed, so tests can
/// compare whole snapshots across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationStats {
    pub events_processed: u64,
    /// Indexed by [`vertebra_core::EventPriority`] discriminant.
    pub events_by_priority: [u64; 4],
    pub actions_generated: u64,
    pub messages_sent: u64,
    pub messages_dropped_partition: u64,
    pub messages_dropped_loss: u64,
    pub timers_set: u64,
    pub timers_cancelled: u64,
}

impl SimulationStats {
    pub fn delivery_rate(&self) -> f64 {
        if self.messages_sent == 0 {
            return 1.0;
        }
        let dropped = self.messages_dropped_partition + self.messages_dropped_loss;
        (self.messages_sent - dropped) as f64 / self.messages_sent as f64
    }
}

/// Runs a whole validator network on a virtual clock.
///
/// Nodes are indexed `0..n` in validator-set order (sorted by validator
/// id), so `leader_of(view)` and the set's proposer schedule agree. All
/// randomness (latency jitter, packet loss) comes from one seeded RNG;
/// two runners with the same config replay identically.
pub struct SimulationRunner {
    config: SimulationConfig,
    genesis_header: LedgerHeader,
    validator_set: ValidatorSet,
    election: ProposerElection,
    keys: Vec<KeyPair>,
    index_of: HashMap<ValidatorId, NodeIndex>,
    nodes: Vec<NodeStateMachine>,
    storages: Vec<SimStorage>,
    network: SimulatedNetwork,
    rng: ChaCha8Rng,
    queue: BTreeMap<EventKey, Event>,
    timers: HashMap<(NodeIndex, TimerId), EventKey>,
    now: Duration,
    sequence: u64,
    stats: SimulationStats,
}

impl SimulationRunner {
    pub fn new(config: SimulationConfig) -> Self {
        let genesis_header = LedgerHeader::genesis(Epoch(1), 0);
        let (unordered_keys, validator_set) = test_validator_set(config.num_validators);

        // Node index i must be validator_set.validators()[i].
        let keys: Vec<KeyPair> = validator_set
            .validators()
            .iter()
            .map(|info| {
                unordered_keys
                    .iter()
                    .find(|k| k.validator_id() == info.validator_id)
                    .cloned()
                    .expect("validator set was built from these keys")
            })
            .collect();
        let index_of: HashMap<ValidatorId, NodeIndex> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.validator_id(), i as NodeIndex))
            .collect();

        let nodes: Vec<NodeStateMachine> = keys
            .iter()
            .map(|key| {
                let ledger = Self::fresh_ledger(&config, genesis_header.clone());
                NodeStateMachine::new(
                    key.clone(),
                    validator_set.clone(),
                    BftConfig::default(),
                    genesis_package(genesis_header.clone()),
                    Box::new(ledger),
                )
                .expect("genesis store state is valid")
            })
            .collect();
        let storages = (0..nodes.len()).map(|_| SimStorage::new()).collect();

        let network = SimulatedNetwork::new(config.network.clone(), config.num_validators as u32);
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            election: ProposerElection::new(validator_set.clone()),
            config,
            genesis_header,
            validator_set,
            keys,
            index_of,
            nodes,
            storages,
            network,
            rng,
            queue: BTreeMap::new(),
            timers: HashMap::new(),
            now: Duration::ZERO,
            sequence: 0,
            stats: SimulationStats::default(),
        }
    }

    fn fresh_ledger(config: &SimulationConfig, header: LedgerHeader) -> StateComputerLedger {
        let computer = match &config.epoch_end {
            Some((view, next)) => MockStateComputer::with_epoch_end(*view, next.clone()),
            None => MockStateComputer::new(),
        };
        StateComputerLedger::new(
            header,
            Box::new(computer),
            Box::new(SimpleMempool::default()),
        )
    }

    // ═══════════════════════════════════════════════════════════════════
    // Driving the simulation
    // ═══════════════════════════════════════════════════════════════════

    /// Start every node: enters view 1 and arms the first pacemaker timer.
    pub fn start(&mut self) {
        for index in 0..self.nodes.len() as NodeIndex {
            self.nodes[index as usize].set_time(self.now);
            let actions = self.nodes[index as usize].start();
            self.process_actions(index, actions);
        }
    }

    /// Process queued events in order until the virtual clock reaches
    /// `deadline` or the queue drains.
    pub fn run_until(&mut self, deadline: Duration) {
        loop {
            let Some((&key, _)) = self.queue.first_key_value() else {
                break;
            };
            if key.time > deadline {
                break;
            }
            let Some(event) = self.queue.remove(&key) else {
                break;
            };
            self.timers.retain(|_, k| *k != key);
            self.now = key.time;

            self.stats.events_processed += 1;
            self.stats.events_by_priority[key.priority as usize] += 1;
            trace!(
                node = key.node_index,
                time_ms = key.time.as_millis() as u64,
                event = event.type_name(),
                "dispatch"
            );

            let node = &mut self.nodes[key.node_index as usize];
            node.set_time(self.now);
            let actions = node.handle(event);
            self.process_actions(key.node_index, actions);
        }
        self.now = deadline;
    }

    /// Submit a client transaction to `node` at the current virtual time.
    pub fn submit_txn(&mut self, node: NodeIndex, payload: Vec<u8>) {
        self.schedule(self.now, node, Event::TxnSubmitted { payload });
    }

    /// Crash `node` and bring it back from its persisted state. In-flight
    /// messages addressed to it survive; its timers do not.
    pub fn restart_node(&mut self, index: NodeIndex) {
        debug!(node = index, "restarting");
        let stale: Vec<(NodeIndex, TimerId)> = self
            .timers
            .keys()
            .filter(|(node, _)| *node == index)
            .copied()
            .collect();
        for timer in stale {
            if let Some(key) = self.timers.remove(&timer) {
                self.queue.remove(&key);
            }
        }

        let storage = &self.storages[index as usize];
        let mut ledger = Self::fresh_ledger(&self.config, self.genesis_header.clone());
        for batch in storage.committed_batches() {
            let proof = batch
                .headers
                .last()
                .map(|h| h.ledger_header.clone())
                .expect("committed batches carry at least one header");
            if batch.txns.is_empty()
                && proof.state_version() > ledger.committed_header().state_version()
            {
                // A sync root jump was recorded without its transactions.
                ledger.fast_forward(proof);
            } else {
                ledger
                    .commit(batch.txns.clone(), proof)
                    .expect("persisted batches replay in order");
            }
        }
        let store_state = storage
            .vertex_store_state()
            .cloned()
            .unwrap_or_else(|| genesis_package(self.genesis_header.clone()).store_state);
        let safety_state = storage.safety_state().cloned().unwrap_or_default();

        let mut node = NodeStateMachine::from_recovered(
            self.keys[index as usize].clone(),
            self.validator_set.clone(),
            BftConfig::default(),
            store_state,
            safety_state,
            Box::new(ledger),
        )
        .expect("persisted store state rebuilds");
        node.set_time(self.now);
        let actions = node.start();
        self.nodes[index as usize] = node;
        self.process_actions(index, actions);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Action execution
    // ═══════════════════════════════════════════════════════════════════

    fn process_actions(&mut self, from: NodeIndex, actions: Vec<Action>) {
        for action in actions {
            self.stats.actions_generated += 1;
            self.process_action(from, action);
        }
    }

    fn process_action(&mut self, from: NodeIndex, action: Action) {
        match action {
            Action::Broadcast { message } => {
                for to in 0..self.nodes.len() as NodeIndex {
                    self.send_message(from, to, message.clone());
                }
            }
            Action::Send { to, message } => {
                if let Some(&to) = self.index_of.get(&to) {
                    self.send_message(from, to, message);
                }
            }
            Action::SetTimer {
                id,
                duration,
                event,
            } => {
                // Re-arming replaces the pending expiry.
                if let Some(old) = self.timers.remove(&(from, id)) {
                    self.queue.remove(&old);
                }
                let key = self.schedule(self.now + duration, from, event);
                self.timers.insert((from, id), key);
                self.stats.timers_set += 1;
            }
            Action::CancelTimer { id } => {
                if let Some(key) = self.timers.remove(&(from, id)) {
                    self.queue.remove(&key);
                }
                self.stats.timers_cancelled += 1;
            }
            Action::PersistSafetyState { state } => {
                self.storages[from as usize].put_safety_state(state);
            }
            Action::PersistVertexStoreState { state } => {
                self.storages[from as usize].put_vertex_store_state(state);
            }
            Action::EmitCommitted { headers, txns } => {
                self.storages[from as usize].append_committed(headers, txns);
            }
            Action::EmitEpochChange { header } => {
                self.storages[from as usize].set_epoch_change(header);
            }
        }
    }

    fn send_message(&mut self, from: NodeIndex, to: NodeIndex, message: OutboundMessage) {
        self.stats.messages_sent += 1;
        // Loopback delivery never touches the wire.
        let latency = if from == to {
            Duration::ZERO
        } else if self.network.is_partitioned(from, to) {
            self.stats.messages_dropped_partition += 1;
            return;
        } else if self.network.should_drop_packet(&mut self.rng) {
            self.stats.messages_dropped_loss += 1;
            return;
        } else {
            self.network.sample_latency(&mut self.rng)
        };
        let from_id = self.keys[from as usize].validator_id();
        let event = message_to_event(from_id, message);
        self.schedule(self.now + latency, to, event);
    }

    fn schedule(&mut self, time: Duration, node: NodeIndex, event: Event) -> EventKey {
        self.sequence += 1;
        let key = EventKey::new(time, &event, node, self.sequence);
        self.queue.insert(key, event);
        key
    }

    // ═══════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: NodeIndex) -> &NodeStateMachine {
        &self.nodes[index as usize]
    }

    pub fn storage(&self, index: NodeIndex) -> &SimStorage {
        &self.storages[index as usize]
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn validator_id(&self, index: NodeIndex) -> ValidatorId {
        self.keys[index as usize].validator_id()
    }

    /// Node index of the proposer for `view`.
    pub fn leader_of(&self, view: View) -> NodeIndex {
        let leader = self.election.leader_for(view);
        self.index_of[&leader]
    }

    /// Committed transaction payloads of `node`, in ledger order.
    pub fn committed_payloads(&self, index: NodeIndex) -> Vec<Vec<u8>> {
        self.storages[index as usize]
            .committed_txns()
            .iter()
            .map(|t| t.payload().to_vec())
            .collect()
    }
}

fn message_to_event(from: ValidatorId, message: OutboundMessage) -> Event {
    match message {
        OutboundMessage::Proposal(proposal) => Event::ProposalReceived { proposal },
        OutboundMessage::Vote(vote) => Event::VoteReceived { vote: *vote },
        OutboundMessage::VertexRequest(request) => Event::VertexRequestReceived { from, request },
        OutboundMessage::VertexResponse(response) => {
            Event::VertexResponseReceived { from, response }
        }
        OutboundMessage::VertexErrorResponse(response) => {
            Event::VertexErrorResponseReceived { from, response }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_fresh_nodes_schedule_their_first_timeout() {
        let mut runner = SimulationRunner::new(SimulationConfig::default());
        runner.start();
        // One pacemaker timer per node.
        assert_eq!(runner.stats().timers_set, 4);
    }
}
