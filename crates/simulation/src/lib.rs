//! Deterministic discrete-event simulation of a validator network.
//!
//! All nodes run in one thread on a virtual clock. Messages, timers, and
//! client submissions are events in a single totally-ordered queue; the
//! same seed always replays the same run, byte for byte. Used by the
//! integration tests to exercise partitions, packet loss, crashes, and
//! epoch changes without real networking.

mod event_queue;
mod network;
mod runner;
mod storage;

pub use event_queue::EventKey;
pub use network::{NetworkConfig, SimulatedNetwork};
pub use runner::{SimulationConfig, SimulationRunner, SimulationStats};
pub use storage::{CommittedBatch, SimStorage};

/// Index type for simulation-only node routing. The wire identity is the
/// [`vertebra_types::ValidatorId`]; the index is just the runner's handle.
pub type NodeIndex = u32;
