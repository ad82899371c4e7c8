//! The per-validator state machine: one [`NodeStateMachine`] per node,
//! fed events by a runner and answering with actions.

mod state;

pub use state::NodeStateMachine;
