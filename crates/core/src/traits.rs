//! State machine traits.

use std::time::Duration;

use crate::{Action, Event};

/// A deterministic, synchronous event processor.
///
/// Implementations must not perform I/O, read clocks, or use ambient
/// randomness. Time only advances through [`StateMachine::set_time`],
/// which the runner calls before delivering each event. Given the same
/// event sequence and timestamps, a state machine must produce the same
/// actions every run.
pub trait StateMachine {
    /// Process one event and return the actions it produced.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Advance the machine's notion of wall-clock time.
    fn set_time(&mut self, now: Duration);

    /// The machine's current notion of time.
    fn now(&self) -> Duration;
}

