//! Core event/action model for Vertebra consensus.
//!
//! The consensus machine is built on a simple synchronous model:
//!
//! ```text
//! Events → StateMachine::handle() → Actions
//! ```
//!
//! The state machine is deterministic and performs no I/O; a runner
//! (simulation or production) delivers events, executes the returned
//! actions, and converts action results back into events. All vertex
//! insertions, votes, and commits flow through one serialized processing
//! path, so the DAG and safety state never see interleaved mutation.

mod action;
mod event;
mod message;
mod traits;

pub use action::Action;
pub use event::{Event, EventPriority};
pub use message::OutboundMessage;
pub use traits::StateMachine;

use vertebra_types::Hash;

/// Identifies a cancellable timer.
///
/// The pacemaker timer must be cancelled atomically (in the same action
/// batch) by any event that advances the view, so a stale timeout can
/// never fire against the new view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// The pacemaker's per-view countdown.
    Pacemaker,
    /// An outstanding sync request, keyed by the requested vertex id.
    Sync(Hash),
}
