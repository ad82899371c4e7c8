//! The BFT consensus machine.
//!
//! A leader-based HotStuff variant over a speculative vertex DAG:
//!
//! - [`Pacemaker`] drives view progression and leader proposals, with
//!   exponential timeout backoff while the chain is not committing.
//! - [`SafetyRules`] is the only component that signs votes; its durable
//!   state makes equivocation impossible, even across crashes.
//! - [`VertexStore`] holds the speculatively executed DAG between the
//!   last committed vertex (the root) and the proposals being voted on.
//! - [`PendingVotes`] aggregates votes into quorum certificates and
//!   timeout votes into timeout certificates.
//! - [`BFTSync`] fetches missing ancestor vertices from peers when a
//!   certificate refers to a vertex we have never seen.
//! - [`BFTEventReducer`] wires the components into one serialized
//!   event-processing path.

mod config;
mod error;
mod pacemaker;
mod pending_votes;
mod reducer;
mod safety;
mod sync;
mod vertex_store;

pub use config::BftConfig;
pub use error::{SafetyViolation, VertexStoreError};
pub use pacemaker::{Pacemaker, PacemakerConfig, ProposerElection, ViewUpdate};
pub use pending_votes::{PendingVotes, VoteProcessingResult, VoteRejection};
pub use reducer::BFTEventReducer;
pub use safety::SafetyRules;
pub use sync::{BFTSync, SyncConfig, SyncResult};
pub use vertex_store::{CommitBatch, InsertQcStatus, VertexStore};
