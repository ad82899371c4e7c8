//! Consensus error taxonomy.

use vertebra_ledger::LedgerError;
use vertebra_types::{Hash, View};

/// Why a vertex could not enter the store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VertexStoreError {
    /// The parent is unknown; the caller should start a sync conversation.
    #[error("vertex {vertex:?} has unknown parent {parent:?}")]
    MissingParent { vertex: Hash, parent: Hash },

    /// The vertex is at or below the committed root and can never matter.
    #[error("vertex at {view:?} is not above the root at {root_view:?}")]
    StaleVertex { view: View, root_view: View },

    /// The vertex's view does not come after its parent's, so it would
    /// fork beneath state that is already settled. A second child at an
    /// already-committed view never reaches this check: it sits at or
    /// below the root and is rejected as [`StaleVertex`] first.
    #[error("vertex {vertex:?} at {view:?} does not extend its parent at {parent_view:?}")]
    ConflictingVertex {
        vertex: Hash,
        view: View,
        parent_view: View,
    },

    /// Speculative execution refused the branch.
    #[error("prepare failed: {0}")]
    PrepareFailed(#[from] LedgerError),
}

/// Why safety rules refused to sign.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SafetyViolation {
    #[error("already voted at {last_voted:?}, refusing a vote for {requested:?}")]
    ViewNotNewer { requested: View, last_voted: View },

    #[error("parent at {parent:?} is below the locked view {locked:?}")]
    ParentBelowLock { parent: View, locked: View },

    #[error("no stored vote for {0:?} to upgrade into a timeout vote")]
    NoVoteToTimeout(View),
}
