//! Event types for the deterministic state machine.

use vertebra_types::{
    GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, Hash, Proposal,
    ValidatorId, View, Vote,
};

/// Priority levels for event ordering within the same timestamp.
///
/// Lower values are processed first. Internal events (consequences of
/// prior processing) always precede new external inputs, preserving
/// causality in the simulation and keeping replays deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    Internal = 0,
    Timer = 1,
    Network = 2,
    Client = 3,
}

/// All possible inputs to a node.
///
/// Events are passive data describing something that happened; the state
/// machine processes them and returns [`crate::Action`]s.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════
    /// The pacemaker's countdown for `view` fired without progress.
    LocalTimeout { view: View },

    /// An outstanding sync request timed out.
    SyncRequestTimeout { vertex_id: Hash },

    // ═══════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════
    /// A leader's proposal arrived.
    ProposalReceived { proposal: Proposal },

    /// A vote (possibly a timeout vote) arrived.
    VoteReceived { vote: Vote },

    /// A peer asked for a vertex and its ancestors.
    VertexRequestReceived {
        from: ValidatorId,
        request: GetVerticesRequest,
    },

    /// A peer answered one of our vertex requests.
    VertexResponseReceived {
        from: ValidatorId,
        response: GetVerticesResponse,
    },

    /// A peer couldn't answer and told us how far it has synced.
    VertexErrorResponseReceived {
        from: ValidatorId,
        response: GetVerticesErrorResponse,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Client
    // ═══════════════════════════════════════════════════════════════════
    /// A transaction was submitted locally (fed to the mempool).
    TxnSubmitted { payload: Vec<u8> },
}

impl Event {
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::LocalTimeout { .. } | Event::SyncRequestTimeout { .. } => EventPriority::Timer,
            Event::ProposalReceived { .. }
            | Event::VoteReceived { .. }
            | Event::VertexRequestReceived { .. }
            | Event::VertexResponseReceived { .. }
            | Event::VertexErrorResponseReceived { .. } => EventPriority::Network,
            Event::TxnSubmitted { .. } => EventPriority::Client,
        }
    }

    /// Name for logging and telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::LocalTimeout { .. } => "LocalTimeout",
            Event::SyncRequestTimeout { .. } => "SyncRequestTimeout",
            Event::ProposalReceived { .. } => "ProposalReceived",
            Event::VoteReceived { .. } => "VoteReceived",
            Event::VertexRequestReceived { .. } => "VertexRequestReceived",
            Event::VertexResponseReceived { .. } => "VertexResponseReceived",
            Event::VertexErrorResponseReceived { .. } => "VertexErrorResponseReceived",
            Event::TxnSubmitted { .. } => "TxnSubmitted",
        }
    }
}
