//! Action types for the deterministic state machine.

use std::time::Duration;

use vertebra_types::{BFTHeader, SafetyState, Txn, ValidatorId, VerifiedVertexStoreState};

use crate::{event::Event, message::OutboundMessage, TimerId};

/// Commands the state machine wants performed.
///
/// The runner executes actions in order. Ordering within a batch is
/// significant: persistence actions emitted before a send must complete
/// before the message leaves the node (write-ahead durability for votes).
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════
    /// Broadcast to every validator in the active set.
    Broadcast { message: OutboundMessage },

    /// Send to a single validator.
    Send {
        to: ValidatorId,
        message: OutboundMessage,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════
    /// Arm (or re-arm) a timer; `event` is delivered when it fires. Setting
    /// a timer that is already armed replaces it.
    SetTimer {
        id: TimerId,
        duration: Duration,
        event: Event,
    },
    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════
    // Durability
    // ═══════════════════════════════════════════════════════════════════
    /// Persist the safety rules' state. MUST complete before any vote
    /// emitted in the same batch is sent.
    PersistSafetyState { state: SafetyState },

    /// Persist the vertex store snapshot (root advance / high-QC update).
    PersistVertexStoreState { state: VerifiedVertexStoreState },

    // ═══════════════════════════════════════════════════════════════════
    // External notifications
    // ═══════════════════════════════════════════════════════════════════
    /// A batch of transactions was finalized under `proof`.
    EmitCommitted {
        headers: Vec<BFTHeader>,
        txns: Vec<Txn>,
    },

    /// A committed header carried a next validator set; proposals on the
    /// old set halt until the embedder activates the new epoch.
    EmitEpochChange { header: BFTHeader },
}

impl Action {
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::Send { .. } => "Send",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::PersistSafetyState { .. } => "PersistSafetyState",
            Action::PersistVertexStoreState { .. } => "PersistVertexStoreState",
            Action::EmitCommitted { .. } => "EmitCommitted",
            Action::EmitEpochChange { .. } => "EmitEpochChange",
        }
    }

    /// Whether this action writes durable storage.
    pub fn is_storage_write(&self) -> bool {
        matches!(
            self,
            Action::PersistSafetyState { .. } | Action::PersistVertexStoreState { .. }
        )
    }

    /// Whether this action sends network traffic.
    pub fn is_network(&self) -> bool {
        matches!(self, Action::Broadcast { .. } | Action::Send { .. })
    }
}
