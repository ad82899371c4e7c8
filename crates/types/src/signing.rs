//! Domain-separated signing message construction.
//!
//! Every signature in the protocol is made over a domain-tagged message so
//! that a signature produced for one purpose can never be replayed as
//! another (a vote can't masquerade as a timeout, etc.).

use crate::hash::{hash_sbor, Hash};
use crate::vertex::VoteData;
use crate::view::View;

pub const DOMAIN_VOTE: &[u8] = b"vertebra/vote";
pub const DOMAIN_TIMEOUT: &[u8] = b"vertebra/timeout";
pub const DOMAIN_PROPOSAL: &[u8] = b"vertebra/proposal";

/// The message signed by a validator when voting on a proposal.
pub fn vote_message(vote_data: &VoteData, timestamp_ms: u64) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN_VOTE.len() + 32 + 8);
    msg.extend_from_slice(DOMAIN_VOTE);
    msg.extend_from_slice(hash_sbor(vote_data).as_bytes());
    msg.extend_from_slice(&timestamp_ms.to_le_bytes());
    msg
}

/// The message signed when timing out a view. Identical for all validators
/// in the same view, so timeout signatures aggregate into a certificate.
pub fn timeout_message(view: View) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN_TIMEOUT.len() + 8);
    msg.extend_from_slice(DOMAIN_TIMEOUT);
    msg.extend_from_slice(&view.number().to_le_bytes());
    msg
}

/// The message signed by a proposer over its vertex id.
pub fn proposal_message(vertex_id: &Hash) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN_PROPOSAL.len() + 32);
    msg.extend_from_slice(DOMAIN_PROPOSAL);
    msg.extend_from_slice(vertex_id.as_bytes());
    msg
}
