//! Outbound message envelope.

use vertebra_types::{
    GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, Proposal, Vote,
};

/// Messages a node can send. The runner owns the actual transport; byte
/// framing and peer addressing are its concern.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Proposal(Proposal),
    Vote(Box<Vote>),
    VertexRequest(GetVerticesRequest),
    VertexResponse(GetVerticesResponse),
    VertexErrorResponse(GetVerticesErrorResponse),
}

impl OutboundMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Proposal(_) => "Proposal",
            OutboundMessage::Vote(_) => "Vote",
            OutboundMessage::VertexRequest(_) => "VertexRequest",
            OutboundMessage::VertexResponse(_) => "VertexResponse",
            OutboundMessage::VertexErrorResponse(_) => "VertexErrorResponse",
        }
    }
}
