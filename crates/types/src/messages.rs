//! Wire-visible consensus messages.
//!
//! Byte framing is the transport's concern; these structures only need to
//! round-trip losslessly through SBOR while preserving signature validity.

use crate::certificates::{CertificateError, HighQC, QuorumCertificate};
use crate::crypto::Signature;
use crate::hash::Hash;
use crate::signing;
use crate::validator::ValidatorSet;
use crate::vertex::Vertex;

/// A leader's proposal for its view.
#[derive(Clone, PartialEq, Eq, Debug, sbor::prelude::BasicSbor)]
pub struct Proposal {
    pub vertex: Vertex,
    /// The proposer's sync state, justifying the view this vertex occupies.
    pub high_qc: HighQC,
    /// Proposer signature over the vertex id.
    pub signature: Signature,
}

impl Proposal {
    /// Check the proposer's signature and the embedded certificates.
    pub fn verify(&self, validator_set: &ValidatorSet) -> Result<(), ProposalError> {
        let proposer = self.vertex.proposer;
        let key = validator_set
            .public_key_of(&proposer)
            .ok_or(ProposalError::UnknownProposer)?;
        let message = signing::proposal_message(&self.vertex.id());
        if !key.verify(&message, &self.signature) {
            return Err(ProposalError::InvalidSignature);
        }
        self.vertex.qc.verify(validator_set)?;
        self.high_qc.highest_qc.verify(validator_set)?;
        self.high_qc.highest_committed_qc.verify(validator_set)?;
        if let Some(tc) = &self.high_qc.highest_tc {
            tc.verify(validator_set)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProposalError {
    #[error("proposer is not in the active validator set")]
    UnknownProposer,
    #[error("proposer signature does not verify")]
    InvalidSignature,
    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

/// Ask a peer for a vertex and `count - 1` of its ancestors.
#[derive(Clone, Copy, PartialEq, Eq, Debug, sbor::prelude::BasicSbor)]
pub struct GetVerticesRequest {
    pub vertex_id: Hash,
    pub count: u32,
}

/// Successful response: the requested vertex first, then ancestors in
/// walk order (each element's parent is the next element).
#[derive(Clone, PartialEq, Eq, Debug, sbor::prelude::BasicSbor)]
pub struct GetVerticesResponse {
    pub vertices: Vec<Vertex>,
}

/// The responder lacks the requested vertex; its high QC tells the
/// requester to aim higher.
#[derive(Clone, PartialEq, Eq, Debug, sbor::prelude::BasicSbor)]
pub struct GetVerticesErrorResponse {
    pub requested: Hash,
    pub high_qc: HighQC,
}
