//! Quorum and timeout certificates.

use std::collections::BTreeMap;

use crate::crypto::Signature;
use crate::hash::Hash;
use crate::signing;
use crate::validator::{ValidatorId, ValidatorSet, VotePower};
use crate::vertex::{BFTHeader, VoteData};
use crate::view::View;

/// Reasons a certificate fails validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CertificateError {
    #[error("signer {0:?} is not in the active validator set")]
    UnknownSigner(ValidatorId),
    #[error("invalid signature from {0:?}")]
    InvalidSignature(ValidatorId),
    #[error("insufficient voting power: {got} < quorum {need}")]
    InsufficientPower { got: VotePower, need: VotePower },
}

/// A signature together with the timestamp it covers.
#[derive(Clone, Copy, PartialEq, Eq, Debug, sbor::prelude::BasicSbor)]
pub struct TimestampedSignature {
    pub signature: Signature,
    pub timestamp_ms: u64,
}

/// Per-validator signatures backing a certificate. Ordered map so the wire
/// encoding (and therefore the certificate hash) is canonical.
#[derive(Clone, PartialEq, Eq, Debug, Default, sbor::prelude::BasicSbor)]
pub struct TimestampedSignatures {
    pub signatures: BTreeMap<ValidatorId, TimestampedSignature>,
}

impl TimestampedSignatures {
    pub fn signers(&self) -> impl Iterator<Item = &ValidatorId> {
        self.signatures.keys()
    }

    pub fn count(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

/// Proof that at least a quorum of voting power voted for a proposal.
///
/// At most one valid QC can exist per view for a given proposed header:
/// safety rules forbid the double-signing that would allow two.
#[derive(Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct QuorumCertificate {
    vote_data: VoteData,
    signatures: TimestampedSignatures,
}

impl QuorumCertificate {
    pub fn new(vote_data: VoteData, signatures: TimestampedSignatures) -> Self {
        Self {
            vote_data,
            signatures,
        }
    }

    /// The self-certifying genesis QC: all three headers name genesis and
    /// no signatures are required.
    pub fn genesis(header: BFTHeader) -> Self {
        Self {
            vote_data: VoteData {
                proposed: header.clone(),
                parent: header.clone(),
                committed: Some(header),
            },
            signatures: TimestampedSignatures::default(),
        }
    }

    pub fn view(&self) -> View {
        self.vote_data.view()
    }

    pub fn vote_data(&self) -> &VoteData {
        &self.vote_data
    }

    pub fn proposed(&self) -> &BFTHeader {
        &self.vote_data.proposed
    }

    pub fn parent(&self) -> &BFTHeader {
        &self.vote_data.parent
    }

    /// The header this QC finalizes, if its vote data names one.
    pub fn committed_header(&self) -> Option<&BFTHeader> {
        self.vote_data.committed.as_ref()
    }

    pub fn signatures(&self) -> &TimestampedSignatures {
        &self.signatures
    }

    pub fn is_genesis(&self) -> bool {
        self.view().is_genesis() && self.signatures.is_empty()
    }

    /// Verify quorum weight and every signature against the validator set.
    pub fn verify(&self, validator_set: &ValidatorSet) -> Result<(), CertificateError> {
        if self.is_genesis() {
            return Ok(());
        }
        verify_power(&self.signatures, validator_set)?;
        for (signer, ts_sig) in &self.signatures.signatures {
            let key = validator_set
                .public_key_of(signer)
                .ok_or(CertificateError::UnknownSigner(*signer))?;
            let message = signing::vote_message(&self.vote_data, ts_sig.timestamp_ms);
            if !key.verify(&message, &ts_sig.signature) {
                return Err(CertificateError::InvalidSignature(*signer));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for QuorumCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QC")
            .field("view", &self.view())
            .field("proposed", &self.vote_data.proposed.vertex_id)
            .field(
                "committed",
                &self.vote_data.committed.as_ref().map(|h| h.view),
            )
            .field("signers", &self.signatures.count())
            .finish()
    }
}

/// Proof that a quorum of voting power timed out a view without a QC
/// forming. Carries the highest QC any signer held so the next leader can
/// propose without re-deriving history.
#[derive(Clone, PartialEq, Eq, sbor::prelude::BasicSbor)]
pub struct TimeoutCertificate {
    pub view: View,
    pub signatures: TimestampedSignatures,
    pub high_qc: QuorumCertificate,
}

impl TimeoutCertificate {
    pub fn verify(&self, validator_set: &ValidatorSet) -> Result<(), CertificateError> {
        verify_power(&self.signatures, validator_set)?;
        let message = signing::timeout_message(self.view);
        for (signer, ts_sig) in &self.signatures.signatures {
            let key = validator_set
                .public_key_of(signer)
                .ok_or(CertificateError::UnknownSigner(*signer))?;
            if !key.verify(&message, &ts_sig.signature) {
                return Err(CertificateError::InvalidSignature(*signer));
            }
        }
        self.high_qc.verify(validator_set)
    }
}

impl std::fmt::Debug for TimeoutCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TC")
            .field("view", &self.view)
            .field("signers", &self.signatures.count())
            .field("high_qc_view", &self.high_qc.view())
            .finish()
    }
}

fn verify_power(
    signatures: &TimestampedSignatures,
    validator_set: &ValidatorSet,
) -> Result<(), CertificateError> {
    for signer in signatures.signers() {
        if !validator_set.contains(signer) {
            return Err(CertificateError::UnknownSigner(*signer));
        }
    }
    let got = validator_set.power_of_signers(signatures.signers());
    let need = validator_set.quorum_power();
    if got < need {
        return Err(CertificateError::InsufficientPower { got, need });
    }
    Ok(())
}

/// The locally-known highest certificates, used to justify view advances
/// and to tell peers how far we have synced.
#[derive(Clone, PartialEq, Eq, Debug, sbor::prelude::BasicSbor)]
pub struct HighQC {
    pub highest_qc: QuorumCertificate,
    pub highest_committed_qc: QuorumCertificate,
    pub highest_tc: Option<TimeoutCertificate>,
}

impl HighQC {
    pub fn from_qcs(
        highest_qc: QuorumCertificate,
        highest_committed_qc: QuorumCertificate,
        highest_tc: Option<TimeoutCertificate>,
    ) -> Self {
        Self {
            highest_qc,
            highest_committed_qc,
            highest_tc,
        }
    }

    /// The view this state justifies advancing past: the max of the highest
    /// QC's and highest TC's views.
    pub fn highest_view(&self) -> View {
        match &self.highest_tc {
            Some(tc) if tc.view > self.highest_qc.view() => tc.view,
            _ => self.highest_qc.view(),
        }
    }

    pub fn proposed_vertex_id(&self) -> Hash {
        self.highest_qc.proposed().vertex_id
    }
}
