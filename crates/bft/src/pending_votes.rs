//! Vote aggregation into quorum and timeout certificates.

use std::collections::BTreeMap;

use tracing::warn;

use vertebra_types::{
    hash_sbor, signing, Hash, QuorumCertificate, TimeoutCertificate, TimestampedSignature,
    TimestampedSignatures, ValidatorId, ValidatorSet, View, Vote, VoteData,
};

/// Outcome of feeding one vote into the tally.
#[derive(Debug, Clone)]
pub enum VoteProcessingResult {
    /// Book-kept; no certificate formed yet.
    Accepted,
    /// The vote was invalid and was discarded.
    Rejected(VoteRejection),
    /// This vote completed a quorum certificate. Emitted exactly once per
    /// (view, proposed header); later votes only pad the tally.
    Quorum(QuorumCertificate),
    /// This vote completed a timeout certificate for its view.
    Timeout(TimeoutCertificate),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoteRejection {
    #[error("voter is not in the active validator set")]
    UnknownVoter,
    #[error("vote signature does not verify")]
    InvalidSignature,
    #[error("timeout signature does not verify")]
    InvalidTimeoutSignature,
    #[error("voter already voted for a different proposal in {view:?}")]
    Equivocation { view: View },
}

struct QcTally {
    vote_data: VoteData,
    signatures: TimestampedSignatures,
    completed: bool,
}

struct TcTally {
    signatures: TimestampedSignatures,
    /// Highest QC seen among the timeout voters; the certificate carries
    /// it so the next leader can propose without further fetching.
    high_qc: QuorumCertificate,
    completed: bool,
}

/// Weighted tallies of validated votes, keyed by what they certify.
pub struct PendingVotes {
    validator_set: ValidatorSet,
    qc_tallies: BTreeMap<Hash, QcTally>,
    tc_tallies: BTreeMap<View, TcTally>,
    /// Per view, which vote data each validator signed. Used to detect
    /// equivocation before anything enters a tally.
    voted: BTreeMap<View, BTreeMap<ValidatorId, Hash>>,
}

impl PendingVotes {
    pub fn new(validator_set: ValidatorSet) -> Self {
        Self {
            validator_set,
            qc_tallies: BTreeMap::new(),
            tc_tallies: BTreeMap::new(),
            voted: BTreeMap::new(),
        }
    }

    pub fn insert_vote(&mut self, vote: &Vote) -> VoteProcessingResult {
        let view = vote.view();
        let Some(key) = self.validator_set.public_key_of(&vote.voter) else {
            return VoteProcessingResult::Rejected(VoteRejection::UnknownVoter);
        };
        let message = signing::vote_message(&vote.vote_data, vote.timestamp_ms);
        if !key.verify(&message, &vote.signature) {
            return VoteProcessingResult::Rejected(VoteRejection::InvalidSignature);
        }
        if let Some(timeout_signature) = &vote.timeout_signature {
            if !key.verify(&signing::timeout_message(view), timeout_signature) {
                return VoteProcessingResult::Rejected(VoteRejection::InvalidTimeoutSignature);
            }
        }

        let data_hash = hash_sbor(&vote.vote_data);
        let per_view = self.voted.entry(view).or_default();
        match per_view.get(&vote.voter) {
            Some(existing) if *existing != data_hash => {
                warn!(voter = ?vote.voter, ?view, "equivocating vote detected");
                return VoteProcessingResult::Rejected(VoteRejection::Equivocation { view });
            }
            _ => {
                per_view.insert(vote.voter, data_hash);
            }
        }

        let quorum = self.validator_set.quorum_power();

        let tally = self.qc_tallies.entry(data_hash).or_insert_with(|| QcTally {
            vote_data: vote.vote_data.clone(),
            signatures: TimestampedSignatures::default(),
            completed: false,
        });
        tally.signatures.signatures.insert(
            vote.voter,
            TimestampedSignature {
                signature: vote.signature,
                timestamp_ms: vote.timestamp_ms,
            },
        );
        let power = self
            .validator_set
            .power_of_signers(tally.signatures.signers());
        if !tally.completed && power >= quorum {
            tally.completed = true;
            return VoteProcessingResult::Quorum(QuorumCertificate::new(
                tally.vote_data.clone(),
                tally.signatures.clone(),
            ));
        }

        if let Some(timeout_signature) = &vote.timeout_signature {
            let tally = self.tc_tallies.entry(view).or_insert_with(|| TcTally {
                signatures: TimestampedSignatures::default(),
                high_qc: vote.high_qc.highest_qc.clone(),
                completed: false,
            });
            tally.signatures.signatures.insert(
                vote.voter,
                TimestampedSignature {
                    signature: *timeout_signature,
                    timestamp_ms: vote.timestamp_ms,
                },
            );
            if vote.high_qc.highest_qc.view() > tally.high_qc.view() {
                tally.high_qc = vote.high_qc.highest_qc.clone();
            }
            let power = self
                .validator_set
                .power_of_signers(tally.signatures.signers());
            if !tally.completed && power >= quorum {
                tally.completed = true;
                return VoteProcessingResult::Timeout(TimeoutCertificate {
                    view,
                    signatures: tally.signatures.clone(),
                    high_qc: tally.high_qc.clone(),
                });
            }
        }

        VoteProcessingResult::Accepted
    }

    /// Drop tallies for views below `view`; they can no longer form a
    /// certificate anyone would act on.
    pub fn garbage_collect_below(&mut self, view: View) {
        self.qc_tallies
            .retain(|_, tally| tally.vote_data.view() >= view);
        self.tc_tallies.retain(|v, _| *v >= view);
        self.voted.retain(|v, _| *v >= view);
    }

    #[cfg(test)]
    fn tallies(&self) -> (usize, usize) {
        (self.qc_tallies.len(), self.tc_tallies.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vertebra_types::test_utils::{test_keypair, test_validator_set};
    use vertebra_types::{
        genesis_package, BFTHeader, Epoch, HighQC, KeyPair, LedgerHeader, Signature,
    };

    fn vote_data(view: u64, tag: u8) -> VoteData {
        let ledger_header = LedgerHeader::genesis(Epoch(1), 0);
        VoteData {
            proposed: BFTHeader::new(
                View::of(view),
                Hash::of_bytes(&[tag]),
                ledger_header.clone(),
            ),
            parent: BFTHeader::new(View::of(view - 1), Hash::of_bytes(&[tag, tag]), ledger_header),
            committed: None,
        }
    }

    fn high_qc() -> HighQC {
        let pkg = genesis_package(LedgerHeader::genesis(Epoch(1), 0));
        HighQC::from_qcs(pkg.qc.clone(), pkg.qc, None)
    }

    fn vote(key: &KeyPair, data: &VoteData, timeout: bool) -> Vote {
        let timestamp_ms = 10;
        let signature = key.sign(&signing::vote_message(data, timestamp_ms));
        let timeout_signature =
            timeout.then(|| key.sign(&signing::timeout_message(data.view())));
        Vote {
            voter: key.validator_id(),
            vote_data: data.clone(),
            timestamp_ms,
            signature,
            high_qc: high_qc(),
            timeout_signature,
        }
    }

    #[test]
    fn quorum_forms_exactly_once() {
        let (keys, set) = test_validator_set(4);
        let mut pending = PendingVotes::new(set.clone());
        let data = vote_data(1, 1);

        assert!(matches!(
            pending.insert_vote(&vote(&keys[0], &data, false)),
            VoteProcessingResult::Accepted
        ));
        assert!(matches!(
            pending.insert_vote(&vote(&keys[1], &data, false)),
            VoteProcessingResult::Accepted
        ));
        let VoteProcessingResult::Quorum(qc) = pending.insert_vote(&vote(&keys[2], &data, false))
        else {
            panic!("third vote should complete the quorum");
        };
        assert_eq!(qc.view(), View::of(1));
        assert!(qc.verify(&set).is_ok());

        // The fourth vote pads the tally but must not re-emit.
        assert!(matches!(
            pending.insert_vote(&vote(&keys[3], &data, false)),
            VoteProcessingResult::Accepted
        ));
    }

    #[test]
    fn duplicate_votes_do_not_advance_the_tally() {
        let (keys, set) = test_validator_set(4);
        let mut pending = PendingVotes::new(set);
        let data = vote_data(1, 1);
        for _ in 0..5 {
            assert!(matches!(
                pending.insert_vote(&vote(&keys[0], &data, false)),
                VoteProcessingResult::Accepted
            ));
        }
    }

    #[test]
    fn equivocation_is_rejected() {
        let (keys, set) = test_validator_set(4);
        let mut pending = PendingVotes::new(set);
        pending.insert_vote(&vote(&keys[0], &vote_data(1, 1), false));
        let result = pending.insert_vote(&vote(&keys[0], &vote_data(1, 2), false));
        assert!(matches!(
            result,
            VoteProcessingResult::Rejected(VoteRejection::Equivocation { .. })
        ));
    }

    #[test]
    fn forged_signature_is_rejected() {
        let (keys, set) = test_validator_set(4);
        let mut pending = PendingVotes::new(set);
        let mut bad = vote(&keys[0], &vote_data(1, 1), false);
        bad.signature = Signature([0u8; 64]);
        assert!(matches!(
            pending.insert_vote(&bad),
            VoteProcessingResult::Rejected(VoteRejection::InvalidSignature)
        ));
    }

    #[test]
    fn outsider_vote_is_rejected() {
        let (_, set) = test_validator_set(4);
        let mut pending = PendingVotes::new(set);
        let outsider = test_keypair(99);
        assert!(matches!(
            pending.insert_vote(&vote(&outsider, &vote_data(1, 1), false)),
            VoteProcessingResult::Rejected(VoteRejection::UnknownVoter)
        ));
    }

    #[test]
    fn timeout_votes_form_a_tc_with_the_highest_qc() {
        let (keys, set) = test_validator_set(4);
        let mut pending = PendingVotes::new(set.clone());
        // Timeout votes can disagree on vote data (each upgraded its own
        // last vote) and still aggregate into one TC for the view.
        pending.insert_vote(&vote(&keys[0], &vote_data(5, 1), true));
        pending.insert_vote(&vote(&keys[1], &vote_data(5, 2), true));
        let VoteProcessingResult::Timeout(tc) =
            pending.insert_vote(&vote(&keys[2], &vote_data(5, 3), true))
        else {
            panic!("third timeout vote should complete the certificate");
        };
        assert_eq!(tc.view, View::of(5));
        assert!(tc.verify(&set).is_ok());
    }

    #[test]
    fn stale_tallies_are_garbage_collected() {
        let (keys, set) = test_validator_set(4);
        let mut pending = PendingVotes::new(set);
        pending.insert_vote(&vote(&keys[0], &vote_data(1, 1), true));
        pending.insert_vote(&vote(&keys[0], &vote_data(8, 1), false));
        pending.garbage_collect_below(View::of(5));
        assert_eq!(pending.tallies(), (1, 0));
    }
}
