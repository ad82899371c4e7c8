//! View progression and leader scheduling.

use std::time::Duration;

use tracing::debug;

use vertebra_types::{Hash, ValidatorId, ValidatorSet, View};

#[derive(Debug, Clone)]
pub struct PacemakerConfig {
    /// Timeout for a view when the chain is committing at pace.
    pub base_timeout: Duration,
    /// Multiplier applied per uncommitted view (and per repeated timeout
    /// within a view).
    pub backoff_factor: f64,
    /// Cap on the backoff exponent.
    pub max_exponent: u32,
    /// Most transactions a proposal will carry.
    pub proposal_txn_limit: usize,
}

impl Default for PacemakerConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_millis(1000),
            backoff_factor: 1.5,
            max_exponent: 6,
            proposal_txn_limit: 16,
        }
    }
}

/// Emitted every time the current view changes. The reducer turns this
/// into timer actions and, when `leader` is the local validator, a
/// proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewUpdate {
    pub view: View,
    pub leader: ValidatorId,
    pub next_leader: ValidatorId,
    pub timeout: Duration,
}

/// Deterministic power-weighted leader schedule.
///
/// The leader of a view is chosen by drawing a ticket from the hash of the
/// view number and mapping it through cumulative voting power. Every node
/// computes the same schedule from the validator set alone; no election
/// messages exist. The set must be non-empty.
#[derive(Clone)]
pub struct ProposerElection {
    validator_set: ValidatorSet,
}

impl ProposerElection {
    pub fn new(validator_set: ValidatorSet) -> Self {
        Self { validator_set }
    }

    pub fn leader_for(&self, view: View) -> ValidatorId {
        let digest = Hash::of_bytes(&view.number().to_le_bytes());
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&digest.as_bytes()[..8]);
        let mut ticket = u64::from_le_bytes(buf) % self.validator_set.total_power();
        let validators = self.validator_set.validators();
        for v in validators {
            if ticket < v.voting_power {
                return v.validator_id;
            }
            ticket -= v.voting_power;
        }
        validators[validators.len() - 1].validator_id
    }

    pub fn is_leader(&self, id: &ValidatorId, view: View) -> bool {
        self.leader_for(view) == *id
    }
}

/// Drives the current view forward on certificates and re-arms timeouts
/// when no progress is made.
pub struct Pacemaker {
    config: PacemakerConfig,
    election: ProposerElection,
    current_view: View,
    timeouts_this_view: u32,
}

impl Pacemaker {
    pub fn new(config: PacemakerConfig, election: ProposerElection) -> Self {
        Self {
            config,
            election,
            current_view: View::genesis(),
            timeouts_this_view: 0,
        }
    }

    pub fn current_view(&self) -> View {
        self.current_view
    }

    pub fn config(&self) -> &PacemakerConfig {
        &self.config
    }

    pub fn leader_for(&self, view: View) -> ValidatorId {
        self.election.leader_for(view)
    }

    /// React to the highest certified view (QC or TC). Advances to the
    /// view just past it; stale and duplicate certificates are ignored.
    /// `root_view` is the last committed view, used to size the timeout.
    pub fn process_certified_view(
        &mut self,
        certified_view: View,
        root_view: View,
    ) -> Option<ViewUpdate> {
        if certified_view < self.current_view {
            return None;
        }
        self.current_view = certified_view.next();
        self.timeouts_this_view = 0;
        let update = self.view_update(root_view);
        debug!(view = ?update.view, leader = ?update.leader, timeout = ?update.timeout, "view advanced");
        Some(update)
    }

    /// React to the pacemaker timer firing. Returns the re-armed timeout
    /// duration, or `None` when the timeout is for a view already left.
    pub fn process_local_timeout(&mut self, view: View, root_view: View) -> Option<Duration> {
        if view != self.current_view {
            return None;
        }
        self.timeouts_this_view += 1;
        Some(self.timeout_for(root_view))
    }

    fn view_update(&self, root_view: View) -> ViewUpdate {
        ViewUpdate {
            view: self.current_view,
            leader: self.election.leader_for(self.current_view),
            next_leader: self.election.leader_for(self.current_view.next()),
            timeout: self.timeout_for(root_view),
        }
    }

    /// Exponential backoff in the distance between the current view and
    /// the last committed one: a healthy chain keeps timeouts at the base,
    /// a stalled one gives slow nodes time to catch up.
    fn timeout_for(&self, root_view: View) -> Duration {
        let uncommitted = self
            .current_view
            .number()
            .saturating_sub(root_view.number())
            .saturating_add(u64::from(self.timeouts_this_view));
        let exponent = uncommitted.min(u64::from(self.max_exponent())) as i32;
        self.config.base_timeout.mul_f64(self.config.backoff_factor.powi(exponent))
    }

    fn max_exponent(&self) -> u32 {
        self.config.max_exponent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vertebra_types::test_utils::test_validator_set;
    use vertebra_types::{PublicKey, ValidatorInfo};

    fn pacemaker() -> Pacemaker {
        let (_, set) = test_validator_set(4);
        Pacemaker::new(PacemakerConfig::default(), ProposerElection::new(set))
    }

    #[test]
    fn schedule_is_deterministic() {
        let (_, set) = test_validator_set(4);
        let a = ProposerElection::new(set.clone());
        let b = ProposerElection::new(set);
        for v in 0..100 {
            assert_eq!(a.leader_for(View::of(v)), b.leader_for(View::of(v)));
        }
    }

    #[test]
    fn schedule_is_roughly_power_weighted() {
        let heavy = ValidatorId([1u8; 32]);
        let light = ValidatorId([2u8; 32]);
        let set = ValidatorSet::new(vec![
            ValidatorInfo {
                validator_id: heavy,
                public_key: PublicKey([1u8; 32]),
                voting_power: 3,
            },
            ValidatorInfo {
                validator_id: light,
                public_key: PublicKey([2u8; 32]),
                voting_power: 1,
            },
        ]);
        let election = ProposerElection::new(set);
        let mut counts: BTreeMap<ValidatorId, u32> = BTreeMap::new();
        for v in 1..=1000 {
            *counts.entry(election.leader_for(View::of(v))).or_default() += 1;
        }
        assert!(counts[&heavy] > 2 * counts[&light]);
    }

    #[test]
    fn certified_view_advances_past_it() {
        let mut pm = pacemaker();
        assert_eq!(pm.current_view(), View::genesis());
        let update = pm.process_certified_view(View::genesis(), View::genesis()).unwrap();
        assert_eq!(update.view, View::of(1));
        assert_eq!(pm.current_view(), View::of(1));
    }

    #[test]
    fn stale_certificates_are_ignored() {
        let mut pm = pacemaker();
        pm.process_certified_view(View::of(5), View::genesis()).unwrap();
        assert_eq!(pm.current_view(), View::of(6));
        assert!(pm.process_certified_view(View::of(3), View::genesis()).is_none());
        assert_eq!(pm.current_view(), View::of(6));
    }

    #[test]
    fn timeouts_back_off_and_cap() {
        let mut pm = pacemaker();
        pm.process_certified_view(View::of(9), View::genesis()).unwrap();
        // 10 uncommitted views exceeds max_exponent 6.
        let capped = pm.config().base_timeout.mul_f64(pm.config().backoff_factor.powi(6));
        let first = pm.process_local_timeout(View::of(10), View::genesis()).unwrap();
        assert_eq!(first, capped);

        // Close to the root the backoff is visible per repeated timeout.
        let mut pm = pacemaker();
        pm.process_certified_view(View::genesis(), View::genesis()).unwrap();
        let t1 = pm.process_local_timeout(View::of(1), View::genesis()).unwrap();
        let t2 = pm.process_local_timeout(View::of(1), View::genesis()).unwrap();
        assert!(t2 > t1);
    }

    #[test]
    fn timeout_for_an_old_view_is_ignored() {
        let mut pm = pacemaker();
        pm.process_certified_view(View::of(4), View::genesis()).unwrap();
        assert!(pm.process_local_timeout(View::of(3), View::genesis()).is_none());
    }
}
