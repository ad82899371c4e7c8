//! The transaction accumulator.

use vertebra_types::{AccumulatorState, Hash, Txn};

use crate::LedgerError;

/// Pure accumulator arithmetic. Every node computes the same
/// `AccumulatorState` for the same committed prefix, so divergent
/// execution shows up as a hash mismatch instead of silent state drift.
pub struct LedgerAccumulator;

impl LedgerAccumulator {
    /// Extend the accumulator by one transaction id.
    pub fn accumulate(parent: &AccumulatorState, txn_id: Hash) -> AccumulatorState {
        AccumulatorState {
            state_version: parent.state_version + 1,
            accumulator_hash: Hash::combine(&parent.accumulator_hash, &txn_id),
        }
    }

    /// Extend the accumulator by a batch, in order.
    pub fn accumulate_all(parent: &AccumulatorState, txns: &[Txn]) -> AccumulatorState {
        txns.iter()
            .fold(*parent, |acc, txn| Self::accumulate(&acc, txn.id()))
    }

    /// Check that `txns` extends `current` to exactly `claimed`, returning
    /// the suffix the ledger has not yet absorbed.
    ///
    /// The batch ends at `claimed.state_version`; any prefix the ledger has
    /// already committed is skipped rather than re-verified. Fails with
    /// [`LedgerError::VersionGap`] when the batch does not connect to the
    /// current version, or [`LedgerError::AccumulatorMismatch`] when the
    /// recomputed digest disagrees with the claim.
    pub fn verify_and_get_extension(
        current: &AccumulatorState,
        txns: &[Txn],
        claimed: &AccumulatorState,
    ) -> Result<Vec<Txn>, LedgerError> {
        let base = claimed.state_version.saturating_sub(txns.len() as u64);
        if current.state_version < base || current.state_version > claimed.state_version {
            return Err(LedgerError::VersionGap {
                ledger: current.state_version,
                base,
                claimed: claimed.state_version,
            });
        }
        let skip = (current.state_version - base) as usize;
        let extension = txns[skip..].to_vec();
        let computed = Self::accumulate_all(current, &extension);
        if computed != *claimed {
            return Err(LedgerError::AccumulatorMismatch {
                computed,
                claimed: *claimed,
            });
        }
        Ok(extension)
    }
}
