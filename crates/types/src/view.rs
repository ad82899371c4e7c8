//! Consensus round numbering.

/// A consensus round. Totally ordered, strictly increasing, with a
/// distinguished genesis value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, sbor::prelude::BasicSbor)]
pub struct View(pub u64);

impl View {
    pub const fn genesis() -> Self {
        View(0)
    }

    pub const fn of(number: u64) -> Self {
        View(number)
    }

    pub fn number(&self) -> u64 {
        self.0
    }

    pub fn is_genesis(&self) -> bool {
        self.0 == 0
    }

    pub fn next(&self) -> Self {
        View(self.0 + 1)
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "View({})", self.0)
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Epoch number. The validator set only changes at epoch boundaries.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Debug, sbor::prelude::BasicSbor,
)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn next(&self) -> Self {
        Epoch(self.0 + 1)
    }
}
