//! Canonical reveal ordering for reveal2.
//!
//! Participants reveal their secrets in descending order of their derived
//! value. Entries with a zero value did not take part and are dropped. Ties
//! fall back to the ledger's enumeration index, which travels with every
//! entry, so the result does not depend on the order entries are supplied in.

use crate::{DerivedValue, Participant};

/// One `(participant, dVal)` pair as enumerated by the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivedEntry {
    /// Position of the participant in the ledger's own enumeration.
    pub index: usize,
    pub participant: Participant,
    pub value: DerivedValue,
}

impl DerivedEntry {
    /// Attach enumeration indices to pairs listed in ledger order.
    pub fn enumerate(pairs: impl IntoIterator<Item = (Participant, DerivedValue)>) -> Vec<Self> {
        pairs
            .into_iter()
            .enumerate()
            .map(|(index, (participant, value))| Self {
                index,
                participant,
                value,
            })
            .collect()
    }
}

/// Participants in the order they must submit reveal2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RevealOrder(Vec<Participant>);

impl RevealOrder {
    pub fn participants(&self) -> &[Participant] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of `participant` in the order, if it takes part.
    pub fn position(&self, participant: &Participant) -> Option<usize> {
        self.0.iter().position(|p| p == participant)
    }

    pub fn into_inner(self) -> Vec<Participant> {
        self.0
    }
}

/// Compute the reveal order: drop non-positive values, then sort by value
/// descending and enumeration index ascending.
///
/// An empty result is valid; callers treat it as a reason to abort the round.
pub fn compute_order(entries: &[DerivedEntry]) -> RevealOrder {
    let mut eligible: Vec<&DerivedEntry> = entries
        .iter()
        .filter(|entry| entry.value.is_positive())
        .collect();
    // Stable, and the index tiebreak makes the key total.
    eligible.sort_by(|a, b| b.value.cmp(&a.value).then(a.index.cmp(&b.index)));
    RevealOrder(eligible.into_iter().map(|entry| entry.participant).collect())
}
