//! Capabilities the round logic needs from the ledger.
//!
//! Every state-changing call resolves only once the ledger has reported the
//! outcome (finalized success or rejection), so a successful return is a
//! barrier: the next read observes its effects. Reads may fail transiently
//! and are retried by callers; rejections are returned as
//! [LedgerError::Rejected] and never retried blindly.

use fairdeal_types::{
    Digest, DerivedEntry, Gate, Participant, Phase, RandomSeed, RoundId, Salt,
};
use std::{fmt, future::Future, time::Duration};
use thiserror::Error;

/// Amount of native currency attached to a payable call, in wei.
pub type Wei = u128;

/// State-changing calls submitted to the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Bet,
    Commit,
    Reveal1,
    CalculateIntermediateValues,
    SubmitRevealOrder,
    SkipStalledParticipant,
    Reveal2,
    SubmitChain,
    SubmitCut,
    RevealCutChain,
    StartGame,
    Deal,
    DealAction,
    Hit,
    Stand,
    VerifyGame,
    VerifyAnchor,
    ResolveGame,
    Reset,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Bet => "bet",
            Action::Commit => "commit",
            Action::Reveal1 => "reveal1",
            Action::CalculateIntermediateValues => "calculateIntermediateValues",
            Action::SubmitRevealOrder => "submitRevealOrder",
            Action::SkipStalledParticipant => "skipStalledUser",
            Action::Reveal2 => "reveal2",
            Action::SubmitChain => "submitChain",
            Action::SubmitCut => "submitCut",
            Action::RevealCutChain => "revealCutChain",
            Action::StartGame => "startGame",
            Action::Deal => "deal",
            Action::DealAction => "dealActions",
            Action::Hit => "hit",
            Action::Stand => "stand",
            Action::VerifyGame => "verifyGame",
            Action::VerifyAnchor => "verifyAnchor",
            Action::ResolveGame => "resolveGame",
            Action::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Errors reported by a ledger adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A read (or the transport under a submission) failed; retrying may help.
    #[error("{query} unavailable: {reason}")]
    Unavailable { query: &'static str, reason: String },
    /// The ledger reported the submission as failed.
    #[error("{action} rejected: {reason}")]
    Rejected { action: Action, reason: String },
}

impl LedgerError {
    pub fn unavailable(query: &'static str, reason: impl fmt::Display) -> Self {
        Self::Unavailable {
            query,
            reason: reason.to_string(),
        }
    }

    pub fn rejected(action: Action, reason: impl fmt::Display) -> Self {
        Self::Rejected {
            action,
            reason: reason.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Phase counters and the current round.
pub trait PhaseSource {
    /// Raw phase value of the contract behind `gate`.
    fn phase(&self, gate: Gate) -> impl Future<Output = Result<u8, LedgerError>>;

    fn round_id(&self) -> impl Future<Output = Result<RoundId, LedgerError>>;
}

/// Round lifecycle on the controller contract.
pub trait ControlLedger {
    fn start_game(&self) -> impl Future<Output = Result<(), LedgerError>>;

    fn verify_game(&self) -> impl Future<Output = Result<(), LedgerError>>;

    /// Return every contract to its initial phase for the next round.
    fn reset(&self) -> impl Future<Output = Result<(), LedgerError>>;
}

/// The commit-reveal2 contract.
pub trait CommitRevealLedger {
    fn commit(
        &self,
        commit_value: Digest,
        stake: Wei,
    ) -> impl Future<Output = Result<(), LedgerError>>;

    fn reveal1(&self, opening: Digest) -> impl Future<Output = Result<(), LedgerError>>;

    /// Ask the ledger to derive each participant's ordering value.
    fn calculate_intermediate_values(&self) -> impl Future<Output = Result<(), LedgerError>>;

    /// Derived values in the ledger's enumeration order.
    fn participants_and_dvals(
        &self,
    ) -> impl Future<Output = Result<Vec<DerivedEntry>, LedgerError>>;

    fn submit_reveal_order(
        &self,
        order: Vec<Participant>,
    ) -> impl Future<Output = Result<(), LedgerError>>;

    /// Participant expected to submit reveal2 next ([Participant::ZERO] if none).
    fn current_revealer(&self) -> impl Future<Output = Result<Participant, LedgerError>>;

    fn turn_timeout(&self) -> impl Future<Output = Result<Duration, LedgerError>>;

    /// Skip the current revealer. The ledger enforces its own timeout.
    fn skip_stalled_participant(&self) -> impl Future<Output = Result<(), LedgerError>>;

    fn reveal2(&self, secret: Digest) -> impl Future<Output = Result<(), LedgerError>>;

    /// Final randomness, meaningful once the session is finished.
    fn omega(&self) -> impl Future<Output = Result<RandomSeed, LedgerError>>;
}

/// Betting, chain commitment and the cut on the setup contract.
pub trait ChainLedger {
    fn player_count(&self) -> impl Future<Output = Result<u64, LedgerError>>;

    fn bet(&self, stake: Wei) -> impl Future<Output = Result<(), LedgerError>>;

    fn submit_chain(&self, anchor: Digest) -> impl Future<Output = Result<(), LedgerError>>;

    /// Anchor currently recorded for the round.
    fn anchor(&self) -> impl Future<Output = Result<Digest, LedgerError>>;

    fn submit_cut(&self, cut: u64) -> impl Future<Output = Result<(), LedgerError>>;

    fn cut(&self) -> impl Future<Output = Result<u64, LedgerError>>;

    fn reveal_cut_chain(&self, value: Digest) -> impl Future<Output = Result<(), LedgerError>>;
}

/// The game contract.
pub trait GameLedger {
    fn deal(&self, value: Digest) -> impl Future<Output = Result<(), LedgerError>>;

    fn deal_action(&self, value: Digest) -> impl Future<Output = Result<(), LedgerError>>;

    /// True once every player has acted and the dealer owes the next value.
    fn player_round_over(&self) -> impl Future<Output = Result<bool, LedgerError>>;

    fn all_finished(&self) -> impl Future<Output = Result<bool, LedgerError>>;

    /// True if the calling player already acted this action round.
    fn has_played(&self) -> impl Future<Output = Result<bool, LedgerError>>;

    fn hit(&self) -> impl Future<Output = Result<(), LedgerError>>;

    fn stand(&self) -> impl Future<Output = Result<(), LedgerError>>;
}

/// The verify contract.
pub trait VerifyLedger {
    /// Disclose the salt so anyone can regenerate the chain and check the
    /// anchor; `length` is the number of unpublished, undealt elements.
    fn verify_anchor(
        &self,
        round: RoundId,
        salt: Salt,
        length: u64,
    ) -> impl Future<Output = Result<(), LedgerError>>;

    fn resolve_game(&self, round: RoundId) -> impl Future<Output = Result<(), LedgerError>>;
}

/// Every capability a round needs.
pub trait Ledger:
    PhaseSource + ControlLedger + CommitRevealLedger + ChainLedger + GameLedger + VerifyLedger
{
}

impl<T> Ledger for T where
    T: PhaseSource + ControlLedger + CommitRevealLedger + ChainLedger + GameLedger + VerifyLedger
{
}

/// Read and decode the phase behind `gate`. Unknown values are reported as
/// transient so callers keep polling.
pub async fn read_phase<P: Phase, L: PhaseSource + ?Sized>(
    ledger: &L,
    gate: Gate,
) -> Result<P, LedgerError> {
    let raw = ledger.phase(gate).await?;
    P::try_from(raw).map_err(|err| LedgerError::unavailable("phase", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_match_ledger() {
        assert_eq!(Action::SkipStalledParticipant.to_string(), "skipStalledUser");
        assert_eq!(Action::DealAction.to_string(), "dealActions");
        assert_eq!(Action::SubmitRevealOrder.to_string(), "submitRevealOrder");
    }

    #[test]
    fn test_error_classification() {
        let transient = LedgerError::unavailable("getPhase", "connection refused");
        assert!(transient.is_transient());
        assert_eq!(transient.to_string(), "getPhase unavailable: connection refused");

        let rejected = LedgerError::rejected(Action::Commit, "reverted");
        assert!(!rejected.is_transient());
        assert_eq!(rejected.to_string(), "commit rejected: reverted");
    }
}
