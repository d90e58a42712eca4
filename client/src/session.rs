//! One participant's run through commit-reveal2.
//!
//! ```text
//! Idle -> Committed -> Revealed1 -> [OrderSubmitted] -> AwaitingTurn -> Revealed2 -> Finalized
//! ```
//!
//! `OrderSubmitted` only occurs for the house, which cannot wait for its turn
//! without passing through it. Any error moves the session to
//! `Faulted`, which is terminal: a faulted session is discarded and the round
//! is reset by the dealer. Every local commitment check runs before the
//! corresponding value leaves the process.

use crate::{
    ledger::{CommitRevealLedger, PhaseSource, Wei},
    waiter::PhaseWaiter,
    watchdog::{Outcome, Watchdog},
    Error, Result,
};
use fairdeal_types::{
    commitment::verify_reveal2, compute_order, CommitRevealPhase, Commitment, Gate, Participant,
    RandomSeed, RevealOrder, Role,
};
use rand::{CryptoRng, RngCore};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Committed,
    Revealed1,
    OrderSubmitted,
    AwaitingTurn,
    Revealed2,
    Finalized,
    Faulted,
}

/// Parameters for a [CommitRevealSession].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub commit_stake: Wei,
    /// Overrides the ledger's turn timeout.
    pub turn_timeout: Option<Duration>,
    pub max_skip_rejections: usize,
}

impl From<&crate::ValidatedConfig> for SessionConfig {
    fn from(config: &crate::ValidatedConfig) -> Self {
        Self {
            commit_stake: config.commit_stake,
            turn_timeout: config.turn_timeout,
            max_skip_rejections: config.max_skip_rejections,
        }
    }
}

/// Drives a single commitment through the protocol on behalf of `identity`.
pub struct CommitRevealSession<'a, L> {
    ledger: &'a L,
    identity: Participant,
    role: Role,
    config: SessionConfig,
    waiter: PhaseWaiter,
    commitment: Commitment,
    state: SessionState,
}

impl<'a, L: PhaseSource + CommitRevealLedger> CommitRevealSession<'a, L> {
    /// Create a session with a freshly drawn secret.
    pub fn new<R: RngCore + CryptoRng>(
        ledger: &'a L,
        identity: Participant,
        role: Role,
        config: SessionConfig,
        waiter: PhaseWaiter,
        rng: &mut R,
    ) -> Self {
        Self::with_commitment(
            ledger,
            identity,
            role,
            config,
            waiter,
            Commitment::generate(rng),
        )
    }

    /// Create a session around an existing commitment.
    pub fn with_commitment(
        ledger: &'a L,
        identity: Participant,
        role: Role,
        config: SessionConfig,
        waiter: PhaseWaiter,
        commitment: Commitment,
    ) -> Self {
        Self {
            ledger,
            identity,
            role,
            config,
            waiter,
            commitment,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn commitment(&self) -> &Commitment {
        &self.commitment
    }

    /// Run every remaining step and return the round's final randomness.
    pub async fn run(&mut self) -> Result<RandomSeed> {
        let result = self.drive().await;
        if let Err(err) = &result {
            warn!(participant = %self.identity, from = ?self.state, ?err, "session faulted");
            self.state = SessionState::Faulted;
        }
        result
    }

    async fn drive(&mut self) -> Result<RandomSeed> {
        self.commit().await?;
        self.reveal1().await?;
        if self.role == Role::House {
            self.submit_order().await?;
        }
        if self.await_turn().await? {
            self.reveal2().await?;
        }
        self.finalize().await
    }

    fn transition(&mut self, allowed: &[SessionState], to: SessionState) -> Result<()> {
        if !allowed.contains(&self.state) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }
        Ok(())
    }

    fn check_commitment(&self, context: &'static str) -> Result<()> {
        self.commitment
            .verify()
            .map_err(|source| Error::Commitment { context, source })
    }

    /// Publish the commit value with the stake attached.
    pub async fn commit(&mut self) -> Result<()> {
        self.transition(&[SessionState::Idle], SessionState::Committed)?;
        self.check_commitment("commit")?;
        self.waiter
            .await_phase(self.ledger, Gate::CommitReveal, CommitRevealPhase::Commit)
            .await?;
        self.ledger
            .commit(*self.commitment.commit_value(), self.config.commit_stake)
            .await?;
        self.state = SessionState::Committed;
        info!(
            participant = %self.identity,
            commit_value = %hex::encode(self.commitment.commit_value()),
            "committed"
        );
        Ok(())
    }

    /// Publish the opening once every participant has committed.
    pub async fn reveal1(&mut self) -> Result<()> {
        self.transition(&[SessionState::Committed], SessionState::Revealed1)?;
        self.check_commitment("reveal1")?;
        self.waiter
            .await_phase(self.ledger, Gate::CommitReveal, CommitRevealPhase::Reveal1)
            .await?;
        self.ledger.reveal1(*self.commitment.opening()).await?;
        self.state = SessionState::Revealed1;
        info!(participant = %self.identity, "revealed opening");
        Ok(())
    }

    /// House only: have the ledger derive ordering values, compute the reveal
    /// order locally and submit it.
    pub async fn submit_order(&mut self) -> Result<RevealOrder> {
        self.transition(&[SessionState::Revealed1], SessionState::OrderSubmitted)?;
        if self.role != Role::House {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: SessionState::OrderSubmitted,
            });
        }
        self.waiter
            .await_phase(
                self.ledger,
                Gate::CommitReveal,
                CommitRevealPhase::OrderCalculation,
            )
            .await?;
        if let Err(err) = self.ledger.calculate_intermediate_values().await {
            // Values may already have been derived by an earlier submission.
            warn!(?err, "intermediate value calculation rejected");
        }
        let ledger = self.ledger;
        let entries = self
            .waiter
            .read("participants and derived values", || {
                ledger.participants_and_dvals()
            })
            .await?;
        let order = compute_order(&entries);
        if order.is_empty() {
            return Err(Error::NoEligibleParticipants);
        }
        info!(
            participants = entries.len(),
            eligible = order.len(),
            "computed reveal order"
        );
        self.ledger
            .submit_reveal_order(order.participants().to_vec())
            .await?;
        self.state = SessionState::OrderSubmitted;
        Ok(order)
    }

    /// Wait for this participant's reveal2 turn, skipping stalled revealers
    /// ahead of it. Returns `false` if the session finished without a turn
    /// (excluded from the order, or skipped itself).
    pub async fn await_turn(&mut self) -> Result<bool> {
        // The house owns the order and must have submitted it first.
        let allowed: &[SessionState] = match self.role {
            Role::House => &[SessionState::OrderSubmitted],
            Role::Player => &[SessionState::Revealed1],
        };
        self.transition(allowed, SessionState::AwaitingTurn)?;
        self.waiter
            .await_phase(self.ledger, Gate::CommitReveal, CommitRevealPhase::Reveal2)
            .await?;
        self.state = SessionState::AwaitingTurn;

        let turn_timeout = match self.config.turn_timeout {
            Some(timeout) => timeout,
            None => {
                let ledger = self.ledger;
                self.waiter
                    .read("turn timeout", || ledger.turn_timeout())
                    .await?
            }
        };
        let mut watchdog =
            Watchdog::new(self.identity, turn_timeout, self.config.max_skip_rejections);
        debug!(?turn_timeout, "awaiting reveal2 turn");
        loop {
            match watchdog.poll(self.ledger, Instant::now()).await? {
                Outcome::MyTurn => return Ok(true),
                Outcome::Skipped(stalled) => debug!(%stalled, "revealer skipped"),
                Outcome::StillWaiting => {}
            }
            if let Ok(phase) = self.ledger.phase(Gate::CommitReveal).await {
                if phase >= u8::from(CommitRevealPhase::Finished) {
                    warn!(participant = %self.identity, "commit-reveal finished without our turn");
                    return Ok(false);
                }
            }
            self.waiter.pause().await?;
        }
    }

    /// Publish the secret. The local opening check runs first.
    pub async fn reveal2(&mut self) -> Result<()> {
        self.transition(&[SessionState::AwaitingTurn], SessionState::Revealed2)?;
        verify_reveal2(self.commitment.opening(), self.commitment.secret()).map_err(
            |source| Error::Commitment {
                context: "reveal2",
                source,
            },
        )?;
        self.ledger.reveal2(*self.commitment.secret()).await?;
        self.state = SessionState::Revealed2;
        info!(participant = %self.identity, "revealed secret");
        Ok(())
    }

    /// Wait for the session to finish and read the final randomness.
    pub async fn finalize(&mut self) -> Result<RandomSeed> {
        self.transition(
            &[SessionState::AwaitingTurn, SessionState::Revealed2],
            SessionState::Finalized,
        )?;
        self.waiter
            .await_phase(self.ledger, Gate::CommitReveal, CommitRevealPhase::Finished)
            .await?;
        let ledger = self.ledger;
        let omega = self.waiter.read("omega", || ledger.omega()).await?;
        self.state = SessionState::Finalized;
        info!(participant = %self.identity, %omega, "commit-reveal finished");
        Ok(omega)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::Action,
        mocks::{test_polling, MockLedger, MockState},
        shutdown::Shutdown,
    };
    use fairdeal_types::{CommitmentError, DIGEST_LEN};
    use rand::{rngs::StdRng, SeedableRng};

    fn participant(byte: u8) -> Participant {
        Participant([byte; 20])
    }

    fn config() -> SessionConfig {
        SessionConfig {
            commit_stake: 100,
            turn_timeout: Some(Duration::from_secs(30)),
            max_skip_rejections: 3,
        }
    }

    fn session<'a>(ledger: &'a MockLedger, role: Role, seed: u64) -> CommitRevealSession<'a, MockLedger> {
        let mut rng = StdRng::seed_from_u64(seed);
        CommitRevealSession::new(
            ledger,
            ledger.identity(),
            role,
            config(),
            PhaseWaiter::new(test_polling(), Shutdown::never()),
            &mut rng,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_house_submits_descending_order() {
        let house = participant(1);
        let state = MockState::house_round(
            house,
            &[(house, 40), (participant(2), 10), (participant(3), 0)],
        );
        let ledger = MockLedger::new(house, state);
        let mut session = session(&ledger, Role::House, 1);

        let omega = session.run().await.unwrap();
        assert_eq!(session.state(), SessionState::Finalized);
        assert_eq!(
            ledger.state().submitted_order,
            Some(vec![house, participant(2)])
        );
        assert_eq!(ledger.state().omega, Some(omega));
        assert_eq!(ledger.count(Action::Commit), 1);
        assert_eq!(ledger.count(Action::Reveal2), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_session_with_simulated_house() {
        let house = participant(1);
        let me = participant(2);
        let mut state = MockState::player_round(house, &[(house, 5), (me, 9)]);
        state.setup = fairdeal_types::SetupPhase::Rng;
        let ledger = MockLedger::new(me, state);
        let mut session = session(&ledger, Role::Player, 2);

        let omega = session.run().await.unwrap();
        assert_eq!(session.state(), SessionState::Finalized);
        assert_eq!(ledger.state().submitted_order, Some(vec![me, house]));
        assert_eq!(ledger.state().omega, Some(omega));
        assert_eq!(ledger.count(Action::SubmitRevealOrder), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excluded_participant_finalizes_without_reveal2() {
        let house = participant(1);
        let me = participant(2);
        let mut state = MockState::player_round(house, &[(house, 5), (me, 0)]);
        state.setup = fairdeal_types::SetupPhase::Rng;
        let ledger = MockLedger::new(me, state);
        let mut session = session(&ledger, Role::Player, 3);

        session.run().await.unwrap();
        assert_eq!(session.state(), SessionState::Finalized);
        assert_eq!(ledger.count(Action::Reveal2), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_revealer_is_skipped() {
        let house = participant(1);
        let state = MockState::house_round(house, &[(house, 10), (participant(2), 40)]);
        let ledger = MockLedger::new(house, state);
        ledger.update(|state| state.participants[1].responsive = false);
        let mut session = session(&ledger, Role::House, 4);

        let started = Instant::now();
        session.run().await.unwrap();
        assert!(started.elapsed() > Duration::from_secs(30));
        assert_eq!(ledger.count(Action::SkipStalledParticipant), 1);
        assert_eq!(ledger.count(Action::Reveal2), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_eligible_participants() {
        let house = participant(1);
        let state = MockState::house_round(house, &[(house, 0), (participant(2), 0)]);
        let ledger = MockLedger::new(house, state);
        let mut session = session(&ledger, Role::House, 5);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, Error::NoEligibleParticipants));
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(ledger.count(Action::SubmitRevealOrder), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_commit_faults() {
        let house = participant(1);
        let ledger = MockLedger::new(house, MockState::house_round(house, &[(house, 1)]));
        ledger.reject(Action::Commit, 1);
        let mut session = session(&ledger, Role::House, 6);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
        assert_eq!(session.state(), SessionState::Faulted);

        // A faulted session cannot be resumed.
        assert!(matches!(
            session.commit().await,
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_commitment_never_submitted() {
        let house = participant(1);
        let ledger = MockLedger::new(house, MockState::house_round(house, &[(house, 1)]));
        let good = Commitment::from_secret([4u8; DIGEST_LEN]);
        let corrupt = Commitment::from_parts([5u8; DIGEST_LEN], *good.opening(), *good.commit_value());
        let mut session = CommitRevealSession::with_commitment(
            &ledger,
            house,
            Role::House,
            config(),
            PhaseWaiter::new(test_polling(), Shutdown::never()),
            corrupt,
        );

        let err = session.run().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Commitment {
                context: "commit",
                source: CommitmentError::OpeningMismatch
            }
        ));
        assert_eq!(ledger.count(Action::Commit), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_cannot_submit_order() {
        let house = participant(1);
        let me = participant(2);
        let mut state = MockState::player_round(house, &[(house, 5), (me, 9)]);
        state.setup = fairdeal_types::SetupPhase::Rng;
        let ledger = MockLedger::new(me, state);
        ledger.update(|state| state.simulate_order = false);
        let mut session = session(&ledger, Role::Player, 7);
        session.commit().await.unwrap();
        session.reveal1().await.unwrap();
        assert!(matches!(
            session.submit_order().await,
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_house_waits_for_turn_only_after_order() {
        let house = participant(1);
        let state = MockState::house_round(house, &[(house, 40), (participant(2), 10)]);
        let ledger = MockLedger::new(house, state);
        let mut session = session(&ledger, Role::House, 8);
        session.commit().await.unwrap();
        session.reveal1().await.unwrap();

        assert!(matches!(
            session.await_turn().await,
            Err(Error::InvalidTransition {
                from: SessionState::Revealed1,
                to: SessionState::AwaitingTurn
            })
        ));
        assert_eq!(session.state(), SessionState::Revealed1);

        session.submit_order().await.unwrap();
        assert!(session.await_turn().await.unwrap());
    }
}
