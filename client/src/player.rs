//! Automated player.
//!
//! Each round the driver bets, takes part in commit-reveal2, submits a random
//! cut and plays random hit/stand decisions until the game reports every
//! player finished, then asks the controller to verify. A fault makes it sit
//! out the rest of the round; it never resets the ledger.

use crate::{
    config::ValidatedConfig,
    ledger::{read_phase, Ledger},
    session::{CommitRevealSession, SessionConfig},
    shutdown::Shutdown,
    waiter::PhaseWaiter,
    Error, ErrorKind, Result,
};
use fairdeal_types::{
    ControllerPhase, Gate, Participant, RandomSeed, Role, RoundId, SetupPhase,
};
use rand::{CryptoRng, Rng, RngCore};
use tracing::{debug, info, warn};

/// What the player has done in the current round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerState {
    pub round: Option<RoundId>,
    pub joined: bool,
    pub seed: Option<RandomSeed>,
    pub cut: Option<u64>,
    pub hits: usize,
    pub stood: bool,
    pub verified: bool,
    /// Sitting out until the next round.
    pub abandoned: bool,
}

/// Plays rounds on behalf of one player.
pub struct PlayerDriver<L, R> {
    ledger: L,
    identity: Participant,
    config: ValidatedConfig,
    waiter: PhaseWaiter,
    shutdown: Shutdown,
    rng: R,
    state: PlayerState,
}

impl<L: Ledger, R: RngCore + CryptoRng> PlayerDriver<L, R> {
    pub fn new(
        ledger: L,
        identity: Participant,
        config: ValidatedConfig,
        shutdown: Shutdown,
        rng: R,
    ) -> Self {
        let waiter = PhaseWaiter::new(config.polling, shutdown.clone());
        Self {
            ledger,
            identity,
            config,
            waiter,
            shutdown,
            rng,
            state: PlayerState::default(),
        }
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    /// Play rounds until shutdown.
    pub async fn run(mut self) -> Result<()> {
        info!(player = %self.identity, "player started");
        while !self.shutdown.is_triggered() {
            match self.step().await {
                Ok(()) => {}
                Err(Error::Cancelled) => break,
                Err(err) if err.kind() == ErrorKind::Transient => {
                    debug!(?err, "player step interrupted");
                }
                Err(err) => {
                    warn!(?err, round = ?self.state.round, "sitting out the rest of the round");
                    self.state.abandoned = true;
                }
            }
            if self.shutdown.sleep(self.config.polling.poll_interval).await.is_err() {
                break;
            }
        }
        info!("player stopped");
        Ok(())
    }

    /// Observe the controller and act for its phase.
    pub async fn step(&mut self) -> Result<()> {
        let Ok(phase) = read_phase::<ControllerPhase, _>(&self.ledger, Gate::Controller).await
        else {
            return Ok(());
        };
        let Ok(round) = self.ledger.round_id().await else {
            return Ok(());
        };
        if self.state.round != Some(round) {
            self.state = PlayerState {
                round: Some(round),
                ..PlayerState::default()
            };
        }
        if self.state.abandoned {
            return Ok(());
        }
        match phase {
            ControllerPhase::Setup => self.join_round(round).await,
            ControllerPhase::Play => self.play_turn(round).await,
            ControllerPhase::Verify => self.request_verify(round).await,
        }
    }

    async fn join_round(&mut self, round: RoundId) -> Result<()> {
        if self.state.cut.is_some() {
            return Ok(());
        }
        if !self.state.joined {
            let setup = read_phase::<SetupPhase, _>(&self.ledger, Gate::Setup).await?;
            if setup > SetupPhase::Betting {
                info!(round, "betting closed, sitting out");
                self.state.abandoned = true;
                return Ok(());
            }
            self.ledger.bet(self.config.bet_stake).await?;
            self.state.joined = true;
            info!(round, stake = self.config.bet_stake, "bet placed");
        }

        if self.state.seed.is_none() {
            let mut session = CommitRevealSession::new(
                &self.ledger,
                self.identity,
                Role::Player,
                SessionConfig::from(&self.config),
                self.waiter.clone(),
                &mut self.rng,
            );
            self.state.seed = Some(session.run().await?);
        }

        self.waiter
            .await_phase(&self.ledger, Gate::Setup, SetupPhase::Cut)
            .await?;
        let cut = self.rng.gen_range(1..=self.config.max_cut);
        self.ledger.submit_cut(cut).await?;
        self.state.cut = Some(cut);
        info!(round, cut, "cut submitted");
        Ok(())
    }

    async fn play_turn(&mut self, round: RoundId) -> Result<()> {
        if !self.state.joined || self.state.stood {
            return Ok(());
        }
        if self.ledger.all_finished().await? {
            return Ok(());
        }
        // Waiting on the dealer, or already acted this action round.
        if self.ledger.player_round_over().await? || self.ledger.has_played().await? {
            return Ok(());
        }
        let hit = self
            .rng
            .gen_ratio(self.config.hit_probability_bps, 10_000);
        let result = if hit {
            self.ledger.hit().await
        } else {
            self.ledger.stand().await
        };
        match result {
            Ok(()) if hit => {
                self.state.hits += 1;
                info!(round, hits = self.state.hits, "hit");
            }
            Ok(()) => {
                self.state.stood = true;
                info!(round, hits = self.state.hits, "stand");
            }
            // The game contract is authoritative on whether we may act.
            Err(err) => warn!(round, ?err, hit, "action rejected"),
        }
        Ok(())
    }

    async fn request_verify(&mut self, round: RoundId) -> Result<()> {
        if !self.state.joined || self.state.verified {
            return Ok(());
        }
        if let Err(err) = self.ledger.verify_game().await {
            debug!(round, ?err, "verify request rejected");
        }
        self.state.verified = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::Action,
        mocks::{test_config, MockLedger, MockState},
    };
    use fairdeal_types::{CommitRevealPhase, GamePhase};
    use rand::{rngs::StdRng, SeedableRng};

    const HOUSE: Participant = Participant([1; 20]);
    const ME: Participant = Participant([2; 20]);

    fn driver(ledger: &MockLedger, hit_probability_bps: u32) -> PlayerDriver<MockLedger, StdRng> {
        let mut config = test_config();
        config.hit_probability_bps = hit_probability_bps;
        PlayerDriver::new(
            ledger.clone(),
            ME,
            config,
            Shutdown::never(),
            StdRng::seed_from_u64(9),
        )
    }

    fn ledger() -> MockLedger {
        MockLedger::new(ME, MockState::player_round(HOUSE, &[(HOUSE, 30), (ME, 20)]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_joins_and_cuts() {
        let ledger = ledger();
        let mut driver = driver(&ledger, 5_000);

        driver.step().await.unwrap();
        let state = driver.state().clone();
        assert!(state.joined);
        assert!(state.seed.is_some());
        let cut = state.cut.unwrap();
        assert!((1..=10).contains(&cut));

        let ledger_state = ledger.state();
        assert_eq!(ledger_state.cut, cut);
        assert_eq!(ledger_state.commit_reveal, CommitRevealPhase::Finished);
        assert_eq!(ledger_state.submitted_order, Some(vec![HOUSE, ME]));
        assert_eq!(
            ledger_state.submitted,
            vec![
                Action::Bet,
                Action::Commit,
                Action::Reveal1,
                Action::Reveal2,
                Action::SubmitCut
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_stand_plays_once_and_verifies() {
        let ledger = ledger();
        let mut driver = driver(&ledger, 0);
        driver.step().await.unwrap();
        assert_eq!(ledger.state().controller, ControllerPhase::Play);

        driver.step().await.unwrap();
        assert!(driver.state().stood);
        assert_eq!(ledger.count(Action::Stand), 1);
        assert_eq!(ledger.state().controller, ControllerPhase::Verify);

        driver.step().await.unwrap();
        driver.step().await.unwrap();
        assert!(driver.state().verified);
        assert_eq!(ledger.count(Action::VerifyGame), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_hit_until_finished() {
        let ledger = ledger();
        let mut driver = driver(&ledger, 10_000);
        driver.step().await.unwrap();
        for _ in 0..5 {
            driver.step().await.unwrap();
        }
        assert_eq!(driver.state().hits, 2);
        assert_eq!(ledger.count(Action::Hit), 2);
        assert_eq!(ledger.count(Action::Stand), 0);
        assert_eq!(ledger.state().game, GamePhase::Settle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_while_dealer_owes_a_card() {
        let ledger = ledger();
        let mut driver = driver(&ledger, 10_000);
        driver.step().await.unwrap();
        ledger.update(|state| state.round_over = true);
        driver.step().await.unwrap();
        assert_eq!(ledger.count(Action::Hit), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_arrival_sits_out() {
        let ledger = ledger();
        ledger.update(|state| state.setup = SetupPhase::Rng);
        let mut driver = driver(&ledger, 5_000);
        driver.step().await.unwrap();
        assert!(driver.state().abandoned);
        assert!(!driver.state().joined);
        assert!(ledger.state().submitted.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_action_is_ignored() {
        let ledger = ledger();
        let mut driver = driver(&ledger, 0);
        driver.step().await.unwrap();
        ledger.reject(Action::Stand, 1);
        driver.step().await.unwrap();
        assert!(!driver.state().stood);
        driver.step().await.unwrap();
        assert!(driver.state().stood);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_round_clears_state() {
        let ledger = ledger();
        let mut driver = driver(&ledger, 0);
        driver.step().await.unwrap();
        ledger.update(|state| state.reset_round());
        driver.step().await.unwrap();
        assert_eq!(driver.state().round, Some(2));
        assert!(driver.state().joined);
        assert_eq!(ledger.count(Action::Bet), 2);
    }
}
