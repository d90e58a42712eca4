//! The dealer's round loop.
//!
//! The orchestrator reads the controller phase and runs the matching
//! handler:
//!
//! * `Setup`: join commit-reveal2 as the house, derive the hash chain from
//!   the final randomness and a private salt, commit its anchor, reveal the
//!   element selected by the player's cut and start the game.
//! * `Play`: deal the initial value, then one value each time the players
//!   finish an action round, until the game settles.
//! * `Verify`: disclose the salt and the remaining chain length, resolve the
//!   round and reset the ledger for the next one.
//!
//! Any fault discards the local round state and resets the ledger. Local
//! state is only trusted for the round it was built in; observing a new
//! round id discards it.

use crate::{
    backoff::Backoff,
    config::ValidatedConfig,
    ledger::{read_phase, GameLedger, Ledger, LedgerError, PhaseSource},
    session::{CommitRevealSession, SessionConfig},
    shutdown::Shutdown,
    waiter::PhaseWaiter,
    Error, ErrorKind, Result,
};
use fairdeal_types::{
    ChainError, ControllerPhase, Digest, GamePhase, Gate, HashChain, Participant, RandomSeed,
    Role, RoundId, RoundTranscript, Salt, SetupPhase, VerifyPhase,
};
use rand::{CryptoRng, RngCore};
use std::{
    fs,
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};

/// Everything the dealer holds locally for the round in progress.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundState {
    pub round: Option<RoundId>,
    pub phase: Option<ControllerPhase>,
    pub salt: Option<Salt>,
    pub seed: Option<RandomSeed>,
    pub chain: Option<HashChain>,
    pub anchor: Option<Digest>,
    pub cut: Option<(u64, Digest)>,
    /// Values accepted by the ledger, in deal order.
    pub dealt: Vec<Digest>,
    /// Setup completed and the game was started.
    pub joined: bool,
}

impl RoundState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Transcript of the round, once setup has completed.
    pub fn transcript(&self, cut_tail_offset: usize) -> Option<RoundTranscript> {
        let (cut, cut_value) = self.cut?;
        Some(RoundTranscript {
            round: self.round?,
            seed: self.seed?,
            salt: self.salt?,
            chain_length: self.chain.as_ref()?.len(),
            cut,
            cut_tail_offset,
            anchor: self.anchor?,
            cut_value,
            dealt: self.dealt.clone(),
        })
    }
}

/// Write `transcript` into `dir` as `round-<id>.json`.
pub fn write_transcript(dir: &Path, transcript: &RoundTranscript) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("round-{}.json", transcript.round));
    let data = serde_json::to_vec_pretty(transcript).map_err(io::Error::other)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, &path)?;
    Ok(path)
}

/// `Some(true)` once the game settled, `Some(false)` while the dealer owes
/// the next value, `None` while players are still acting.
async fn player_round_status<L: PhaseSource + GameLedger>(
    ledger: &L,
) -> std::result::Result<Option<bool>, LedgerError> {
    let phase = read_phase::<GamePhase, _>(ledger, Gate::Game).await?;
    if phase >= GamePhase::Settle {
        return Ok(Some(true));
    }
    Ok(ledger.player_round_over().await?.then_some(false))
}

/// Drives rounds on behalf of the house.
pub struct RoundOrchestrator<L, R> {
    ledger: L,
    identity: Participant,
    config: ValidatedConfig,
    waiter: PhaseWaiter,
    shutdown: Shutdown,
    rng: R,
    state: RoundState,
    last_transcript: Option<RoundTranscript>,
}

impl<L: Ledger, R: RngCore + CryptoRng> RoundOrchestrator<L, R> {
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
            state: RoundState::default(),
            last_transcript: None,
        }
    }

    pub fn state(&self) -> &RoundState {
        &self.state
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Transcript of the most recently resolved round.
    pub fn last_transcript(&self) -> Option<&RoundTranscript> {
        self.last_transcript.as_ref()
    }

    /// Run rounds until shutdown.
    pub async fn run(mut self) -> Result<()> {
        info!(house = %self.identity, "round orchestrator started");
        while !self.shutdown.is_triggered() {
            match self.step().await {
                Ok(()) => {}
                Err(Error::Cancelled) => break,
                Err(err) if err.kind() == ErrorKind::Transient => {
                    warn!(?err, round = ?self.state.round, "round step interrupted");
                }
                Err(err) => {
                    error!(?err, kind = ?err.kind(), round = ?self.state.round, "round faulted, resetting");
                    if self.reset_round().await.is_err() {
                        break;
                    }
                }
            }
            if self.shutdown.sleep(self.config.polling.poll_interval).await.is_err() {
                break;
            }
        }
        info!("round orchestrator stopped");
        Ok(())
    }

    /// Observe the controller and run the handler for its phase.
    pub async fn step(&mut self) -> Result<()> {
        let phase = match read_phase::<ControllerPhase, _>(&self.ledger, Gate::Controller).await {
            Ok(phase) => phase,
            Err(err) => {
                debug!(?err, "controller phase unavailable");
                return Ok(());
            }
        };
        let round = match self.ledger.round_id().await {
            Ok(round) => round,
            Err(err) => {
                debug!(?err, "round id unavailable");
                return Ok(());
            }
        };
        if self.state.round != Some(round) {
            if let Some(previous) = self.state.round {
                info!(previous, round, "new round observed, discarding local state");
            }
            self.state.reset();
            self.state.round = Some(round);
        }
        self.state.phase = Some(phase);

        match phase {
            ControllerPhase::Setup => self.run_setup(round).await,
            ControllerPhase::Play => self.run_play(round).await,
            ControllerPhase::Verify => self.run_verify(round).await,
        }
    }

    async fn run_setup(&mut self, round: RoundId) -> Result<()> {
        if self.state.joined {
            return Ok(());
        }
        info!(round, "setup started");
        self.waiter
            .await_phase(&self.ledger, Gate::Setup, SetupPhase::Rng)
            .await?;
        let ledger = &self.ledger;
        let players = self
            .waiter
            .read("player count", || ledger.player_count())
            .await?;
        if players == 0 {
            return Err(Error::NoPlayers { round });
        }
        let rng = &mut self.rng;
        let salt = *self.state.salt.get_or_insert_with(|| Salt::random(rng));

        let mut session = CommitRevealSession::new(
            &self.ledger,
            self.identity,
            Role::House,
            SessionConfig::from(&self.config),
            self.waiter.clone(),
            &mut self.rng,
        );
        let seed = session.run().await?;
        self.state.seed = Some(seed);

        self.waiter
            .await_phase(&self.ledger, Gate::Setup, SetupPhase::ChainCommit)
            .await?;
        let chain = HashChain::generate(&seed, &salt, self.config.chain_length);
        let anchor = *chain.anchor().ok_or(ChainError::Exhausted)?;
        self.ledger.submit_chain(anchor).await?;
        self.state.chain = Some(chain);
        self.state.anchor = Some(anchor);
        info!(round, anchor = %hex::encode(anchor), "chain committed");

        self.waiter
            .await_phase(&self.ledger, Gate::Setup, SetupPhase::CutReveal)
            .await?;
        let ledger = &self.ledger;
        let recorded = self.waiter.read("anchor", || ledger.anchor()).await?;
        if recorded != anchor {
            return Err(Error::AnchorMismatch {
                ledger: hex::encode(recorded),
                local: hex::encode(anchor),
            });
        }
        let cut = self.waiter.read("cut", || ledger.cut()).await?;
        let chain = self.state.chain.as_mut().ok_or(Error::StateLost {
            phase: ControllerPhase::Setup,
        })?;
        let value = chain.reveal_cut(cut, self.config.cut_tail_offset)?;
        let remaining = chain.remaining();
        self.ledger.reveal_cut_chain(value).await?;
        self.state.cut = Some((cut, value));
        info!(round, cut, remaining, "cut revealed");

        self.ledger.start_game().await?;
        self.state.joined = true;
        info!(round, players, "game started");
        Ok(())
    }

    async fn run_play(&mut self, round: RoundId) -> Result<()> {
        if self.state.chain.is_none() || !self.state.joined {
            return Err(Error::StateLost {
                phase: ControllerPhase::Play,
            });
        }
        let phase = self
            .waiter
            .await_phase(&self.ledger, Gate::Game, GamePhase::Deal)
            .await?;
        if phase == GamePhase::Deal && self.state.dealt.is_empty() {
            let value = self.pop()?;
            self.ledger.deal(value).await?;
            self.state.dealt.push(value);
            info!(round, "initial deal submitted");
        }
        while !self.await_player_round().await? {
            let value = self.pop()?;
            self.ledger.deal_action(value).await?;
            self.state.dealt.push(value);
            debug!(round, dealt = self.state.dealt.len(), "action dealt");
        }
        self.ledger.verify_game().await?;
        info!(round, dealt = self.state.dealt.len(), "game settled");
        Ok(())
    }

    /// Wait until the players finish an action round (`false`) or the game
    /// settles (`true`).
    async fn await_player_round(&mut self) -> Result<bool> {
        let ledger = &self.ledger;
        let outcome = self
            .waiter
            .poll_until(
                "player round",
                || player_round_status(ledger),
                Option::is_some,
            )
            .await?;
        Ok(outcome == Some(true))
    }

    fn pop(&mut self) -> Result<Digest> {
        let chain = self.state.chain.as_mut().ok_or(Error::StateLost {
            phase: ControllerPhase::Play,
        })?;
        Ok(chain.pop()?)
    }

    async fn run_verify(&mut self, round: RoundId) -> Result<()> {
        let (salt, remaining) = match (&self.state.salt, &self.state.chain) {
            (Some(salt), Some(chain)) => (*salt, chain.remaining()),
            _ => {
                return Err(Error::StateLost {
                    phase: ControllerPhase::Verify,
                })
            }
        };
        self.ledger
            .verify_anchor(round, salt, remaining as u64)
            .await?;
        info!(round, remaining, "salt disclosed");
        self.waiter
            .await_phase(&self.ledger, Gate::Verify(round), VerifyPhase::Resolvable)
            .await?;
        self.ledger.resolve_game(round).await?;
        info!(round, "round resolved");

        self.record_transcript();
        self.reset_round().await
    }

    fn record_transcript(&mut self) {
        let Some(transcript) = self.state.transcript(self.config.cut_tail_offset) else {
            return;
        };
        if let Some(dir) = &self.config.transcript_dir {
            match write_transcript(dir, &transcript) {
                Ok(path) => debug!(path = %path.display(), "transcript written"),
                Err(err) => warn!(?err, round = transcript.round, "failed to write transcript"),
            }
        }
        self.last_transcript = Some(transcript);
    }

    /// Discard local state and reset the ledger, retrying until accepted.
    /// Only fails on shutdown.
    pub async fn reset_round(&mut self) -> Result<()> {
        self.state.reset();
        let mut backoff = Backoff::new(
            self.config.polling.poll_interval,
            self.config.polling.max_backoff,
        );
        loop {
            match self.ledger.reset().await {
                Ok(()) => {
                    info!("ledger reset for next round");
                    return Ok(());
                }
                Err(err) => {
                    warn!(?err, "reset failed, retrying");
                    let delay = backoff.next_delay(&mut self.rng);
                    self.shutdown.sleep(delay).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::Action,
        mocks::{test_config, MockLedger, MockState},
        shutdown,
    };
    use rand::{rngs::StdRng, SeedableRng};
    use std::time::Duration;

    const HOUSE: Participant = Participant([1; 20]);
    const PLAYER: Participant = Participant([2; 20]);

    fn orchestrator(ledger: &MockLedger, config: ValidatedConfig) -> RoundOrchestrator<MockLedger, StdRng> {
        RoundOrchestrator::new(
            ledger.clone(),
            HOUSE,
            config,
            Shutdown::never(),
            StdRng::seed_from_u64(42),
        )
    }

    fn round_ledger() -> MockLedger {
        MockLedger::new(HOUSE, MockState::house_round(HOUSE, &[(HOUSE, 40), (PLAYER, 10)]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_round() {
        let ledger = round_ledger();
        let mut orchestrator = orchestrator(&ledger, test_config());

        orchestrator.step().await.unwrap();
        assert!(orchestrator.state().joined);
        assert_eq!(orchestrator.state().phase, Some(ControllerPhase::Setup));
        assert_eq!(ledger.state().controller, ControllerPhase::Play);

        orchestrator.step().await.unwrap();
        assert_eq!(orchestrator.state().dealt.len(), 3);
        assert_eq!(ledger.state().controller, ControllerPhase::Verify);

        orchestrator.step().await.unwrap();
        assert_eq!(orchestrator.state(), &RoundState::default());

        let state = ledger.state();
        assert_eq!(
            state.submitted,
            vec![
                Action::Commit,
                Action::Reveal1,
                Action::CalculateIntermediateValues,
                Action::SubmitRevealOrder,
                Action::Reveal2,
                Action::SubmitChain,
                Action::RevealCutChain,
                Action::StartGame,
                Action::Deal,
                Action::DealAction,
                Action::DealAction,
                Action::VerifyGame,
                Action::VerifyAnchor,
                Action::ResolveGame,
                Action::Reset,
            ]
        );
        assert_eq!(state.round, 2);
        let completed = &state.completed[0];
        assert!(completed.resolved);

        // The transcript matches what the ledger saw and audits cleanly.
        let transcript = orchestrator.last_transcript().unwrap();
        assert_eq!(transcript.audit(), Ok(()));
        assert_eq!(transcript.dealt, completed.dealt);
        assert_eq!(Some(transcript.seed), completed.omega);
        assert_eq!(Some(transcript.anchor), completed.anchor);
        assert_eq!(completed.disclosed, Some((transcript.salt, 194)));
        assert_eq!(transcript.remaining(), 194);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cut_zero_reveals_anchor() {
        let ledger = round_ledger();
        ledger.update(|state| state.cut = 0);
        let mut orchestrator = orchestrator(&ledger, test_config());
        for _ in 0..3 {
            orchestrator.step().await.unwrap();
        }

        let state = ledger.state();
        let completed = &state.completed[0];
        assert!(completed.resolved);
        assert_eq!(completed.cut, 0);
        assert_eq!(completed.cut_value, completed.anchor);
        assert_eq!(completed.dealt.len(), 3);
        assert_eq!(completed.disclosed.map(|(_, remaining)| remaining), Some(197));

        let transcript = orchestrator.last_transcript().unwrap();
        assert_eq!(transcript.audit(), Ok(()));
        assert_eq!(transcript.remaining(), 197);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcript_written_to_dir() {
        let dir = std::env::temp_dir().join(format!("fairdeal-rounds-{}", std::process::id()));
        let mut config = test_config();
        config.transcript_dir = Some(dir.clone());
        let ledger = round_ledger();
        let mut orchestrator = orchestrator(&ledger, config);
        for _ in 0..3 {
            orchestrator.step().await.unwrap();
        }

        let data = fs::read(dir.join("round-1.json")).unwrap();
        let transcript: RoundTranscript = serde_json::from_slice(&data).unwrap();
        assert_eq!(Some(&transcript), orchestrator.last_transcript());
        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_players_aborts_before_commit() {
        let ledger = MockLedger::new(HOUSE, MockState::house_round(HOUSE, &[(HOUSE, 40)]));
        let mut orchestrator = orchestrator(&ledger, test_config());

        let err = orchestrator.step().await.unwrap_err();
        assert!(matches!(err, Error::NoPlayers { round: 1 }));
        assert_eq!(err.kind(), ErrorKind::Round);
        assert_eq!(ledger.count(Action::Commit), 0);

        orchestrator.reset_round().await.unwrap();
        assert_eq!(ledger.state().resets, 1);
        assert_eq!(orchestrator.state(), &RoundState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_faults_round() {
        let ledger = round_ledger();
        ledger.reject(Action::RevealCutChain, 1);
        let mut orchestrator = orchestrator(&ledger, test_config());

        let err = orchestrator.step().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert!(!orchestrator.state().joined);
        assert_eq!(ledger.count(Action::StartGame), 0);

        orchestrator.reset_round().await.unwrap();
        assert_eq!(ledger.state().round, 2);

        // The next round runs from scratch with a fresh salt.
        orchestrator.step().await.unwrap();
        assert_eq!(orchestrator.state().round, Some(2));
        assert!(orchestrator.state().joined);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_is_idempotent_and_retried() {
        let ledger = round_ledger();
        ledger.reject(Action::Reset, 2);
        let mut orchestrator = orchestrator(&ledger, test_config());
        orchestrator.step().await.unwrap();

        orchestrator.reset_round().await.unwrap();
        let once = orchestrator.state().clone();
        orchestrator.reset_round().await.unwrap();
        assert_eq!(orchestrator.state(), &once);
        assert_eq!(once, RoundState::default());

        let state = ledger.state();
        assert_eq!(state.rejected, vec![Action::Reset, Action::Reset]);
        assert_eq!(state.resets, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_anchor_mismatch_is_integrity_fault() {
        let ledger = round_ledger();
        ledger.update(|state| state.anchor_override = Some([0xee; 32]));
        let mut orchestrator = orchestrator(&ledger, test_config());

        let err = orchestrator.step().await.unwrap_err();
        assert!(matches!(err, Error::AnchorMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(ledger.count(Action::RevealCutChain), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_exhaustion_faults_round() {
        let ledger = round_ledger();
        ledger.update(|state| {
            state.chain_length = 6;
            state.actions_per_game = 3;
        });
        let mut config = test_config();
        config.chain_length = 6;
        let mut orchestrator = orchestrator(&ledger, config);

        orchestrator.step().await.unwrap();
        assert_eq!(orchestrator.state().chain.as_ref().unwrap().remaining(), 2);

        let err = orchestrator.step().await.unwrap_err();
        assert!(matches!(err, Error::Chain(ChainError::Exhausted)));
        assert_eq!(err.kind(), ErrorKind::Round);
        assert_eq!(orchestrator.state().dealt.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_round_discards_local_state() {
        let ledger = round_ledger();
        let mut orchestrator = orchestrator(&ledger, test_config());
        orchestrator.step().await.unwrap();
        let first_salt = orchestrator.state().salt;

        // Another party resets the round underneath us.
        ledger.update(|state| state.reset_round());
        orchestrator.step().await.unwrap();
        assert_eq!(orchestrator.state().round, Some(2));
        assert!(orchestrator.state().joined);
        assert_ne!(orchestrator.state().salt, first_salt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_without_local_state() {
        let ledger = round_ledger();
        ledger.update(|state| state.controller = ControllerPhase::Play);
        let mut orchestrator = orchestrator(&ledger, test_config());
        let err = orchestrator.step().await.unwrap_err();
        assert!(matches!(
            err,
            Error::StateLost {
                phase: ControllerPhase::Play
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_controller_is_not_a_fault() {
        let ledger = round_ledger();
        ledger.update(|state| state.failing_reads = 1);
        let mut orchestrator = orchestrator(&ledger, test_config());
        orchestrator.step().await.unwrap();
        assert_eq!(orchestrator.state(), &RoundState::default());
        assert!(ledger.state().submitted.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let ledger = round_ledger();
        let (signal, handle) = shutdown::channel();
        let orchestrator = RoundOrchestrator::new(
            ledger.clone(),
            HOUSE,
            test_config(),
            handle,
            StdRng::seed_from_u64(1),
        );
        signal.trigger();
        orchestrator.run().await.unwrap();
        assert!(ledger.state().submitted.is_empty());
    }

    /// Drive `run` until the ledger archives a resolved round, then stop it.
    async fn run_until_resolved(ledger: &MockLedger) -> Result<()> {
        let (signal, handle) = shutdown::channel();
        let orchestrator = RoundOrchestrator::new(
            ledger.clone(),
            HOUSE,
            test_config(),
            handle,
            StdRng::seed_from_u64(7),
        );
        let watch = async {
            for _ in 0..10_000 {
                if ledger.state().completed.iter().any(|round| round.resolved) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            signal.trigger();
        };
        let (result, ()) = tokio::join!(orchestrator.run(), watch);
        result
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_recovers_from_faulted_round() {
        let ledger = round_ledger();
        ledger.reject(Action::RevealCutChain, 1);

        run_until_resolved(&ledger).await.unwrap();

        let state = ledger.state();
        assert_eq!(state.rejected.first(), Some(&Action::RevealCutChain));
        // The faulted round was reset and the next one played to resolution.
        assert_eq!(state.completed[0].round, 1);
        assert!(!state.completed[0].resolved);
        assert!(state.completed[0].dealt.is_empty());
        assert_eq!(state.completed[1].round, 2);
        assert!(state.completed[1].resolved);
        assert_eq!(state.completed[1].dealt.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_failure_without_reset() {
        let ledger = round_ledger();
        ledger.outage(Action::ResolveGame, 1);

        run_until_resolved(&ledger).await.unwrap();

        let state = ledger.state();
        assert!(state.rejected.is_empty());
        // A reset after the outage would have archived round 1 unresolved.
        assert_eq!(state.completed[0].round, 1);
        assert!(state.completed[0].resolved);
        assert_eq!(state.completed[0].dealt.len(), 3);
    }
}
