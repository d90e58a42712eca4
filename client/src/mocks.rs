//! In-memory ledger simulating the round contracts for tests.
//!
//! The mock acts for one participant (its identity) and plays every other
//! participant itself: they commit and reveal alongside the caller, and
//! responsive ones reveal2 as soon as they reach the head of the order. It
//! enforces the same phase gates and hash checks the contracts do and records
//! every accepted submission.

use crate::{
    config::{PollingConfig, ValidatedConfig},
    ledger::{
        Action, ChainLedger, CommitRevealLedger, ControlLedger, GameLedger, LedgerError,
        PhaseSource, VerifyLedger, Wei,
    },
};
use fairdeal_types::{
    chain::verify_segment, compute_order, keccak256, CommitRevealPhase, Commitment,
    ControllerPhase, DerivedEntry, DerivedValue, Digest, GamePhase, Gate, HashChain, Participant,
    RandomSeed, RoundId, Salt, SetupPhase, VerifyPhase, DEFAULT_CHAIN_LENGTH,
};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tracing::Level;

/// Polling tuned for paused-clock tests.
pub fn test_polling() -> PollingConfig {
    PollingConfig {
        poll_interval: Duration::from_millis(100),
        max_backoff: Duration::from_secs(1),
        phase_deadline: None,
    }
}

/// A validated configuration pointing nowhere, for driving the core in tests.
pub fn test_config() -> ValidatedConfig {
    ValidatedConfig {
        rpc_url: url::Url::parse("http://127.0.0.1:8545").expect("static url"),
        chain_id: 31337,
        controller_address: Participant([0xc0; 20]),
        log_level: Level::DEBUG,
        log_json: false,
        polling: test_polling(),
        turn_timeout: None,
        max_skip_rejections: 3,
        chain_length: DEFAULT_CHAIN_LENGTH,
        cut_tail_offset: 1,
        bet_stake: 1_000,
        commit_stake: 100,
        verify_gas: None,
        max_cut: 10,
        hit_probability_bps: 5_000,
        transcript_dir: None,
    }
}

/// One participant of the commit-reveal2 session.
#[derive(Clone, Debug)]
pub struct MockParticipant {
    pub participant: Participant,
    pub dval: DerivedValue,
    /// Simulated participants reveal2 on their own only when responsive.
    pub responsive: bool,
    pub commit_value: Option<Digest>,
    pub opening: Option<Digest>,
}

/// A round that was reset, kept for inspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedRound {
    pub round: RoundId,
    pub omega: Option<RandomSeed>,
    pub anchor: Option<Digest>,
    pub cut: u64,
    pub cut_value: Option<Digest>,
    pub dealt: Vec<Digest>,
    pub disclosed: Option<(Salt, u64)>,
    pub resolved: bool,
}

/// Observable contract state.
#[derive(Clone, Debug)]
pub struct MockState {
    pub house: Participant,
    pub round: RoundId,
    pub controller: ControllerPhase,
    pub setup: SetupPhase,
    pub commit_reveal: CommitRevealPhase,
    pub game: GamePhase,
    pub verify: BTreeMap<RoundId, VerifyPhase>,
    /// Setup phase every round starts in.
    pub initial_setup: SetupPhase,

    pub player_count: u64,
    pub participants: Vec<MockParticipant>,
    pub reveal_queue: VecDeque<Participant>,
    pub revealed: Vec<Digest>,
    pub submitted_order: Option<Vec<Participant>>,
    /// When the caller is a player, compute and submit the order on the
    /// house's behalf once everyone has revealed their opening.
    pub simulate_order: bool,
    pub turn_timeout: Duration,
    pub skip_allowed: bool,
    pub omega: Option<RandomSeed>,

    pub chain_length: usize,
    pub cut_tail_offset: usize,
    pub anchor: Option<Digest>,
    pub cut: u64,
    pub cut_value: Option<Digest>,
    /// Reported by `anchor()` instead of the submitted anchor.
    pub anchor_override: Option<Digest>,

    pub dealt: Vec<Digest>,
    /// Values dealt after the initial deal before the game settles.
    pub actions_per_game: usize,
    pub round_over: bool,
    pub has_played: bool,
    pub all_finished: bool,
    pub hits: usize,
    pub disclosed: Option<(Salt, u64)>,

    pub submitted: Vec<Action>,
    pub rejected: Vec<Action>,
    pub scripted_rejections: HashMap<Action, usize>,
    /// Submissions that fail as unreachable before reaching the contract.
    pub scripted_outages: HashMap<Action, usize>,
    /// Fail this many upcoming reads.
    pub failing_reads: usize,
    /// Report an out-of-range value for this many upcoming phase reads.
    pub unknown_phase_reads: usize,
    pub resets: usize,
    pub completed: Vec<CompletedRound>,
}

impl MockState {
    fn base(house: Participant, participants: &[(Participant, u64)], initial_setup: SetupPhase) -> Self {
        Self {
            house,
            round: 1,
            controller: ControllerPhase::Setup,
            setup: initial_setup,
            commit_reveal: CommitRevealPhase::Commit,
            game: GamePhase::Deal,
            verify: BTreeMap::new(),
            initial_setup,
            player_count: 0,
            participants: participants
                .iter()
                .map(|(participant, dval)| MockParticipant {
                    participant: *participant,
                    dval: DerivedValue::from(*dval),
                    responsive: true,
                    commit_value: None,
                    opening: None,
                })
                .collect(),
            reveal_queue: VecDeque::new(),
            revealed: Vec::new(),
            submitted_order: None,
            simulate_order: true,
            turn_timeout: Duration::from_secs(30),
            skip_allowed: true,
            omega: None,
            chain_length: DEFAULT_CHAIN_LENGTH,
            cut_tail_offset: 1,
            anchor: None,
            cut: 3,
            cut_value: None,
            anchor_override: None,
            dealt: Vec::new(),
            actions_per_game: 2,
            round_over: false,
            has_played: false,
            all_finished: false,
            hits: 0,
            disclosed: None,
            submitted: Vec::new(),
            rejected: Vec::new(),
            scripted_rejections: HashMap::new(),
            scripted_outages: HashMap::new(),
            failing_reads: 0,
            unknown_phase_reads: 0,
            resets: 0,
            completed: Vec::new(),
        }
    }

    /// A round seen by the house: betting is closed with every non-house
    /// participant seated, and the player's cut is already chosen.
    pub fn house_round(house: Participant, participants: &[(Participant, u64)]) -> Self {
        let mut state = Self::base(house, participants, SetupPhase::Rng);
        state.player_count = participants.iter().filter(|(p, _)| *p != house).count() as u64;
        state
    }

    /// A round seen by a player: betting is open and the house is simulated.
    pub fn player_round(house: Participant, participants: &[(Participant, u64)]) -> Self {
        Self::base(house, participants, SetupPhase::Betting)
    }

    fn secret_of(participant: &Participant) -> Digest {
        keccak256(&participant.0)
    }

    fn entry_mut(&mut self, participant: &Participant) -> Option<&mut MockParticipant> {
        self.participants
            .iter_mut()
            .find(|entry| entry.participant == *participant)
    }

    fn check(&mut self, action: Action) -> Result<(), LedgerError> {
        if let Some(remaining) = self.scripted_outages.get_mut(&action) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LedgerError::unavailable("submission", "scripted outage"));
            }
        }
        if let Some(remaining) = self.scripted_rejections.get_mut(&action) {
            if *remaining > 0 {
                *remaining -= 1;
                self.rejected.push(action);
                return Err(LedgerError::rejected(action, "scripted rejection"));
            }
        }
        Ok(())
    }

    fn require(&mut self, action: Action, ok: bool, reason: &str) -> Result<(), LedgerError> {
        if !ok {
            self.rejected.push(action);
            return Err(LedgerError::rejected(action, reason));
        }
        Ok(())
    }

    fn accept(&mut self, action: Action) {
        self.submitted.push(action);
    }

    fn read(&mut self, query: &'static str) -> Result<(), LedgerError> {
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(LedgerError::unavailable(query, "scripted outage"));
        }
        Ok(())
    }

    /// Simulated participants commit (or reveal their opening) alongside the
    /// caller.
    fn simulate_layer(&mut self, identity: Participant, opening: bool) {
        for entry in self.participants.iter_mut() {
            if entry.participant == identity {
                continue;
            }
            let commitment = Commitment::from_secret(Self::secret_of(&entry.participant));
            if opening {
                entry.opening = Some(*commitment.opening());
            } else {
                entry.commit_value = Some(*commitment.commit_value());
            }
        }
    }

    fn begin_reveal2(&mut self, identity: Participant, order: Vec<Participant>) {
        self.reveal_queue = order.iter().copied().collect();
        self.submitted_order = Some(order);
        self.commit_reveal = CommitRevealPhase::Reveal2;
        self.advance_reveals(identity);
    }

    /// Responsive simulated participants at the head of the queue reveal.
    fn advance_reveals(&mut self, identity: Participant) {
        while let Some(head) = self.reveal_queue.front().copied() {
            if head == identity {
                return;
            }
            let responsive = self
                .participants
                .iter()
                .any(|entry| entry.participant == head && entry.responsive);
            if !responsive {
                return;
            }
            self.reveal_queue.pop_front();
            self.revealed.push(Self::secret_of(&head));
        }
        self.finish_commit_reveal(identity);
    }

    fn finish_commit_reveal(&mut self, identity: Participant) {
        let mut preimage = Vec::new();
        for secret in &self.revealed {
            preimage.extend_from_slice(secret);
        }
        self.omega = Some(RandomSeed(keccak256(&preimage)));
        self.commit_reveal = CommitRevealPhase::Finished;
        if self.setup == SetupPhase::Rng {
            self.setup = if identity == self.house {
                SetupPhase::ChainCommit
            } else {
                // The simulated house commits its chain right away.
                SetupPhase::Cut
            };
        }
    }

    /// Reset as the controller would, archiving the finished round.
    pub fn reset_round(&mut self) {
        self.completed.push(CompletedRound {
            round: self.round,
            omega: self.omega,
            anchor: self.anchor,
            cut: self.cut,
            cut_value: self.cut_value,
            dealt: std::mem::take(&mut self.dealt),
            disclosed: self.disclosed.take(),
            resolved: self.verify.get(&self.round) == Some(&VerifyPhase::Resolved),
        });
        self.round += 1;
        self.controller = ControllerPhase::Setup;
        self.setup = self.initial_setup;
        self.commit_reveal = CommitRevealPhase::Commit;
        self.game = GamePhase::Deal;
        for entry in self.participants.iter_mut() {
            entry.commit_value = None;
            entry.opening = None;
        }
        self.reveal_queue.clear();
        self.revealed.clear();
        self.submitted_order = None;
        self.omega = None;
        self.anchor = None;
        self.cut_value = None;
        self.round_over = false;
        self.has_played = false;
        self.all_finished = false;
        self.hits = 0;
        self.resets += 1;
    }

    fn settle(&mut self) {
        self.game = GamePhase::Settle;
        self.round_over = false;
        self.all_finished = true;
    }
}

/// Shared handle to a [MockState], acting as `identity`.
#[derive(Clone, Debug)]
pub struct MockLedger {
    identity: Participant,
    state: Arc<Mutex<MockState>>,
}

impl MockLedger {
    pub fn new(identity: Participant, state: MockState) -> Self {
        Self {
            identity,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Another handle on the same contracts acting as `identity`.
    pub fn with_identity(&self, identity: Participant) -> Self {
        Self {
            identity,
            state: self.state.clone(),
        }
    }

    pub fn identity(&self) -> Participant {
        self.identity
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn update<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        f(&mut self.state())
    }

    /// Reject the next `times` submissions of `action`.
    pub fn reject(&self, action: Action, times: usize) {
        self.update(|state| {
            state.scripted_rejections.insert(action, times);
        });
    }

    /// Fail the next `times` submissions of `action` as unreachable.
    pub fn outage(&self, action: Action, times: usize) {
        self.update(|state| {
            state.scripted_outages.insert(action, times);
        });
    }

    /// Accepted submissions of `action`.
    pub fn count(&self, action: Action) -> usize {
        self.state()
            .submitted
            .iter()
            .filter(|submitted| **submitted == action)
            .count()
    }
}

impl PhaseSource for MockLedger {
    async fn phase(&self, gate: Gate) -> Result<u8, LedgerError> {
        let mut state = self.state();
        state.read("getPhase")?;
        if state.unknown_phase_reads > 0 {
            state.unknown_phase_reads -= 1;
            return Ok(u8::MAX);
        }
        Ok(match gate {
            Gate::Controller => state.controller.into(),
            Gate::Setup => state.setup.into(),
            Gate::CommitReveal => state.commit_reveal.into(),
            Gate::Game => state.game.into(),
            Gate::Verify(round) => state
                .verify
                .get(&round)
                .copied()
                .unwrap_or(VerifyPhase::Pending)
                .into(),
        })
    }

    async fn round_id(&self) -> Result<RoundId, LedgerError> {
        let mut state = self.state();
        state.read("roundId")?;
        Ok(state.round)
    }
}

impl ControlLedger for MockLedger {
    async fn start_game(&self) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::StartGame)?;
        let ready = state.controller == ControllerPhase::Setup && state.cut_value.is_some();
        state.require(Action::StartGame, ready, "setup incomplete")?;
        state.controller = ControllerPhase::Play;
        state.game = GamePhase::Deal;
        state.accept(Action::StartGame);
        Ok(())
    }

    async fn verify_game(&self) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::VerifyGame)?;
        let settled = state.controller == ControllerPhase::Play && state.game == GamePhase::Settle;
        let verifying = state.controller == ControllerPhase::Verify;
        state.require(Action::VerifyGame, settled || verifying, "game not settled")?;
        if settled {
            state.controller = ControllerPhase::Verify;
            let round = state.round;
            state.verify.insert(round, VerifyPhase::Pending);
        }
        state.accept(Action::VerifyGame);
        Ok(())
    }

    async fn reset(&self) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::Reset)?;
        state.reset_round();
        state.accept(Action::Reset);
        Ok(())
    }
}

impl CommitRevealLedger for MockLedger {
    async fn commit(&self, commit_value: Digest, stake: Wei) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::Commit)?;
        let open = state.commit_reveal == CommitRevealPhase::Commit
            && state.setup == SetupPhase::Rng;
        state.require(Action::Commit, open, "not in commit phase")?;
        state.require(Action::Commit, stake > 0, "missing stake")?;
        let identity = self.identity;
        let Some(entry) = state.entry_mut(&identity) else {
            return Err(LedgerError::rejected(Action::Commit, "not a participant"));
        };
        entry.commit_value = Some(commit_value);
        state.simulate_layer(identity, false);
        state.commit_reveal = CommitRevealPhase::Reveal1;
        state.accept(Action::Commit);
        Ok(())
    }

    async fn reveal1(&self, opening: Digest) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::Reveal1)?;
        let open = state.commit_reveal == CommitRevealPhase::Reveal1;
        state.require(Action::Reveal1, open, "not in reveal1 phase")?;
        let identity = self.identity;
        let committed = state
            .entry_mut(&identity)
            .and_then(|entry| entry.commit_value);
        state.require(
            Action::Reveal1,
            committed == Some(keccak256(&opening)),
            "opening does not match commitment",
        )?;
        if let Some(entry) = state.entry_mut(&identity) {
            entry.opening = Some(opening);
        }
        state.simulate_layer(identity, true);
        state.commit_reveal = CommitRevealPhase::OrderCalculation;
        state.accept(Action::Reveal1);

        if identity != state.house && state.simulate_order {
            let entries = DerivedEntry::enumerate(
                state
                    .participants
                    .iter()
                    .map(|entry| (entry.participant, entry.dval)),
            );
            let order = compute_order(&entries).into_inner();
            state.begin_reveal2(identity, order);
        }
        Ok(())
    }

    async fn calculate_intermediate_values(&self) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::CalculateIntermediateValues)?;
        let open = state.commit_reveal == CommitRevealPhase::OrderCalculation;
        state.require(Action::CalculateIntermediateValues, open, "not in order phase")?;
        state.accept(Action::CalculateIntermediateValues);
        Ok(())
    }

    async fn participants_and_dvals(&self) -> Result<Vec<DerivedEntry>, LedgerError> {
        let mut state = self.state();
        state.read("getParticipantsAndDVals")?;
        Ok(DerivedEntry::enumerate(
            state
                .participants
                .iter()
                .map(|entry| (entry.participant, entry.dval)),
        ))
    }

    async fn submit_reveal_order(&self, order: Vec<Participant>) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::SubmitRevealOrder)?;
        let open = state.commit_reveal == CommitRevealPhase::OrderCalculation
            && self.identity == state.house;
        state.require(Action::SubmitRevealOrder, open, "order not expected")?;
        let entries = DerivedEntry::enumerate(
            state
                .participants
                .iter()
                .map(|entry| (entry.participant, entry.dval)),
        );
        let canonical = compute_order(&entries).into_inner();
        state.require(
            Action::SubmitRevealOrder,
            order == canonical,
            "order is not sorted by derived value",
        )?;
        state.accept(Action::SubmitRevealOrder);
        state.begin_reveal2(self.identity, order);
        Ok(())
    }

    async fn current_revealer(&self) -> Result<Participant, LedgerError> {
        let mut state = self.state();
        state.read("getCurrentRevealer")?;
        if state.commit_reveal != CommitRevealPhase::Reveal2 {
            return Ok(Participant::ZERO);
        }
        Ok(state
            .reveal_queue
            .front()
            .copied()
            .unwrap_or(Participant::ZERO))
    }

    async fn turn_timeout(&self) -> Result<Duration, LedgerError> {
        let mut state = self.state();
        state.read("TURN_TIMEOUT")?;
        Ok(state.turn_timeout)
    }

    async fn skip_stalled_participant(&self) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::SkipStalledParticipant)?;
        let open = state.commit_reveal == CommitRevealPhase::Reveal2
            && !state.reveal_queue.is_empty()
            && state.skip_allowed;
        state.require(Action::SkipStalledParticipant, open, "turn timeout not elapsed")?;
        state.reveal_queue.pop_front();
        state.accept(Action::SkipStalledParticipant);
        state.advance_reveals(self.identity);
        Ok(())
    }

    async fn reveal2(&self, secret: Digest) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::Reveal2)?;
        let turn = state.commit_reveal == CommitRevealPhase::Reveal2
            && state.reveal_queue.front() == Some(&self.identity);
        state.require(Action::Reveal2, turn, "not the current revealer")?;
        let identity = self.identity;
        let opening = state.entry_mut(&identity).and_then(|entry| entry.opening);
        state.require(
            Action::Reveal2,
            opening == Some(keccak256(&secret)),
            "secret does not match opening",
        )?;
        state.reveal_queue.pop_front();
        state.revealed.push(secret);
        state.accept(Action::Reveal2);
        state.advance_reveals(identity);
        Ok(())
    }

    async fn omega(&self) -> Result<RandomSeed, LedgerError> {
        let mut state = self.state();
        state.read("omega_o")?;
        Ok(state.omega.unwrap_or_default())
    }
}

impl ChainLedger for MockLedger {
    async fn player_count(&self) -> Result<u64, LedgerError> {
        let mut state = self.state();
        state.read("playerCount")?;
        Ok(state.player_count)
    }

    async fn bet(&self, stake: Wei) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::Bet)?;
        let open = state.setup == SetupPhase::Betting && stake > 0;
        state.require(Action::Bet, open, "betting closed")?;
        state.player_count += 1;
        state.setup = SetupPhase::Rng;
        state.accept(Action::Bet);
        Ok(())
    }

    async fn submit_chain(&self, anchor: Digest) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::SubmitChain)?;
        let open = state.setup == SetupPhase::ChainCommit && self.identity == state.house;
        state.require(Action::SubmitChain, open, "not in chain phase")?;
        state.anchor = Some(anchor);
        // The simulated player picked its cut when the phase opened.
        state.setup = SetupPhase::CutReveal;
        state.accept(Action::SubmitChain);
        Ok(())
    }

    async fn anchor(&self) -> Result<Digest, LedgerError> {
        let mut state = self.state();
        state.read("anchor")?;
        Ok(state.anchor_override.or(state.anchor).unwrap_or_default())
    }

    async fn submit_cut(&self, cut: u64) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::SubmitCut)?;
        let open = state.setup == SetupPhase::Cut;
        state.require(Action::SubmitCut, open, "not in cut phase")?;
        state.cut = cut;
        state.accept(Action::SubmitCut);
        // The simulated house reveals the cut, starts the game and deals.
        state.setup = SetupPhase::CutReveal;
        state.controller = ControllerPhase::Play;
        state.game = GamePhase::PlayerActions;
        Ok(())
    }

    async fn cut(&self) -> Result<u64, LedgerError> {
        let mut state = self.state();
        state.read("getCut")?;
        Ok(state.cut)
    }

    async fn reveal_cut_chain(&self, value: Digest) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::RevealCutChain)?;
        let open = state.setup == SetupPhase::CutReveal;
        state.require(Action::RevealCutChain, open, "not in cut reveal phase")?;
        let steps = (state.cut as usize + state.cut_tail_offset).saturating_sub(1);
        let linked = state
            .anchor
            .map(|anchor| verify_segment(&value, &anchor, steps))
            .unwrap_or(false);
        state.require(Action::RevealCutChain, linked, "cut value does not hash to anchor")?;
        state.cut_value = Some(value);
        state.accept(Action::RevealCutChain);
        Ok(())
    }
}

impl GameLedger for MockLedger {
    async fn deal(&self, value: Digest) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::Deal)?;
        let open = state.controller == ControllerPhase::Play && state.game == GamePhase::Deal;
        state.require(Action::Deal, open, "not in deal phase")?;
        state.dealt.push(value);
        if state.actions_per_game == 0 {
            state.settle();
        } else {
            state.game = GamePhase::PlayerActions;
            // Simulated players act immediately.
            state.round_over = true;
        }
        state.accept(Action::Deal);
        Ok(())
    }

    async fn deal_action(&self, value: Digest) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::DealAction)?;
        let open = state.game == GamePhase::PlayerActions && state.round_over;
        state.require(Action::DealAction, open, "players still acting")?;
        state.dealt.push(value);
        if state.dealt.len() > state.actions_per_game {
            state.settle();
        } else {
            state.round_over = true;
        }
        state.accept(Action::DealAction);
        Ok(())
    }

    async fn player_round_over(&self) -> Result<bool, LedgerError> {
        let mut state = self.state();
        state.read("playerRoundOver")?;
        Ok(state.round_over)
    }

    async fn all_finished(&self) -> Result<bool, LedgerError> {
        let mut state = self.state();
        state.read("allFinished")?;
        Ok(state.all_finished)
    }

    async fn has_played(&self) -> Result<bool, LedgerError> {
        let mut state = self.state();
        state.read("hasPlayed")?;
        Ok(state.has_played)
    }

    async fn hit(&self) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::Hit)?;
        let open = state.game == GamePhase::PlayerActions && !state.has_played && !state.all_finished;
        state.require(Action::Hit, open, "cannot act")?;
        state.hits += 1;
        state.accept(Action::Hit);
        // The simulated dealer answers at once; the hand busts after enough hits.
        if state.hits >= state.actions_per_game {
            state.settle();
            state.controller = ControllerPhase::Verify;
        }
        Ok(())
    }

    async fn stand(&self) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::Stand)?;
        let open = state.game == GamePhase::PlayerActions && !state.has_played && !state.all_finished;
        state.require(Action::Stand, open, "cannot act")?;
        state.accept(Action::Stand);
        state.settle();
        state.controller = ControllerPhase::Verify;
        Ok(())
    }
}

impl VerifyLedger for MockLedger {
    async fn verify_anchor(&self, round: RoundId, salt: Salt, length: u64) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::VerifyAnchor)?;
        let open = state.controller == ControllerPhase::Verify && round == state.round;
        state.require(Action::VerifyAnchor, open, "not verifying this round")?;
        let seed = state.omega.unwrap_or_default();
        let chain = HashChain::generate(&seed, &salt, state.chain_length);
        let anchor_ok = chain.anchor().copied() == state.anchor;
        state.require(Action::VerifyAnchor, anchor_ok, "anchor mismatch")?;
        let expected = state
            .chain_length
            .saturating_sub(state.cut_tail_offset)
            .saturating_sub(state.cut as usize)
            .saturating_sub(state.dealt.len()) as u64;
        state.require(Action::VerifyAnchor, length == expected, "length mismatch")?;
        state.disclosed = Some((salt, length));
        state.verify.insert(round, VerifyPhase::Resolvable);
        state.accept(Action::VerifyAnchor);
        Ok(())
    }

    async fn resolve_game(&self, round: RoundId) -> Result<(), LedgerError> {
        let mut state = self.state();
        state.check(Action::ResolveGame)?;
        let open = state.verify.get(&round) == Some(&VerifyPhase::Resolvable);
        state.require(Action::ResolveGame, open, "round not resolvable")?;
        state.verify.insert(round, VerifyPhase::Resolved);
        state.accept(Action::ResolveGame);
        Ok(())
    }
}
