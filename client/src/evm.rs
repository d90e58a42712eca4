//! Ledger adapter for the EVM round contracts.
//!
//! Only the controller address is configured. The other four contracts are
//! discovered from it on connect. Every submission waits for its receipt, and
//! only a successful receipt status counts as accepted.

use crate::{
    config::ValidatedConfig,
    ledger::{
        Action, ChainLedger, CommitRevealLedger, ControlLedger, GameLedger, LedgerError,
        PhaseSource, VerifyLedger, Wei,
    },
};
use anyhow::Context;
use ethers::{
    abi::{Detokenize, Tokenize},
    contract::ContractCall,
    prelude::*,
};
use fairdeal_types::{
    DerivedEntry, DerivedValue, Digest, Gate, Participant, RandomSeed, RoundId, Salt,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

mod controller {
    use ethers::prelude::abigen;

    abigen!(
        BlackjackController,
        r#"[
            function getPhase() external view returns (uint8)
            function roundId() external view returns (uint256)
            function setup() external view returns (address)
            function game() external view returns (address)
            function verify() external view returns (address)
            function startGame() external
            function verifyGame() external
            function reset() external
        ]"#
    );
}

mod setup {
    use ethers::prelude::abigen;

    abigen!(
        BlackjackSetup,
        r#"[
            function getPhase() external view returns (uint8)
            function cr() external view returns (address)
            function playerCount() external view returns (uint256)
            function bet() external payable
            function submitChain(bytes32 anchor) external
            function anchor() external view returns (bytes32)
            function submitCut(uint256 cut) external
            function getCut() external view returns (uint256)
            function revealCutChain(bytes32 value) external
        ]"#
    );
}

mod commit_reveal {
    use ethers::prelude::abigen;

    abigen!(
        CommitReveal2,
        r#"[
            function getPhase() external view returns (uint8)
            function commit(bytes32 cv) external payable
            function reveal1(bytes32 co) external
            function calculateIntermediateValues() external
            function getParticipantsAndDVals() external view returns (address[], uint256[])
            function submitRevealOrder(address[] order) external
            function getCurrentRevealer() external view returns (address)
            function TURN_TIMEOUT() external view returns (uint256)
            function skipStalledUser() external
            function reveal2(bytes32 s) external
            function omega_o() external view returns (bytes32)
        ]"#
    );
}

mod game {
    use ethers::prelude::abigen;

    abigen!(
        Blackjack,
        r#"[
            function getPhase() external view returns (uint8)
            function deal(bytes32 value) external
            function dealActions(bytes32 value) external
            function playerRoundOver() external view returns (bool)
            function allFinished() external view returns (bool)
            function hasPlayed() external view returns (bool)
            function hit() external
            function stand() external
        ]"#
    );
}

mod verify {
    use ethers::prelude::abigen;

    abigen!(
        BlackjackVerify,
        r#"[
            function getPhase(uint256 id) external view returns (uint8)
            function verifyAnchor(uint256 id, bytes32 salt, uint256 length) external
            function resolveGame(uint256 id) external
        ]"#
    );
}

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

/// [crate::Ledger] backed by JSON-RPC.
#[derive(Clone)]
pub struct EvmLedger {
    identity: Participant,
    verify_gas: Option<u64>,
    controller: controller::BlackjackController<Client>,
    setup: setup::BlackjackSetup<Client>,
    commit_reveal: commit_reveal::CommitReveal2<Client>,
    game: game::Blackjack<Client>,
    verify: verify::BlackjackVerify<Client>,
}

impl EvmLedger {
    /// Connect with `private_key` and discover the round contracts.
    pub async fn connect(config: &ValidatedConfig, private_key: &str) -> anyhow::Result<Self> {
        let provider =
            Provider::<Http>::try_from(config.rpc_url.as_str()).context("Invalid RPC URL")?;
        let wallet: LocalWallet = private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .context("Invalid private key")?;
        let wallet = wallet.with_chain_id(config.chain_id);
        let identity = Participant(wallet.address().0);
        let client = Arc::new(SignerMiddleware::new(provider, wallet));

        let controller = controller::BlackjackController::new(
            Address::from(config.controller_address.0),
            client.clone(),
        );
        let setup_address = controller
            .setup()
            .call()
            .await
            .context("Failed to read setup address")?;
        let game_address = controller
            .game()
            .call()
            .await
            .context("Failed to read game address")?;
        let verify_address = controller
            .verify()
            .call()
            .await
            .context("Failed to read verify address")?;
        let setup = setup::BlackjackSetup::new(setup_address, client.clone());
        let commit_reveal_address = setup
            .cr()
            .call()
            .await
            .context("Failed to read commit-reveal address")?;

        info!(
            %identity,
            controller = ?controller.address(),
            setup = ?setup_address,
            commit_reveal = ?commit_reveal_address,
            game = ?game_address,
            verify = ?verify_address,
            "contracts discovered"
        );
        Ok(Self {
            identity,
            verify_gas: config.verify_gas,
            controller,
            setup,
            commit_reveal: commit_reveal::CommitReveal2::new(commit_reveal_address, client.clone()),
            game: game::Blackjack::new(game_address, client.clone()),
            verify: verify::BlackjackVerify::new(verify_address, client),
        })
    }

    /// Address of the signing key.
    pub fn identity(&self) -> Participant {
        self.identity
    }

    /// Build a commit-reveal call by its Solidity name.
    fn commit_reveal_call<T: Tokenize, D: Detokenize>(
        &self,
        name: &'static str,
        args: T,
    ) -> Result<ContractCall<Client, D>, LedgerError> {
        self.commit_reveal
            .method(name, args)
            .map_err(|err| LedgerError::unavailable(name, err))
    }
}

async fn read<D: Detokenize>(
    query: &'static str,
    call: ContractCall<Client, D>,
) -> Result<D, LedgerError> {
    call.call()
        .await
        .map_err(|err| LedgerError::unavailable(query, err))
}

/// Send `call` and wait for its receipt.
async fn submit<D: Detokenize>(
    action: Action,
    call: ContractCall<Client, D>,
) -> Result<(), LedgerError> {
    let pending = call
        .send()
        .await
        .map_err(|err| LedgerError::rejected(action, err))?;
    let tx_hash = pending.tx_hash();
    let receipt = pending
        .await
        .map_err(|err| LedgerError::rejected(action, err))?;
    match receipt {
        Some(receipt) if receipt.status == Some(U64::one()) => {
            debug!(%action, tx_hash = %format!("{:#x}", tx_hash), "submission confirmed");
            Ok(())
        }
        Some(_) => Err(LedgerError::rejected(
            action,
            format!("transaction {:#x} reverted", tx_hash),
        )),
        None => Err(LedgerError::rejected(
            action,
            format!("transaction {:#x} dropped", tx_hash),
        )),
    }
}

fn to_u64(query: &'static str, value: U256) -> Result<u64, LedgerError> {
    if value > U256::from(u64::MAX) {
        return Err(LedgerError::unavailable(
            query,
            format!("{value} does not fit in u64"),
        ));
    }
    Ok(value.as_u64())
}

fn to_derived_value(value: U256) -> DerivedValue {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    DerivedValue(bytes)
}

fn to_address(participant: Participant) -> Address {
    Address::from(participant.0)
}

fn to_entries(
    addresses: Vec<Address>,
    dvals: Vec<U256>,
) -> Result<Vec<DerivedEntry>, LedgerError> {
    if addresses.len() != dvals.len() {
        return Err(LedgerError::unavailable(
            "getParticipantsAndDVals",
            format!("{} participants but {} values", addresses.len(), dvals.len()),
        ));
    }
    Ok(DerivedEntry::enumerate(
        addresses
            .into_iter()
            .zip(dvals)
            .map(|(address, dval)| (Participant(address.0), to_derived_value(dval))),
    ))
}

impl PhaseSource for EvmLedger {
    async fn phase(&self, gate: Gate) -> Result<u8, LedgerError> {
        match gate {
            Gate::Controller => read("getPhase", self.controller.get_phase()).await,
            Gate::Setup => read("getPhase", self.setup.get_phase()).await,
            Gate::CommitReveal => read("getPhase", self.commit_reveal.get_phase()).await,
            Gate::Game => read("getPhase", self.game.get_phase()).await,
            Gate::Verify(round) => {
                read("getPhase", self.verify.get_phase(U256::from(round))).await
            }
        }
    }

    async fn round_id(&self) -> Result<RoundId, LedgerError> {
        let round = read("roundId", self.controller.round_id()).await?;
        to_u64("roundId", round)
    }
}

impl ControlLedger for EvmLedger {
    async fn start_game(&self) -> Result<(), LedgerError> {
        submit(Action::StartGame, self.controller.start_game()).await
    }

    async fn verify_game(&self) -> Result<(), LedgerError> {
        submit(Action::VerifyGame, self.controller.verify_game()).await
    }

    async fn reset(&self) -> Result<(), LedgerError> {
        submit(Action::Reset, self.controller.reset()).await
    }
}

// Names with digits or underscores are called by their Solidity name.
impl CommitRevealLedger for EvmLedger {
    async fn commit(&self, commit_value: Digest, stake: Wei) -> Result<(), LedgerError> {
        let call: ContractCall<Client, ()> =
            self.commit_reveal_call("commit", H256::from(commit_value))?;
        submit(Action::Commit, call.value(U256::from(stake))).await
    }

    async fn reveal1(&self, opening: Digest) -> Result<(), LedgerError> {
        let call: ContractCall<Client, ()> =
            self.commit_reveal_call("reveal1", H256::from(opening))?;
        submit(Action::Reveal1, call).await
    }

    async fn calculate_intermediate_values(&self) -> Result<(), LedgerError> {
        let call: ContractCall<Client, ()> =
            self.commit_reveal_call("calculateIntermediateValues", ())?;
        submit(Action::CalculateIntermediateValues, call).await
    }

    async fn participants_and_dvals(&self) -> Result<Vec<DerivedEntry>, LedgerError> {
        let call = self.commit_reveal_call("getParticipantsAndDVals", ())?;
        let (addresses, dvals): (Vec<Address>, Vec<U256>) =
            read("getParticipantsAndDVals", call).await?;
        to_entries(addresses, dvals)
    }

    async fn submit_reveal_order(&self, order: Vec<Participant>) -> Result<(), LedgerError> {
        let order: Vec<Address> = order.into_iter().map(to_address).collect();
        let call: ContractCall<Client, ()> =
            self.commit_reveal_call("submitRevealOrder", order)?;
        submit(Action::SubmitRevealOrder, call).await
    }

    async fn current_revealer(&self) -> Result<Participant, LedgerError> {
        let call = self.commit_reveal_call("getCurrentRevealer", ())?;
        let revealer: Address = read("getCurrentRevealer", call).await?;
        Ok(Participant(revealer.0))
    }

    async fn turn_timeout(&self) -> Result<Duration, LedgerError> {
        let call = self.commit_reveal_call("TURN_TIMEOUT", ())?;
        let seconds: U256 = read("TURN_TIMEOUT", call).await?;
        Ok(Duration::from_secs(to_u64("TURN_TIMEOUT", seconds)?))
    }

    async fn skip_stalled_participant(&self) -> Result<(), LedgerError> {
        let call: ContractCall<Client, ()> = self.commit_reveal_call("skipStalledUser", ())?;
        submit(Action::SkipStalledParticipant, call).await
    }

    async fn reveal2(&self, secret: Digest) -> Result<(), LedgerError> {
        let call: ContractCall<Client, ()> =
            self.commit_reveal_call("reveal2", H256::from(secret))?;
        submit(Action::Reveal2, call).await
    }

    async fn omega(&self) -> Result<RandomSeed, LedgerError> {
        let call = self.commit_reveal_call("omega_o", ())?;
        let omega: H256 = read("omega_o", call).await?;
        Ok(RandomSeed(omega.0))
    }
}

impl ChainLedger for EvmLedger {
    async fn player_count(&self) -> Result<u64, LedgerError> {
        let count = read("playerCount", self.setup.player_count()).await?;
        to_u64("playerCount", count)
    }

    async fn bet(&self, stake: Wei) -> Result<(), LedgerError> {
        submit(Action::Bet, self.setup.bet().value(U256::from(stake))).await
    }

    async fn submit_chain(&self, anchor: Digest) -> Result<(), LedgerError> {
        submit(Action::SubmitChain, self.setup.submit_chain(anchor)).await
    }

    async fn anchor(&self) -> Result<Digest, LedgerError> {
        read("anchor", self.setup.anchor()).await
    }

    async fn submit_cut(&self, cut: u64) -> Result<(), LedgerError> {
        submit(Action::SubmitCut, self.setup.submit_cut(U256::from(cut))).await
    }

    async fn cut(&self) -> Result<u64, LedgerError> {
        let cut = read("getCut", self.setup.get_cut()).await?;
        to_u64("getCut", cut)
    }

    async fn reveal_cut_chain(&self, value: Digest) -> Result<(), LedgerError> {
        submit(Action::RevealCutChain, self.setup.reveal_cut_chain(value)).await
    }
}

impl GameLedger for EvmLedger {
    async fn deal(&self, value: Digest) -> Result<(), LedgerError> {
        submit(Action::Deal, self.game.deal(value)).await
    }

    async fn deal_action(&self, value: Digest) -> Result<(), LedgerError> {
        submit(Action::DealAction, self.game.deal_actions(value)).await
    }

    async fn player_round_over(&self) -> Result<bool, LedgerError> {
        read("playerRoundOver", self.game.player_round_over()).await
    }

    async fn all_finished(&self) -> Result<bool, LedgerError> {
        read("allFinished", self.game.all_finished()).await
    }

    async fn has_played(&self) -> Result<bool, LedgerError> {
        read("hasPlayed", self.game.has_played()).await
    }

    async fn hit(&self) -> Result<(), LedgerError> {
        submit(Action::Hit, self.game.hit()).await
    }

    async fn stand(&self) -> Result<(), LedgerError> {
        submit(Action::Stand, self.game.stand()).await
    }
}

impl VerifyLedger for EvmLedger {
    async fn verify_anchor(
        &self,
        round: RoundId,
        salt: Salt,
        length: u64,
    ) -> Result<(), LedgerError> {
        let mut call =
            self.verify
                .verify_anchor(U256::from(round), salt.to_be_bytes(), U256::from(length));
        if let Some(gas) = self.verify_gas {
            call = call.gas(gas);
        }
        submit(Action::VerifyAnchor, call).await
    }

    async fn resolve_game(&self, round: RoundId) -> Result<(), LedgerError> {
        submit(Action::ResolveGame, self.verify.resolve_game(U256::from(round))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u256_narrowing() {
        assert_eq!(to_u64("roundId", U256::from(7u64)).unwrap(), 7);
        assert_eq!(to_u64("roundId", U256::from(u64::MAX)).unwrap(), u64::MAX);
        let err = to_u64("roundId", U256::from(u64::MAX) + 1).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_derived_value_is_big_endian() {
        assert_eq!(to_derived_value(U256::from(40u64)), DerivedValue::from(40));
        assert!(!to_derived_value(U256::zero()).is_positive());
        let high = to_derived_value(U256::MAX);
        assert_eq!(high.0, [0xff; 32]);
    }

    #[test]
    fn test_entries_keep_ledger_order() {
        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);
        let entries = to_entries(vec![a, b], vec![U256::from(10u64), U256::from(40u64)]).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].participant, Participant([0xaa; 20]));
        assert_eq!(entries[0].index, 0);
        assert_eq!(entries[1].participant, Participant([0xbb; 20]));
        assert_eq!(entries[1].value, DerivedValue::from(40));
    }

    #[test]
    fn test_mismatched_lengths_are_unavailable() {
        let err = to_entries(vec![Address::zero()], vec![]).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_address_round_trip() {
        let participant = Participant([0x42; 20]);
        assert_eq!(Participant(to_address(participant).0), participant);
    }
}
