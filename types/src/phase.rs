//! Phase values exposed by the round contracts.
//!
//! Every contract advances its own small integer phase monotonically within a
//! round. The core only reads these values and compares them with `>=`, so
//! each enum converts losslessly to and from its on-ledger `u8`.

use crate::RoundId;
use std::fmt;
use thiserror::Error;

/// A phase value read from the ledger could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown {contract} phase: {value}")]
pub struct UnknownPhase {
    pub contract: &'static str,
    pub value: u8,
}

/// Phase enum of one contract.
pub trait Phase: Copy + fmt::Debug + Into<u8> + TryFrom<u8, Error = UnknownPhase> {
    /// Name of the contract exposing this phase (used in logs).
    const CONTRACT: &'static str;
}

macro_rules! phase_enum {
    ($(#[$meta:meta])* $name:ident, $contract:literal, { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl From<$name> for u8 {
            fn from(phase: $name) -> u8 {
                phase as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = UnknownPhase;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    _ => Err(UnknownPhase {
                        contract: $contract,
                        value,
                    }),
                }
            }
        }

        impl Phase for $name {
            const CONTRACT: &'static str = $contract;
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}::{:?}", $contract, self)
            }
        }
    };
}

phase_enum!(
    /// Top-level round phase held by the controller.
    ControllerPhase, "controller", {
        Setup = 0,
        Play = 1,
        Verify = 2,
    }
);

phase_enum!(
    /// Sub-phases of the setup contract.
    SetupPhase, "setup", {
        Betting = 0,
        Rng = 1,
        ChainCommit = 2,
        Cut = 3,
        CutReveal = 4,
    }
);

phase_enum!(
    /// Sub-phases of the commit-reveal2 contract.
    CommitRevealPhase, "commit_reveal", {
        Commit = 0,
        Reveal1 = 1,
        OrderCalculation = 2,
        Reveal2 = 3,
        Finished = 4,
    }
);

phase_enum!(
    /// Sub-phases of the game contract.
    GamePhase, "game", {
        Deal = 0,
        PlayerActions = 1,
        DealerActions = 2,
        Settle = 3,
    }
);

phase_enum!(
    /// Per-round phase of the verify contract.
    VerifyPhase, "verify", {
        Pending = 0,
        Resolvable = 1,
        Resolved = 2,
    }
);

/// Which contract's phase counter to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Gate {
    Controller,
    Setup,
    CommitReveal,
    Game,
    /// The verify contract keys its phase by round.
    Verify(RoundId),
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Controller => f.write_str(ControllerPhase::CONTRACT),
            Gate::Setup => f.write_str(SetupPhase::CONTRACT),
            Gate::CommitReveal => f.write_str(CommitRevealPhase::CONTRACT),
            Gate::Game => f.write_str(GamePhase::CONTRACT),
            Gate::Verify(round) => write!(f, "{}[{round}]", VerifyPhase::CONTRACT),
        }
    }
}
