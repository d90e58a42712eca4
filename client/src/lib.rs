//! Off-ledger participant logic for fairdeal rounds: the dealer's round
//! orchestrator, the commit-reveal2 session shared by dealer and players,
//! and the adapters that connect them to a ledger.

pub mod config;
pub mod evm;
pub mod ledger;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod orchestrator;
pub mod player;
pub mod session;
pub mod shutdown;
mod backoff;
pub mod waiter;
pub mod watchdog;

pub use config::{Config, ConfigError, ValidatedConfig};
pub use ledger::{Action, Ledger, LedgerError};
pub use orchestrator::{RoundOrchestrator, RoundState};
pub use player::PlayerDriver;
pub use session::{CommitRevealSession, SessionState};
pub use shutdown::Shutdown;
pub use waiter::PhaseWaiter;
pub use watchdog::Watchdog;

use fairdeal_types::{ChainError, CommitmentError, ControllerPhase, Participant, RoundId};
use std::time::Duration;
use thiserror::Error;

/// Error type for round operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("integrity fault in {context}: {source}")]
    Commitment {
        context: &'static str,
        #[source]
        source: CommitmentError,
    },
    #[error("ledger anchor 0x{ledger} does not match local anchor 0x{local}")]
    AnchorMismatch { ledger: String, local: String },
    #[error("revealer {stalled} could not be skipped after {attempts} rejected attempts")]
    Liveness { stalled: Participant, attempts: usize },
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("no participant has a positive derived value")]
    NoEligibleParticipants,
    #[error("round {round} has no players")]
    NoPlayers { round: RoundId },
    #[error("local round state missing in {phase}")]
    StateLost { phase: ControllerPhase },
    #[error("invalid session transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
    #[error("timed out waiting for {what} after {waited:?}")]
    Timeout { what: String, waited: Duration },
    #[error("shutdown requested")]
    Cancelled,
}

/// Coarse classification used to pick a recovery path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry the same read or wait.
    Transient,
    /// The ledger reported a submission as failed.
    Rejected,
    /// Locally held or ledger-reported data failed a hash check.
    Integrity,
    /// A stalled revealer could not be skipped.
    Liveness,
    /// The round cannot continue and must be reset.
    Round,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Ledger(err) if err.is_transient() => ErrorKind::Transient,
            Error::Ledger(_) => ErrorKind::Rejected,
            Error::Commitment { .. } | Error::AnchorMismatch { .. } => ErrorKind::Integrity,
            Error::Liveness { .. } => ErrorKind::Liveness,
            Error::Chain(_)
            | Error::NoEligibleParticipants
            | Error::NoPlayers { .. }
            | Error::StateLost { .. }
            | Error::InvalidTransition { .. }
            | Error::Timeout { .. } => ErrorKind::Round,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Result type for round operations.
pub type Result<T> = std::result::Result<T, Error>;
