//! Skips revealers that stall during reveal2.
//!
//! The watchdog timestamps the moment it first observes each revealer as
//! current and issues a skip only once strictly more than the turn timeout
//! has passed since then. It re-reads the current revealer on every poll,
//! so a rejected skip (the ledger's clock may lag) is simply retried later.

use crate::{ledger::CommitRevealLedger, Error, Result};
use fairdeal_types::Participant;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of one watchdog poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The caller is the current revealer.
    MyTurn,
    /// The named revealer was skipped.
    Skipped(Participant),
    StillWaiting,
}

/// Tracks how long the current revealer has been current.
#[derive(Debug)]
pub struct Watchdog {
    identity: Participant,
    turn_timeout: Duration,
    max_skip_rejections: usize,
    current: Option<(Participant, Instant)>,
    rejections: usize,
}

impl Watchdog {
    pub fn new(identity: Participant, turn_timeout: Duration, max_skip_rejections: usize) -> Self {
        Self {
            identity,
            turn_timeout,
            max_skip_rejections,
            current: None,
            rejections: 0,
        }
    }

    pub fn turn_timeout(&self) -> Duration {
        self.turn_timeout
    }

    /// Observe the ledger at `now`, skipping the current revealer if it has
    /// been current for longer than the turn timeout.
    ///
    /// Fails with [Error::Liveness] once `max_skip_rejections` consecutive
    /// skips of the same revealer were rejected.
    pub async fn poll<L: CommitRevealLedger>(&mut self, ledger: &L, now: Instant) -> Result<Outcome> {
        let current = match ledger.current_revealer().await {
            Ok(current) => current,
            Err(err) => {
                debug!(?err, "current revealer unavailable");
                return Ok(Outcome::StillWaiting);
            }
        };
        if current == self.identity {
            self.current = None;
            return Ok(Outcome::MyTurn);
        }
        if current.is_zero() {
            self.current = None;
            return Ok(Outcome::StillWaiting);
        }

        let since = match self.current {
            Some((observed, since)) if observed == current => since,
            _ => {
                debug!(revealer = %current, "new current revealer");
                self.current = Some((current, now));
                self.rejections = 0;
                now
            }
        };
        if now.duration_since(since) <= self.turn_timeout {
            return Ok(Outcome::StillWaiting);
        }

        match ledger.skip_stalled_participant().await {
            Ok(()) => {
                info!(stalled = %current, waited = ?now.duration_since(since), "skipped stalled revealer");
                self.current = None;
                self.rejections = 0;
                Ok(Outcome::Skipped(current))
            }
            Err(err) => {
                self.rejections += 1;
                warn!(stalled = %current, ?err, rejections = self.rejections, "skip rejected");
                if self.rejections >= self.max_skip_rejections {
                    return Err(Error::Liveness {
                        stalled: current,
                        attempts: self.rejections,
                    });
                }
                Ok(Outcome::StillWaiting)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::Action,
        mocks::{MockLedger, MockState},
    };
    use fairdeal_types::CommitRevealPhase;

    fn participant(byte: u8) -> Participant {
        Participant([byte; 20])
    }

    /// Reveal2 underway with `queue` as the remaining order, nobody responsive.
    fn ledger(identity: Participant, queue: &[Participant]) -> MockLedger {
        let mut state = MockState::house_round(
            participant(1),
            &[(participant(1), 50), (participant(2), 40), (participant(3), 30)],
        );
        for entry in state.participants.iter_mut() {
            entry.responsive = false;
        }
        state.commit_reveal = CommitRevealPhase::Reveal2;
        state.reveal_queue = queue.iter().copied().collect();
        MockLedger::new(identity, state)
    }

    #[tokio::test]
    async fn test_skips_only_after_timeout() {
        let ledger = ledger(participant(1), &[participant(2), participant(3), participant(1)]);
        let mut watchdog = Watchdog::new(participant(1), Duration::from_secs(30), 3);
        let start = Instant::now();

        assert_eq!(watchdog.poll(&ledger, start).await.unwrap(), Outcome::StillWaiting);
        assert_eq!(
            watchdog.poll(&ledger, start + Duration::from_secs(29)).await.unwrap(),
            Outcome::StillWaiting
        );
        assert_eq!(
            watchdog.poll(&ledger, start + Duration::from_secs(30)).await.unwrap(),
            Outcome::StillWaiting
        );
        assert_eq!(ledger.count(Action::SkipStalledParticipant), 0);

        assert_eq!(
            watchdog.poll(&ledger, start + Duration::from_secs(31)).await.unwrap(),
            Outcome::Skipped(participant(2))
        );
        assert_eq!(ledger.count(Action::SkipStalledParticipant), 1);

        // The next revealer gets a fresh timer.
        let resumed = start + Duration::from_secs(32);
        assert_eq!(watchdog.poll(&ledger, resumed).await.unwrap(), Outcome::StillWaiting);
        assert_eq!(
            watchdog.poll(&ledger, resumed + Duration::from_secs(20)).await.unwrap(),
            Outcome::StillWaiting
        );
        assert_eq!(ledger.count(Action::SkipStalledParticipant), 1);
    }

    #[tokio::test]
    async fn test_next_revealer_sees_its_turn() {
        let ledger = ledger(participant(1), &[participant(2), participant(3)]);
        let mut watchdog = Watchdog::new(participant(1), Duration::from_secs(30), 3);
        let start = Instant::now();
        watchdog.poll(&ledger, start).await.unwrap();
        watchdog
            .poll(&ledger, start + Duration::from_secs(31))
            .await
            .unwrap();

        let third = ledger.with_identity(participant(3));
        let mut watchdog = Watchdog::new(participant(3), Duration::from_secs(30), 3);
        assert_eq!(watchdog.poll(&third, Instant::now()).await.unwrap(), Outcome::MyTurn);
    }

    #[tokio::test]
    async fn test_repeated_rejections_raise_liveness() {
        let ledger = ledger(participant(1), &[participant(2), participant(1)]);
        ledger.reject(Action::SkipStalledParticipant, 5);
        let mut watchdog = Watchdog::new(participant(1), Duration::from_secs(30), 2);
        let start = Instant::now();
        watchdog.poll(&ledger, start).await.unwrap();

        let late = start + Duration::from_secs(31);
        assert_eq!(watchdog.poll(&ledger, late).await.unwrap(), Outcome::StillWaiting);
        let err = watchdog
            .poll(&ledger, late + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Liveness { stalled, attempts: 2 } if stalled == participant(2)
        ));
    }

    #[tokio::test]
    async fn test_unavailable_revealer_keeps_waiting() {
        let ledger = ledger(participant(1), &[participant(2)]);
        ledger.update(|state| state.failing_reads = 1);
        let mut watchdog = Watchdog::new(participant(1), Duration::from_secs(30), 3);
        assert_eq!(
            watchdog.poll(&ledger, Instant::now()).await.unwrap(),
            Outcome::StillWaiting
        );
    }
}
