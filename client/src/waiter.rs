//! Polling until a ledger phase counter reaches a target.
//!
//! Phases only move forward within a round, so waiting for `phase >= target`
//! (never `==`) tolerates missed intermediate values. Failed reads back off
//! with jitter up to a cap; successful polls use the fixed interval.

use crate::{
    backoff::Backoff,
    config::PollingConfig,
    ledger::{read_phase, LedgerError, PhaseSource},
    shutdown::Shutdown,
    Error, Result,
};
use fairdeal_types::{Gate, Phase};
use std::{future::Future, time::Duration};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Blocks the caller until a ledger condition holds.
#[derive(Clone, Debug)]
pub struct PhaseWaiter {
    polling: PollingConfig,
    shutdown: Shutdown,
}

impl PhaseWaiter {
    pub fn new(polling: PollingConfig, shutdown: Shutdown) -> Self {
        Self { polling, shutdown }
    }

    pub fn poll_interval(&self) -> Duration {
        self.polling.poll_interval
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Sleep one poll interval (interrupted by shutdown).
    pub async fn pause(&mut self) -> Result<()> {
        self.shutdown.sleep(self.polling.poll_interval).await
    }

    /// Repeat `read` until `done` accepts its value.
    ///
    /// Read failures are retried with capped, jittered backoff. Fails with
    /// [Error::Timeout] once the configured deadline passes and with
    /// [Error::Cancelled] on shutdown.
    pub async fn poll_until<T, F, Fut, D>(&mut self, what: &str, mut read: F, mut done: D) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, LedgerError>>,
        D: FnMut(&T) -> bool,
    {
        let started = Instant::now();
        let mut backoff = Backoff::new(self.polling.poll_interval, self.polling.max_backoff);
        loop {
            let delay = match read().await {
                Ok(value) if done(&value) => return Ok(value),
                Ok(_) => {
                    trace!(what, "still waiting");
                    backoff.reset();
                    self.polling.poll_interval
                }
                Err(err) => {
                    warn!(what, ?err, "ledger read failed");
                    backoff.next_delay(&mut rand::thread_rng())
                }
            };
            if let Some(deadline) = self.polling.phase_deadline {
                let waited = started.elapsed();
                if waited >= deadline {
                    return Err(Error::Timeout {
                        what: what.to_string(),
                        waited,
                    });
                }
            }
            self.shutdown.sleep(delay).await?;
        }
    }

    /// Retry `read` until it succeeds once.
    pub async fn read<T, F, Fut>(&mut self, what: &str, read: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, LedgerError>>,
    {
        self.poll_until(what, read, |_| true).await
    }

    /// Wait until the phase behind `gate` is at least `target`. Returns the
    /// phase actually observed, which may be past the target.
    pub async fn await_phase<P: Phase, L: PhaseSource>(
        &mut self,
        ledger: &L,
        gate: Gate,
        target: P,
    ) -> Result<P> {
        let target_value: u8 = target.into();
        debug!(%gate, ?target, "awaiting phase");
        let what = format!("{gate} >= {target:?}");
        let observed = self
            .poll_until(
                &what,
                || read_phase::<P, L>(ledger, gate),
                |phase: &P| {
                    let value: u8 = (*phase).into();
                    value >= target_value
                },
            )
            .await?;
        debug!(%gate, ?observed, "phase reached");
        Ok(observed)
    }
}
