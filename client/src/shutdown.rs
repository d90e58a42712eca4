//! Cooperative cancellation for long-running loops.

use crate::{Error, Result};
use std::time::Duration;
use tokio::{
    sync::watch,
    time::{sleep_until, Instant},
};

/// Trigger side of a shutdown channel.
#[derive(Debug)]
pub struct Signal {
    sender: watch::Sender<bool>,
}

impl Signal {
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

/// Cloneable handle observed by every waiting loop.
#[derive(Clone, Debug)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

/// Create a connected signal and handle.
pub fn channel() -> (Signal, Shutdown) {
    let (sender, receiver) = watch::channel(false);
    (Signal { sender }, Shutdown { receiver })
}

impl Shutdown {
    /// A handle that is never triggered.
    pub fn never() -> Self {
        channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Sleep for `duration`, returning [Error::Cancelled] as soon as shutdown
    /// is requested.
    pub async fn sleep(&mut self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return Err(Error::Cancelled);
            }
            tokio::select! {
                _ = sleep_until(deadline) => return Ok(()),
                changed = self.receiver.changed() => {
                    if changed.is_err() {
                        if self.is_triggered() {
                            return Err(Error::Cancelled);
                        }
                        // Signal dropped: nothing can cancel this sleep anymore.
                        sleep_until(deadline).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_signal() {
        let mut shutdown = Shutdown::never();
        let start = Instant::now();
        shutdown.sleep(Duration::from_secs(5)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_interrupts_sleep() {
        let (signal, mut shutdown) = channel();
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            signal.trigger();
        });
        let start = Instant::now();
        let result = shutdown.sleep(Duration::from_secs(60)).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(60));
        trigger.await.unwrap();
    }

    #[tokio::test]
    async fn test_triggered_handle_fails_immediately() {
        let (signal, mut shutdown) = channel();
        signal.trigger();
        assert!(shutdown.is_triggered());
        assert!(matches!(
            shutdown.sleep(Duration::from_secs(60)).await,
            Err(Error::Cancelled)
        ));
    }
}
