use std::time::Duration;

use tokio::sync::watch;

use crate::clock::Sleeper;

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, ShutdownSignal { receiver })
}

#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        let (_sender, receiver) = watch::channel(false);
        Self { receiver }
    }

    pub fn is_requested(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown is requested. Pends forever if the trigger was
    /// dropped without firing.
    pub async fn requested(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Sleeps for `duration` unless shutdown arrives first. Returns `false` when
/// the sleep was cut short.
pub async fn sleep_unless_shutdown(
    sleeper: &dyn Sleeper,
    duration: Duration,
    shutdown: &ShutdownSignal,
) -> bool {
    if shutdown.is_requested() {
        return false;
    }
    if duration.is_zero() {
        return true;
    }

    tokio::select! {
        _ = sleeper.sleep(duration) => true,
        _ = shutdown.requested() => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{shutdown_channel, sleep_unless_shutdown, ShutdownSignal};
    use crate::clock::{RecordingSleeper, TokioSleeper};

    #[tokio::test]
    async fn sleep_completes_without_shutdown() {
        let sleeper = RecordingSleeper::default();
        let completed =
            sleep_unless_shutdown(&sleeper, Duration::from_secs(5), &ShutdownSignal::never()).await;
        assert!(completed);
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(5)]);
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_long_sleep() {
        let (trigger, signal) = shutdown_channel();
        let waiter = tokio::spawn(async move {
            sleep_unless_shutdown(&TokioSleeper, Duration::from_secs(3600), &signal).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();

        let completed = waiter.await.expect("sleep task should join");
        assert!(!completed);
    }

    #[tokio::test]
    async fn already_requested_shutdown_skips_the_sleep() {
        let (trigger, signal) = shutdown_channel();
        trigger.trigger();
        let sleeper = RecordingSleeper::default();
        assert!(!sleep_unless_shutdown(&sleeper, Duration::from_secs(1), &signal).await);
        assert!(sleeper.sleeps().is_empty());
    }
}
