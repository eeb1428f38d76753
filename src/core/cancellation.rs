//! Cooperative cancellation
//!
//! [`CancellationSignal`] wraps the receiving side of the shutdown channel the
//! binary wires to SIGINT/SIGTERM. Stages check it at every channel operation,
//! I/O call and retry delay.

use tokio::sync::watch;

/// Read side of a `watch` shutdown channel
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: watch::Receiver<bool>,
}

impl CancellationSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested
    ///
    /// If every sender is dropped without requesting cancellation the
    /// future stays pending.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl From<watch::Receiver<bool>> for CancellationSignal {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_fires_after_send() {
        let (tx, rx) = watch::channel(false);
        let signal = CancellationSignal::new(rx);
        assert!(!signal.is_cancelled());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("signal should fire")
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_immediately() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let signal = CancellationSignal::new(rx);

        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("signal should resolve immediately");
    }

    #[tokio::test]
    async fn test_never_stays_pending() {
        let signal = CancellationSignal::never();
        let result = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(result.is_err());
        assert!(!signal.is_cancelled());
    }
}
