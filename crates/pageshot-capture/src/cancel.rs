//! Cancellation flag for in-flight captures.
//!
//! A watch channel carries a single bool; the handle side flips it when the
//! client goes away (SSE disconnect), the flag side is checked between
//! phases and raced against long-running awaits.

use tokio::sync::watch;

/// Create a linked cancel handle/flag pair.
pub fn cancel_pair() -> (CancelHandle, CancelFlag) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelFlag { rx, _hold: None })
}

/// Owner side — cancels the run when triggered or dropped via [`CancelHandle::cancel`].
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send(true).ok();
    }
}

/// Observer side, held by the running task. Cheap to clone.
#[derive(Clone)]
pub struct CancelFlag {
    rx: watch::Receiver<bool>,
    /// Keeps the sender alive for flags with no handle (see [`CancelFlag::never`]).
    _hold: Option<std::sync::Arc<watch::Sender<bool>>>,
}

impl CancelFlag {
    /// A flag that never fires, for scheduled fires and tests.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _hold: Some(std::sync::Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested; never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling — park forever.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_fires() {
        let (handle, flag) = cancel_pair();
        assert!(!flag.is_cancelled());
        handle.cancel();
        assert!(flag.is_cancelled());
        flag.cancelled().await; // must not hang
    }

    #[tokio::test]
    async fn test_never_flag_stays_pending() {
        let flag = CancelFlag::never();
        assert!(!flag.is_cancelled());
        let waited = tokio::time::timeout(std::time::Duration::from_millis(20), flag.cancelled())
            .await
            .is_err();
        assert!(waited);
    }
}
