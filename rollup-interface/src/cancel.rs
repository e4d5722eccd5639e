//! Cooperative cancellation, observed at every suspension point.

use tokio::sync::watch;

/// Creates a linked cancellation handle/token pair.
pub fn cancel_pair() -> (CancelHandle, Cancel) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancel { rx })
}

/// The owning side of a cancellation pair. Dropping the handle cancels all
/// linked tokens.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every token cloned from this pair.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// A cheaply cloneable cancellation token.
#[derive(Clone, Debug)]
pub struct Cancel {
    rx: watch::Receiver<bool>,
}

impl Cancel {
    /// A token that is never cancelled. Intended for tests.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open for the process lifetime.
        std::mem::forget(tx);
        Cancel { rx }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested (or the handle is dropped,
    /// which counts as cancellation).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let (handle, cancel) = cancel_pair();
        assert!(!cancel.is_cancelled());
        let waiter = tokio::spawn({
            let cancel = cancel.clone();
            async move { cancel.cancelled().await }
        });
        handle.cancel();
        waiter.await.unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_handle_cancels() {
        let (handle, cancel) = cancel_pair();
        drop(handle);
        cancel.cancelled().await;
    }
}
