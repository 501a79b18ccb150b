//! Cooperative cancellation shared by every await of a sync or prune run.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Clonable cancel flag backed by a watch channel.
///
/// Unlike a broadcast receiver, a handle created after [`cancel`](Self::cancel)
/// still observes the cancelled state.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Fire the token. Idempotent.
    pub fn cancel(&self) {
        if !self.sender.send_replace(true) {
            tracing::debug!("cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the token has fired.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                // All senders gone without cancelling: never resolves.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Race `future` against the token. `None` means cancellation won.
    pub async fn guard<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            output = future => Some(output),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
