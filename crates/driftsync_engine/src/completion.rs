//! One-shot completion handles bridging callback-style hosts into async code.
//!
//! The engine hands a [`CompletionHandle`] to the host's connector; the host
//! completes it exactly once, from any thread. The awaiting side observes the
//! outcome through the paired [`CompletionFuture`]. Misuse is deterministic:
//! a second completion fails with [`CompletionError::AlreadyCompleted`], a
//! completion after the awaiting side gave up is discarded, and a handle
//! dropped uncompleted resolves the future with [`CompletionError::Abandoned`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{CompletionError, ConnectorError};

type Outcome<T> = Result<T, ConnectorError>;

/// Completes one pending engine operation. Thread-safe; completable exactly
/// once.
pub struct CompletionHandle<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<Outcome<T>>>>>,
}

impl<T> Clone for CompletionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T> std::fmt::Debug for CompletionHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("completed", &self.sender.lock().is_none())
            .finish()
    }
}

impl<T> CompletionHandle<T> {
    /// Creates a handle and the future resolved by it.
    pub fn channel() -> (Self, CompletionFuture<T>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(sender))),
            },
            CompletionFuture { receiver },
        )
    }

    /// Completes the operation. Exactly the first call wins; later calls fail
    /// with [`CompletionError::AlreadyCompleted`] regardless of outcome. A
    /// completion whose awaiting side already went away is discarded and still
    /// counts as the first call.
    pub fn complete(&self, outcome: Outcome<T>) -> Result<(), CompletionError> {
        let sender = self
            .sender
            .lock()
            .take()
            .ok_or(CompletionError::AlreadyCompleted)?;
        // Err means the receiver was dropped; the outcome is discarded.
        let _ = sender.send(outcome);
        Ok(())
    }

    /// Completes successfully with `value`.
    pub fn complete_ok(&self, value: T) -> Result<(), CompletionError> {
        self.complete(Ok(value))
    }

    /// Completes with a connector error.
    pub fn complete_err(&self, error: ConnectorError) -> Result<(), CompletionError> {
        self.complete(Err(error))
    }

    /// Whether [`Self::complete`] has been called.
    pub fn is_completed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

/// Awaits the outcome delivered through the paired [`CompletionHandle`].
#[derive(Debug)]
pub struct CompletionFuture<T> {
    receiver: oneshot::Receiver<Outcome<T>>,
}

impl<T> CompletionFuture<T> {
    /// Waits for the completion. Resolves with
    /// [`CompletionError::Abandoned`] if every handle clone was dropped
    /// without a completion.
    pub async fn wait(self) -> Result<Outcome<T>, CompletionError> {
        self.receiver
            .await
            .map_err(|_| CompletionError::Abandoned)
    }
}
