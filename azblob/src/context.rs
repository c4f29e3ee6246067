use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{BlobError, BlobResult};

/// Cancellation and deadline scope passed into every blob operation.
///
/// Clones share the same cancellation token, so cancelling any clone aborts
/// every operation running under the scope. An elapsed deadline is reported
/// the same way as an explicit cancel.
#[derive(Debug, Clone)]
pub struct BlobCtx {
    pub request_id: String,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for BlobCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobCtx {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = request_id;
        self
    }

    /// Use an externally owned token, e.g. one cancelled on Ctrl-C.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Tighten the deadline; a later deadline than the current one is ignored.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A scope cancelled together with this one, but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Resolves once the scope is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Drive `fut` to completion unless the scope ends first, in which case
    /// `fut` is dropped and `Cancelled` is returned.
    pub async fn run<T, F>(&self, fut: F) -> BlobResult<T>
    where
        F: Future<Output = BlobResult<T>>,
    {
        if self.is_cancelled() {
            return Err(BlobError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.done() => Err(BlobError::Cancelled),
            result = fut => result,
        }
    }
}
