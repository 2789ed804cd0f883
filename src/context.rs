use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use crate::error::KindlyError;

/// A cancellable, optionally deadline-bound execution context.
///
/// Clones share the same cancellation flag, so a `Context` handed to a
/// Ctrl-C handler cancels every operation running with one of its clones.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a context that shares this one's cancellation flag and
    /// expires after `timeout` (or earlier, if the parent deadline is sooner).
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(match self.deadline {
                Some(parent) if parent < deadline => parent,
                _ => deadline,
            }),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fails with `Cancelled` or `NetworkTimeout` once the context is done.
    ///
    /// `what` names the in-flight operation for the timeout message.
    pub fn check(&self, what: &str) -> Result<(), KindlyError> {
        if self.is_cancelled() {
            return Err(KindlyError::Cancelled);
        }
        if self.remaining().is_some_and(|left| left.is_zero()) {
            return Err(KindlyError::NetworkTimeout(what.to_string()));
        }
        Ok(())
    }
}
