//! Cooperative cancellation
//!
//! A [`CancellationToken`] is owned by the host (the CLI cancels it on Ctrl-C)
//! and polled by every walk once per directory entry. A token can also carry a
//! deadline, which is how abort cleanup bounds its own running time.

use crate::error::{Result, StrataError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag with an optional deadline
///
/// Clones share the same flag.
///
/// ```rust
/// use strata::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker = token.clone();
/// assert!(worker.check().is_ok());
///
/// token.cancel();
/// assert!(worker.is_cancelled());
/// assert!(worker.check().unwrap_err().is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an independent token that cancels itself after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested or the deadline passed
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Return [`StrataError::Cancelled`] if the token is cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StrataError::Cancelled)
        } else {
            Ok(())
        }
    }
}
