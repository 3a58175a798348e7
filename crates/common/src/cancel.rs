//! Cooperative cancellation token
//!
//! Capture loops poll this flag at every iteration; cancellation takes
//! effect at the next poll, never mid-transfer. The hardware polling cadence
//! depends on completing the current USB exchange, so preemptive
//! interruption is deliberately not offered.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Shared cancellation flag for one capture session
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; safe to call from any thread, any number of times
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            debug!("Cancellation requested");
        }
    }

    /// Check the flag; the caller's next loop iteration is the cancel point
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_not_cancelled() {
        assert!(!CancelToken::new().is_cancelled());
    }

    #[test]
    fn test_cancel_is_sticky_and_shared() {
        let token = CancelToken::new();
        let clone = token.clone();

        clone.cancel();
        assert!(token.is_cancelled());

        // Repeated cancellation stays cancelled
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_tokens_are_independent() {
        let a = CancelToken::new();
        let b = CancelToken::new();
        a.cancel();
        assert!(!b.is_cancelled());
    }
}
