//! Cooperative cancellation shared by every network, filesystem and process
//! call the engine makes.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use crate::error::{Error, Result};

/// How often blocked callers look at the token.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A cloneable cancellation signal with an optional deadline.
///
/// Clones share the same [`CancellationToken`], so cancelling any clone
/// cancels all of them. A child created with
/// [`CancelToken::child_with_timeout`] is cancelled with its parent and
/// carries a deadline no later than the parent's.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token that also fires once `timeout` has elapsed.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(current) if current < candidate => current,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// `Err(Error::Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Caps a per-request timeout by the time left until the deadline.
    pub fn bound(&self, timeout: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(clone.check().is_ok());
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_parent_cancels_child() {
        let parent = CancelToken::new();
        let child = parent.child_with_timeout(Duration::from_secs(3600));
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_deadline_fires() {
        let token = CancelToken::new();
        let child = token.child_with_timeout(Duration::ZERO);
        assert!(child.is_cancelled());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_child_never_extends_parent_deadline() {
        let parent = CancelToken::new().child_with_timeout(Duration::from_secs(1));
        let child = parent.child_with_timeout(Duration::from_secs(3600));
        assert!(child.bound(Duration::from_secs(60)) <= Duration::from_secs(1));
    }

    #[test]
    fn test_bound_without_deadline() {
        let token = CancelToken::new();
        assert_eq!(token.bound(Duration::from_secs(15)), Duration::from_secs(15));
    }
}
