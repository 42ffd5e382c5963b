//! Cancellable execution context, modelled on the Go-style `context.Context`
//! the original driver exposes: a cancellation signal plus an optional
//! deadline that flows through `send_command_with_context`, the polling
//! loop, and session shutdown (spec.md §4.3, §5).

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// A cheaply-clonable cancellation handle with an optional deadline.
///
/// Cloning a `Context` shares the same cancellation signal — cancelling any
/// clone cancels all of them, exactly like `CancellationToken::clone`.
#[derive(Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// A context derived from `self` that is also cancelled when `self` is,
    /// but can additionally be cancelled independently.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time remaining until the deadline, saturating at zero, or `None` if
    /// there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// A transport read timeout derived from the deadline with a safety
    /// margin, as described in spec.md §4.3: `max(0, deadline - now - margin)`.
    pub fn timeout_with_margin(&self, margin: Duration) -> Option<Duration> {
        self.remaining().map(|r| r.saturating_sub(margin))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_never_cancels_on_its_own() {
        let ctx = Context::background();
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn remaining_saturates_at_zero_past_deadline() {
        let ctx = Context::with_deadline(Instant::now() - Duration::from_secs(1));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn timeout_with_margin_subtracts_safety_window() {
        let ctx = Context::with_timeout(Duration::from_millis(100));
        let t = ctx.timeout_with_margin(Duration::from_millis(5)).unwrap();
        assert!(t <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
