//! Reconnection control
//!
//! A small state machine layered over the transport: unexpected closes
//! retry with capped exponential backoff until the attempt budget is
//! exhausted, then settle in a terminal error state that only explicit
//! user action leaves.

use std::fmt;
use std::time::Duration;

/// Connection lifecycle state. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; awaiting user start
    Idle,
    /// First connection attempt in flight
    Connecting,
    /// Handshake complete; audio is flowing
    Connected,
    /// Waiting out a backoff delay before retrying
    Reconnecting,
    /// Terminal failure; requires user action to restart
    Error,
    /// No network connectivity detected at connect time
    Offline,
}

impl ConnectionState {
    /// Whether leaving this state requires explicit user action.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Offline)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
            Self::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Retry policy for reconnection attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum automatic retries before forcing the error state
    pub max_attempts: u32,
    /// Delay before the first retry (doubles each attempt)
    pub base_delay: Duration,
    /// Delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Compute the backoff delay for a retry attempt.
///
/// `delay = min(base_delay * 2^attempt, max_delay)`, with no jitter so
/// the schedule is exact and testable.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(policy.max_delay)
}

/// Owns the attempt counter and backoff schedule for one session.
///
/// Every failure path (handshake timeout, unexpected close) consults the
/// same controller, so the budget is enforced uniformly.
#[derive(Debug)]
pub struct ReconnectController {
    policy: RetryPolicy,
    attempts: u32,
}

impl ReconnectController {
    /// Create a controller with the given policy and a fresh budget.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Claim the next retry slot.
    ///
    /// Returns the delay to wait before reconnecting, or `None` when the
    /// budget is exhausted and the session must settle in `Error`.
    pub fn next_retry(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            tracing::warn!(
                attempts = self.attempts,
                max = self.policy.max_attempts,
                "retry budget exhausted"
            );
            return None;
        }

        let delay = delay_for_attempt(&self.policy, self.attempts);
        self.attempts += 1;
        tracing::debug!(attempt = self.attempts, ?delay, "retry scheduled");
        Some(delay)
    }

    /// A handshake completed; the budget resets.
    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }

    /// Explicit user-initiated restart; the budget resets.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Retries claimed since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The active policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- delay schedule -------------------------------------------------------

    #[test]
    fn delays_double_and_cap_at_ten_seconds() {
        let policy = RetryPolicy::default();

        assert_eq!(delay_for_attempt(&policy, 0), Duration::from_millis(1000));
        assert_eq!(delay_for_attempt(&policy, 1), Duration::from_millis(2000));
        assert_eq!(delay_for_attempt(&policy, 2), Duration::from_millis(4000));
        assert_eq!(delay_for_attempt(&policy, 3), Duration::from_millis(8000));
        assert_eq!(delay_for_attempt(&policy, 4), Duration::from_millis(10000));
        assert_eq!(delay_for_attempt(&policy, 10), Duration::from_millis(10000));
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(delay_for_attempt(&policy, u32::MAX), policy.max_delay);
    }

    // -- budget ---------------------------------------------------------------

    #[test]
    fn budget_allows_exactly_max_attempts() {
        let mut controller = ReconnectController::new(RetryPolicy::default());

        let delays: Vec<Duration> = std::iter::from_fn(|| controller.next_retry()).collect();
        assert_eq!(delays.len(), 5);
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(8000),
                Duration::from_millis(10000),
            ]
        );

        // No sixth attempt, no matter how often asked
        assert!(controller.next_retry().is_none());
        assert!(controller.next_retry().is_none());
    }

    #[test]
    fn successful_handshake_resets_budget() {
        let mut controller = ReconnectController::new(RetryPolicy::default());

        controller.next_retry();
        controller.next_retry();
        assert_eq!(controller.attempts(), 2);

        controller.on_connected();
        assert_eq!(controller.attempts(), 0);

        // A later disconnect sequence starts from the first delay again
        assert_eq!(controller.next_retry(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn user_reset_restores_budget() {
        let mut controller = ReconnectController::new(RetryPolicy::default());
        while controller.next_retry().is_some() {}

        controller.reset();
        assert_eq!(controller.next_retry(), Some(Duration::from_millis(1000)));
    }

    // -- states ---------------------------------------------------------------

    #[test]
    fn terminal_states_require_user_action() {
        assert!(ConnectionState::Error.is_terminal());
        assert!(ConnectionState::Offline.is_terminal());
        assert!(!ConnectionState::Idle.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(!ConnectionState::Reconnecting.is_terminal());
    }

    #[test]
    fn states_display_lowercase() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Offline.to_string(), "offline");
    }
}
