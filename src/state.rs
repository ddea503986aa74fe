//! Per-socket connection lifecycle state machine.
//!
//! Each socket owned by a [`crate::manager::ConnectionManager`] carries one
//! [`ConnectionState`]. Transitions are pure functions on [`RetryPolicy`] so
//! the reconnection schedule can be tested without a transport.

use std::time::Duration;

/// Lifecycle state of one socket. A socket is never simultaneously `Open`
/// and `Retrying`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket has been requested.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// The socket is established and dispatching events.
    Open,
    /// An explicit close was requested and is draining.
    Closing,
    /// Waiting out the backoff delay before retry number `attempt`.
    Retrying { attempt: u32, delay: Duration },
    /// The retry budget is exhausted; only an explicit reopen recovers.
    GaveUp,
}

impl ConnectionState {
    /// Whether the socket is established.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether the channel has permanently given up.
    pub fn gave_up(&self) -> bool {
        matches!(self, Self::GaveUp)
    }
}

/// Reconnection policy for the control channel. The stream channel never
/// auto-reconnects and does not consult this.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed before giving up permanently.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each consecutive failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry number `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        self.base_delay.saturating_mul(2u32.saturating_pow(exp))
    }

    /// Transition after an unexpected close or failed connect attempt.
    /// `failures` is the number of consecutive failures before this one.
    /// Returns `Retrying` while budget remains, `GaveUp` once the
    /// `max_attempts`th failure has been consumed.
    pub fn on_failure(&self, failures: u32) -> ConnectionState {
        let attempt = failures + 1;
        if attempt > self.max_attempts {
            ConnectionState::GaveUp
        } else {
            ConnectionState::Retrying {
                attempt,
                delay: self.delay_for(attempt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_from_base() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(4000));
    }

    #[test]
    fn nth_retry_waits_at_least_base_times_two_to_the_n_minus_one() {
        let policy = RetryPolicy::default();
        for n in 1..=5u32 {
            let expected = Duration::from_millis(1000 * 2u64.pow(n - 1));
            assert!(policy.delay_for(n) >= expected);
        }
    }

    #[test]
    fn gives_up_after_max_attempts_and_never_schedules_a_sixth() {
        let policy = RetryPolicy::default();
        let mut failures = 0u32;
        let mut scheduled = Vec::new();
        loop {
            match policy.on_failure(failures) {
                ConnectionState::Retrying { attempt, .. } => {
                    scheduled.push(attempt);
                    failures = attempt;
                }
                ConnectionState::GaveUp => break,
                other => panic!("unexpected state: {other:?}"),
            }
        }
        assert_eq!(scheduled, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn success_resets_the_schedule() {
        let policy = RetryPolicy::default();
        // Two failures, then a success (caller resets the counter to 0).
        assert!(matches!(
            policy.on_failure(2),
            ConnectionState::Retrying { attempt: 3, .. }
        ));
        match policy.on_failure(0) {
            ConnectionState::Retrying { attempt, delay } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, policy.base_delay);
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn open_and_retrying_are_distinct() {
        assert!(!ConnectionState::Retrying {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
        .is_open());
        assert!(ConnectionState::Open.is_open());
    }
}
