//! Connection lifecycle
//!
//! ```text
//!  Disconnected ──start──▶ Scanning ──device found──▶ Connecting
//!        ▲                    ▲                           │ subscribed
//!        │ stop (any)         │ retry elapsed             ▼
//!        │                  Error ◀──transport failure── Subscribed
//!        │                    ▲                           │ first report
//!        │                    └────transport failure──── Streaming
//! ```
//!
//! Every change goes through [`ConnectionStateMachine::apply`]. Changes into
//! `Error` or `Disconnected` carry `release_keys`, which the caller must honor
//! before tearing down the BLE session.
//!
//! A scan that finds nothing also lands in `Error` but does not count
//! against the retry budget.

use crate::domain::models::ConnectionState;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTrigger {
    Start,
    DeviceFound,
    Subscribed,
    ReportDecoded,
    /// Scan window closed without a match. Retried without spending budget.
    ScanTimeout,
    TransportFailure,
    RetryElapsed,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub release_keys: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot apply {trigger:?} while {state}")]
pub struct InvalidTransition {
    pub state: ConnectionState,
    pub trigger: ConnectionTrigger,
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures tolerated before `Error` becomes terminal
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(8000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    failures: u32,
    policy: RetryPolicy,
}

impl ConnectionStateMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            failures: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures since the last successful stream
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// `Error` with the retry budget spent. Only a new start leaves it.
    pub fn is_fatal(&self) -> bool {
        self.state == ConnectionState::Error && self.failures > self.policy.max_attempts
    }

    /// Is the machine waiting for a start request
    pub fn is_idle(&self) -> bool {
        self.state == ConnectionState::Disconnected || self.is_fatal()
    }

    /// Backoff before the next retry, while a retry is still allowed
    pub fn next_retry_delay(&self) -> Option<Duration> {
        if self.state == ConnectionState::Error && !self.is_fatal() {
            Some(self.policy.delay_for(self.failures))
        } else {
            None
        }
    }

    pub fn apply(&mut self, trigger: ConnectionTrigger) -> Result<StateChange, InvalidTransition> {
        use ConnectionState::*;
        use ConnectionTrigger as T;

        let from = self.state;
        let to = match (from, trigger) {
            (Disconnected | Error, T::Start) => {
                self.failures = 0;
                Scanning
            }
            (Scanning, T::DeviceFound) => Connecting,
            (Connecting, T::Subscribed) => Subscribed,
            (Subscribed, T::ReportDecoded) => {
                self.failures = 0;
                Streaming
            }
            (Scanning, T::ScanTimeout) => Error,
            (Scanning | Connecting | Subscribed | Streaming, T::TransportFailure) => {
                self.failures += 1;
                Error
            }
            (Error, T::RetryElapsed) if !self.is_fatal() => Scanning,
            (_, T::Stop) => Disconnected,
            (state, trigger) => return Err(InvalidTransition { state, trigger }),
        };

        self.state = to;
        Ok(StateChange {
            from,
            to,
            release_keys: matches!(to, Error | Disconnected),
        })
    }
}
