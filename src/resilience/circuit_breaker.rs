//! Failure-rate circuit breaker.
//!
//! Closed: calls pass and outcomes are sampled over a sliding window. Once the
//! window holds at least `minimum_throughput` calls and the failure rate
//! reaches the threshold, the breaker opens. Open: calls are rejected until
//! `break_duration` elapses. Half-open: a single trial request is let through; its
//! outcome closes or re-opens the breaker. A trial whose permit is dropped
//! without an outcome (cancelled request) re-opens the breaker.

use crate::config::ResilienceConfig;
use crate::error::{BiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_rate_threshold: f64,
    pub minimum_throughput: usize,
    pub sampling_window: Duration,
    pub break_duration: Duration,
}

impl From<&ResilienceConfig> for CircuitBreakerConfig {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            failure_rate_threshold: config.failure_rate_threshold,
            minimum_throughput: config.minimum_throughput.max(1),
            sampling_window: Duration::from_secs(config.sampling_window_secs),
            break_duration: Duration::from_secs(config.break_duration_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub samples: usize,
    pub failure_rate: f64,
    pub rejected: u64,
}

struct Inner {
    state: CircuitState,
    /// (time, succeeded)
    samples: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    rejected: u64,
}

/// Admission to the protected dependency, returned by
/// [`CircuitBreaker::try_acquire`]. Report the outcome with
/// [`success`](Self::success) or [`failure`](Self::failure).
#[must_use = "dropping an unfinished trial permit re-opens the circuit"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    finished: bool,
}

impl CircuitPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.finished = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.finished = true;
        self.breaker.record_failure();
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.finished {
            self.breaker.abandon_trial();
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                samples: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
                rejected: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask permission to call the protected dependency.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.break_duration {
                    info!(circuit = %self.name, "Circuit half-open, admitting a trial request");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(self.permit(true))
                } else {
                    inner.rejected += 1;
                    let remaining = self.config.break_duration.saturating_sub(elapsed);
                    Err(BiError::ServiceUnavailable(format!(
                        "circuit '{}' is open, retry in {}s",
                        self.name,
                        remaining.as_secs().max(1)
                    )))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejected += 1;
                    Err(BiError::ServiceUnavailable(format!(
                        "circuit '{}' is half-open with a trial request in flight",
                        self.name
                    )))
                } else {
                    inner.trial_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    fn permit(&self, trial: bool) -> CircuitPermit<'_> {
        CircuitPermit {
            breaker: self,
            trial,
            finished: false,
        }
    }

    fn abandon_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            warn!(circuit = %self.name, "Trial request abandoned, circuit re-opened");
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trial_in_flight = false;
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                info!(circuit = %self.name, "Circuit closed after successful trial request");
                inner.state = CircuitState::Closed;
                inner.samples.clear();
                inner.opened_at = None;
                inner.trial_in_flight = false;
            }
            _ => {
                let now = Instant::now();
                inner.samples.push_back((now, true));
                self.prune(&mut inner, now);
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::HalfOpen => {
                warn!(circuit = %self.name, "Trial request failed, circuit re-opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
            }
            CircuitState::Open => {}
            CircuitState::Closed => {
                inner.samples.push_back((now, false));
                self.prune(&mut inner, now);
                let (total, rate) = Self::failure_rate(&inner);
                if total >= self.config.minimum_throughput
                    && rate >= self.config.failure_rate_threshold
                {
                    warn!(
                        circuit = %self.name,
                        failure_rate = rate,
                        samples = total,
                        "Circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    inner.samples.clear();
                }
            }
        }
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        while let Some((at, _)) = inner.samples.front() {
            if now.duration_since(*at) > self.config.sampling_window {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_rate(inner: &Inner) -> (usize, f64) {
        let total = inner.samples.len();
        if total == 0 {
            return (0, 0.0);
        }
        let failures = inner.samples.iter().filter(|(_, ok)| !ok).count();
        (total, failures as f64 / total as f64)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        let (samples, failure_rate) = Self::failure_rate(&inner);
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            samples,
            failure_rate,
            rejected: inner.rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_rate_threshold: 0.5,
                minimum_throughput: 4,
                sampling_window: Duration::from_secs(60),
                break_duration: Duration::from_secs(30),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_on_failure_rate() {
        let cb = breaker();
        cb.record_success();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.try_acquire(), Err(BiError::ServiceUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_needs_minimum_throughput() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_closes_on_success() {
        let cb = breaker();
        for _ in 0..4 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Only one trial request at a time.
        assert!(cb.try_acquire().is_err());

        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.try_acquire().unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let cb = breaker();
        for _ in 0..4 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());
        assert_eq!(cb.snapshot().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_reopens_and_allows_another() {
        let cb = breaker();
        for _ in 0..4 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(31)).await;
        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_closed_permit_records_nothing() {
        let cb = breaker();
        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().samples, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_samples_leave_the_window() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().samples, 1);
    }
}
