//! Retry and circuit breaking around any [`SqlExecutor`].
//!
//! Every attempt goes through the breaker. Transient failures are recorded
//! and retried with backoff; permanent failures count as a healthy response
//! from the database and are returned immediately. While the breaker is open
//! the wrapped executor is not called at all. Connection failures that
//! outlast the retries surface as service-unavailable.

use super::engine::{ExecutionContext, SqlExecutor};
use super::error_classifier::{is_transient, is_unreachable};
use super::result::QueryResult;
use crate::error::{BiError, Result};
use crate::resilience::{retry_with_backoff, CircuitBreaker, CircuitSnapshot, RetryPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub struct ResilientExecutor {
    inner: Arc<dyn SqlExecutor>,
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl ResilientExecutor {
    pub fn new(inner: Arc<dyn SqlExecutor>, policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            inner,
            policy,
            breaker,
        }
    }

    pub fn circuit(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    async fn attempt(&self, sql: &str, ctx: &ExecutionContext, attempt: usize) -> Result<QueryResult> {
        let permit = self.breaker.try_acquire()?;
        match self.inner.execute(sql, ctx).await {
            Ok(result) => {
                permit.success();
                Ok(result)
            }
            Err(e) if is_transient(&e) => {
                permit.failure();
                warn!(attempt = attempt + 1, error = %e, "Transient execution failure");
                Err(e)
            }
            Err(e) => {
                permit.success();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl SqlExecutor for ResilientExecutor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn execute(&self, sql: &str, ctx: &ExecutionContext) -> Result<QueryResult> {
        retry_with_backoff(&self.policy, |attempt| self.attempt(sql, ctx, attempt), is_transient)
            .await
            .map_err(|e| {
                if is_unreachable(&e) {
                    BiError::ServiceUnavailable(format!("database unreachable: {e}"))
                } else {
                    e
                }
            })
    }

    async fn health_check(&self) -> Result<()> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FlakyExecutor {
        calls: AtomicUsize,
        fail_first: usize,
        permanent: bool,
    }

    struct HangingExecutor;

    #[async_trait]
    impl SqlExecutor for HangingExecutor {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn execute(&self, _sql: &str, _ctx: &ExecutionContext) -> Result<QueryResult> {
            std::future::pending::<Result<QueryResult>>().await
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    struct RefusingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SqlExecutor for RefusingExecutor {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn execute(&self, _sql: &str, _ctx: &ExecutionContext) -> Result<QueryResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BiError::TransientDatabase("Connection: connection refused".into()))
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl SqlExecutor for FlakyExecutor {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _sql: &str, _ctx: &ExecutionContext) -> Result<QueryResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                if self.permanent {
                    Err(BiError::Database("syntax error at or near \"FORM\"".into()))
                } else {
                    Err(BiError::TransientDatabase("deadlock detected".into()))
                }
            } else {
                Ok(QueryResult::new(vec!["n".into()], vec![vec![1.into()]], "flaky"))
            }
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn flaky(fail_first: usize, permanent: bool) -> Arc<FlakyExecutor> {
        Arc::new(FlakyExecutor {
            calls: AtomicUsize::new(0),
            fail_first,
            permanent,
        })
    }

    fn breaker(minimum_throughput: usize) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "db",
            CircuitBreakerConfig {
                failure_rate_threshold: 0.5,
                minimum_throughput,
                sampling_window: Duration::from_secs(60),
                break_duration: Duration::from_secs(30),
            },
        ))
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("u1", 100, Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let inner = flaky(2, false);
        let exec = ResilientExecutor::new(inner.clone(), RetryPolicy::default(), breaker(10));
        let result = exec.execute("SELECT 1", &ctx()).await.unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let inner = flaky(5, true);
        let exec = ResilientExecutor::new(inner.clone(), RetryPolicy::default(), breaker(10));
        assert!(matches!(
            exec.execute("SELECT 1", &ctx()).await,
            Err(BiError::Database(_))
        ));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(exec.circuit().state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_short_circuits_without_calling() {
        let inner = flaky(usize::MAX, false);
        let exec = ResilientExecutor::new(inner.clone(), RetryPolicy::no_retries(), breaker(3));

        for _ in 0..3 {
            assert!(matches!(
                exec.execute("SELECT 1", &ctx()).await,
                Err(BiError::TransientDatabase(_))
            ));
        }
        assert_eq!(exec.circuit().state, CircuitState::Open);

        let err = exec.execute("SELECT 1", &ctx()).await.unwrap_err();
        assert!(matches!(err, BiError::ServiceUnavailable(_)));
        assert_eq!(err.kind().status_code(), 503);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_once_circuit_opens() {
        let inner = flaky(usize::MAX, false);
        let exec = ResilientExecutor::new(inner.clone(), RetryPolicy::default(), breaker(2));
        let err = exec.execute("SELECT 1", &ctx()).await.unwrap_err();
        assert!(matches!(err, BiError::ServiceUnavailable(_)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_trial_does_not_wedge_circuit() {
        let cb = breaker(1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(31)).await;

        let exec = ResilientExecutor::new(Arc::new(HangingExecutor), RetryPolicy::no_retries(), cb.clone());
        let outcome = tokio::time::timeout(Duration::from_secs(1), exec.execute("SELECT 1", &ctx())).await;
        assert!(outcome.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_database_is_service_unavailable() {
        let inner = Arc::new(RefusingExecutor {
            calls: AtomicUsize::new(0),
        });
        let exec = ResilientExecutor::new(inner.clone(), RetryPolicy::default(), breaker(100));
        let err = exec.execute("SELECT 1", &ctx()).await.unwrap_err();
        assert!(matches!(err, BiError::ServiceUnavailable(_)));
        assert_eq!(err.kind().status_code(), 503);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_deadlock_retries_stay_execution_failures() {
        let inner = flaky(usize::MAX, false);
        let exec = ResilientExecutor::new(inner, RetryPolicy::default(), breaker(100));
        let err = exec.execute("SELECT 1", &ctx()).await.unwrap_err();
        assert!(matches!(err, BiError::TransientDatabase(_)));
        assert_eq!(err.kind().status_code(), 500);
    }
}
