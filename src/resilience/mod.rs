pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitSnapshot, CircuitState};
pub use retry::{retry_with_backoff, RetryPolicy};
