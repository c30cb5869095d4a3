use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker - one per proxy backend
// ============================================================================
//
// Closed:   requests pass; consecutive transport failures are counted
// Open:     the backend is skipped until the cool-down has elapsed
// HalfOpen: trial requests pass; enough successes close the circuit again,
//           a single failure reopens it
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long an open circuit rejects requests
    pub cool_down: Duration,
    /// Successes needed in half-open to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    backend: Arc<str>,
    state: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
}

struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    CircuitOpen,
    OperationFailed(E),
}

impl CircuitBreaker {
    pub fn new(backend: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            backend: backend.into(),
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            })),
            config,
        }
    }

    /// Whether a request may be sent now. An open circuit whose cool-down
    /// has elapsed moves to half-open here.
    pub async fn allows_request(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = state
                    .opened_at
                    .map_or(true, |opened| opened.elapsed() >= self.config.cool_down);
                if cooled {
                    tracing::info!(backend = %self.backend, "circuit half-open, probing backend");
                    state.state = CircuitState::HalfOpen;
                    state.successes = 0;
                }
                cooled
            }
        }
    }

    /// Run `operation` if the circuit allows it and record its outcome.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        if !self.allows_request().await {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match operation.await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;
        match state.state {
            CircuitState::HalfOpen => {
                state.successes += 1;
                if state.successes >= self.config.success_threshold {
                    tracing::info!(
                        backend = %self.backend,
                        successes = state.successes,
                        "circuit closed"
                    );
                    state.state = CircuitState::Closed;
                    state.failures = 0;
                    state.successes = 0;
                    state.opened_at = None;
                }
            }
            CircuitState::Closed => state.failures = 0,
            // A request admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.failures += 1;

        match state.state {
            CircuitState::Closed if state.failures >= self.config.failure_threshold => {
                tracing::warn!(
                    backend = %self.backend,
                    failures = state.failures,
                    cool_down = ?self.config.cool_down,
                    "circuit opened"
                );
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                tracing::warn!(backend = %self.backend, "probe failed, circuit reopened");
                state.state = CircuitState::Open;
                state.successes = 0;
                state.opened_at = Some(Instant::now());
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, cool_down: Duration, success_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "http://10.0.0.1:8080",
            CircuitBreakerConfig {
                failure_threshold,
                cool_down,
                success_threshold,
            },
        )
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(30), 2);

        for _ in 0..3 {
            let result = cb.call(async { Err::<(), _>("connection refused") }).await;
            assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));
        }

        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allows_request().await);
        let result = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(2, Duration::from_secs(30), 1);

        let _ = cb.call(async { Err::<(), _>("timeout") }).await;
        let _ = cb.call(async { Ok::<_, &str>(()) }).await;
        let _ = cb.call(async { Err::<(), _>("timeout") }).await;

        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_closes_after_cool_down_and_successes() {
        let cb = breaker(1, Duration::from_millis(50), 2);
        let _ = cb.call(async { Err::<(), _>("connection refused") }).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(cb.call(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        assert!(cb.call(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(50), 2);
        let _ = cb.call(async { Err::<(), _>("connection refused") }).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let _ = cb.call(async { Err::<(), _>("connection refused") }).await;

        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allows_request().await);
    }
}
