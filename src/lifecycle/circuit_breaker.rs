//! Closed / open / half-open guard around repeated initialization attempts.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::SystemError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error)]
pub enum BreakerError {
    #[error(transparent)]
    Rejected(#[from] SystemError),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An open breaker whose reset timeout has elapsed reports
    /// `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        {
            let mut inner = self.inner.lock();
            self.refresh(&mut inner);
            if inner.state == CircuitState::Open {
                return Err(SystemError::CircuitOpen(self.name.clone()).into());
            }
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e.into())
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            log::info!("Circuit breaker for {} closed", self.name);
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;

        let trip = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.config.failure_threshold;
        if trip && inner.state != CircuitState::Open {
            log::warn!(
                "Circuit breaker for {} opened after {} failure(s)",
                self.name,
                inner.consecutive_failures
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|at| at.elapsed() >= self.config.reset_timeout)
            .unwrap_or(true);
        if elapsed {
            log::debug!("Circuit breaker for {} half-open", self.name);
            inner.state = CircuitState::HalfOpen;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::time::Duration;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "db",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_secs(10),
            },
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError> {
        b.call(|| async { Err::<(), _>(anyhow!("nope")) }).await
    }

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let b = breaker(2);
        assert!(matches!(fail(&b).await, Err(BreakerError::Failed(_))));
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(matches!(fail(&b).await, Err(BreakerError::Failed(_))));
        assert_eq!(b.state(), CircuitState::Open);

        let rejected = b.call(|| async { Ok(()) }).await;
        assert!(matches!(
            rejected,
            Err(BreakerError::Rejected(SystemError::CircuitOpen(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_reset_timeout() {
        let b = breaker(1);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let b = breaker(3);
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset_closes() {
        let b = breaker(1);
        b.record_failure();
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
    }
}
