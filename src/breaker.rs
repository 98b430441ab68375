//! Per-capability circuit breaker: CLOSED/OPEN/HALF_OPEN with a
//! localized fallback utterance per service.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
    pub fallback_text: String,
}

impl BreakerConfig {
    pub fn asr(fallback_text: impl Into<String>) -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(20),
            half_open_max_calls: 3,
            fallback_text: fallback_text.into(),
        }
    }

    pub fn llm(fallback_text: impl Into<String>) -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            fallback_text: fallback_text.into(),
        }
    }

    pub fn tts(fallback_text: impl Into<String>) -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(20),
            half_open_max_calls: 3,
            fallback_text: fallback_text.into(),
        }
    }
}

struct Inner {
    state: BreakerState,
    opened_at: Option<Instant>,
    half_open_calls_in_flight: u32,
    half_open_successes: u32,
}

/// Guards one capability (ASR, LLM, or TTS). Holds its own counters;
/// the process keeps one instance per capability.
pub struct CircuitBreaker {
    service: &'static str,
    config: BreakerConfig,
    consecutive_failures: AtomicU32,
    inner: Mutex<Inner>,
    trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(service: &'static str, config: BreakerConfig) -> Self {
        Self {
            service,
            config,
            consecutive_failures: AtomicU32::new(0),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                opened_at: None,
                half_open_calls_in_flight: 0,
                half_open_successes: 0,
            }),
            trips: AtomicU64::new(0),
        }
    }

    pub fn fallback_text(&self) -> String {
        self.config.fallback_text.clone()
    }

    async fn current_state(&self) -> BreakerState {
        let mut inner = self.inner.lock().await;
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_calls_in_flight = 0;
                    inner.half_open_successes = 0;
                    info!(service = self.service, "breaker half-open after recovery timeout");
                }
            }
        }
        inner.state
    }

    /// Runs `f` through the breaker. Rejects immediately with
    /// `BreakerOpen` while OPEN; limits concurrent admission while
    /// HALF_OPEN to `half_open_max_calls`.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let state = self.current_state().await;

        if state == BreakerState::Open {
            return Err(CoreError::BreakerOpen {
                service: self.service,
                fallback_text: self.config.fallback_text.clone(),
            });
        }

        if state == BreakerState::HalfOpen {
            let mut inner = self.inner.lock().await;
            if inner.half_open_calls_in_flight >= self.config.half_open_max_calls {
                return Err(CoreError::BreakerOpen {
                    service: self.service,
                    fallback_text: self.config.fallback_text.clone(),
                });
            }
            inner.half_open_calls_in_flight += 1;
        }

        match f().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(CoreError::Capability {
                    service: self.service,
                    message: e.to_string(),
                })
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    inner.state = BreakerState::Closed;
                    inner.opened_at = None;
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    info!(service = self.service, "breaker closed after half-open successes");
                }
            }
            BreakerState::Closed => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            BreakerState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::HalfOpen => {
                // A failure during half-open immediately re-opens and
                // resets the half-open success count.
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_successes = 0;
                inner.half_open_calls_in_flight = 0;
                self.trips.fetch_add(1, Ordering::SeqCst);
                warn!(service = self.service, "breaker re-opened during half-open probe");
            }
            BreakerState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    self.trips.fetch_add(1, Ordering::SeqCst);
                    warn!(service = self.service, failures, "breaker opened");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub async fn is_available(&self) -> bool {
        self.current_state().await != BreakerState::Open
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
        inner.half_open_calls_in_flight = 0;
        inner.half_open_successes = 0;
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub fn trip_count(&self) -> u64 {
        self.trips.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as StdAtomicU32;
    use std::sync::Arc;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("asr", BreakerConfig::asr("fallback"));
        for _ in 0..3 {
            let res: Result<(), CoreError> = breaker.call(|| async { anyhow::bail!("boom") }).await;
            assert!(res.is_err());
        }
        assert!(!breaker.is_available().await);
        let res: Result<(), CoreError> = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(res, Err(CoreError::BreakerOpen { .. })));
    }

    #[tokio::test]
    async fn half_open_failure_reopens_and_resets_success_count() {
        let mut config = BreakerConfig::asr("fallback");
        config.recovery_timeout = Duration::from_millis(10);
        let breaker = CircuitBreaker::new("asr", config);

        for _ in 0..3 {
            let _: Result<(), CoreError> = breaker.call(|| async { anyhow::bail!("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // One success in half-open, then a failure: must re-open, not
        // carry over the partial success count.
        let _: Result<(), CoreError> = breaker.call(|| async { Ok::<(), anyhow::Error>(()) }).await;
        let _: Result<(), CoreError> = breaker.call(|| async { anyhow::bail!("boom again") }).await;

        assert!(!breaker.is_available().await);
    }

    #[tokio::test]
    async fn closes_after_half_open_max_calls_succeed() {
        let mut config = BreakerConfig::asr("fallback");
        config.recovery_timeout = Duration::from_millis(10);
        config.half_open_max_calls = 2;
        let breaker = CircuitBreaker::new("asr", config);

        for _ in 0..3 {
            let _: Result<(), CoreError> = breaker.call(|| async { anyhow::bail!("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        for _ in 0..2 {
            let res: Result<(), CoreError> = breaker.call(|| async { Ok(()) }).await;
            assert!(res.is_ok());
        }
        assert!(breaker.is_available().await);
    }

    #[tokio::test]
    async fn half_open_admits_at_most_configured_budget_concurrently() {
        let mut config = BreakerConfig::asr("fallback");
        config.recovery_timeout = Duration::from_millis(1);
        config.half_open_max_calls = 1;
        let breaker = Arc::new(CircuitBreaker::new("asr", config));

        for _ in 0..3 {
            let _: Result<(), CoreError> = breaker.call(|| async { anyhow::bail!("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;

        let gate = Arc::new(tokio::sync::Notify::new());
        let in_flight = Arc::new(StdAtomicU32::new(0));

        let b1 = breaker.clone();
        let g1 = gate.clone();
        let f1 = in_flight.clone();
        let h1 = tokio::spawn(async move {
            let _: Result<(), CoreError> = b1
                .call(|| async move {
                    f1.fetch_add(1, Ordering::SeqCst);
                    g1.notified().await;
                    Ok(())
                })
                .await;
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        let res: Result<(), CoreError> = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(res, Err(CoreError::BreakerOpen { .. })));

        gate.notify_one();
        h1.await.unwrap();
    }
}
