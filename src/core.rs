//! Process-wide shared state: capability clients (behind breakers), the
//! filler cache, the event bus, and admission control. Constructed once
//! and cloned as `Arc<Core>` into every per-call task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::capability::{AsrClient, LlmClient, MockAsr, MockLlm, MockTts, TtsClient};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::events::{EventBus, EventType};
use crate::filler::FillerCache;
use crate::repository::{InMemoryRepository, Repository};

/// Capability clients plus their guarding breaker, bundled so callers
/// never invoke a client without going through its breaker.
pub struct Capability<C: ?Sized> {
    pub client: Arc<C>,
    pub breaker: CircuitBreaker,
}

pub struct Core {
    pub asr: Capability<dyn AsrClient>,
    pub llm: Capability<dyn LlmClient>,
    pub tts: Capability<dyn TtsClient>,
    pub fillers: FillerCache,
    pub events: EventBus,
    pub repository: Arc<dyn Repository>,
    pub config: Config,
    active_calls: AtomicUsize,
}

impl Core {
    /// Build a `Core` wired to concrete capability clients. Providers are
    /// out of scope here; callers pass in whatever `AsrClient`/etc. they
    /// have (a concrete SDK wrapper, or `Mock*` for a capability-less run).
    pub fn new(
        config: Config,
        asr: Arc<dyn AsrClient>,
        llm: Arc<dyn LlmClient>,
        tts: Arc<dyn TtsClient>,
        repository: Arc<dyn Repository>,
    ) -> Self {
        let asr_fallback = "عذراً، ما سمعتك زين. ممكن تعيد؟";
        let llm_fallback = "النظام مشغول، لحظة وأرجع لك";
        let tts_fallback = "عذراً، في مشكلة تقنية. حاول مرة ثانية";

        let breaker_overrides = config.breakers.clone();

        Self {
            asr: Capability {
                client: asr,
                breaker: CircuitBreaker::new("asr", apply_override(BreakerConfig::asr(asr_fallback), breaker_overrides.asr)),
            },
            llm: Capability {
                client: llm,
                breaker: CircuitBreaker::new("llm", apply_override(BreakerConfig::llm(llm_fallback), breaker_overrides.llm)),
            },
            tts: Capability {
                client: tts,
                breaker: CircuitBreaker::new("tts", apply_override(BreakerConfig::tts(tts_fallback), breaker_overrides.tts)),
            },
            fillers: FillerCache::load(None),
            events: EventBus::new(),
            repository,
            config,
            active_calls: AtomicUsize::new(0),
        }
    }

    /// Builds a `Core` wired entirely to deterministic mocks and an
    /// empty in-memory repository, for a capability-less local run or
    /// test harness.
    pub fn mock(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(MockAsr::new("")),
            Arc::new(MockLlm::new("")),
            Arc::new(MockTts),
            Arc::new(InMemoryRepository::default()),
        )
    }

    /// Reserves one admission slot, rejecting the call if the process is
    /// already at `max_concurrent_calls`. Returns a guard that releases
    /// the slot when dropped.
    pub fn try_admit(self: &Arc<Self>) -> CoreResult<CallAdmission> {
        let limit = self.config.pipeline.max_concurrent_calls;
        let current = self.active_calls.fetch_add(1, Ordering::SeqCst);
        if current >= limit {
            self.active_calls.fetch_sub(1, Ordering::SeqCst);
            return Err(CoreError::session(format!(
                "max_concurrent_calls ({limit}) reached"
            )));
        }
        Ok(CallAdmission { core: self.clone() })
    }

    pub fn active_call_count(&self) -> usize {
        self.active_calls.load(Ordering::SeqCst)
    }

    pub async fn publish(&self, event_type: EventType, data: serde_json::Value, source: impl Into<String>) {
        self.events.publish(event_type, data, source).await;
    }
}

fn apply_override(mut base: BreakerConfig, over: Option<crate::config::BreakerOverride>) -> BreakerConfig {
    if let Some(over) = over {
        if let Some(t) = over.failure_threshold {
            base.failure_threshold = t;
        }
        if let Some(secs) = over.recovery_timeout_secs {
            base.recovery_timeout = std::time::Duration::from_secs(secs);
        }
        if let Some(c) = over.half_open_max_calls {
            base.half_open_max_calls = c;
        }
    }
    base
}

/// RAII admission slot; releases on drop regardless of how the call ends.
pub struct CallAdmission {
    core: Arc<Core>,
}

impl Drop for CallAdmission {
    fn drop(&mut self) {
        self.core.active_calls.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> Arc<Core> {
        let mut config = Config::default();
        config.pipeline.max_concurrent_calls = 1;
        Arc::new(Core::mock(config))
    }

    #[test]
    fn admission_rejects_past_the_limit() {
        let core = core();
        let first = core.try_admit();
        assert!(first.is_ok());
        let second = core.try_admit();
        assert!(second.is_err());
    }

    #[test]
    fn dropping_an_admission_frees_the_slot() {
        let core = core();
        {
            let _first = core.try_admit().unwrap();
            assert_eq!(core.active_call_count(), 1);
        }
        assert_eq!(core.active_call_count(), 0);
        assert!(core.try_admit().is_ok());
    }
}
