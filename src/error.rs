//! Error taxonomy for the voice pipeline.
//!
//! Per-frame errors are logged and swallowed by the caller; per-turn
//! errors surface as a localized fallback utterance; per-session errors
//! end the call. See `CoreError` variant docs for which bucket each
//! belongs to.

use thiserror::Error;

/// Top-level error type shared across the pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    /// WebSocket framing or decode failure. Recovered per-frame; repeated
    /// failures close the session.
    #[error("transport error: {0}")]
    Transport(String),

    /// Codec/resample failure on a single audio chunk. The chunk is
    /// dropped; the stream continues.
    #[error("codec error: {0}")]
    Codec(String),

    /// A capability's breaker is open. Carries the localized fallback
    /// text the caller should play instead of invoking the capability.
    #[error("{service} is unavailable: {fallback_text}")]
    BreakerOpen {
        service: &'static str,
        fallback_text: String,
    },

    /// A capability call itself failed (provider 4xx/5xx, timeout). The
    /// breaker records this as a failure before the caller maps it to a
    /// `BreakerOpen` fallback for the current turn.
    #[error("{service} call failed: {message}")]
    Capability {
        service: &'static str,
        message: String,
    },

    /// Missing or invalid configuration at startup (e.g. no API key for
    /// a capability). The capability is marked unavailable; the process
    /// keeps running in degraded mode.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Orchestrator invariant violated — e.g. a media frame referencing
    /// an unknown call-control-id. The session is torn down.
    #[error("session error: {0}")]
    Session(String),
}

impl CoreError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    pub fn capability(service: &'static str, msg: impl Into<String>) -> Self {
        Self::Capability {
            service,
            message: msg.into(),
        }
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
