//! Error taxonomy for the headset DSP engine.
//!
//! Only conditions a caller must react to get a variant here. Everything
//! recoverable locally inside the DSP worker loop (a transient short read,
//! an NLMS divergence reset, a NaN substitution) is handled as plain
//! control flow with a log line, never propagated as an `Err`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The codec handle could not be acquired at worker entry. Fatal for
    /// this session: the caller should treat the engine as stopped.
    #[error("codec unavailable at worker startup")]
    CodecUnavailable,

    /// An external helper (NS/AGC/AEC/VAD) failed to open. The engine
    /// keeps running with that feature disabled.
    #[error("failed to open {feature} helper: {reason}")]
    HelperUnavailable { feature: &'static str, reason: String },

    /// `start()` called while the worker is already running.
    #[error("engine is already running")]
    AlreadyRunning,
}

pub type EngineResult<T> = Result<T, EngineError>;
