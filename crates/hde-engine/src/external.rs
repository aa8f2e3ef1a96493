//! Capability interfaces for the platform-supplied helpers the engine
//! drives but does not implement: the codec, headphone-presence sensing,
//! noise suppression, AGC, echo cancellation, and voice activity
//! detection. Each is a trait object so the engine can be built and
//! tested against fakes without a real codec or DSP library present.
//!
//! Lifecycle is RAII: a helper is opened by constructing its handle and
//! closed by dropping it, rather than through an explicit `destroy()`
//! call the caller could forget.

use hde_core::{EngineResult, Sample};

/// The audio codec: the only blocking I/O point in the worker loop.
pub trait CodecIo: Send {
    /// Block until one input block is available and deinterleave it into
    /// `left`, `right`, and `reference`, at
    /// [`hde_core::bounds::BLOCK_SIZE`] samples each. The codec's 4-channel
    /// frame carries two primary mics (`left`/`right`) and the headphone-
    /// boom/echo-reference mic (`reference`) as independent signals; the
    /// fourth channel is codec-internal and never surfaces here.
    fn read(
        &mut self,
        left: &mut [Sample],
        right: &mut [Sample],
        reference: &mut [Sample],
    ) -> EngineResult<()>;

    /// Block until `left`/`right` have been written out.
    fn write(&mut self, left: &[Sample], right: &[Sample]) -> EngineResult<()>;

    fn set_in_gain(&mut self, gain: f64);
    fn set_volume(&mut self, volume: u8);
    fn set_mute(&mut self, mute: bool);
    fn set_speaker_amp_enabled(&mut self, enabled: bool);
}

/// Headphone presence sensing, used to decide whether to route to the
/// speaker amp or to headphones.
pub trait HeadphoneDetect: Send {
    fn is_connected(&self) -> bool;
}

/// External noise-suppression helper.
pub trait NoiseSuppressor: Send {
    fn set_mode(&mut self, mode: u8);
    /// Process one 16 kHz block in place.
    fn process(&mut self, block: &mut [Sample]);
}

/// External automatic-gain-control helper.
pub trait AutomaticGainControl: Send {
    fn set_mode(&mut self, mode: u8);
    fn set_target_level_dbfs(&mut self, target: f64);
    fn set_compression_gain_db(&mut self, gain_db: f64);
    fn set_limiter_enabled(&mut self, enabled: bool);
    /// Process one 16 kHz block in place.
    fn process(&mut self, block: &mut [Sample]);
}

/// External acoustic-echo-cancellation helper, operating on fixed-size
/// frames rather than per-block.
pub trait EchoCanceller: Send {
    fn set_filter_length(&mut self, len: u8);
    /// Cancel echo from one frame of `primary` using `reference` as the
    /// far-end signal, in place.
    fn process_frame(&mut self, primary: &mut [Sample], reference: &[Sample]);
}

/// External voice-activity-detection helper.
pub trait VoiceActivityDetector: Send {
    fn set_mode(&mut self, mode: u8);
    /// Returns whether the given frame is judged to contain speech.
    fn process_frame(&mut self, frame: &[Sample]) -> bool;
}
