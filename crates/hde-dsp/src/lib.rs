//! hde-dsp: DSP building blocks for the headset enhancement engine.
//!
//! ## Modules
//! - `biquad` - TDF-II biquad filters (lowpass, highpass, peaking, shelving, notch)
//! - `metering` - per-block RMS/peak metering with exponential peak-hold decay
//! - `resampler` - 21-tap windowed-sinc polyphase resampler (48 kHz <-> 16 kHz)
//! - `nlms` - normalized least-mean-squares adaptive filter for voice exclusion
//! - `ringbuf` - plain (non-atomic) circular buffer for worker-owned frame assembly
//! - `synth` - tinnitus masking noise, tone finder, and binaural-beat oscillators

#![allow(dead_code)]

pub mod biquad;
pub mod metering;
pub mod nlms;
pub mod resampler;
pub mod ringbuf;
pub mod synth;

use hde_core::Sample;

/// Trait for all DSP processors.
pub trait Processor: Send + Sync {
    /// Reset processor state.
    fn reset(&mut self);

    /// Get latency in samples.
    fn latency(&self) -> usize {
        0
    }
}

/// Mono processor trait.
pub trait MonoProcessor: Processor {
    /// Process a single sample.
    fn process_sample(&mut self, input: Sample) -> Sample;

    /// Process a block of samples.
    fn process_block(&mut self, buffer: &mut [Sample]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}

/// Processor configuration for sample rate changes.
pub trait ProcessorConfig {
    fn set_sample_rate(&mut self, sample_rate: f64);
}
