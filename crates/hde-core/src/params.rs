//! The process-wide parameter record and read-only level snapshot.
//!
//! Every field here clamps to its legal range on ingest (configuration
//! error policy: silently clamp, never reject). Ranges are documented as
//! constants in [`bounds`] so a setter and its doc comment can never drift
//! apart, mirroring the teacher's `ParamRange` denormalize/normalize
//! pattern but applied directly to physical units instead of a normalized
//! 0-1 plugin parameter.

use serde::{Deserialize, Serialize};

/// Legal ranges for every clamped parameter field.
pub mod bounds {
    pub const MIC_GAIN: (f64, f64) = (0.0, 240.0);
    pub const HPF_FREQ: (f64, f64) = (20.0, 2000.0);
    pub const LPF_FREQ: (f64, f64) = (500.0, 20_000.0);
    pub const EQ_GAIN_DB: (f64, f64) = (-12.0, 12.0);
    pub const EQ_FREQS: [f64; 3] = [250.0, 1000.0, 4000.0];
    pub const EQ_Q: f64 = 1.4;
    pub const AGC_COMPRESSION_DB: (f64, f64) = (0.0, 90.0);
    pub const AGC_TARGET_DBFS: (f64, f64) = (-31.0, 0.0);
    pub const VE_BLEND: (f64, f64) = (0.0, 1.0);
    pub const VE_STEP_SIZE: (f64, f64) = (0.01, 1.0);
    pub const VE_FILTER_LENGTH: (usize, usize) = (16, 512);
    pub const VE_MAX_ATTENUATION: (f64, f64) = (0.0, 1.0);
    pub const VE_REF_GAIN: (f64, f64) = (0.1, 5.0);
    pub const VE_REF_HPF: (f64, f64) = (20.0, 500.0);
    pub const VE_REF_LPF: (f64, f64) = (1000.0, 8000.0);
    pub const VE_AEC_FILTER_LEN: (u8, u8) = (1, 6);
    pub const VE_VAD_MODE: (u8, u8) = (0, 4);
    pub const VE_VAD_GATE_ATTEN: (f64, f64) = (0.0, 1.0);
    pub const OUTPUT_GAIN: (f64, f64) = (0.0, 6.0);
    pub const OUTPUT_VOLUME: (u8, u8) = (0, 100);
    pub const NOTCH_FREQ: (f64, f64) = (500.0, 12_000.0);
    pub const NOTCH_Q: (f64, f64) = (1.0, 16.0);
    pub const BINAURAL_BEAT: (f64, f64) = (1.0, 40.0);
    pub const NOTCH_COUNT: usize = 6;
    pub const AEC_FRAME_SAMPLES: usize = 512;
    pub const HELPER_FRAME_SAMPLES: usize = 160;
    pub const PROCESSING_SAMPLE_RATE: f64 = 16_000.0;
    pub const CODEC_SAMPLE_RATE: f64 = 48_000.0;
    pub const BLOCK_SIZE: usize = 480;
}

#[inline]
fn clamp(value: f64, range: (f64, f64)) -> f64 {
    value.clamp(range.0, range.1)
}

#[inline]
fn clamp_usize(value: usize, range: (usize, usize)) -> usize {
    value.clamp(range.0, range.1)
}

#[inline]
fn clamp_u8(value: u8, range: (u8, u8)) -> u8 {
    value.clamp(range.0, range.1)
}

/// Mic gain, in codec PGA units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputParams {
    pub mic_gain: f64,
}

impl Default for InputParams {
    fn default() -> Self {
        Self { mic_gain: 120.0 }
    }
}

impl InputParams {
    pub fn clamped(mut self) -> Self {
        self.mic_gain = clamp(self.mic_gain, bounds::MIC_GAIN);
        self
    }
}

/// A simple enable/frequency pair, used for the HPF and LPF stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterToggle {
    pub enabled: bool,
    pub frequency: f64,
}

/// Three fixed-frequency peaking EQ bands: 250 Hz, 1 kHz, 4 kHz, Q = 1.4.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqParams {
    pub gains_db: [f64; 3],
}

impl Default for EqParams {
    fn default() -> Self {
        Self { gains_db: [0.0; 3] }
    }
}

impl EqParams {
    pub fn clamped(mut self) -> Self {
        for g in &mut self.gains_db {
            *g = clamp(*g, bounds::EQ_GAIN_DB);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsParams {
    pub enabled: bool,
    pub mode: u8,
}

impl Default for NsParams {
    fn default() -> Self {
        Self { enabled: false, mode: 0 }
    }
}

impl NsParams {
    pub fn clamped(mut self) -> Self {
        self.mode = self.mode.min(2);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgcParams {
    pub enabled: bool,
    pub mode: u8,
    pub compression_gain_db: f64,
    pub limiter_enabled: bool,
    pub target_level_dbfs: f64,
}

impl Default for AgcParams {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: 0,
            compression_gain_db: 9.0,
            limiter_enabled: true,
            target_level_dbfs: -18.0,
        }
    }
}

impl AgcParams {
    pub fn clamped(mut self) -> Self {
        self.mode = self.mode.min(3);
        self.compression_gain_db = clamp(self.compression_gain_db, bounds::AGC_COMPRESSION_DB);
        self.target_level_dbfs = clamp(self.target_level_dbfs, bounds::AGC_TARGET_DBFS);
        self
    }
}

/// Which algorithm the voice-exclusion stage runs: the in-crate NLMS
/// adaptive filter, or the external AEC/VAD helper bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceExclusionMode {
    Nlms = 0,
    Aec = 1,
}

impl Default for VoiceExclusionMode {
    fn default() -> Self {
        Self::Nlms
    }
}

impl VoiceExclusionMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Aec,
            _ => Self::Nlms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceExclusionParams {
    pub enabled: bool,
    pub mode: VoiceExclusionMode,
    pub blend: f64,
    pub step_size: f64,
    pub filter_length: usize,
    pub max_attenuation: f64,
    pub ref_gain: f64,
    pub ref_hpf: f64,
    pub ref_lpf: f64,
    pub aec_mode: u8,
    pub aec_filter_len: u8,
    pub vad_enabled: bool,
    pub vad_mode: u8,
    pub vad_gate_enabled: bool,
    pub vad_gate_atten: f64,
}

impl Default for VoiceExclusionParams {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: VoiceExclusionMode::Nlms,
            blend: 1.0,
            step_size: 0.1,
            filter_length: 128,
            max_attenuation: 0.8,
            ref_gain: 1.0,
            ref_hpf: 100.0,
            ref_lpf: 4000.0,
            aec_mode: 0,
            aec_filter_len: 2,
            vad_enabled: false,
            vad_mode: 0,
            vad_gate_enabled: false,
            vad_gate_atten: 0.3,
        }
    }
}

impl VoiceExclusionParams {
    pub fn clamped(mut self) -> Self {
        self.mode = VoiceExclusionMode::from_u8(self.mode as u8);
        self.blend = clamp(self.blend, bounds::VE_BLEND);
        self.step_size = clamp(self.step_size, bounds::VE_STEP_SIZE);
        self.filter_length = clamp_usize(self.filter_length, bounds::VE_FILTER_LENGTH);
        self.max_attenuation = clamp(self.max_attenuation, bounds::VE_MAX_ATTENUATION);
        self.ref_gain = clamp(self.ref_gain, bounds::VE_REF_GAIN);
        self.ref_hpf = clamp(self.ref_hpf, bounds::VE_REF_HPF);
        self.ref_lpf = clamp(self.ref_lpf, bounds::VE_REF_LPF);
        self.aec_mode = self.aec_mode.min(3);
        self.aec_filter_len = clamp_u8(self.aec_filter_len, bounds::VE_AEC_FILTER_LEN);
        self.vad_mode = clamp_u8(self.vad_mode, bounds::VE_VAD_MODE);
        self.vad_gate_atten = clamp(self.vad_gate_atten, bounds::VE_VAD_GATE_ATTEN);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputParams {
    pub gain: f64,
    pub volume: u8,
    pub mute: bool,
    pub boost_enabled: bool,
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            volume: 70,
            // Safe default: output muted until a caller explicitly unmutes.
            mute: true,
            boost_enabled: false,
        }
    }
}

impl OutputParams {
    pub fn clamped(mut self) -> Self {
        self.gain = clamp(self.gain, bounds::OUTPUT_GAIN);
        self.volume = clamp_u8(self.volume, bounds::OUTPUT_VOLUME);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NotchParams {
    pub enabled: bool,
    pub frequency: f64,
    pub q: f64,
}

impl Default for NotchParams {
    fn default() -> Self {
        Self { enabled: false, frequency: 4000.0, q: 8.0 }
    }
}

impl NotchParams {
    pub fn clamped(mut self) -> Self {
        self.frequency = clamp(self.frequency, bounds::NOTCH_FREQ);
        self.q = clamp(self.q, bounds::NOTCH_Q);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskingNoiseType {
    Off,
    White,
    Pink,
    Brown,
}

impl Default for MaskingNoiseType {
    fn default() -> Self {
        Self::Off
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskingParams {
    pub noise_type: MaskingNoiseType,
    pub level: f64,
    pub low_cut: f64,
    pub high_cut: f64,
}

impl Default for MaskingParams {
    fn default() -> Self {
        Self {
            noise_type: MaskingNoiseType::Off,
            level: 0.1,
            low_cut: 200.0,
            high_cut: 8000.0,
        }
    }
}

impl MaskingParams {
    pub fn clamped(mut self) -> Self {
        self.level = self.level.clamp(0.0, 1.0);
        self.low_cut = clamp(self.low_cut, bounds::HPF_FREQ);
        self.high_cut = clamp(self.high_cut, bounds::LPF_FREQ);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneFinderParams {
    pub enabled: bool,
    pub freq: f64,
    pub level: f64,
}

impl Default for ToneFinderParams {
    fn default() -> Self {
        Self { enabled: false, freq: 8000.0, level: 0.1 }
    }
}

impl ToneFinderParams {
    pub fn clamped(mut self) -> Self {
        self.freq = clamp(self.freq, bounds::NOTCH_FREQ);
        self.level = self.level.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HfExtensionParams {
    pub enabled: bool,
    pub freq: f64,
    pub gain_db: f64,
}

impl Default for HfExtensionParams {
    fn default() -> Self {
        Self { enabled: false, freq: 8000.0, gain_db: 6.0 }
    }
}

impl HfExtensionParams {
    pub fn clamped(mut self) -> Self {
        self.freq = clamp(self.freq, bounds::LPF_FREQ);
        self.gain_db = clamp(self.gain_db, bounds::EQ_GAIN_DB);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinauralParams {
    pub enabled: bool,
    pub carrier: f64,
    pub beat: f64,
    pub level: f64,
}

impl Default for BinauralParams {
    fn default() -> Self {
        Self { enabled: false, carrier: 200.0, beat: 10.0, level: 0.1 }
    }
}

impl BinauralParams {
    pub fn clamped(mut self) -> Self {
        self.beat = clamp(self.beat, bounds::BINAURAL_BEAT);
        self.level = self.level.clamp(0.0, 1.0);
        self
    }
}

/// Where the tinnitus notch bank sits relative to the 3-band EQ.
///
/// Resolves an Open Question left by the original design: the notches
/// and the EQ can interact (a notch dug right where an EQ band boosts),
/// so the ordering is made explicit and configurable rather than left
/// to vary across builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TinnitusStage {
    PreEq,
    PostEq,
}

impl Default for TinnitusStage {
    fn default() -> Self {
        Self::PostEq
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TinnitusParams {
    pub notches: [NotchParams; bounds::NOTCH_COUNT],
    pub masking: MaskingParams,
    pub tone_finder: ToneFinderParams,
    pub hf_extension: HfExtensionParams,
    pub binaural: BinauralParams,
    pub stage: TinnitusStage,
}

impl Default for TinnitusParams {
    fn default() -> Self {
        Self {
            notches: [NotchParams::default(); bounds::NOTCH_COUNT],
            masking: MaskingParams::default(),
            tone_finder: ToneFinderParams::default(),
            hf_extension: HfExtensionParams::default(),
            binaural: BinauralParams::default(),
            stage: TinnitusStage::default(),
        }
    }
}

impl TinnitusParams {
    pub fn clamped(mut self) -> Self {
        for notch in &mut self.notches {
            *notch = notch.clamped();
        }
        self.masking = self.masking.clamped();
        self.tone_finder = self.tone_finder.clamped();
        self.hf_extension = self.hf_extension.clamped();
        self.binaural = self.binaural.clamped();
        self
    }
}

/// The full process-wide configuration record. Exists for the process's
/// lifetime; safe default is output muted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub input: InputParams,
    pub hpf: FilterToggle,
    pub lpf: FilterToggle,
    pub eq: EqParams,
    pub ns: NsParams,
    pub agc: AgcParams,
    pub voice_exclusion: VoiceExclusionParams,
    pub output: OutputParams,
    pub tinnitus: TinnitusParams,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            input: InputParams::default(),
            hpf: FilterToggle { enabled: true, frequency: 80.0 },
            lpf: FilterToggle { enabled: false, frequency: 8000.0 },
            eq: EqParams::default(),
            ns: NsParams::default(),
            agc: AgcParams::default(),
            voice_exclusion: VoiceExclusionParams::default(),
            output: OutputParams::default(),
            tinnitus: TinnitusParams::default(),
        }
    }
}

impl Params {
    /// Clamp every field to its legal range. Called on ingest by every
    /// setter and by `Engine::set_params`, never left to the caller.
    pub fn clamped(mut self) -> Self {
        self.input = self.input.clamped();
        self.hpf.frequency = clamp(self.hpf.frequency, bounds::HPF_FREQ);
        self.lpf.frequency = clamp(self.lpf.frequency, bounds::LPF_FREQ);
        self.eq = self.eq.clamped();
        self.ns = self.ns.clamped();
        self.agc = self.agc.clamped();
        self.voice_exclusion = self.voice_exclusion.clamped();
        self.output = self.output.clamped();
        self.tinnitus = self.tinnitus.clamped();
        self
    }
}

/// Read-only snapshot of the worker's current meter readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub rms_left: f64,
    pub rms_right: f64,
    pub peak_left: f64,
    pub peak_right: f64,
    pub rms_hp: f64,
    pub peak_hp: f64,
    pub vad_speech_detected: bool,
}
