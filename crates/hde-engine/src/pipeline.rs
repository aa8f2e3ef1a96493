//! The per-block DSP pipeline: worker-owned filter/resampler/NLMS state
//! plus the `process_block` driver that walks the chain in order.

use hde_core::{bounds, Levels, Params, Sample, TinnitusStage};
use hde_dsp::biquad::Biquad;
use hde_dsp::Processor;
use hde_dsp::metering::BlockMeter;
use hde_dsp::nlms::NlmsFilter;
use hde_dsp::resampler::{Downsampler3, Upsampler3};
use hde_dsp::synth::{BinauralBeat, BrownNoise, PinkNoise, SineOscillator, WhiteNoise};

use crate::bridge::AecFrameBridge;
use crate::external::{
    AutomaticGainControl, CodecIo, EchoCanceller, HeadphoneDetect, NoiseSuppressor,
    VoiceActivityDetector,
};

/// Poll the headphone-presence probe at most this often.
const HEADPHONE_PROBE_INTERVAL_BLOCKS: u64 = 48;

struct ChannelFilters {
    hpf: Biquad,
    lpf: Biquad,
    eq: [Biquad; 3],
}

impl ChannelFilters {
    fn new(sample_rate: f64) -> Self {
        Self {
            hpf: Biquad::new(sample_rate),
            lpf: Biquad::new(sample_rate),
            eq: [
                Biquad::new(sample_rate),
                Biquad::new(sample_rate),
                Biquad::new(sample_rate),
            ],
        }
    }

    fn reset(&mut self) {
        self.hpf.reset();
        self.lpf.reset();
        for eq in &mut self.eq {
            eq.reset();
        }
    }
}

struct ReferenceFilters {
    hpf: Biquad,
    lpf: Biquad,
}

impl ReferenceFilters {
    fn new(sample_rate: f64) -> Self {
        Self {
            hpf: Biquad::new(sample_rate),
            lpf: Biquad::new(sample_rate),
        }
    }

    fn reset(&mut self) {
        self.hpf.reset();
        self.lpf.reset();
    }
}

/// A down/up-sample pair per stereo channel, shared by the NS and AGC
/// bridges to the 16 kHz helper frame size.
struct StereoHelperBridge {
    down_l: Downsampler3,
    down_r: Downsampler3,
    up_l: Upsampler3,
    up_r: Upsampler3,
}

impl StereoHelperBridge {
    fn new() -> Self {
        Self {
            down_l: Downsampler3::new(),
            down_r: Downsampler3::new(),
            up_l: Upsampler3::new(),
            up_r: Upsampler3::new(),
        }
    }

    fn reset(&mut self) {
        self.down_l.reset();
        self.down_r.reset();
        self.up_l.reset();
        self.up_r.reset();
    }
}

struct VoiceExclusionState {
    nlms_l: NlmsFilter,
    nlms_r: NlmsFilter,
    ds_l: Downsampler3,
    ds_r: Downsampler3,
    ds_ref: Downsampler3,
    us_l: Upsampler3,
    us_r: Upsampler3,

    aec_ds_l: Downsampler3,
    aec_ds_r: Downsampler3,
    aec_ds_ref: Downsampler3,
    aec_us_l: Upsampler3,
    aec_us_r: Upsampler3,
    aec_bridge_l: AecFrameBridge,
    aec_bridge_r: AecFrameBridge,
    aec_bridge_ref: AecFrameBridge,
}

impl VoiceExclusionState {
    fn new(filter_length: usize, step_size: f64) -> Self {
        Self {
            nlms_l: NlmsFilter::new(filter_length, step_size),
            nlms_r: NlmsFilter::new(filter_length, step_size),
            ds_l: Downsampler3::new(),
            ds_r: Downsampler3::new(),
            ds_ref: Downsampler3::new(),
            us_l: Upsampler3::new(),
            us_r: Upsampler3::new(),
            aec_ds_l: Downsampler3::new(),
            aec_ds_r: Downsampler3::new(),
            aec_ds_ref: Downsampler3::new(),
            aec_us_l: Upsampler3::new(),
            aec_us_r: Upsampler3::new(),
            aec_bridge_l: AecFrameBridge::new(),
            aec_bridge_r: AecFrameBridge::new(),
            aec_bridge_ref: AecFrameBridge::new(),
        }
    }

    fn reset(&mut self) {
        self.nlms_l.reset();
        self.nlms_r.reset();
        self.ds_l.reset();
        self.ds_r.reset();
        self.ds_ref.reset();
        self.us_l.reset();
        self.us_r.reset();
        self.aec_ds_l.reset();
        self.aec_ds_r.reset();
        self.aec_ds_ref.reset();
        self.aec_us_l.reset();
        self.aec_us_r.reset();
        self.aec_bridge_l.reset();
        self.aec_bridge_r.reset();
        self.aec_bridge_ref.reset();
    }
}

struct NotchBank {
    notches: [Biquad; bounds::NOTCH_COUNT],
}

impl NotchBank {
    fn new(sample_rate: f64) -> Self {
        Self {
            notches: std::array::from_fn(|_| Biquad::new(sample_rate)),
        }
    }

    fn reset(&mut self) {
        for n in &mut self.notches {
            n.reset();
        }
    }

    fn process(&mut self, sample: Sample) -> Sample {
        let mut out = sample;
        for n in &mut self.notches {
            out = hde_dsp::MonoProcessor::process_sample(n, out);
        }
        out
    }
}

struct TinnitusState {
    notches_l: NotchBank,
    notches_r: NotchBank,
    hf_shelf_l: Biquad,
    hf_shelf_r: Biquad,
    masking_bp_l: (Biquad, Biquad),
    masking_bp_r: (Biquad, Biquad),
    white: WhiteNoise,
    pink: PinkNoise,
    brown: BrownNoise,
    tone_finder: SineOscillator,
    binaural: BinauralBeat,
}

impl TinnitusState {
    fn new(sample_rate: f64) -> Self {
        Self {
            notches_l: NotchBank::new(sample_rate),
            notches_r: NotchBank::new(sample_rate),
            hf_shelf_l: Biquad::new(sample_rate),
            hf_shelf_r: Biquad::new(sample_rate),
            masking_bp_l: (Biquad::new(sample_rate), Biquad::new(sample_rate)),
            masking_bp_r: (Biquad::new(sample_rate), Biquad::new(sample_rate)),
            white: WhiteNoise::new(0x9E3779B97F4A7C15),
            pink: PinkNoise::new(0xD1B54A32D192ED03),
            brown: BrownNoise::new(0xBF58476D1CE4E5B9),
            tone_finder: SineOscillator::new(sample_rate),
            binaural: BinauralBeat::new(sample_rate),
        }
    }

    fn reset(&mut self) {
        self.notches_l.reset();
        self.notches_r.reset();
        self.hf_shelf_l.reset();
        self.hf_shelf_r.reset();
        self.masking_bp_l.0.reset();
        self.masking_bp_l.1.reset();
        self.masking_bp_r.0.reset();
        self.masking_bp_r.1.reset();
        self.tone_finder.reset_phase();
    }

    fn apply_notches(&mut self, params: &Params, left: &mut [Sample], right: &mut [Sample]) {
        for (i, notch) in params.tinnitus.notches.iter().enumerate() {
            if notch.enabled {
                self.notches_l.notches[i].set_notch(notch.frequency, notch.q);
                self.notches_r.notches[i].set_notch(notch.frequency, notch.q);
            } else {
                self.notches_l.notches[i].set_bypass();
                self.notches_r.notches[i].set_bypass();
            }
        }
        for l in left.iter_mut() {
            *l = self.notches_l.process(*l);
        }
        for r in right.iter_mut() {
            *r = self.notches_r.process(*r);
        }
    }

    fn apply_hf_extension(&mut self, params: &Params, left: &mut [Sample], right: &mut [Sample]) {
        let hf = &params.tinnitus.hf_extension;
        if !hf.enabled {
            return;
        }
        self.hf_shelf_l.set_high_shelf(hf.freq, 0.707, hf.gain_db);
        self.hf_shelf_r.set_high_shelf(hf.freq, 0.707, hf.gain_db);
        for l in left.iter_mut() {
            *l = hde_dsp::MonoProcessor::process_sample(&mut self.hf_shelf_l, *l);
        }
        for r in right.iter_mut() {
            *r = hde_dsp::MonoProcessor::process_sample(&mut self.hf_shelf_r, *r);
        }
    }

    fn inject(&mut self, params: &Params, sample_rate: f64, left: &mut [Sample], right: &mut [Sample]) {
        let masking = &params.tinnitus.masking;
        if masking.level > 0.0 {
            self.masking_bp_l.0.set_highpass(masking.low_cut, 0.707);
            self.masking_bp_l.1.set_lowpass(masking.high_cut, 0.707);
            self.masking_bp_r.0.set_highpass(masking.low_cut, 0.707);
            self.masking_bp_r.1.set_lowpass(masking.high_cut, 0.707);

            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                let raw = match masking.noise_type {
                    hde_core::MaskingNoiseType::Off => 0.0,
                    hde_core::MaskingNoiseType::White => self.white.next_sample(),
                    hde_core::MaskingNoiseType::Pink => self.pink.next_sample(),
                    hde_core::MaskingNoiseType::Brown => self.brown.next_sample(),
                };
                let shaped_l = hde_dsp::MonoProcessor::process_sample(
                    &mut self.masking_bp_l.1,
                    hde_dsp::MonoProcessor::process_sample(&mut self.masking_bp_l.0, raw),
                );
                let shaped_r = hde_dsp::MonoProcessor::process_sample(
                    &mut self.masking_bp_r.1,
                    hde_dsp::MonoProcessor::process_sample(&mut self.masking_bp_r.0, raw),
                );
                *l += shaped_l * masking.level;
                *r += shaped_r * masking.level;
            }
        }

        let tone = &params.tinnitus.tone_finder;
        if tone.enabled {
            self.tone_finder.set_frequency(tone.freq);
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                let t = self.tone_finder.next_sample() * tone.level;
                *l += t;
                *r += t;
            }
        }

        let binaural = &params.tinnitus.binaural;
        if binaural.enabled {
            self.binaural.set_carrier_and_beat(binaural.carrier, binaural.beat);
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                let (bl, br) = self.binaural.next_sample();
                *l += bl * binaural.level;
                *r += br * binaural.level;
            }
        }

        let _ = sample_rate;
    }
}

/// All worker-owned state for one run of the pipeline. Created fresh on
/// `start()`, never observed by any caller other than the worker thread.
pub struct PipelineState {
    primary_l: ChannelFilters,
    primary_r: ChannelFilters,
    reference: ReferenceFilters,
    tinnitus: TinnitusState,
    voice_exclusion: VoiceExclusionState,
    ns_bridge: StereoHelperBridge,
    agc_bridge: StereoHelperBridge,
    meter_l: BlockMeter,
    meter_r: BlockMeter,
    meter_hp: BlockMeter,
    headphone_present: bool,
    block_counter: u64,
    sample_rate: f64,
}

impl PipelineState {
    pub fn new(sample_rate: f64, initial_filter_length: usize, initial_step_size: f64) -> Self {
        Self {
            primary_l: ChannelFilters::new(sample_rate),
            primary_r: ChannelFilters::new(sample_rate),
            reference: ReferenceFilters::new(sample_rate),
            tinnitus: TinnitusState::new(sample_rate),
            voice_exclusion: VoiceExclusionState::new(initial_filter_length, initial_step_size),
            ns_bridge: StereoHelperBridge::new(),
            agc_bridge: StereoHelperBridge::new(),
            meter_l: BlockMeter::new(),
            meter_r: BlockMeter::new(),
            meter_hp: BlockMeter::new(),
            headphone_present: false,
            block_counter: 0,
            sample_rate,
        }
    }

    /// Reset every piece of worker-owned state. Called at `start()`.
    pub fn reset(&mut self) {
        self.primary_l.reset();
        self.primary_r.reset();
        self.reference.reset();
        self.tinnitus.reset();
        self.voice_exclusion.reset();
        self.ns_bridge.reset();
        self.agc_bridge.reset();
        self.meter_l.reset();
        self.meter_r.reset();
        self.meter_hp.reset();
        self.headphone_present = false;
        self.block_counter = 0;
    }

    /// Rebuild every biquad's coefficients from the current snapshot.
    /// Called once after a dirty-flag flip, never on a clean block.
    fn rebuild_coefficients(&mut self, params: &Params) {
        const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

        if params.hpf.enabled {
            self.primary_l.hpf.set_highpass(params.hpf.frequency, BUTTERWORTH_Q);
            self.primary_r.hpf.set_highpass(params.hpf.frequency, BUTTERWORTH_Q);
        } else {
            self.primary_l.hpf.set_bypass();
            self.primary_r.hpf.set_bypass();
        }

        if params.lpf.enabled {
            self.primary_l.lpf.set_lowpass(params.lpf.frequency, BUTTERWORTH_Q);
            self.primary_r.lpf.set_lowpass(params.lpf.frequency, BUTTERWORTH_Q);
        } else {
            self.primary_l.lpf.set_bypass();
            self.primary_r.lpf.set_bypass();
        }

        for (i, freq) in bounds::EQ_FREQS.iter().enumerate() {
            self.primary_l.eq[i].set_peaking(*freq, bounds::EQ_Q, params.eq.gains_db[i]);
            self.primary_r.eq[i].set_peaking(*freq, bounds::EQ_Q, params.eq.gains_db[i]);
        }

        self.reference.hpf.set_highpass(params.voice_exclusion.ref_hpf, BUTTERWORTH_Q);
        self.reference.lpf.set_lowpass(params.voice_exclusion.ref_lpf, BUTTERWORTH_Q);

        if self.voice_exclusion.nlms_l.filter_length() != params.voice_exclusion.filter_length {
            self.voice_exclusion.nlms_l.resize(params.voice_exclusion.filter_length);
            self.voice_exclusion.nlms_r.resize(params.voice_exclusion.filter_length);
        }
        self.voice_exclusion.nlms_l.set_step_size(params.voice_exclusion.step_size);
        self.voice_exclusion.nlms_r.set_step_size(params.voice_exclusion.step_size);
    }

    /// Poll the headphone-detect probe at most once every
    /// [`HEADPHONE_PROBE_INTERVAL_BLOCKS`] blocks, caching the result.
    fn poll_headphone_presence(&mut self, detect: Option<&(dyn HeadphoneDetect + '_)>) {
        if self.block_counter % HEADPHONE_PROBE_INTERVAL_BLOCKS == 0 {
            if let Some(detect) = detect {
                self.headphone_present = detect.is_connected();
            }
        }
    }

    fn apply_voice_exclusion_nlms(
        &mut self,
        params: &Params,
        left: &mut [Sample],
        right: &mut [Sample],
        reference: &[Sample],
    ) {
        let ve = &params.voice_exclusion;
        let mut ref16 = Vec::with_capacity(left.len() / 3);
        self.voice_exclusion.ds_ref.process(reference, &mut ref16);

        let mut l16 = Vec::with_capacity(left.len() / 3);
        self.voice_exclusion.ds_l.process(left, &mut l16);
        let mut r16 = Vec::with_capacity(right.len() / 3);
        self.voice_exclusion.ds_r.process(right, &mut r16);

        let mut estimate_l16 = Vec::with_capacity(l16.len());
        let mut estimate_r16 = Vec::with_capacity(r16.len());
        for i in 0..l16.len() {
            estimate_l16.push(self.voice_exclusion.nlms_l.process_sample(l16[i], ref16[i]));
            estimate_r16.push(self.voice_exclusion.nlms_r.process_sample(r16[i], ref16[i]));
        }

        let mut estimate_l = Vec::with_capacity(left.len());
        let mut estimate_r = Vec::with_capacity(right.len());
        self.voice_exclusion.us_l.process(&estimate_l16, &mut estimate_l);
        self.voice_exclusion.us_r.process(&estimate_r16, &mut estimate_r);

        for (sample, estimate) in left.iter_mut().zip(estimate_l.iter()) {
            let mut remove = estimate * ve.blend;
            let max_remove = sample.abs() * ve.max_attenuation;
            remove = remove.clamp(-max_remove, max_remove);
            let mut out = *sample - remove;
            if out.is_nan() {
                out = 0.0;
            }
            *sample = out;
        }
        for (sample, estimate) in right.iter_mut().zip(estimate_r.iter()) {
            let mut remove = estimate * ve.blend;
            let max_remove = sample.abs() * ve.max_attenuation;
            remove = remove.clamp(-max_remove, max_remove);
            let mut out = *sample - remove;
            if out.is_nan() {
                out = 0.0;
            }
            *sample = out;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_voice_exclusion_aec(
        &mut self,
        params: &Params,
        left: &mut [Sample],
        right: &mut [Sample],
        reference: &[Sample],
        aec: &mut dyn EchoCanceller,
        mut vad: Option<&mut (dyn VoiceActivityDetector + '_)>,
        levels: &mut Levels,
    ) {
        let ve = &params.voice_exclusion;
        aec.set_filter_length(ve.aec_filter_len);
        if ve.vad_gate_enabled {
            if let Some(ref mut vad) = vad {
                vad.set_mode(ve.vad_mode);
            }
        }

        let mut l16 = Vec::with_capacity(left.len() / 3);
        self.voice_exclusion.aec_ds_l.process(left, &mut l16);
        let mut r16 = Vec::with_capacity(right.len() / 3);
        self.voice_exclusion.aec_ds_r.process(right, &mut r16);
        let mut ref16 = Vec::with_capacity(reference.len() / 3);
        self.voice_exclusion.aec_ds_ref.process(reference, &mut ref16);

        self.voice_exclusion.aec_bridge_l.push_block(&l16);
        self.voice_exclusion.aec_bridge_r.push_block(&r16);
        self.voice_exclusion.aec_bridge_ref.push_block(&ref16);

        let mut aec_out_l = vec![0.0; bounds::AEC_FRAME_SAMPLES];
        let mut aec_out_r = vec![0.0; bounds::AEC_FRAME_SAMPLES];

        while let (Some(frame_l), Some(frame_ref)) = (
            self.voice_exclusion.aec_bridge_l.try_take_frame().map(<[_]>::to_vec),
            self.voice_exclusion.aec_bridge_ref.try_take_frame().map(<[_]>::to_vec),
        ) {
            let mut primary = frame_l;
            aec.process_frame(&mut primary, &frame_ref);
            if ve.vad_gate_enabled {
                if let Some(ref mut vad) = vad {
                    levels.vad_speech_detected = vad.process_frame(&frame_ref);
                    if !levels.vad_speech_detected {
                        for s in primary.iter_mut() {
                            *s *= 1.0 - ve.vad_gate_atten;
                        }
                    }
                }
            }
            aec_out_l.copy_from_slice(&primary);
            self.voice_exclusion.aec_bridge_l.push_processed_frame(&aec_out_l);

            if let Some(frame_r) = self.voice_exclusion.aec_bridge_r.try_take_frame().map(<[_]>::to_vec) {
                let mut primary_r = frame_r;
                aec.process_frame(&mut primary_r, &frame_ref);
                aec_out_r.copy_from_slice(&primary_r);
                self.voice_exclusion.aec_bridge_r.push_processed_frame(&aec_out_r);
            }
        }

        let mut drained_l = vec![0.0; bounds::HELPER_FRAME_SAMPLES];
        let mut drained_r = vec![0.0; bounds::HELPER_FRAME_SAMPLES];
        let have_l = self.voice_exclusion.aec_bridge_l.try_take_block(&mut drained_l);
        let have_r = self.voice_exclusion.aec_bridge_r.try_take_block(&mut drained_r);

        if have_l && have_r {
            let mut aec_l_48 = Vec::with_capacity(left.len());
            let mut aec_r_48 = Vec::with_capacity(right.len());
            self.voice_exclusion.aec_us_l.process(&drained_l, &mut aec_l_48);
            self.voice_exclusion.aec_us_r.process(&drained_r, &mut aec_r_48);

            for (sample, aec_sample) in left.iter_mut().zip(aec_l_48.iter()) {
                let blended = (1.0 - ve.blend) * *sample + ve.blend * aec_sample;
                *sample = if blended.is_nan() { 0.0 } else { blended };
            }
            for (sample, aec_sample) in right.iter_mut().zip(aec_r_48.iter()) {
                let blended = (1.0 - ve.blend) * *sample + ve.blend * aec_sample;
                *sample = if blended.is_nan() { 0.0 } else { blended };
            }
        }
    }

    fn apply_helper_bridge(
        bridge: &mut StereoHelperBridge,
        left: &mut [Sample],
        right: &mut [Sample],
        mut run: impl FnMut(&mut [Sample]),
    ) {
        let mut l16 = Vec::with_capacity(left.len() / 3);
        bridge.down_l.process(left, &mut l16);
        let mut r16 = Vec::with_capacity(right.len() / 3);
        bridge.down_r.process(right, &mut r16);

        run(&mut l16);
        run(&mut r16);

        let mut l48 = Vec::with_capacity(left.len());
        bridge.up_l.process(&l16, &mut l48);
        let mut r48 = Vec::with_capacity(right.len());
        bridge.up_r.process(&r16, &mut r48);

        left.copy_from_slice(&l48);
        right.copy_from_slice(&r48);
    }

    /// Run one full block through the pipeline: codec read through codec
    /// write, in order. Returns the freshly computed levels.
    #[allow(clippy::too_many_arguments)]
    pub fn process_block(
        &mut self,
        params: &Params,
        dirty: bool,
        codec: &mut dyn CodecIo,
        headphone_detect: Option<&(dyn HeadphoneDetect + '_)>,
        mut ns: Option<&mut (dyn NoiseSuppressor + '_)>,
        mut agc: Option<&mut (dyn AutomaticGainControl + '_)>,
        mut aec: Option<&mut (dyn EchoCanceller + '_)>,
        mut vad: Option<&mut (dyn VoiceActivityDetector + '_)>,
    ) -> hde_core::EngineResult<Levels> {
        // Step 1: apply dirty-flag side effects.
        if dirty {
            codec.set_in_gain(params.input.mic_gain);
            codec.set_volume(params.output.volume);
            codec.set_mute(params.output.mute);
            self.rebuild_coefficients(params);
        }

        // Step 2: read and deinterleave.
        let block_size = bounds::BLOCK_SIZE;
        let mut left = vec![0.0; block_size];
        let mut right = vec![0.0; block_size];
        let mut reference = vec![0.0; block_size];
        codec.read(&mut left, &mut right, &mut reference)?;

        // Step 3-4: HPF/LPF then 3-band EQ, in series, L and R.
        for sample in left.iter_mut() {
            *sample = hde_dsp::MonoProcessor::process_sample(&mut self.primary_l.hpf, *sample);
            *sample = hde_dsp::MonoProcessor::process_sample(&mut self.primary_l.lpf, *sample);
            for eq in &mut self.primary_l.eq {
                *sample = hde_dsp::MonoProcessor::process_sample(eq, *sample);
            }
        }
        for sample in right.iter_mut() {
            *sample = hde_dsp::MonoProcessor::process_sample(&mut self.primary_r.hpf, *sample);
            *sample = hde_dsp::MonoProcessor::process_sample(&mut self.primary_r.lpf, *sample);
            for eq in &mut self.primary_r.eq {
                *sample = hde_dsp::MonoProcessor::process_sample(eq, *sample);
            }
        }

        if params.tinnitus.stage == TinnitusStage::PreEq {
            self.tinnitus.apply_notches(params, &mut left, &mut right);
        }

        // Step 5: reference conditioning.
        for sample in reference.iter_mut() {
            *sample *= params.voice_exclusion.ref_gain;
            *sample = hde_dsp::MonoProcessor::process_sample(&mut self.reference.hpf, *sample);
            *sample = hde_dsp::MonoProcessor::process_sample(&mut self.reference.lpf, *sample);
        }

        // Step 6: HP levels.
        let (rms_hp, peak_hp) = self.meter_hp.update(&reference);

        // Step 7: headphone-presence probe.
        self.poll_headphone_presence(headphone_detect);
        self.block_counter = self.block_counter.wrapping_add(1);

        let mut vad_speech_detected = false;

        // Step 8: voice exclusion.
        if params.voice_exclusion.enabled && self.headphone_present {
            match params.voice_exclusion.mode {
                hde_core::VoiceExclusionMode::Nlms => {
                    self.apply_voice_exclusion_nlms(params, &mut left, &mut right, &reference);
                }
                hde_core::VoiceExclusionMode::Aec => {
                    if let Some(aec) = aec.as_deref_mut() {
                        let mut levels_scratch = Levels::default();
                        self.apply_voice_exclusion_aec(
                            params,
                            &mut left,
                            &mut right,
                            &reference,
                            aec,
                            vad.as_deref_mut(),
                            &mut levels_scratch,
                        );
                        vad_speech_detected = levels_scratch.vad_speech_detected;
                    }
                }
            }
        }

        // Step 9: noise suppression.
        if params.ns.enabled {
            if let Some(ns) = ns.as_deref_mut() {
                ns.set_mode(params.ns.mode);
                Self::apply_helper_bridge(&mut self.ns_bridge, &mut left, &mut right, |block| {
                    ns.process(block);
                });
            }
        }

        // Step 10: AGC.
        if params.agc.enabled {
            if let Some(agc) = agc.as_deref_mut() {
                agc.set_mode(params.agc.mode);
                agc.set_target_level_dbfs(params.agc.target_level_dbfs);
                agc.set_compression_gain_db(params.agc.compression_gain_db);
                agc.set_limiter_enabled(params.agc.limiter_enabled);
                Self::apply_helper_bridge(&mut self.agc_bridge, &mut left, &mut right, |block| {
                    agc.process(block);
                });
            }
        }

        if params.tinnitus.stage == TinnitusStage::PostEq {
            self.tinnitus.apply_notches(params, &mut left, &mut right);
        }
        self.tinnitus.apply_hf_extension(params, &mut left, &mut right);
        self.tinnitus.inject(params, self.sample_rate, &mut left, &mut right);

        // Step 11: output gain and optional soft clip.
        let gain = params.output.gain;
        for sample in left.iter_mut().chain(right.iter_mut()) {
            let boosted = *sample * gain;
            *sample = if params.output.boost_enabled && gain > 1.0 {
                soft_clip(boosted)
            } else {
                boosted
            };
        }

        // Step 12: metering.
        let (rms_left, peak_left) = self.meter_l.update(&left);
        let (rms_right, peak_right) = self.meter_r.update(&right);

        // Step 13: clamp, mute, write.
        for sample in left.iter_mut().chain(right.iter_mut()) {
            *sample = sample.clamp(-1.0, 1.0);
        }
        if params.output.mute {
            left.iter_mut().for_each(|s| *s = 0.0);
            right.iter_mut().for_each(|s| *s = 0.0);
        }
        codec.write(&left, &right)?;

        Ok(Levels {
            rms_left,
            rms_right,
            peak_left,
            peak_right,
            rms_hp,
            peak_hp,
            vad_speech_detected,
        })
    }
}

/// A cheap, click-free soft clipper: `tanh`-style saturation that
/// approaches but never reaches `±1`, used only when `boostEnabled` pushes
/// gain above unity.
fn soft_clip(x: Sample) -> Sample {
    x.tanh()
}
