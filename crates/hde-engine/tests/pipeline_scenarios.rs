//! End-to-end scenarios driving [`PipelineState::process_block`] directly,
//! without a worker thread. Each test feeds several blocks through a fake
//! codec and external helpers and checks an observable property of the
//! resulting levels/output rather than exact sample values.

use hde_core::{EngineResult, Params, Sample};
use hde_engine::external::{CodecIo, NoiseSuppressor};
use hde_engine::pipeline::PipelineState;

/// A codec fake that hands out successive blocks of caller-supplied
/// primary and reference signals and records every block it's asked to
/// write. The reference channel defaults to silence (as if no echo/boom
/// mic signal is present) unless overridden with [`SignalCodec::with_reference`].
struct SignalCodec {
    sample_index: usize,
    generator: Box<dyn FnMut(usize) -> Sample + Send>,
    reference_generator: Box<dyn FnMut(usize) -> Sample + Send>,
    written_blocks: Vec<Vec<Sample>>,
}

impl SignalCodec {
    fn new(generator: impl FnMut(usize) -> Sample + Send + 'static) -> Self {
        Self {
            sample_index: 0,
            generator: Box::new(generator),
            reference_generator: Box::new(|_| 0.0),
            written_blocks: Vec::new(),
        }
    }

    fn with_reference(mut self, generator: impl FnMut(usize) -> Sample + Send + 'static) -> Self {
        self.reference_generator = Box::new(generator);
        self
    }
}

impl CodecIo for SignalCodec {
    fn read(&mut self, left: &mut [Sample], right: &mut [Sample], reference: &mut [Sample]) -> EngineResult<()> {
        for ((l, r), ref_sample) in left.iter_mut().zip(right.iter_mut()).zip(reference.iter_mut()) {
            let s = (self.generator)(self.sample_index);
            *l = s;
            *r = s;
            *ref_sample = (self.reference_generator)(self.sample_index);
            self.sample_index += 1;
        }
        Ok(())
    }

    fn write(&mut self, left: &[Sample], _right: &[Sample]) -> EngineResult<()> {
        self.written_blocks.push(left.to_vec());
        Ok(())
    }

    fn set_in_gain(&mut self, _gain: f64) {}
    fn set_volume(&mut self, _volume: u8) {}
    fn set_mute(&mut self, _mute: bool) {}
    fn set_speaker_amp_enabled(&mut self, _enabled: bool) {}
}

fn peak(samples: &[Sample]) -> f64 {
    samples.iter().fold(0.0_f64, |acc, &s| acc.max(s.abs()))
}

/// Scenario 2: full-scale 1 kHz sine, HPF at 80 Hz, everything else
/// bypassed. After the HPF transient settles, output peak should stay
/// within 0.2 dB of full scale and consecutive blocks shouldn't show a
/// discontinuity larger than the signal's own per-sample slope.
#[test]
fn hpf_at_80hz_passes_a_1khz_tone_within_budget() {
    let sample_rate = 48_000.0;
    let freq = 1_000.0;
    let mut codec = SignalCodec::new(move |n| (2.0 * std::f64::consts::PI * freq * n as f64 / sample_rate).sin());

    let mut pipeline = PipelineState::new(sample_rate, 128, 0.1);
    pipeline.reset();

    let mut params = Params::default();
    params.hpf.enabled = true;
    params.hpf.frequency = 80.0;
    params.lpf.enabled = false;
    params.output.mute = false;
    params.output.gain = 1.0;

    let mut last_levels = None;
    for i in 0..40 {
        let levels = pipeline
            .process_block(&params, i == 0, &mut codec, None, None, None, None, None)
            .unwrap();
        last_levels = Some(levels);
    }

    let levels = last_levels.unwrap();
    // 0.2 dB down from full scale is a gain factor of ~0.977.
    assert!(levels.peak_left > 0.977, "peak {} too far below full scale", levels.peak_left);
    assert!(levels.peak_left <= 1.0 + 1e-9);

    let last_block = codec.written_blocks.last().unwrap();
    let max_step = 2.0 * std::f64::consts::PI * freq / sample_rate * 1.05;
    for pair in last_block.windows(2) {
        assert!((pair[1] - pair[0]).abs() <= max_step, "discontinuity within a settled block");
    }
}

/// Scenario 3: white noise at a moderate level, NS enabled. A fake noise
/// suppressor that halves amplitude should leave a visibly lower RMS and
/// should actually have been invoked (recorded via a shared counter).
#[test]
fn noise_suppression_reduces_steady_state_rms() {
    struct HalvingNs {
        calls: std::sync::Arc<std::sync::atomic::AtomicU32>,
    }
    impl NoiseSuppressor for HalvingNs {
        fn set_mode(&mut self, _mode: u8) {}
        fn process(&mut self, block: &mut [Sample]) {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            for s in block.iter_mut() {
                *s *= 0.5;
            }
        }
    }

    let mut rng_state: u64 = 0xA5A5_1234_CAFE_F00D;
    let mut next = move || {
        rng_state ^= rng_state << 13;
        rng_state ^= rng_state >> 7;
        rng_state ^= rng_state << 17;
        ((rng_state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    };
    let mut codec = SignalCodec::new(move |_| next() * 0.1);

    let mut pipeline = PipelineState::new(48_000.0, 128, 0.1);
    pipeline.reset();

    let mut params = Params::default();
    params.hpf.enabled = false;
    params.output.mute = false;
    params.ns.enabled = true;
    params.ns.mode = 2;

    let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let mut ns = HalvingNs { calls: calls.clone() };

    let mut output_rms = Vec::new();
    for i in 0..10 {
        let levels = pipeline
            .process_block(&params, i == 0, &mut codec, None, Some(&mut ns), None, None, None)
            .unwrap();
        output_rms.push(levels.rms_left);
    }

    assert!(calls.load(std::sync::atomic::Ordering::Relaxed) > 0, "noise suppressor was never invoked");
    // The reported RMS already reflects the halved signal; compare it
    // against what an un-suppressed 0.1-amplitude white noise source
    // would read (~0.1 / sqrt(3) for uniform noise).
    let expected_unsuppressed = 0.1 / 3.0_f64.sqrt();
    let steady_state = output_rms[5..].iter().sum::<f64>() / output_rms[5..].len() as f64;
    assert!(steady_state < expected_unsuppressed * 0.7, "NS didn't visibly reduce RMS: {steady_state}");
}

/// Scenario 4: voice exclusion in NLMS mode against a genuinely
/// independent reference channel. The primary mics carry a wanted tone
/// plus an interference tone that also leaks into the reference mic; the
/// reference carries only the interference. A correctly wired NLMS stage
/// should learn to predict and remove the interference from the
/// reference while leaving the wanted tone (uncorrelated with the
/// reference) largely intact — the opposite of cancelling the primary
/// signal against a copy of itself.
#[test]
fn nlms_voice_exclusion_cancels_correlated_interference_not_wanted_signal() {
    let sample_rate = 48_000.0;
    let wanted_freq = 1_000.0;
    let wanted_amp = 0.3;
    let interference_freq = 300.0;
    let interference_amp = 0.5;

    let mut codec = SignalCodec::new(move |n| {
        let wanted = (2.0 * std::f64::consts::PI * wanted_freq * n as f64 / sample_rate).sin() * wanted_amp;
        let interference =
            (2.0 * std::f64::consts::PI * interference_freq * n as f64 / sample_rate).sin() * interference_amp;
        wanted + interference
    })
    .with_reference(move |n| {
        (2.0 * std::f64::consts::PI * interference_freq * n as f64 / sample_rate).sin() * interference_amp
    });

    let mut pipeline = PipelineState::new(sample_rate, 64, 0.1);
    pipeline.reset();

    let mut params = Params::default();
    params.hpf.enabled = false;
    params.output.mute = false;
    params.voice_exclusion.enabled = true;
    params.voice_exclusion.blend = 1.0;
    params.voice_exclusion.max_attenuation = 0.8;
    params.voice_exclusion.step_size = 0.1;
    params.voice_exclusion.filter_length = 64;
    params.voice_exclusion.ref_gain = 1.0;

    struct AlwaysConnected;
    impl hde_engine::external::HeadphoneDetect for AlwaysConnected {
        fn is_connected(&self) -> bool {
            true
        }
    }
    let headphones = AlwaysConnected;

    let mut first_block_rms = None;
    let mut last_block_rms = 0.0;
    for i in 0..80 {
        let levels = pipeline
            .process_block(&params, i == 0, &mut codec, Some(&headphones), None, None, None, None)
            .unwrap();
        if i == 0 {
            first_block_rms = Some(levels.rms_left);
        }
        last_block_rms = levels.rms_left;
    }

    let first = first_block_rms.unwrap();
    // Wanted-tone-only RMS is the floor cancellation should converge
    // toward; the combined (wanted + interference) RMS is the starting
    // point before the filter has adapted.
    let wanted_rms = wanted_amp / std::f64::consts::SQRT_2;
    let combined_rms = (wanted_amp.powi(2) + interference_amp.powi(2)).sqrt() / std::f64::consts::SQRT_2;

    assert!(
        first > combined_rms * 0.7,
        "first block should show little cancellation yet: first={first} combined={combined_rms}"
    );
    assert!(
        last_block_rms < first * 0.85,
        "expected adaptation to reduce RMS as the correlated interference is removed: first={first} last={last_block_rms}"
    );
    assert!(
        last_block_rms > wanted_rms * 0.5,
        "wanted signal should survive since it's uncorrelated with the reference: last={last_block_rms} wanted={wanted_rms}"
    );
}

/// Scenario 5: boost engaged with gain well above unity, full-scale
/// sustained tone. Output must never exceed unity magnitude.
#[test]
fn boost_soft_clip_never_exceeds_unity_across_many_blocks() {
    let sample_rate = 48_000.0;
    let freq = 440.0;
    let mut codec = SignalCodec::new(move |n| (2.0 * std::f64::consts::PI * freq * n as f64 / sample_rate).sin());

    let mut pipeline = PipelineState::new(sample_rate, 128, 0.1);
    pipeline.reset();

    let mut params = Params::default();
    params.hpf.enabled = false;
    params.output.mute = false;
    params.output.gain = 3.0;
    params.output.boost_enabled = true;

    for i in 0..20 {
        pipeline
            .process_block(&params, i == 0, &mut codec, None, None, None, None, None)
            .unwrap();
    }

    for block in &codec.written_blocks {
        assert!(peak(block) <= 1.0 + 1e-9);
    }
}

/// Scenario 6: setter churn. Changing `eq.gains_db[1]` every block (the
/// finest granularity a caller can observe, since the pipeline recomputes
/// coefficients at most once per block) for 100 blocks should never
/// produce a non-finite sample or a sample outside the expected envelope
/// for a gain swinging across its legal EQ range.
#[test]
fn setter_churn_never_produces_instability() {
    let sample_rate = 48_000.0;
    let freq = 1_000.0;
    let mut codec = SignalCodec::new(move |n| (2.0 * std::f64::consts::PI * freq * n as f64 / sample_rate).sin() * 0.5);

    let mut pipeline = PipelineState::new(sample_rate, 128, 0.1);
    pipeline.reset();

    let mut params = Params::default();
    params.hpf.enabled = false;
    params.output.mute = false;

    for i in 0..100 {
        // Swing the mid-band gain across its full legal range once per
        // block, simulating a UI fader being dragged continuously.
        let phase = (i as f64 / 100.0) * std::f64::consts::TAU;
        params.eq.gains_db[1] = 12.0 * phase.sin();

        pipeline
            .process_block(&params, true, &mut codec, None, None, None, None, None)
            .unwrap();

        let block = codec.written_blocks.last().unwrap();
        assert!(block.iter().all(|s| s.is_finite()), "non-finite sample at block {i}");
        // A 12 dB boost on a 0.5-amplitude tone can reach ~2.0 before the
        // final clamp; the clamp step guarantees the written samples never
        // exceed unity regardless.
        assert!(peak(block) <= 1.0 + 1e-9, "block {i} exceeded unity after clamp");
    }
}
