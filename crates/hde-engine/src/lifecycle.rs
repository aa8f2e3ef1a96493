//! Engine lifecycle: owns the parameter exchange, spawns and joins the
//! real-time worker thread, and manages the external helper handles whose
//! lifetime is tied to the engine value rather than to any global state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use hde_core::{bounds, EngineError, EngineResult, Levels, Params};
use log::{error, info, warn};

use crate::exchange::ParamExchange;
use crate::external::{
    AutomaticGainControl, CodecIo, EchoCanceller, HeadphoneDetect, NoiseSuppressor,
    VoiceActivityDetector,
};
use crate::pipeline::PipelineState;
use crate::thread_priority::set_realtime_priority;

/// Constructs the external helper handles the worker needs for the given
/// parameter snapshot. Implemented by the platform integration layer; the
/// core is generic over it so tests can supply fakes.
pub trait HelperFactory: Send + Sync {
    fn open_codec(&self) -> EngineResult<Box<dyn CodecIo>>;
    fn open_headphone_detect(&self) -> Option<Box<dyn HeadphoneDetect>>;
    fn open_noise_suppressor(&self, mode: u8) -> EngineResult<Box<dyn NoiseSuppressor>>;
    fn open_agc(&self) -> EngineResult<Box<dyn AutomaticGainControl>>;
    fn open_aec(&self, filter_len: u8, mode: u8) -> EngineResult<Box<dyn EchoCanceller>>;
    fn open_vad(&self, mode: u8) -> EngineResult<Box<dyn VoiceActivityDetector>>;
}

/// The headset DSP engine: an explicitly owned value, constructed once at
/// startup and handed to its collaborators. No global state anywhere.
pub struct Engine {
    exchange: Arc<ParamExchange>,
    factory: Arc<dyn HelperFactory>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    sample_rate: f64,
}

impl Engine {
    pub fn new(factory: Arc<dyn HelperFactory>, initial_params: Params) -> Self {
        Self {
            exchange: Arc::new(ParamExchange::new(initial_params)),
            factory,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            sample_rate: bounds::CODEC_SAMPLE_RATE,
        }
    }

    pub fn set_params(&self, params: Params) {
        self.exchange.set_params(params);
    }

    pub fn params(&self) -> Params {
        self.exchange.params()
    }

    pub fn update_params(&self, f: impl FnOnce(&mut Params)) {
        self.exchange.update_params(f);
    }

    pub fn levels(&self) -> Levels {
        self.exchange.levels()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the worker. Fails only if the codec handle cannot be opened;
    /// every other helper failure is logged and leaves that feature
    /// disabled while the engine keeps running.
    pub fn start(&mut self) -> EngineResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyRunning);
        }

        let codec = match self.factory.open_codec() {
            Ok(codec) => codec,
            Err(err) => {
                error!("failed to open codec at worker startup: {err}");
                self.running.store(false, Ordering::Release);
                return Err(EngineError::CodecUnavailable);
            }
        };

        let exchange = Arc::clone(&self.exchange);
        let factory = Arc::clone(&self.factory);
        let running = Arc::clone(&self.running);
        let sample_rate = self.sample_rate;

        self.worker = Some(std::thread::spawn(move || {
            run_worker(exchange, factory, running, codec, sample_rate);
        }));

        info!("headset DSP engine started");
        Ok(())
    }

    /// Signal the worker to stop and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        info!("headset DSP engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

struct HelperHandles {
    ns: Option<Box<dyn NoiseSuppressor>>,
    agc: Option<Box<dyn AutomaticGainControl>>,
    aec: Option<Box<dyn EchoCanceller>>,
    vad: Option<Box<dyn VoiceActivityDetector>>,
    ns_mode: Option<u8>,
    aec_filter_len: Option<u8>,
    aec_mode: Option<u8>,
    vad_mode: Option<u8>,
}

impl HelperHandles {
    fn empty() -> Self {
        Self {
            ns: None,
            agc: None,
            aec: None,
            vad: None,
            ns_mode: None,
            aec_filter_len: None,
            aec_mode: None,
            vad_mode: None,
        }
    }

    /// Open, reopen, or close each helper based on which identity-defining
    /// parameters changed since the last snapshot. Only runs on a dirty
    /// block, per the real-time budget in the concurrency model.
    fn sync(&mut self, params: &Params, factory: &dyn HelperFactory) {
        if params.ns.enabled {
            if self.ns.is_none() || self.ns_mode != Some(params.ns.mode) {
                match factory.open_noise_suppressor(params.ns.mode) {
                    Ok(handle) => {
                        self.ns = Some(handle);
                        self.ns_mode = Some(params.ns.mode);
                    }
                    Err(err) => {
                        warn!("noise suppressor unavailable: {err}");
                        self.ns = None;
                    }
                }
            }
        } else {
            self.ns = None;
            self.ns_mode = None;
        }

        if params.agc.enabled {
            if self.agc.is_none() {
                match factory.open_agc() {
                    Ok(handle) => self.agc = Some(handle),
                    Err(err) => {
                        warn!("AGC unavailable: {err}");
                        self.agc = None;
                    }
                }
            }
        } else {
            self.agc = None;
        }

        let aec_needed = params.voice_exclusion.enabled
            && params.voice_exclusion.mode == hde_core::VoiceExclusionMode::Aec;
        if aec_needed {
            if self.aec.is_none()
                || self.aec_filter_len != Some(params.voice_exclusion.aec_filter_len)
                || self.aec_mode != Some(params.voice_exclusion.aec_mode)
            {
                match factory.open_aec(params.voice_exclusion.aec_filter_len, params.voice_exclusion.aec_mode) {
                    Ok(handle) => {
                        self.aec = Some(handle);
                        self.aec_filter_len = Some(params.voice_exclusion.aec_filter_len);
                        self.aec_mode = Some(params.voice_exclusion.aec_mode);
                    }
                    Err(err) => {
                        warn!("AEC unavailable: {err}");
                        self.aec = None;
                    }
                }
            }
        } else {
            self.aec = None;
            self.aec_filter_len = None;
            self.aec_mode = None;
        }

        let vad_needed = aec_needed && params.voice_exclusion.vad_enabled;
        if vad_needed {
            if self.vad.is_none() || self.vad_mode != Some(params.voice_exclusion.vad_mode) {
                match factory.open_vad(params.voice_exclusion.vad_mode) {
                    Ok(handle) => {
                        self.vad = Some(handle);
                        self.vad_mode = Some(params.voice_exclusion.vad_mode);
                    }
                    Err(err) => {
                        warn!("VAD unavailable: {err}");
                        self.vad = None;
                    }
                }
            }
        } else {
            self.vad = None;
            self.vad_mode = None;
        }
    }
}

fn run_worker(
    exchange: Arc<ParamExchange>,
    factory: Arc<dyn HelperFactory>,
    running: Arc<AtomicBool>,
    mut codec: Box<dyn CodecIo>,
    sample_rate: f64,
) {
    set_realtime_priority();
    codec.set_speaker_amp_enabled(false);

    let headphone_detect = factory.open_headphone_detect();
    let (initial_params, _) = exchange.take_snapshot();
    let mut pipeline = PipelineState::new(
        sample_rate,
        initial_params.voice_exclusion.filter_length,
        initial_params.voice_exclusion.step_size,
    );
    pipeline.reset();

    let mut helpers = HelperHandles::empty();
    let mut params = initial_params;
    helpers.sync(&params, factory.as_ref());

    while running.load(Ordering::Acquire) {
        let (snapshot, dirty) = exchange.take_snapshot();
        params = snapshot;
        if dirty {
            helpers.sync(&params, factory.as_ref());
        }

        let result = pipeline.process_block(
            &params,
            dirty,
            codec.as_mut(),
            headphone_detect.as_deref(),
            helpers.ns.as_deref_mut(),
            helpers.agc.as_deref_mut(),
            helpers.aec.as_deref_mut(),
            helpers.vad.as_deref_mut(),
        );

        match result {
            Ok(levels) => exchange.publish_levels(levels),
            Err(err) => {
                // A transient short read/write: skip this iteration and
                // retry on the next one rather than tearing the loop down.
                warn!("transient I/O error in worker loop: {err}");
            }
        }
    }

    codec.set_mute(true);
    codec.set_speaker_amp_enabled(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hde_core::Sample;
    use std::sync::Mutex;

    struct NullCodec;
    impl CodecIo for NullCodec {
        fn read(&mut self, left: &mut [Sample], right: &mut [Sample], reference: &mut [Sample]) -> EngineResult<()> {
            left.iter_mut().for_each(|s| *s = 0.0);
            right.iter_mut().for_each(|s| *s = 0.0);
            reference.iter_mut().for_each(|s| *s = 0.0);
            Ok(())
        }
        fn write(&mut self, _left: &[Sample], _right: &[Sample]) -> EngineResult<()> {
            Ok(())
        }
        fn set_in_gain(&mut self, _gain: f64) {}
        fn set_volume(&mut self, _volume: u8) {}
        fn set_mute(&mut self, _mute: bool) {}
        fn set_speaker_amp_enabled(&mut self, _enabled: bool) {}
    }

    struct NullFactory {
        open_calls: Mutex<u32>,
    }

    impl HelperFactory for NullFactory {
        fn open_codec(&self) -> EngineResult<Box<dyn CodecIo>> {
            *self.open_calls.lock().unwrap() += 1;
            Ok(Box::new(NullCodec))
        }
        fn open_headphone_detect(&self) -> Option<Box<dyn HeadphoneDetect>> {
            None
        }
        fn open_noise_suppressor(&self, _mode: u8) -> EngineResult<Box<dyn NoiseSuppressor>> {
            Err(EngineError::HelperUnavailable {
                feature: "ns",
                reason: "not implemented in test".into(),
            })
        }
        fn open_agc(&self) -> EngineResult<Box<dyn AutomaticGainControl>> {
            Err(EngineError::HelperUnavailable {
                feature: "agc",
                reason: "not implemented in test".into(),
            })
        }
        fn open_aec(&self, _filter_len: u8, _mode: u8) -> EngineResult<Box<dyn EchoCanceller>> {
            Err(EngineError::HelperUnavailable {
                feature: "aec",
                reason: "not implemented in test".into(),
            })
        }
        fn open_vad(&self, _mode: u8) -> EngineResult<Box<dyn VoiceActivityDetector>> {
            Err(EngineError::HelperUnavailable {
                feature: "vad",
                reason: "not implemented in test".into(),
            })
        }
    }

    #[test]
    fn start_then_stop_round_trips_running_flag() {
        let factory = Arc::new(NullFactory { open_calls: Mutex::new(0) });
        let mut engine = Engine::new(factory, Params::default());
        assert!(!engine.is_running());
        engine.start().unwrap();
        assert!(engine.is_running());
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn starting_twice_returns_already_running() {
        let factory = Arc::new(NullFactory { open_calls: Mutex::new(0) });
        let mut engine = Engine::new(factory, Params::default());
        engine.start().unwrap();
        let second = engine.start();
        assert!(matches!(second, Err(EngineError::AlreadyRunning)));
        engine.stop();
    }
}
