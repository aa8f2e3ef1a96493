//! Single mutex-protected exchange point between the real-time worker and
//! every other caller (UI, lifecycle management, persistence).
//!
//! Setters clamp on ingest and mark the record dirty; the worker takes a
//! snapshot once per block rather than locking per-sample, so the
//! critical section is always short.

use hde_core::{Levels, Params};
use parking_lot::Mutex;

struct Record {
    params: Params,
    levels: Levels,
    dirty: bool,
}

pub struct ParamExchange {
    record: Mutex<Record>,
}

impl ParamExchange {
    pub fn new(initial: Params) -> Self {
        Self {
            record: Mutex::new(Record {
                params: initial.clamped(),
                levels: Levels::default(),
                dirty: true,
            }),
        }
    }

    /// Replace the whole parameter record.
    pub fn set_params(&self, params: Params) {
        let mut record = self.record.lock();
        record.params = params.clamped();
        record.dirty = true;
    }

    /// Read the current parameter record without clearing the dirty flag.
    pub fn params(&self) -> Params {
        self.record.lock().params
    }

    /// Mutate the parameter record in place via a closure, clamping the
    /// result. Used by per-field setters so each one doesn't need its own
    /// lock-modify-clamp-store boilerplate.
    pub fn update_params(&self, f: impl FnOnce(&mut Params)) {
        let mut record = self.record.lock();
        f(&mut record.params);
        record.params = record.params.clamped();
        record.dirty = true;
    }

    /// Worker-side: take a snapshot of the params and clear the dirty
    /// flag, reporting whether anything had changed since the last call.
    pub fn take_snapshot(&self) -> (Params, bool) {
        let mut record = self.record.lock();
        let was_dirty = record.dirty;
        record.dirty = false;
        (record.params, was_dirty)
    }

    /// Worker-side: publish a fresh set of level readings.
    pub fn publish_levels(&self, levels: Levels) {
        self.record.lock().levels = levels;
    }

    /// Caller-side: read the most recently published levels.
    pub fn levels(&self) -> Levels {
        self.record.lock().levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_snapshot_is_dirty() {
        let exchange = ParamExchange::new(Params::default());
        let (_, dirty) = exchange.take_snapshot();
        assert!(dirty);
    }

    #[test]
    fn snapshot_clears_dirty_until_next_set() {
        let exchange = ParamExchange::new(Params::default());
        exchange.take_snapshot();
        let (_, dirty) = exchange.take_snapshot();
        assert!(!dirty);

        exchange.update_params(|p| p.output.mute = false);
        let (params, dirty) = exchange.take_snapshot();
        assert!(dirty);
        assert!(!params.output.mute);
    }

    #[test]
    fn update_params_clamps_result() {
        let exchange = ParamExchange::new(Params::default());
        exchange.update_params(|p| p.output.gain = 999.0);
        let params = exchange.params();
        assert_eq!(params.output.gain, hde_core::bounds::OUTPUT_GAIN.1);
    }

    #[test]
    fn levels_round_trip() {
        let exchange = ParamExchange::new(Params::default());
        let mut levels = Levels::default();
        levels.rms_left = 0.5;
        exchange.publish_levels(levels);
        assert_eq!(exchange.levels().rms_left, 0.5);
    }
}
