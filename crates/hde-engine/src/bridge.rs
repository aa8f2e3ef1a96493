//! Frame-size bridge between the per-block 16 kHz stream (160 samples,
//! matching the external helper frame size) and the 512-sample frames the
//! external AEC helper operates on.

use hde_core::bounds::{AEC_FRAME_SAMPLES, HELPER_FRAME_SAMPLES};
use hde_dsp::ringbuf::RingBuffer;

/// Accumulates 160-sample blocks into 512-sample AEC frames, and drains
/// the AEC's 512-sample output back into 160-sample blocks.
pub struct AecFrameBridge {
    input: RingBuffer,
    output: RingBuffer,
    frame_scratch: Vec<f64>,
}

impl AecFrameBridge {
    pub fn new() -> Self {
        Self {
            input: RingBuffer::new(AEC_FRAME_SAMPLES * 2),
            output: RingBuffer::new(AEC_FRAME_SAMPLES * 2),
            frame_scratch: vec![0.0; AEC_FRAME_SAMPLES],
        }
    }

    /// Push one 160-sample block in. Call [`Self::try_take_frame`]
    /// afterward to see whether a full frame is now ready.
    pub fn push_block(&mut self, block: &[f64]) {
        debug_assert_eq!(block.len(), HELPER_FRAME_SAMPLES);
        self.input.push_slice(block);
    }

    /// If a full 512-sample frame has accumulated, copy it into
    /// `frame_scratch` and return a reference to it; otherwise `None`.
    pub fn try_take_frame(&mut self) -> Option<&[f64]> {
        if self.input.pop_into(&mut self.frame_scratch) {
            Some(&self.frame_scratch)
        } else {
            None
        }
    }

    /// Push one 512-sample processed frame back in for draining.
    pub fn push_processed_frame(&mut self, frame: &[f64]) {
        debug_assert_eq!(frame.len(), AEC_FRAME_SAMPLES);
        self.output.push_slice(frame);
    }

    /// Drain one 160-sample block of processed output, if enough has
    /// accumulated.
    pub fn try_take_block(&mut self, out: &mut [f64]) -> bool {
        debug_assert_eq!(out.len(), HELPER_FRAME_SAMPLES);
        self.output.pop_into(out)
    }

    pub fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
    }
}

impl Default for AecFrameBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_becomes_ready_after_enough_blocks() {
        let mut bridge = AecFrameBridge::new();
        let block = vec![1.0; HELPER_FRAME_SAMPLES];

        for _ in 0..(AEC_FRAME_SAMPLES / HELPER_FRAME_SAMPLES - 1) {
            bridge.push_block(&block);
            assert!(bridge.try_take_frame().is_none());
        }
        bridge.push_block(&block);
        let frame = bridge.try_take_frame().expect("frame should be ready");
        assert_eq!(frame.len(), AEC_FRAME_SAMPLES);
    }

    #[test]
    fn output_drains_in_block_sized_chunks() {
        let mut bridge = AecFrameBridge::new();
        let frame = vec![0.25; AEC_FRAME_SAMPLES];
        bridge.push_processed_frame(&frame);

        let mut out = vec![0.0; HELPER_FRAME_SAMPLES];
        let mut blocks_drained = 0;
        while bridge.try_take_block(&mut out) {
            assert!(out.iter().all(|&s| s == 0.25));
            blocks_drained += 1;
        }
        assert_eq!(blocks_drained, AEC_FRAME_SAMPLES / HELPER_FRAME_SAMPLES);
    }
}
