//! Normalized least-mean-squares adaptive filter.
//!
//! Drives voice exclusion: the filter learns a model of how the primary
//! microphone's own voice leaks into the reference signal and subtracts
//! the predicted leakage, so only the ambient signal the user wants to
//! hear remains. Runs at the 16 kHz processing rate.

/// Reference-buffer writes beyond this weight magnitude count as adapted
/// into a diverged state; those taps are reset to zero rather than left
/// to grow without bound.
const DIVERGENCE_THRESHOLD: f64 = 10.0;

/// Smallest denominator allowed in the normalized step size, avoiding a
/// divide-by-near-zero blowup during silence.
const REGULARIZATION: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct NlmsFilter {
    weights: Vec<f64>,
    reference: Vec<f64>,
    write_pos: usize,
    step_size: f64,
}

impl NlmsFilter {
    pub fn new(filter_length: usize, step_size: f64) -> Self {
        Self {
            weights: vec![0.0; filter_length],
            reference: vec![0.0; filter_length],
            write_pos: 0,
            step_size,
        }
    }

    pub fn set_step_size(&mut self, step_size: f64) {
        self.step_size = step_size;
    }

    /// Resize the adaptive filter, discarding history and weights. Called
    /// when the caller changes `filter_length` between blocks.
    pub fn resize(&mut self, filter_length: usize) {
        self.weights = vec![0.0; filter_length];
        self.reference = vec![0.0; filter_length];
        self.write_pos = 0;
    }

    pub fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
        self.reference.iter_mut().for_each(|r| *r = 0.0);
        self.write_pos = 0;
    }

    /// Process one sample: push `reference_sample` into the circular
    /// reference buffer, predict the leakage present in `primary_sample`,
    /// adapt the weights against the true error, and return the raw
    /// estimate. Callers apply blend and attenuation clamping on top of
    /// this estimate; the filter itself always adapts against the
    /// unclamped error so it keeps tracking the true leakage path.
    pub fn process_sample(&mut self, primary_sample: f64, reference_sample: f64) -> f64 {
        let len = self.reference.len();
        self.write_pos = (self.write_pos + len - 1) % len;
        self.reference[self.write_pos] = reference_sample;

        let mut estimate = 0.0;
        let mut energy = 0.0;
        for i in 0..len {
            let r = self.reference[(self.write_pos + i) % len];
            estimate += self.weights[i] * r;
            energy += r * r;
        }

        let error = primary_sample - estimate;
        let mu = self.step_size / (energy + REGULARIZATION);
        for i in 0..len {
            let r = self.reference[(self.write_pos + i) % len];
            self.weights[i] += mu * error * r;
            if self.weights[i].abs() > DIVERGENCE_THRESHOLD {
                log::trace!("nlms tap {i} diverged, reset to 0");
                self.weights[i] = 0.0;
            }
        }

        estimate
    }

    pub fn filter_length(&self) -> usize {
        self.weights.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_on_a_simple_gain_path() {
        // Reference path is reference_sample * 0.5 with no delay: weight[0]
        // should converge toward 0.5.
        let mut filter = NlmsFilter::new(8, 0.5);
        let mut rng_state: u64 = 12345;
        let mut next = || {
            rng_state ^= rng_state << 13;
            rng_state ^= rng_state >> 7;
            rng_state ^= rng_state << 17;
            ((rng_state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        };

        for _ in 0..4000 {
            let reference = next();
            let primary = reference * 0.5;
            filter.process_sample(primary, reference);
        }

        assert!((filter.weights[0] - 0.5).abs() < 0.05);
    }

    #[test]
    fn diverged_weights_are_reset_to_zero() {
        let mut filter = NlmsFilter::new(4, 1.0);
        filter.weights[1] = 50.0;
        filter.process_sample(0.0, 1.0);
        assert_eq!(filter.weights[1], 0.0);
    }

    #[test]
    fn silence_produces_zero_estimate_and_does_not_diverge() {
        let mut filter = NlmsFilter::new(8, 0.5);
        for _ in 0..1000 {
            let estimate = filter.process_sample(0.0, 0.0);
            assert_eq!(estimate, 0.0);
        }
        assert!(filter.weights.iter().all(|w| w.abs() < DIVERGENCE_THRESHOLD));
    }
}
