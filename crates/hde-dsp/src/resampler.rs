//! Fixed-ratio polyphase resampler bridging the 48 kHz codec rate and the
//! 16 kHz rate the voice-exclusion and external helper stages run at.
//!
//! A single 21-tap Kaiser-windowed-sinc lowpass is shared by both
//! directions: decimation-by-3 filters before dropping two of every three
//! samples, interpolation-by-3 filters after zero-stuffing two samples
//! between each input sample (with the passband gain restored). Filter
//! history carries across block boundaries so the seam between blocks is
//! inaudible.

const TAPS: usize = 21;
const KAISER_BETA: f64 = 6.0;

/// Zeroth-order modified Bessel function of the first kind, via its power
/// series. Twenty terms is more than enough precision for a beta this
/// small.
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let half_x = x / 2.0;
    for k in 1..20 {
        term *= (half_x / k as f64).powi(2);
        sum += term;
    }
    sum
}

/// Design a windowed-sinc lowpass with cutoff `fc` expressed as a fraction
/// of the sample rate the sinc is evaluated at (e.g. `8000.0 / 48000.0`).
fn design_lowpass(fc: f64) -> [f64; TAPS] {
    let m = (TAPS - 1) as f64;
    let i0_beta = bessel_i0(KAISER_BETA);
    let mut taps = [0.0_f64; TAPS];
    for (n, tap) in taps.iter_mut().enumerate() {
        let x = n as f64 - m / 2.0;
        let sinc = if x == 0.0 {
            2.0 * fc
        } else {
            (2.0 * std::f64::consts::PI * fc * x).sin() / (std::f64::consts::PI * x)
        };
        let ratio = x / (m / 2.0);
        let window = bessel_i0(KAISER_BETA * (1.0 - ratio * ratio).max(0.0).sqrt()) / i0_beta;
        *tap = sinc * window;
    }
    let sum: f64 = taps.iter().sum();
    for tap in taps.iter_mut() {
        *tap /= sum;
    }
    taps
}

/// Decimates 48 kHz to 16 kHz (factor of 3).
#[derive(Debug, Clone)]
pub struct Downsampler3 {
    taps: [f64; TAPS],
    history: Vec<f64>,
}

impl Downsampler3 {
    pub fn new() -> Self {
        Self {
            taps: design_lowpass(8000.0 / 48000.0),
            history: vec![0.0; TAPS - 1],
        }
    }

    /// Process a block of 48 kHz input, appending the 16 kHz output to
    /// `out`. `input.len()` must be a multiple of 3.
    pub fn process(&mut self, input: &[f64], out: &mut Vec<f64>) {
        debug_assert_eq!(input.len() % 3, 0);
        let hist_len = self.history.len();
        let mut buf = Vec::with_capacity(hist_len + input.len());
        buf.extend_from_slice(&self.history);
        buf.extend_from_slice(input);

        let mut i = 0;
        while i < input.len() {
            let center = hist_len + i;
            let mut acc = 0.0;
            for (k, tap) in self.taps.iter().enumerate() {
                let idx = center as isize - k as isize;
                if idx >= 0 {
                    acc += tap * buf[idx as usize];
                }
            }
            out.push(acc);
            i += 3;
        }

        let total = buf.len();
        self.history = buf[total - (TAPS - 1)..].to_vec();
    }

    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|s| *s = 0.0);
    }
}

impl Default for Downsampler3 {
    fn default() -> Self {
        Self::new()
    }
}

/// Interpolates 16 kHz to 48 kHz (factor of 3).
#[derive(Debug, Clone)]
pub struct Upsampler3 {
    taps: [f64; TAPS],
    history: Vec<f64>,
}

impl Upsampler3 {
    pub fn new() -> Self {
        let mut taps = design_lowpass(8000.0 / 48000.0);
        // Restore passband gain lost to zero-stuffing two of every three samples.
        for tap in taps.iter_mut() {
            *tap *= 3.0;
        }
        Self {
            taps,
            history: vec![0.0; TAPS - 1],
        }
    }

    /// Process a block of 16 kHz input, appending `input.len() * 3` 48 kHz
    /// samples to `out`.
    pub fn process(&mut self, input: &[f64], out: &mut Vec<f64>) {
        let hist_len = self.history.len();
        let mut stuffed = Vec::with_capacity(hist_len + input.len() * 3);
        stuffed.extend_from_slice(&self.history);
        for &s in input {
            stuffed.push(s);
            stuffed.push(0.0);
            stuffed.push(0.0);
        }

        for i in 0..input.len() * 3 {
            let center = hist_len + i;
            let mut acc = 0.0;
            for (k, tap) in self.taps.iter().enumerate() {
                let idx = center as isize - k as isize;
                if idx >= 0 {
                    acc += tap * stuffed[idx as usize];
                }
            }
            out.push(acc);
        }

        let total = stuffed.len();
        self.history = stuffed[total - (TAPS - 1)..].to_vec();
    }

    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|s| *s = 0.0);
    }
}

impl Default for Upsampler3 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn downsample_preserves_dc() {
        let mut ds = Downsampler3::new();
        let mut out = Vec::new();
        for _ in 0..20 {
            ds.process(&[1.0; 48], &mut out);
        }
        let tail_avg: f64 = out[out.len() - 100..].iter().sum::<f64>() / 100.0;
        assert_relative_eq!(tail_avg, 1.0, epsilon = 0.01);
    }

    #[test]
    fn upsample_preserves_dc_and_ratio() {
        let mut us = Upsampler3::new();
        let mut out = Vec::new();
        for _ in 0..20 {
            us.process(&[1.0; 16], &mut out);
        }
        assert_eq!(out.len(), 20 * 16 * 3);
        let tail_avg: f64 = out[out.len() - 300..].iter().sum::<f64>() / 300.0;
        assert_relative_eq!(tail_avg, 1.0, epsilon = 0.05);
    }

    #[test]
    fn downsample_rejects_nonmultiple_of_three_in_debug() {
        // Exercised via debug_assert in `process`; callers always hand in
        // whole 480-sample blocks, which are multiples of 3.
        let mut ds = Downsampler3::new();
        let mut out = Vec::new();
        ds.process(&[0.0; 9], &mut out);
        assert_eq!(out.len(), 3);
    }
}
