//! Windowed radix-2 FFT for the real-time path

use crate::config::ConfigError;
use std::f64::consts::PI;

/// Create a Hann window of `size` coefficients.
pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

/// In-place forward transform of a power-of-two length (re, im) pair.
pub fn forward(re: &mut [f32], im: &mut [f32]) {
    transform(re, im, false);
}

/// In-place inverse transform, scaled by 1/N so that `inverse(forward(x)) == x`.
pub fn inverse(re: &mut [f32], im: &mut [f32]) {
    transform(re, im, true);
    let scale = 1.0 / re.len() as f32;
    for (r, i) in re.iter_mut().zip(im.iter_mut()) {
        *r *= scale;
        *i *= scale;
    }
}

/// Iterative Cooley-Tukey: bit-reversal pass, then log2(N) butterfly stages.
///
/// The twiddle factor is rotated incrementally within each stage; the
/// rotation runs in f64 so the drift over a 512-step stage stays negligible.
fn transform(re: &mut [f32], im: &mut [f32], invert: bool) {
    let n = re.len();
    debug_assert_eq!(n, im.len());
    debug_assert!(n.is_power_of_two());
    if n < 2 {
        return;
    }

    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let sign = if invert { 1.0 } else { -1.0 };
    let mut len = 2;
    while len <= n {
        let (step_im, step_re) = (sign * 2.0 * PI / len as f64).sin_cos();
        let half = len / 2;

        for start in (0..n).step_by(len) {
            let (mut wr, mut wi) = (1.0f64, 0.0f64);
            for k in 0..half {
                let a = start + k;
                let b = a + half;

                let (br, bi) = (re[b] as f64, im[b] as f64);
                let tr = br * wr - bi * wi;
                let ti = br * wi + bi * wr;
                let (ar, ai) = (re[a] as f64, im[a] as f64);

                re[a] = (ar + tr) as f32;
                im[a] = (ai + ti) as f32;
                re[b] = (ar - tr) as f32;
                im[b] = (ai - ti) as f32;

                let next_wr = wr * step_re - wi * step_im;
                wi = wr * step_im + wi * step_re;
                wr = next_wr;
            }
        }
        len <<= 1;
    }
}

/// Hann-windowed magnitude spectrum of a fixed power-of-two size.
///
/// Owns its window and scratch arrays so repeated analysis does not
/// allocate beyond the returned spectrum.
pub struct FftEngine {
    size: usize,
    window: Vec<f32>,
    re: Vec<f32>,
    im: Vec<f32>,
}

impl FftEngine {
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        if size < 2 || !size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                name: "fft_size",
                value: size,
            });
        }

        Ok(Self {
            size,
            window: hann_window(size),
            re: vec![0.0; size],
            im: vec![0.0; size],
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of magnitude bins produced (N/2).
    pub fn bins(&self) -> usize {
        self.size / 2
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    /// Magnitude spectrum of up to N leading samples; shorter input is zero-padded.
    pub fn magnitude_spectrum(&mut self, samples: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.bins());
        self.magnitude_spectrum_into(samples, &mut out);
        out
    }

    pub fn magnitude_spectrum_into(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        let taken = samples.len().min(self.size);
        for (dst, &src) in self.re.iter_mut().zip(&samples[..taken]) {
            *dst = if src.is_finite() { src } else { 0.0 };
        }
        self.re[taken..].fill(0.0);
        self.im.fill(0.0);

        for (sample, &w) in self.re.iter_mut().zip(self.window.iter()) {
            *sample *= w;
        }

        forward(&mut self.re, &mut self.im);

        out.clear();
        out.extend(
            self.re
                .iter()
                .zip(self.im.iter())
                .take(self.size / 2)
                .map(|(r, i)| (r * r + i * i).sqrt()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfft::{num_complex::Complex, FftPlanner};

    /// Deterministic pseudo-random signal in [-1, 1]
    fn noise(len: usize, seed: u32) -> Vec<f32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 23) as f32 - 1.0
            })
            .collect()
    }

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn rejects_non_power_of_two_sizes() {
        assert!(FftEngine::new(1000).is_err());
        assert!(FftEngine::new(0).is_err());
        assert!(FftEngine::new(1024).is_ok());
    }

    #[test]
    fn output_has_half_the_bins() {
        let mut engine = FftEngine::new(1024).unwrap();
        assert_eq!(engine.magnitude_spectrum(&noise(1024, 1)).len(), 512);
        assert_eq!(engine.magnitude_spectrum(&[]).len(), 512);
    }

    #[test]
    fn hann_window_endpoints_and_center() {
        let window = hann_window(1024);
        assert!(window[0].abs() < 1e-6);
        assert!(window[1023].abs() < 1e-6);
        assert!((window[511] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn round_trip_restores_signal() {
        for &size in &[2usize, 8, 64, 1024, 4096] {
            let original = noise(size, size as u32);
            let mut re = original.clone();
            let mut im = vec![0.0; size];

            forward(&mut re, &mut im);
            inverse(&mut re, &mut im);

            for (i, (&restored, &expected)) in re.iter().zip(&original).enumerate() {
                assert!(
                    (restored - expected).abs() < 1e-4,
                    "size {size}, sample {i}: {restored} vs {expected}"
                );
            }
            assert!(im.iter().all(|v| v.abs() < 1e-4));
        }
    }

    #[test]
    fn forward_matches_rustfft() {
        let size = 512;
        let input = noise(size, 42);

        let mut re = input.clone();
        let mut im = vec![0.0; size];
        forward(&mut re, &mut im);

        let mut reference: Vec<Complex<f32>> = input.iter().map(|&s| Complex::new(s, 0.0)).collect();
        FftPlanner::new().plan_fft_forward(size).process(&mut reference);

        for (k, expected) in reference.iter().enumerate() {
            assert!((re[k] - expected.re).abs() < 5e-3, "bin {k} re");
            assert!((im[k] - expected.im).abs() < 5e-3, "bin {k} im");
        }
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let mut engine = FftEngine::new(1024).unwrap();
        // bin 40 at 44.1kHz / 1024
        let freq = 40.0 * 44_100.0 / 1024.0;
        let spectrum = engine.magnitude_spectrum(&sine(freq, 44_100.0, 1024));

        let (peak_bin, _) = spectrum
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best });
        assert_eq!(peak_bin, 40);
    }

    #[test]
    fn silence_has_empty_spectrum() {
        let mut engine = FftEngine::new(1024).unwrap();
        let spectrum = engine.magnitude_spectrum(&vec![0.0; 2048]);
        assert!(spectrum.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn short_input_is_zero_padded() {
        let mut engine = FftEngine::new(256).unwrap();
        let short = noise(100, 7);
        let mut padded = short.clone();
        padded.resize(256, 0.0);

        assert_eq!(engine.magnitude_spectrum(&short), engine.magnitude_spectrum(&padded));
    }

    #[test]
    fn identical_input_gives_identical_output() {
        let mut engine = FftEngine::new(1024).unwrap();
        let input = noise(1024, 3);
        let first = engine.magnitude_spectrum(&input);
        let second = engine.magnitude_spectrum(&input);
        assert_eq!(first, second);
    }

    #[test]
    fn non_finite_samples_are_treated_as_silence() {
        let mut engine = FftEngine::new(64).unwrap();
        let spectrum = engine.magnitude_spectrum(&[f32::NAN; 64]);
        assert!(spectrum.iter().all(|&m| m == 0.0));
    }
}
