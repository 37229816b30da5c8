//! Byte-valued frequency analyser for the polling fallback path

use crate::config::FallbackConfig;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Create a Blackman window (alpha = 0.16) of `size` coefficients.
pub fn blackman_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / n;
            0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
        })
        .collect()
}

/// Turns the latest time-domain window into a 0-255 spectrum.
///
/// Magnitudes are `|X[k]| / N`, smoothed across calls with the configured
/// time constant, converted to decibels and mapped linearly from
/// `[min_decibels, max_decibels]` onto the byte range.
pub struct ByteFrequencyAnalyser {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
}

impl ByteFrequencyAnalyser {
    /// `config` is expected to have passed [`FallbackConfig::validate`].
    pub fn new(config: &FallbackConfig) -> Self {
        let fft_size = config.fft_size;
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();

        log::debug!(
            "Fallback analyser: fft_size={}, smoothing={}, range=[{}, {}] dB",
            fft_size,
            config.smoothing_time_constant,
            config.min_decibels,
            config.max_decibels
        );

        Self {
            fft,
            fft_size,
            window: blackman_window(fft_size),
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            smoothed: vec![0.0; fft_size / 2],
            smoothing: config.smoothing_time_constant,
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyse the most recent `fft_size` samples (left-padded with silence
    /// when fewer are available) and write one byte per bin into `out`.
    pub fn byte_frequency_data(&mut self, samples: &[f32], out: &mut Vec<u8>) {
        let taken = samples.len().min(self.fft_size);
        let pad = self.fft_size - taken;
        let recent = &samples[samples.len() - taken..];

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { recent[i - pad] };
            let sample = if sample.is_finite() { sample } else { 0.0 };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        let range = self.max_decibels - self.min_decibels;

        out.clear();
        for (smoothed, bin) in self.smoothed.iter_mut().zip(self.buffer.iter()) {
            let magnitude = bin.norm() * scale;
            let next = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
            *smoothed = if next.is_finite() { next } else { 0.0 };

            let db = 20.0 * smoothed.log10();
            let scaled = 255.0 * (db - self.min_decibels) / range;
            // -inf dB (silence) maps below zero and clamps to 0
            out.push(if scaled.is_finite() {
                scaled.clamp(0.0, 255.0) as u8
            } else {
                0
            });
        }
    }

    /// Forget smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_at_bin(bin: usize, size: usize, amplitude: f32) -> Vec<f32> {
        (0..size)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / size as f32).sin()
            })
            .collect()
    }

    fn unsmoothed() -> FallbackConfig {
        FallbackConfig {
            smoothing_time_constant: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn silence_maps_to_zero_bytes() {
        let mut analyser = ByteFrequencyAnalyser::new(&FallbackConfig::default());
        let mut out = Vec::new();
        analyser.byte_frequency_data(&vec![0.0; 2048], &mut out);

        assert_eq!(out.len(), 1024);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn loud_sine_saturates_near_its_bin() {
        let mut analyser = ByteFrequencyAnalyser::new(&unsmoothed());
        let mut out = Vec::new();
        analyser.byte_frequency_data(&sine_at_bin(100, 2048, 1.0), &mut out);

        let (peak_bin, &peak) = out.iter().enumerate().max_by_key(|(_, b)| **b).unwrap();
        assert!((99..=101).contains(&peak_bin), "peak at {peak_bin}");
        assert!(peak > 200, "peak value {peak}");
        assert!(out[500] < peak / 2);
    }

    #[test]
    fn smoothing_decays_gradually() {
        let mut analyser = ByteFrequencyAnalyser::new(&FallbackConfig::default());
        let mut out = Vec::new();
        let tone = sine_at_bin(64, 2048, 1.0);
        for _ in 0..20 {
            analyser.byte_frequency_data(&tone, &mut out);
        }
        let loud = out[64];

        analyser.byte_frequency_data(&vec![0.0; 2048], &mut out);
        let decayed = out[64];

        assert!(decayed > 0, "smoothing should hold energy for a frame");
        assert!(decayed < loud);

        analyser.reset();
        analyser.byte_frequency_data(&vec![0.0; 2048], &mut out);
        assert_eq!(out[64], 0);
    }

    #[test]
    fn short_input_is_left_padded() {
        let mut analyser = ByteFrequencyAnalyser::new(&unsmoothed());
        let mut out = Vec::new();
        analyser.byte_frequency_data(&[0.5; 100], &mut out);

        assert_eq!(out.len(), analyser.frequency_bin_count());
    }

    #[test]
    fn blackman_window_is_symmetric_with_near_zero_edges() {
        let window = blackman_window(1024);
        assert!(window[0].abs() < 1e-6);
        assert!((window[1] - window[1023]).abs() < 1e-5);
        assert!((window[512] - 1.0).abs() < 1e-6);
    }
}
