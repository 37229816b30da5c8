//! Real-time processing unit
//!
//! A [`FeatureProcessor`] is moved wholesale into the device callback. It
//! owns every piece of state it touches, takes raw sample quanta in and
//! publishes [`FeatureFrame`]s out; nothing is shared with the consumer.

use super::backend::SampleSink;
use super::fft::FftEngine;
use super::pitch::PitchDetector;
use super::publisher::FeaturePublisher;
use super::ring_buffer::SampleRingBuffer;
use super::scheduler::AnalysisScheduler;
use crate::config::{AnalysisConfig, ConfigError};
use serde::{Deserialize, Serialize};

/// Features computed on each analysis hop of the real-time path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    /// Magnitude spectrum, N/2 bins
    pub fft: Vec<f32>,

    /// Fundamental frequency in Hz, 0 when none was found
    pub pitch: f32,

    /// RMS level (0-1 for normalized input)
    pub volume: f32,

    /// Per-session frame counter; gaps mean frames were superseded
    pub sequence: u64,

    /// Stream time of the analysis in seconds
    pub produced_at: f64,
}

/// Root mean square of `samples`; 0 for empty or degenerate input.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    let value = (sum / samples.len() as f32).sqrt();
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub struct FeatureProcessor {
    ring: SampleRingBuffer,
    scheduler: AnalysisScheduler,
    fft: FftEngine,
    pitch: PitchDetector,
    publisher: FeaturePublisher<FeatureFrame>,
    snapshot: Vec<f32>,
    sample_rate: u32,
    sequence: u64,
}

impl FeatureProcessor {
    pub fn new(
        config: &AnalysisConfig,
        sample_rate: u32,
        publisher: FeaturePublisher<FeatureFrame>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            ring: SampleRingBuffer::new(config.buffer_capacity),
            scheduler: AnalysisScheduler::new(config.hop_size),
            fft: FftEngine::new(config.fft_size)?,
            pitch: PitchDetector::new(sample_rate, config.min_lag, config.effective_max_lag()),
            publisher,
            snapshot: Vec::with_capacity(config.buffer_capacity),
            sample_rate,
            sequence: 0,
        })
    }

    /// Write one quantum, analysing at every hop boundary it crosses.
    /// Returns the number of frames published.
    pub fn process(&mut self, quantum: &[f32]) -> usize {
        let mut published = 0;
        for &sample in quantum {
            self.ring.write(if sample.is_finite() { sample } else { 0.0 });
            if self.scheduler.on_sample() {
                let frame = self.analyze();
                self.publisher.publish(frame);
                published += 1;
            }
        }
        published
    }

    /// Analyse the current ring contents into a frame.
    pub fn analyze(&mut self) -> FeatureFrame {
        self.ring.snapshot_into(&mut self.snapshot);

        let recent = self.snapshot.len().saturating_sub(self.fft.size());
        let mut fft = self.fft.magnitude_spectrum(&self.snapshot[recent..]);
        if fft.iter().any(|m| !m.is_finite()) {
            fft.iter_mut().for_each(|m| *m = 0.0);
        }

        let pitch = self.pitch.detect(&self.snapshot);
        let volume = rms(&self.snapshot);

        let frame = FeatureFrame {
            fft,
            pitch: if pitch.is_finite() { pitch } else { 0.0 },
            volume,
            sequence: self.sequence,
            produced_at: self.ring.total_written() as f64 / self.sample_rate as f64,
        };
        self.sequence += 1;

        if self.sequence % 512 == 0 {
            log::debug!(
                "Real-time analysis: {} frames, {} superseded",
                self.publisher.published(),
                self.publisher.superseded()
            );
        }

        frame
    }

    /// Frames analysed so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn total_written(&self) -> u64 {
        self.ring.total_written()
    }

    /// Box the processor as a device sink.
    pub fn into_sink(mut self) -> SampleSink {
        Box::new(move |quantum: &[f32]| {
            self.process(quantum);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::publisher::{channel, FeatureSubscriber};

    const SAMPLE_RATE: u32 = 44_100;

    fn processor() -> (FeatureProcessor, FeatureSubscriber<FeatureFrame>) {
        let (publisher, subscriber) = channel(64);
        let processor =
            FeatureProcessor::new(&AnalysisConfig::default(), SAMPLE_RATE, publisher).unwrap();
        (processor, subscriber)
    }

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE as f32).sin()
            })
            .collect()
    }

    fn feed(processor: &mut FeatureProcessor, samples: &[f32]) {
        for quantum in samples.chunks(128) {
            processor.process(quantum);
        }
    }

    #[test]
    fn rms_of_silence_is_exactly_zero() {
        assert_eq!(rms(&[0.0; 2048]), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_full_scale_sine_is_one_over_root_two() {
        // 441 Hz gives an integer number of periods over 44100 samples
        let value = rms(&sine(441.0, 1.0, 44_100));
        assert!((value - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3, "rms {value}");
    }

    #[test]
    fn silence_produces_zeroed_frames() {
        let (mut processor, subscriber) = processor();
        feed(&mut processor, &vec![0.0; 2048]);

        let frame = subscriber.latest().unwrap();
        assert_eq!(frame.pitch, 0.0);
        assert_eq!(frame.volume, 0.0);
        assert_eq!(frame.fft.len(), 512);
        assert!(frame.fft.iter().all(|m| m.abs() < 1e-6));
    }

    #[test]
    fn sine_440_reports_pitch_and_volume() {
        let (mut processor, subscriber) = processor();
        feed(&mut processor, &sine(440.0, 0.8, 2048));

        let frame = subscriber.latest().unwrap();
        assert!((418.0..=462.0).contains(&frame.pitch), "pitch {}", frame.pitch);
        assert!((frame.volume - 0.8 * std::f32::consts::FRAC_1_SQRT_2).abs() < 0.02);
        assert_eq!(frame.sequence, 3);
    }

    #[test]
    fn one_frame_per_hop_with_increasing_sequence() {
        let (mut processor, subscriber) = processor();
        feed(&mut processor, &sine(220.0, 0.5, 512 * 10));

        let mut sequences = Vec::new();
        while let Some(frame) = subscriber.try_next() {
            sequences.push(frame.sequence);
        }
        assert_eq!(sequences, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn quanta_larger_than_a_hop_still_fire_every_hop() {
        let (mut processor, subscriber) = processor();
        assert_eq!(processor.process(&vec![0.1; 2048]), 4);
        assert_eq!(subscriber.pending(), 4);
    }

    #[test]
    fn produced_at_tracks_stream_time() {
        let (mut processor, subscriber) = processor();
        feed(&mut processor, &vec![0.0; 1024]);

        let first = subscriber.try_next().unwrap();
        let second = subscriber.try_next().unwrap();
        assert!((first.produced_at - 512.0 / 44_100.0).abs() < 1e-9);
        assert!((second.produced_at - 1024.0 / 44_100.0).abs() < 1e-9);
    }

    #[test]
    fn non_finite_input_never_poisons_frames() {
        let (mut processor, subscriber) = processor();
        let mut samples = sine(440.0, 0.5, 1024);
        samples[100] = f32::NAN;
        samples[200] = f32::INFINITY;
        feed(&mut processor, &samples);

        while let Some(frame) = subscriber.try_next() {
            assert!(frame.pitch.is_finite());
            assert!(frame.volume.is_finite());
            assert!(frame.fft.iter().all(|m| m.is_finite()));
        }
    }

    #[test]
    fn frames_are_independent_per_processor() {
        let (mut first, first_frames) = processor();
        let (mut second, second_frames) = processor();
        feed(&mut first, &vec![0.0; 1024]);
        feed(&mut second, &vec![0.0; 512]);

        assert_eq!(first.sequence(), 2);
        assert_eq!(second.sequence(), 1);
        assert_eq!(first_frames.latest().unwrap().sequence, 1);
        assert_eq!(second_frames.latest().unwrap().sequence, 0);
    }

    #[test]
    fn into_sink_drives_the_processor() {
        let (publisher, subscriber) = channel(8);
        let processor =
            FeatureProcessor::new(&AnalysisConfig::default(), SAMPLE_RATE, publisher).unwrap();
        let mut sink = processor.into_sink();
        sink(&vec![0.0; 512]);

        assert_eq!(subscriber.try_next().map(|f| f.sequence), Some(0));
    }
}
