//! Polling analysis for hosts without real-time delivery
//!
//! The device callback only forwards sample blocks; a dedicated thread keeps
//! the recent window and analyses it on a fixed tick, so the cadence never
//! depends on how often the consumer renders.

use super::analyser::ByteFrequencyAnalyser;
use super::backend::{CaptureError, SampleSink};
use super::publisher::FeaturePublisher;
use super::ring_buffer::SampleRingBuffer;
use super::spectral::{PeakOrder, SpectralFeatureEngine, SpectralSnapshot};
use crate::config::AnalysisConfig;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sample blocks buffered between the device callback and the worker
const SAMPLE_QUEUE: usize = 64;

enum WorkerCommand {
    Stop,
}

/// Channel carrying sample blocks into a [`FallbackWorker`].
pub fn sample_channel() -> (Sender<Vec<f32>>, Receiver<Vec<f32>>) {
    bounded(SAMPLE_QUEUE)
}

/// Device sink forwarding blocks to the worker. Blocks are dropped while
/// the worker is behind rather than stalling the device.
pub fn forwarding_sink(samples: Sender<Vec<f32>>) -> SampleSink {
    Box::new(move |quantum: &[f32]| {
        let _ = samples.try_send(quantum.to_vec());
    })
}

pub struct FallbackWorker {
    command_tx: Sender<WorkerCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl FallbackWorker {
    pub fn spawn(
        config: &AnalysisConfig,
        samples: Receiver<Vec<f32>>,
        mut publisher: FeaturePublisher<SpectralSnapshot>,
    ) -> Result<Self, CaptureError> {
        config.fallback.validate()?;

        let mut analyser = ByteFrequencyAnalyser::new(&config.fallback);
        let engine = SpectralFeatureEngine::new(
            config.rolloff_threshold,
            if config.sort_peaks {
                PeakOrder::Amplitude
            } else {
                PeakOrder::ScanOrder
            },
        );
        let mut ring = SampleRingBuffer::new(config.fallback.fft_size);
        let interval = Duration::from_millis(config.fallback.poll_interval_ms.max(1));
        let (command_tx, command_rx) = bounded(1);

        let thread_handle = thread::Builder::new()
            .name("fallback-analysis".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                let mut window = Vec::with_capacity(ring.capacity());
                let mut bytes = Vec::with_capacity(analyser.frequency_bin_count());
                let mut sequence = 0u64;

                log::info!("Fallback analysis running every {:?}", interval);

                loop {
                    select! {
                        recv(command_rx) -> _ => break,
                        recv(samples) -> block => match block {
                            Ok(block) => ring.write_slice(&block),
                            Err(_) => {
                                log::info!("Fallback sample channel closed");
                                break;
                            }
                        },
                        recv(ticker) -> _ => {
                            if ring.is_empty() {
                                continue;
                            }
                            ring.snapshot_into(&mut window);
                            analyser.byte_frequency_data(&window, &mut bytes);
                            publisher.publish(engine.extract(&bytes, sequence));
                            sequence += 1;

                            if sequence % 512 == 0 {
                                log::debug!(
                                    "Fallback analysis: {} snapshots, {} superseded",
                                    publisher.published(),
                                    publisher.superseded()
                                );
                            }
                        }
                    }
                }
            })
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        Ok(Self {
            command_tx,
            thread_handle: Some(thread_handle),
        })
    }

    /// Stop the worker and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        let _ = self.command_tx.try_send(WorkerCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}

impl Drop for FallbackWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::publisher::channel;
    use crate::config::FallbackConfig;

    fn fast_config() -> AnalysisConfig {
        AnalysisConfig {
            fallback: FallbackConfig {
                poll_interval_ms: 1,
                smoothing_time_constant: 0.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / 44_100.0).sin())
            .collect()
    }

    #[test]
    fn analyses_forwarded_samples_on_each_tick() {
        let (tx, rx) = sample_channel();
        let (publisher, subscriber) = channel(4);
        let mut worker = FallbackWorker::spawn(&fast_config(), rx, publisher).unwrap();

        // Centred on bin 20 so the peak is a strict local maximum
        let mut sink = forwarding_sink(tx);
        sink(&sine(20.0 * 44_100.0 / 2048.0, 2048));

        let mut snapshot = None;
        for _ in 0..200 {
            if let Some(next) = subscriber.recv_timeout(Duration::from_millis(10)) {
                if next.bins.iter().any(|&b| b > 0) {
                    snapshot = Some(next);
                    break;
                }
            }
        }
        worker.stop();

        let snapshot = snapshot.expect("no non-silent snapshot");
        assert_eq!(snapshot.bins.len(), 1024);
        assert!(snapshot.bass > snapshot.treble);
        assert!(!snapshot.peaks.is_empty());
    }

    #[test]
    fn silence_yields_zero_features() {
        let (tx, rx) = sample_channel();
        let (publisher, subscriber) = channel(4);
        let mut worker = FallbackWorker::spawn(&fast_config(), rx, publisher).unwrap();

        tx.send(vec![0.0; 2048]).unwrap();
        let snapshot = subscriber
            .recv_timeout(Duration::from_secs(2))
            .expect("no snapshot");
        worker.stop();

        assert!(snapshot.bins.iter().all(|&b| b == 0));
        assert_eq!(snapshot.bass, 0.0);
        assert_eq!(snapshot.spectral_centroid, 0.0);
        assert!(snapshot.peaks.is_empty());
    }

    #[test]
    fn nothing_is_published_before_samples_arrive() {
        let (_tx, rx) = sample_channel();
        let (publisher, subscriber) = channel(4);
        let _worker = FallbackWorker::spawn(&fast_config(), rx, publisher).unwrap();

        assert!(subscriber.recv_timeout(Duration::from_millis(30)).is_none());
    }

    #[test]
    fn sequences_increase_across_ticks() {
        let (tx, rx) = sample_channel();
        let (publisher, subscriber) = channel(16);
        let mut worker = FallbackWorker::spawn(&fast_config(), rx, publisher).unwrap();

        tx.send(vec![0.1; 256]).unwrap();
        let first = subscriber.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = subscriber.recv_timeout(Duration::from_secs(2)).unwrap();
        worker.stop();

        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn stop_is_idempotent_and_joins() {
        let (_tx, rx) = sample_channel();
        let (publisher, _subscriber) = channel(1);
        let mut worker = FallbackWorker::spawn(&fast_config(), rx, publisher).unwrap();

        assert!(worker.is_running());
        worker.stop();
        worker.stop();
        assert!(!worker.is_running());
    }

    #[test]
    fn worker_exits_when_the_device_side_hangs_up() {
        let (tx, rx) = sample_channel();
        let (publisher, _subscriber) = channel(1);
        let worker = FallbackWorker::spawn(&fast_config(), rx, publisher).unwrap();

        drop(tx);
        for _ in 0..200 {
            if !worker.is_running() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("worker still running after sample channel closed");
    }

    #[test]
    fn invalid_fallback_config_is_rejected() {
        let mut config = fast_config();
        config.fallback.fft_size = 1000;
        let (_tx, rx) = sample_channel();
        let (publisher, _subscriber) = channel(1);

        assert!(matches!(
            FallbackWorker::spawn(&config, rx, publisher),
            Err(CaptureError::InvalidConfig(_))
        ));
    }
}
