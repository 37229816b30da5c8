//! Audio capture and analysis module

mod analyser;
mod backend;
mod capture;
mod fallback;
mod fft;
mod pitch;
mod processor;
mod publisher;
mod ring_buffer;
mod scheduler;
mod sources;
mod spectral;

pub use analyser::{blackman_window, ByteFrequencyAnalyser};
pub use backend::{
    AudioBackend, CaptureError, InputDevice, InputEvent, InputEventSink, InputStream, SampleSink,
};
pub use capture::CpalBackend;
pub use fallback::{forwarding_sink, sample_channel, FallbackWorker};
pub use fft::{forward, hann_window, inverse, FftEngine};
pub use pitch::{autocorrelation, PitchDetector};
pub use processor::{rms, FeatureFrame, FeatureProcessor};
pub use publisher::{channel, Delivery, FeaturePublisher, FeatureSubscriber};
pub use ring_buffer::SampleRingBuffer;
pub use scheduler::AnalysisScheduler;
pub use sources::{list_sources, InputSource, SourceError, INPUT_PREFIX};
pub use spectral::{
    band_energies, find_peaks, spectral_centroid, spectral_rolloff, zero_crossing_rate, Peak,
    PeakOrder, SpectralFeatureEngine, SpectralSnapshot, BYTE_MIDPOINT, MAX_PEAKS, PEAK_FLOOR,
};
