//! Seam between the capture session and an audio host

use crate::config::{AnalysisConfig, ConfigError};
use thiserror::Error;

/// Audio capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Real-time processing could not be registered: {0}")]
    RealtimeRegistrationFailed(String),

    #[error("Failed to build audio stream: {0}")]
    Stream(String),

    #[error("Thread error: {0}")]
    Thread(String),

    #[error("Capture session already started")]
    AlreadyStarted,

    #[error("Capture session has finished; start a new session")]
    SessionFinished,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Receives mono samples on the device callback thread.
///
/// Implementations must not block; they run under the device deadline.
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Notifications raised by a running input stream. Both end the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// The device went away; no further samples will arrive
    DeviceLost(String),
    /// The host reported a stream error it does not recover from
    Failed(String),
}

/// Receives [`InputEvent`]s on the host's error callback thread.
pub type InputEventSink = Box<dyn FnMut(InputEvent) + Send + 'static>;

/// An audio host able to open an input device.
pub trait AudioBackend: Send {
    /// Acquire the input device selected by `config`. This is the
    /// permission point: denial surfaces as [`CaptureError::PermissionDenied`].
    fn open_input(&mut self, config: &AnalysisConfig) -> Result<Box<dyn InputDevice>, CaptureError>;
}

/// An acquired input device. Dropping it releases the device.
pub trait InputDevice: Send {
    fn name(&self) -> String;

    /// Rate of the samples delivered to sinks.
    fn sample_rate(&self) -> u32;

    /// Build a stream delivering fixed quanta of `quantum` samples straight
    /// into `sink`. Fails with [`CaptureError::RealtimeRegistrationFailed`]
    /// when the host cannot honour real-time delivery.
    fn build_realtime_stream(
        &mut self,
        quantum: usize,
        sink: SampleSink,
        events: InputEventSink,
    ) -> Result<Box<dyn InputStream>, CaptureError>;

    /// Build a stream with host-chosen buffer sizes, used by the polling path.
    fn build_polling_stream(
        &mut self,
        sink: SampleSink,
        events: InputEventSink,
    ) -> Result<Box<dyn InputStream>, CaptureError>;
}

/// A running input stream.
pub trait InputStream: Send {
    /// Halt sample delivery synchronously. Idempotent.
    fn stop(&mut self);
}
