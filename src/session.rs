//! Capture session lifecycle and processing path negotiation

use crate::audio::{
    channel, forwarding_sink, sample_channel, AudioBackend, CaptureError, CpalBackend,
    FallbackWorker, FeatureFrame, FeatureProcessor, FeatureSubscriber, InputDevice, InputEvent,
    InputEventSink, InputStream, SpectralSnapshot,
};
use crate::config::AnalysisConfig;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How features are being produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingPath {
    /// Per-quantum processing on the device callback, emitting [`FeatureFrame`]s
    Realtime,
    /// Fixed-rate polling analysis, emitting [`SpectralSnapshot`]s
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
    Active(ProcessingPath),
    Stopped,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// `stop()` was called
    Stopped,
    DeviceLost(String),
}

/// Lifecycle notifications, readable from [`AudioCaptureSession::events`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started(ProcessingPath),
    /// Real-time registration failed and the polling path took over
    FellBack { reason: String },
    Ended(EndReason),
    Failed(String),
}

/// Owns one device acquisition from `start()` to `stop()`.
///
/// Sessions are single use: once stopped or failed, create a new one.
pub struct AudioCaptureSession<B: AudioBackend> {
    backend: B,
    config: AnalysisConfig,
    state: SessionState,

    device: Option<Box<dyn InputDevice>>,
    stream: Option<Box<dyn InputStream>>,
    worker: Option<FallbackWorker>,

    frames: Option<FeatureSubscriber<FeatureFrame>>,
    snapshots: Option<FeatureSubscriber<SpectralSnapshot>>,
    last_snapshot: Option<SpectralSnapshot>,

    input_tx: Sender<InputEvent>,
    input_rx: Receiver<InputEvent>,
    event_tx: Sender<SessionEvent>,
    event_rx: Receiver<SessionEvent>,

    sample_rate: Option<u32>,
    device_name: Option<String>,
}

/// Session over the system's default audio host
pub type MicrophoneSession = AudioCaptureSession<CpalBackend>;

impl MicrophoneSession {
    pub fn microphone(config: AnalysisConfig) -> Result<Self, CaptureError> {
        Self::new(CpalBackend, config)
    }
}

impl<B: AudioBackend> AudioCaptureSession<B> {
    pub fn new(backend: B, config: AnalysisConfig) -> Result<Self, CaptureError> {
        config.validate()?;

        let (input_tx, input_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        Ok(Self {
            backend,
            config,
            state: SessionState::Idle,
            device: None,
            stream: None,
            worker: None,
            frames: None,
            snapshots: None,
            last_snapshot: None,
            input_tx,
            input_rx,
            event_tx,
            event_rx,
            sample_rate: None,
            device_name: None,
        })
    }

    /// Acquire the input and start processing, preferring the real-time path.
    pub fn start(&mut self) -> Result<ProcessingPath, CaptureError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Requesting | SessionState::Active(_) => {
                return Err(CaptureError::AlreadyStarted)
            }
            SessionState::Stopped | SessionState::Error(_) => {
                return Err(CaptureError::SessionFinished)
            }
        }

        self.state = SessionState::Requesting;

        match self.negotiate() {
            Ok(path) => {
                log::info!(
                    "Capture session active on {} ({:?} path)",
                    self.device_name.as_deref().unwrap_or("unknown device"),
                    path
                );
                self.state = SessionState::Active(path);
                self.emit(SessionEvent::Started(path));
                Ok(path)
            }
            Err(e) => {
                log::error!("Capture session failed to start: {}", e);
                self.release();
                self.state = SessionState::Error(e.to_string());
                self.emit(SessionEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn negotiate(&mut self) -> Result<ProcessingPath, CaptureError> {
        let mut device = self.backend.open_input(&self.config)?;
        let sample_rate = device.sample_rate();
        self.sample_rate = Some(sample_rate);
        self.device_name = Some(device.name());

        let (publisher, frames) = channel(self.config.frame_queue);
        let processor = FeatureProcessor::new(&self.config, sample_rate, publisher)?;

        match device.build_realtime_stream(
            self.config.quantum_size,
            processor.into_sink(),
            self.input_sink(),
        ) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.device = Some(device);
                self.frames = Some(frames);
                return Ok(ProcessingPath::Realtime);
            }
            Err(CaptureError::RealtimeRegistrationFailed(reason)) => {
                log::warn!(
                    "Real-time processing unavailable ({}), falling back to polling analysis",
                    reason
                );
                self.emit(SessionEvent::FellBack { reason });
            }
            Err(e) => return Err(e),
        }

        let (samples_tx, samples_rx) = sample_channel();
        let (publisher, snapshots) = channel(self.config.frame_queue);
        let worker = FallbackWorker::spawn(&self.config, samples_rx, publisher)?;
        let stream =
            device.build_polling_stream(forwarding_sink(samples_tx), self.input_sink())?;

        self.stream = Some(stream);
        self.worker = Some(worker);
        self.device = Some(device);
        self.snapshots = Some(snapshots);
        Ok(ProcessingPath::Fallback)
    }

    /// Stop processing and release the device. No-op unless started.
    pub fn stop(&mut self) {
        self.apply_input_events();
        match self.state {
            SessionState::Requesting | SessionState::Active(_) => {
                self.release();
                self.state = SessionState::Stopped;
                self.emit(SessionEvent::Ended(EndReason::Stopped));
                log::info!("Capture session stopped");
            }
            SessionState::Idle | SessionState::Stopped | SessionState::Error(_) => {}
        }
    }

    /// Apply pending input notifications and return the current state.
    pub fn poll(&mut self) -> &SessionState {
        self.apply_input_events();
        &self.state
    }

    /// Current state, with any pending input notifications applied.
    pub fn state(&mut self) -> &SessionState {
        self.poll()
    }

    pub fn active_path(&mut self) -> Option<ProcessingPath> {
        match self.poll() {
            SessionState::Active(path) => Some(*path),
            _ => None,
        }
    }

    /// Lifecycle event stream. Every clone sees each event once between them.
    ///
    /// The end of input is posted here from the host's error callback, so
    /// waiting on this receiver observes device loss without polling.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.event_rx.clone()
    }

    /// Newest real-time frame, discarding older pending ones.
    pub fn latest_frame(&mut self) -> Option<FeatureFrame> {
        self.apply_input_events();
        self.frames.as_ref().and_then(FeatureSubscriber::latest)
    }

    /// Wait up to `timeout` for the next real-time frame.
    ///
    /// Returns early once input has ended and every pending frame is read.
    pub fn next_frame(&mut self, timeout: Duration) -> Option<FeatureFrame> {
        self.apply_input_events();
        let frame = self.frames.as_ref()?.recv_timeout(timeout);
        self.apply_input_events();
        frame
    }

    /// Most recent fallback snapshot. Holds the last value between ticks.
    pub fn snapshot(&mut self) -> Option<&SpectralSnapshot> {
        self.apply_input_events();
        if let Some(latest) = self.snapshots.as_ref().and_then(FeatureSubscriber::latest) {
            self.last_snapshot = Some(latest);
        }
        self.last_snapshot.as_ref()
    }

    /// Wait up to `timeout` for the next fallback snapshot.
    pub fn next_snapshot(&mut self, timeout: Duration) -> Option<SpectralSnapshot> {
        self.apply_input_events();
        let next = self.snapshots.as_ref()?.recv_timeout(timeout);
        self.apply_input_events();
        let next = next?;
        self.last_snapshot = Some(next.clone());
        Some(next)
    }

    /// Rate of the acquired device, once started.
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Event sink handed to streams. Consumers hear about the end of input
    /// on `events()` immediately; the state follows on the next accessor call.
    fn input_sink(&self) -> InputEventSink {
        let input_tx = self.input_tx.clone();
        let event_tx = self.event_tx.clone();
        let mut ended = false;

        Box::new(move |event: InputEvent| {
            // Hosts may repeat the error until the stream is torn down
            if ended {
                return;
            }
            ended = true;

            let notice = match &event {
                InputEvent::DeviceLost(reason) => {
                    SessionEvent::Ended(EndReason::DeviceLost(reason.clone()))
                }
                InputEvent::Failed(reason) => SessionEvent::Failed(reason.clone()),
            };
            let _ = input_tx.send(event);
            let _ = event_tx.send(notice);
        })
    }

    /// Move to a terminal state for input that ended under us. Events were
    /// already posted by the input sink.
    fn apply_input_events(&mut self) {
        while let Ok(event) = self.input_rx.try_recv() {
            if !matches!(self.state, SessionState::Active(_)) {
                continue;
            }
            self.release();
            self.state = match event {
                InputEvent::DeviceLost(reason) => {
                    log::warn!("Input device lost: {}", reason);
                    SessionState::Stopped
                }
                InputEvent::Failed(reason) => {
                    log::error!("Input stream failed: {}", reason);
                    SessionState::Error(reason)
                }
            };
        }

        if self.state == SessionState::Active(ProcessingPath::Fallback)
            && !self.worker.as_ref().map_or(false, FallbackWorker::is_running)
        {
            let reason = "fallback analysis stopped unexpectedly".to_string();
            log::error!("{}", reason);
            self.release();
            self.state = SessionState::Error(reason.clone());
            self.emit(SessionEvent::Failed(reason));
        }
    }

    /// Halt delivery first, then analysis, then give the device back.
    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        self.device = None;
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl<B: AudioBackend> Drop for AudioCaptureSession<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
