//! cpal input backend with thread-owned streams

use super::backend::{
    AudioBackend, CaptureError, InputDevice, InputEvent, InputEventSink, InputStream, SampleSink,
};
use super::sources::INPUT_PREFIX;
use crate::config::AnalysisConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize,
    SupportedStreamConfig, SupportedStreamConfigRange,
};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Commands sent to a stream thread
enum StreamCommand {
    Stop,
}

/// Captures from the system's cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(&mut self, config: &AnalysisConfig) -> Result<Box<dyn InputDevice>, CaptureError> {
        let host = cpal::default_host();

        let device = match &config.device {
            Some(wanted) => {
                let wanted = wanted.trim_start_matches(INPUT_PREFIX);
                host.input_devices()
                    .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
                    .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                    .ok_or_else(|| {
                        CaptureError::DeviceUnavailable(format!("input device not found: {}", wanted))
                    })?
            }
            None => host.default_input_device().ok_or_else(|| {
                CaptureError::DeviceUnavailable("no default input device".to_string())
            })?,
        };

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let supported = choose_input_config(&device, config.sample_rate)?;

        log::info!(
            "Audio input: {} ({} Hz, {} channels, {:?})",
            name,
            supported.sample_rate().0,
            supported.channels(),
            supported.sample_format()
        );

        Ok(Box::new(CpalInputDevice {
            device,
            name,
            supported,
        }))
    }
}

/// Pick a configuration at the preferred rate, favouring fewer channels and
/// f32 samples; fall back to the device default rate.
fn choose_input_config(
    device: &Device,
    sample_rate: u32,
) -> Result<SupportedStreamConfig, CaptureError> {
    let preferred = SampleRate(sample_rate);
    let ranges = device.supported_input_configs().map_err(|e| match e {
        cpal::SupportedStreamConfigsError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable(e.to_string())
        }
        cpal::SupportedStreamConfigsError::BackendSpecific { err }
            if looks_like_permission_error(&err.description) =>
        {
            CaptureError::PermissionDenied(err.description)
        }
        other => CaptureError::DeviceUnavailable(other.to_string()),
    })?;

    let rank = |range: &SupportedStreamConfigRange| {
        (range.channels(), range.sample_format() != SampleFormat::F32)
    };

    let mut best: Option<SupportedStreamConfigRange> = None;
    for range in ranges {
        if range.min_sample_rate() <= preferred && preferred <= range.max_sample_rate() {
            let better = best.as_ref().map_or(true, |current| rank(&range) < rank(current));
            if better {
                best = Some(range);
            }
        }
    }

    if let Some(range) = best {
        return Ok(range.with_sample_rate(preferred));
    }

    let default = device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable(e.to_string())
        }
        cpal::DefaultStreamConfigError::BackendSpecific { err }
            if looks_like_permission_error(&err.description) =>
        {
            CaptureError::PermissionDenied(err.description)
        }
        other => CaptureError::DeviceUnavailable(other.to_string()),
    })?;
    log::warn!(
        "Input device does not support {} Hz, using {} Hz",
        sample_rate,
        default.sample_rate().0
    );
    Ok(default)
}

/// Hosts report microphone access refusal as backend-specific text.
fn looks_like_permission_error(description: &str) -> bool {
    let description = description.to_lowercase();
    description.contains("permission")
        || description.contains("denied")
        || description.contains("not authorized")
}

struct CpalInputDevice {
    device: Device,
    name: String,
    supported: SupportedStreamConfig,
}

impl InputDevice for CpalInputDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn sample_rate(&self) -> u32 {
        self.supported.sample_rate().0
    }

    fn build_realtime_stream(
        &mut self,
        quantum: usize,
        sink: SampleSink,
        events: InputEventSink,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        let frames = quantum as u32;
        if let SupportedBufferSize::Range { min, max } = self.supported.buffer_size() {
            if frames < *min || frames > *max {
                return Err(CaptureError::RealtimeRegistrationFailed(format!(
                    "device buffer range {}..={} excludes {}-sample quanta",
                    min, max, quantum
                )));
            }
        }

        let config = StreamConfig {
            buffer_size: BufferSize::Fixed(frames),
            ..self.supported.config()
        };
        let stream = spawn_stream_thread(
            self.device.clone(),
            config,
            self.supported.sample_format(),
            true,
            sink,
            events,
        )?;
        Ok(Box::new(stream))
    }

    fn build_polling_stream(
        &mut self,
        sink: SampleSink,
        events: InputEventSink,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        let config = StreamConfig {
            buffer_size: BufferSize::Default,
            ..self.supported.config()
        };
        let stream = spawn_stream_thread(
            self.device.clone(),
            config,
            self.supported.sample_format(),
            false,
            sink,
            events,
        )?;
        Ok(Box::new(stream))
    }
}

/// Handle to a stream owned by a dedicated thread.
///
/// cpal streams are not `Send` on every platform, so the stream lives and
/// dies on its own thread; this handle only holds the command channel.
struct CpalStream {
    command_tx: mpsc::Sender<StreamCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl InputStream for CpalStream {
    fn stop(&mut self) {
        let _ = self.command_tx.send(StreamCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build and start a stream on its own thread, waiting for the outcome.
fn spawn_stream_thread(
    device: Device,
    config: StreamConfig,
    format: SampleFormat,
    realtime: bool,
    sink: SampleSink,
    events: InputEventSink,
) -> Result<CpalStream, CaptureError> {
    let (command_tx, command_rx) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();

    let thread_handle = thread::Builder::new()
        .name("audio-capture".to_string())
        .spawn(move || {
            let channels = config.channels as usize;
            let built = match format {
                SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, sink, events),
                SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, sink, events),
                SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, sink, events),
                SampleFormat::I32 => build_stream::<i32>(&device, &config, channels, sink, events),
                other => {
                    let _ = ready_tx.send(Err(unsupported_format(other, realtime)));
                    return;
                }
            };

            let stream = match built {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(classify_build_error(e, realtime)));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let error = match e {
                    cpal::PlayStreamError::DeviceNotAvailable => {
                        CaptureError::DeviceUnavailable(e.to_string())
                    }
                    other if realtime => CaptureError::RealtimeRegistrationFailed(other.to_string()),
                    other => CaptureError::Stream(other.to_string()),
                };
                let _ = ready_tx.send(Err(error));
                return;
            }

            log::info!(
                "Audio capture started ({}, {:?} buffer)",
                if realtime { "real-time" } else { "polling" },
                config.buffer_size
            );
            let _ = ready_tx.send(Ok(()));

            // Park until stopped or the handle is dropped
            match command_rx.recv() {
                Ok(StreamCommand::Stop) => log::info!("Audio capture stopping"),
                Err(_) => log::info!("Audio capture channel disconnected"),
            }
            drop(stream);
        })
        .map_err(|e| CaptureError::Thread(e.to_string()))?;

    let mut stream = CpalStream {
        command_tx,
        thread_handle: Some(thread_handle),
    };

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(stream),
        Ok(Err(e)) => {
            stream.stop();
            Err(e)
        }
        Err(_) => {
            stream.stop();
            Err(CaptureError::Thread(
                "audio thread exited before starting".to_string(),
            ))
        }
    }
}

fn unsupported_format(format: SampleFormat, realtime: bool) -> CaptureError {
    let message = format!("unsupported sample format {:?}", format);
    if realtime {
        CaptureError::RealtimeRegistrationFailed(message)
    } else {
        CaptureError::Stream(message)
    }
}

fn classify_build_error(error: cpal::BuildStreamError, realtime: bool) -> CaptureError {
    match error {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable(error.to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err }
            if looks_like_permission_error(&err.description) =>
        {
            CaptureError::PermissionDenied(err.description)
        }
        other if realtime => CaptureError::RealtimeRegistrationFailed(other.to_string()),
        other => CaptureError::Stream(other.to_string()),
    }
}

/// Average interleaved frames into mono.
fn downmix_into<T>(data: &[T], channels: usize, out: &mut Vec<f32>)
where
    T: cpal::Sample,
    f32: cpal::FromSample<T>,
{
    let channels = channels.max(1);
    out.clear();
    out.extend(data.chunks(channels).map(|frame| {
        let sum: f32 = frame
            .iter()
            .map(|&s| -> f32 { cpal::Sample::from_sample(s) })
            .sum();
        sum / frame.len() as f32
    }));
}

/// Build the input stream for a given sample type
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    channels: usize,
    mut sink: SampleSink,
    mut events: InputEventSink,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let mut mono: Vec<f32> = Vec::with_capacity(4096);

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            downmix_into(data, channels, &mut mono);
            sink(&mono);
        },
        move |err| match err {
            cpal::StreamError::DeviceNotAvailable => {
                log::error!("Audio input device lost");
                events(InputEvent::DeviceLost(
                    "input device no longer available".to_string(),
                ));
            }
            other => {
                log::error!("Audio stream error: {}", other);
                events(InputEvent::Failed(other.to_string()));
            }
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_interleaved_frames() {
        let mut out = Vec::new();
        downmix_into(&[1.0f32, 0.0, 0.5, 0.5, -1.0, 1.0], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn downmix_passes_mono_through() {
        let mut out = vec![9.0];
        downmix_into(&[0.25f32, -0.25], 1, &mut out);
        assert_eq!(out, vec![0.25, -0.25]);
    }

    #[test]
    fn downmix_converts_integer_samples() {
        let mut out = Vec::new();
        downmix_into(&[i16::MAX, i16::MAX], 2, &mut out);
        assert!((out[0] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn permission_errors_are_recognised() {
        assert!(looks_like_permission_error("Microphone access denied by user"));
        assert!(looks_like_permission_error("Permission error (kAudioHardware)"));
        assert!(!looks_like_permission_error("buffer underrun"));
    }

    #[test]
    fn build_errors_map_to_the_negotiation_outcome() {
        assert!(matches!(
            classify_build_error(cpal::BuildStreamError::StreamConfigNotSupported, true),
            CaptureError::RealtimeRegistrationFailed(_)
        ));
        assert!(matches!(
            classify_build_error(cpal::BuildStreamError::StreamConfigNotSupported, false),
            CaptureError::Stream(_)
        ));
        assert!(matches!(
            classify_build_error(cpal::BuildStreamError::DeviceNotAvailable, true),
            CaptureError::DeviceUnavailable(_)
        ));
    }
}
