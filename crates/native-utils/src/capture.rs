//! Microphone acquisition.

use async_trait::async_trait;
use std::time::Duration;
use voicecoach_core::{CaptureStream, MediaAcquirer, SessionError};

#[cfg(feature = "host-audio")]
pub use host::{CpalCapture, CpalMediaAcquirer};

/// The shape of the frames a capture stream produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Output sample rate after resampling.
    pub sample_rate: u32,
    /// Duration of every emitted frame.
    pub frame: Duration,
    /// Frames buffered before new ones are dropped.
    pub buffer_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::pcm::PCMU_SAMPLE_RATE,
            frame: Duration::from_millis(20),
            buffer_frames: 64,
        }
    }
}

/// Stand-in for builds without host audio support.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedMediaAcquirer;

#[async_trait]
impl MediaAcquirer for UnsupportedMediaAcquirer {
    async fn acquire(&self) -> Result<Box<dyn CaptureStream>, SessionError> {
        Err(SessionError::CapabilityUnavailable(
            "built without host audio capture".to_string(),
        ))
    }
}

#[cfg(feature = "host-audio")]
mod host {
    use super::CaptureConfig;
    use crate::pcm::{FrameAssembler, convert_i16_to_f32, downmix_to_mono};
    use async_trait::async_trait;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::mpsc as std_mpsc;
    use tokio::sync::{mpsc, oneshot};
    use tracing::{debug, error, info, trace};
    use voicecoach_core::{AudioFrame, CaptureStream, MediaAcquirer, SessionError};

    /// Opens the host's default input device through `cpal`.
    #[derive(Debug, Default, Clone)]
    pub struct CpalMediaAcquirer {
        config: CaptureConfig,
    }

    impl CpalMediaAcquirer {
        pub fn new(config: CaptureConfig) -> Self {
            Self { config }
        }
    }

    #[async_trait]
    impl MediaAcquirer for CpalMediaAcquirer {
        async fn acquire(&self) -> Result<Box<dyn CaptureStream>, SessionError> {
            let config = self.config.clone();
            let (ready_tx, ready_rx) = oneshot::channel();
            let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
            let (frame_tx, frame_rx) = mpsc::channel(config.buffer_frames.max(1));

            // cpal streams are not `Send`; the stream lives and dies on this thread.
            std::thread::Builder::new()
                .name("voicecoach-capture".to_string())
                .spawn(move || run_capture(config, frame_tx, ready_tx, stop_rx))
                .map_err(|e| {
                    SessionError::Unknown(format!("failed to spawn capture thread: {e}"))
                })?;

            let label = ready_rx.await.map_err(|_| {
                SessionError::Unknown("capture thread exited before opening the device".to_string())
            })??;
            info!(device = %label, "Microphone capture started.");
            Ok(Box::new(CpalCapture {
                label,
                frames: Some(frame_rx),
                stop: Some(stop_tx),
            }))
        }
    }

    /// A running capture. Stopping (or dropping) it closes the device.
    pub struct CpalCapture {
        label: String,
        frames: Option<mpsc::Receiver<AudioFrame>>,
        stop: Option<std_mpsc::Sender<()>>,
    }

    impl CaptureStream for CpalCapture {
        fn label(&self) -> &str {
            &self.label
        }

        fn take_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
            self.frames.take()
        }

        fn stop(&mut self) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
                self.frames = None;
                debug!(device = %self.label, "Microphone capture stopped.");
            }
        }
    }

    impl Drop for CpalCapture {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn run_capture(
        config: CaptureConfig,
        frame_tx: mpsc::Sender<AudioFrame>,
        ready: oneshot::Sender<Result<String, SessionError>>,
        stop: std_mpsc::Receiver<()>,
    ) {
        let stream = match open_stream(&config, frame_tx) {
            Ok((stream, label)) => {
                if ready.send(Ok(label)).is_err() {
                    return;
                }
                stream
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        // Returns on an explicit stop or when the handle is dropped.
        let _ = stop.recv();
        drop(stream);
    }

    fn open_stream(
        config: &CaptureConfig,
        frame_tx: mpsc::Sender<AudioFrame>,
    ) -> Result<(cpal::Stream, String), SessionError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            SessionError::CapabilityUnavailable("no audio input device is present".to_string())
        })?;
        let label = device
            .name()
            .unwrap_or_else(|_| "default input".to_string());

        let supported = device
            .default_input_config()
            .map_err(classify_config_error)?;
        let channels = supported.channels();
        let input_rate = supported.sample_rate().0;
        let sample_format = supported.sample_format();
        let stream_config = supported.config();
        debug!(device = %label, channels, input_rate, ?sample_format, "Opening input stream.");

        let mut assembler = FrameAssembler::new(input_rate, config.sample_rate, config.frame)
            .map_err(|e| SessionError::Unknown(format!("failed to create resampler: {e}")))?;
        let on_error = |e: cpal::StreamError| error!(error = %e, "Capture stream error.");

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    deliver(&mut assembler, &frame_tx, &downmix_to_mono(data, channels));
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let samples = convert_i16_to_f32(data);
                    deliver(&mut assembler, &frame_tx, &downmix_to_mono(&samples, channels));
                },
                on_error,
                None,
            ),
            other => {
                return Err(SessionError::CapabilityUnavailable(format!(
                    "unsupported input sample format {other:?}"
                )));
            }
        }
        .map_err(classify_build_error)?;

        stream
            .play()
            .map_err(|e| SessionError::Unknown(format!("failed to start capture: {e}")))?;
        Ok((stream, label))
    }

    fn deliver(assembler: &mut FrameAssembler, tx: &mpsc::Sender<AudioFrame>, mono: &[f32]) {
        for frame in assembler.push(mono) {
            if tx.try_send(frame).is_err() {
                trace!("Dropping capture frame; consumer is behind or gone.");
            }
        }
    }

    fn classify_config_error(e: cpal::DefaultStreamConfigError) -> SessionError {
        match e {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => SessionError::PermissionDenied,
            cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
                SessionError::CapabilityUnavailable("input streams are not supported".to_string())
            }
            other => SessionError::Unknown(other.to_string()),
        }
    }

    fn classify_build_error(e: cpal::BuildStreamError) -> SessionError {
        match e {
            cpal::BuildStreamError::DeviceNotAvailable => SessionError::PermissionDenied,
            other => SessionError::Unknown(other.to_string()),
        }
    }
}
