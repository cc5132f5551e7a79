//! Microphone capture
//!
//! Provides live frame capture using CPAL (Cross-Platform Audio Library).
//! The device callback chunks incoming samples into fixed-size frames and
//! hands them to the reading thread over a bounded channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use tracing::{debug, error, info};

use super::frame::{Frame, FrameFormat};
use super::source::{FrameSource, SourceError};

/// Frames buffered between the device callback and the reader
const FRAME_QUEUE_DEPTH: usize = 64;

const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Information about an available audio input device
#[derive(Debug)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub supported_sample_rates: Vec<u32>,
    pub supported_formats: Vec<SampleFormat>,
}

/// List all available audio input devices
pub fn list_devices() -> Result<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let devices = host.input_devices()?;
    let default_device = host.default_input_device();

    let mut device_infos = Vec::new();

    for device in devices {
        let name = device.name().unwrap_or("Unknown Device".to_string());
        let is_default = default_device
            .as_ref()
            .map(|d| d.name().unwrap_or_default() == name)
            .unwrap_or(false);

        let supported_sample_rates = device
            .supported_input_configs()?
            .map(|c| c.max_sample_rate().0)
            .collect();

        let supported_formats = device
            .supported_input_configs()?
            .map(|c| c.sample_format())
            .collect();

        device_infos.push(AudioDeviceInfo {
            name,
            is_default,
            supported_sample_rates,
            supported_formats,
        });
    }

    Ok(device_infos)
}

/// Splits device callbacks into frames and tracks dropped samples
struct Framer {
    frame_len: usize,
    pending: Vec<i16>,
    sender: SyncSender<Frame>,
    dropped: Arc<AtomicUsize>,
}

impl Framer {
    fn push(&mut self, samples: impl IntoIterator<Item = i16>) {
        self.pending.extend(samples);
        while self.pending.len() >= self.frame_len {
            let frame = Frame::new(self.pending.drain(..self.frame_len).collect::<Vec<_>>());
            match self.sender.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(self.frame_len, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.pending.clear();
                    return;
                }
            }
        }
    }
}

/// Live mono capture from an input device
pub struct MicrophoneSource {
    // Keeps the device stream alive; cpal streams are not Send on every
    // platform, so the stream is parked on its own thread.
    _stream_guard: StreamGuard,
    receiver: Receiver<Frame>,
    dropped: Arc<AtomicUsize>,
    format: FrameFormat,
}

struct StreamGuard {
    shutdown: Option<mpsc::Sender<()>>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl MicrophoneSource {
    /// Open the named input device (or the default one) and start capturing
    pub fn open(device_name: Option<&str>, format: FrameFormat) -> Result<Self> {
        let (frame_tx, frame_rx) = mpsc::sync_channel(FRAME_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let dropped = Arc::new(AtomicUsize::new(0));

        let device_name = device_name.map(str::to_string);
        let dropped_clone = dropped.clone();

        std::thread::Builder::new()
            .name("chirp-capture".to_string())
            .spawn(move || {
                let stream = match Self::start_stream(
                    device_name.as_deref(),
                    format,
                    frame_tx,
                    dropped_clone,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Park until the source is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Capture stream closed");
            })?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("Capture thread exited before the stream started"))??;

        Ok(Self {
            _stream_guard: StreamGuard {
                shutdown: Some(shutdown_tx),
            },
            receiver: frame_rx,
            dropped,
            format,
        })
    }

    fn find_device(device_name: Option<&str>) -> Result<Device> {
        let host = cpal::default_host();
        match device_name {
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow!("Input device '{}' not found", name)),
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("No default input device found")),
        }
    }

    fn start_stream(
        device_name: Option<&str>,
        format: FrameFormat,
        sender: SyncSender<Frame>,
        dropped: Arc<AtomicUsize>,
    ) -> Result<cpal::Stream> {
        let device = Self::find_device(device_name)?;
        let supported = device.default_input_config()?;
        let channels = supported.channels().max(1) as usize;

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate = format.sample_rate,
            channels,
            sample_format = ?supported.sample_format(),
            "Opening input stream"
        );

        let framer = Arc::new(Mutex::new(Framer {
            frame_len: format.frame_len,
            pending: Vec::with_capacity(format.frame_len * 2),
            sender,
            dropped,
        }));

        let stream = match supported.sample_format() {
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, channels, framer)?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, channels, framer)?,
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, channels, framer)?,
            other => return Err(anyhow!("Unsupported sample format: {:?}", other)),
        };

        stream.play()?;
        Ok(stream)
    }

    /// Build an input stream that downmixes to mono i16 and frames it
    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        channels: usize,
        framer: Arc<Mutex<Framer>>,
    ) -> Result<cpal::Stream>
    where
        T: cpal::Sample + cpal::SizedSample + Send + 'static,
        f32: cpal::FromSample<T>,
    {
        let stream = device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono = data.chunks(channels).map(|chunk| {
                    let sum: f32 = chunk
                        .iter()
                        .map(|&s| {
                            let sample_f32: f32 = cpal::Sample::from_sample(s);
                            sample_f32
                        })
                        .sum();
                    let sample = sum / chunk.len() as f32;
                    (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
                });

                if let Ok(mut framer) = framer.lock() {
                    framer.push(mono);
                }
            },
            |err| {
                error!("Audio stream error: {}", err);
            },
            None,
        )?;

        Ok(stream)
    }
}

impl FrameSource for MicrophoneSource {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        next_frame(&self.receiver, &self.dropped, READ_POLL_INTERVAL)
    }
}

/// Wait up to `timeout` for the next frame, reporting lost samples first
fn next_frame(
    receiver: &Receiver<Frame>,
    dropped: &AtomicUsize,
    timeout: Duration,
) -> Result<Frame, SourceError> {
    let lost = dropped.swap(0, Ordering::Relaxed);
    if lost > 0 {
        return Err(SourceError::Overrun { dropped: lost });
    }

    match receiver.recv_timeout(timeout) {
        Ok(frame) => Ok(frame),
        Err(RecvTimeoutError::Timeout) => Err(SourceError::Idle),
        Err(RecvTimeoutError::Disconnected) => Err(SourceError::Closed),
    }
}
