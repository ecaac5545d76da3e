use std::collections::VecDeque;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use crate::config::AudioConfig;
use crate::error::{BarkwatchError, Result};

use super::AudioSource;
use super::resample::Resampler;

/// Upper bound on converted samples held between reads (about a second at
/// 16 kHz). Older audio is dropped first.
const MAX_PENDING_SAMPLES: usize = 16384;

/// Microphone input via cpal, converted to mono 16-bit PCM at the capture
/// sample rate.
///
/// The cpal stream is not `Send`, so it lives on its own thread for the
/// lifetime of the source; samples arrive over a bounded channel.
pub struct MicrophoneSource {
    receiver: Receiver<Vec<f32>>,
    stop_tx: Option<Sender<()>>,
    stream_thread: Option<JoinHandle<()>>,
    resampler: Resampler,
    pending: VecDeque<i16>,
    device_name: String,
}

impl MicrophoneSource {
    pub fn open(config: &AudioConfig, sample_rate: u32, channels: u16) -> Result<Self> {
        if channels != 1 {
            return Err(BarkwatchError::Audio(format!(
                "microphone source produces mono audio, capture.channels is {channels}"
            )));
        }

        // Bounded channel; the audio callback uses try_send and never blocks
        let (tx, rx) = bounded::<Vec<f32>>(64);
        let (ready_tx, ready_rx) = bounded::<Result<(u32, u16, String)>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let device_wanted = config.device.clone();

        let stream_thread = std::thread::Builder::new()
            .name("barkwatch-mic".to_string())
            .spawn(move || {
                let (stream, info) = match build_stream(device_wanted.as_deref(), tx) {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(BarkwatchError::Audio(format!(
                        "failed to start audio stream: {e}"
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(info));
                // Hold the stream open until the source is dropped.
                let _ = stop_rx.recv();
                let _ = stream.pause();
                tracing::debug!("microphone stream thread exiting");
            })
            .map_err(|e| BarkwatchError::Audio(format!("failed to spawn audio thread: {e}")))?;

        let (source_rate, source_channels, device_name) = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|e| BarkwatchError::Audio(format!("audio stream did not start: {e}")))??;

        tracing::info!(
            "microphone '{device_name}' open: source_rate={source_rate}, channels={source_channels}, target_rate={sample_rate}"
        );

        Ok(Self {
            receiver: rx,
            stop_tx: Some(stop_tx),
            stream_thread: Some(stream_thread),
            resampler: Resampler::new(source_rate, source_channels, sample_rate)?,
            pending: VecDeque::with_capacity(MAX_PENDING_SAMPLES),
            device_name,
        })
    }

    fn push_converted(&mut self, mono: &[f32]) {
        self.pending.extend(mono.iter().map(|&s| to_i16(s)));
        if self.pending.len() > MAX_PENDING_SAMPLES {
            let excess = self.pending.len() - MAX_PENDING_SAMPLES;
            self.pending.drain(..excess);
        }
    }
}

impl AudioSource for MicrophoneSource {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;

        while self.pending.len() < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(raw) => {
                    let mono = self.resampler.process(&raw)?;
                    self.push_converted(&mono);
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(BarkwatchError::Audio("audio stream closed".to_string()));
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn discard_buffered(&mut self) {
        let dropped: usize = self.receiver.try_iter().map(|v| v.len()).sum();
        if dropped > 0 {
            tracing::trace!("discarded {dropped} queued raw samples");
        }
        self.pending.clear();
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}

fn to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * f32::from(i16::MAX)) as i16
}

fn device_name(device: &Device) -> Option<String> {
    device
        .description()
        .ok()
        .map(|desc| desc.name().to_string())
}

fn find_device(wanted: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(name) = wanted {
        host.input_devices()
            .map_err(|e| BarkwatchError::Audio(format!("failed to enumerate input devices: {e}")))?
            .find(|d| device_name(d).as_deref() == Some(name))
            .ok_or_else(|| BarkwatchError::Audio(format!("input device not found: {name}")))
    } else {
        host.default_input_device().ok_or_else(|| {
            BarkwatchError::Audio("no default input device available".to_string())
        })
    }
}

fn build_stream(
    wanted: Option<&str>,
    tx: Sender<Vec<f32>>,
) -> Result<(cpal::Stream, (u32, u16, String))> {
    let device = find_device(wanted)?;
    let name = device_name(&device).unwrap_or_else(|| "unknown".to_string());

    let supported = device
        .default_input_config()
        .map_err(|e| BarkwatchError::Audio(format!("failed to get default input config: {e}")))?;

    let sample_rate = supported.sample_rate();
    let channels = supported.channels();

    let stream_config = StreamConfig {
        channels,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err: cpal::StreamError| {
        tracing::error!("audio stream error: {err}");
    };

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                // try_send to stay lock-free in the audio callback
                let _ = tx.try_send(data.to_vec());
            },
            err_fn,
            None,
        )
        .map_err(|e| BarkwatchError::Audio(format!("failed to build input stream: {e}")))?;

    Ok((stream, (sample_rate, channels, name)))
}

/// Names of all input devices the default host can see.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| BarkwatchError::Audio(format!("failed to enumerate input devices: {e}")))?
        .filter_map(|d| device_name(&d))
        .collect();
    Ok(devices)
}

#[must_use]
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| device_name(&d))
}
