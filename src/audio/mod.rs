pub mod capture;
pub mod loudness;
pub mod resample;
pub mod wav_file;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{Config, SourceKind};
use crate::error::{BarkwatchError, Result};

use self::capture::MicrophoneSource;
use self::wav_file::WavFileSource;

/// A continuously running PCM peripheral.
pub trait AudioSource: Send {
    /// Fill `buf` with up to `buf.len()` interleaved 16-bit samples, waiting
    /// at most `timeout`. Returns the number of samples written; 0 means
    /// nothing arrived in time.
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize>;

    /// Drop anything queued so the next read starts from live audio.
    fn discard_buffered(&mut self) {}

    fn name(&self) -> &str;
}

/// The peripheral is shared between the monitor and the capture worker;
/// only one of them reads at a time.
pub type SharedSource = Arc<Mutex<Box<dyn AudioSource>>>;

/// Open the audio source named in the config.
pub fn open_source(config: &Config) -> Result<Box<dyn AudioSource>> {
    match config.audio.source {
        SourceKind::Microphone => Ok(Box::new(MicrophoneSource::open(
            &config.audio,
            config.capture.sample_rate,
            config.capture.channels,
        )?)),
        SourceKind::WavFile => {
            let path = config.audio.wav_path.as_deref().ok_or_else(|| {
                BarkwatchError::Config("audio.wav_path is required for wav_file".to_string())
            })?;
            Ok(Box::new(WavFileSource::open(
                &Config::expand_path(path),
                config.capture.sample_rate,
                config.capture.channels,
            )?))
        }
    }
}

#[must_use]
pub fn shared(source: Box<dyn AudioSource>) -> SharedSource {
    Arc::new(Mutex::new(source))
}

/// In-memory source for tests: hands out queued blocks, then reports
/// timeouts (0 samples) once the script runs dry.
#[cfg(test)]
pub(crate) struct ScriptedSource {
    blocks: std::collections::VecDeque<Vec<i16>>,
    pub reads: usize,
}

#[cfg(test)]
impl ScriptedSource {
    pub(crate) fn new(blocks: Vec<Vec<i16>>) -> Self {
        Self {
            blocks: blocks.into(),
            reads: 0,
        }
    }

    /// A block whose RMS lands at roughly `db` dB SPL against `reference_rms`.
    pub(crate) fn block_at_db(db: f32, reference_rms: f32, len: usize) -> Vec<i16> {
        let rms = reference_rms * 10f32.powf((db - 94.0) / 20.0);
        let amplitude = (rms * 32768.0).round().clamp(1.0, 32767.0) as i16;
        (0..len)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }
}

#[cfg(test)]
impl AudioSource for ScriptedSource {
    fn read(&mut self, buf: &mut [i16], _timeout: Duration) -> Result<usize> {
        self.reads += 1;
        let Some(mut block) = self.blocks.pop_front() else {
            return Ok(0);
        };
        let n = block.len().min(buf.len());
        buf[..n].copy_from_slice(&block[..n]);
        if n < block.len() {
            block.drain(..n);
            self.blocks.push_front(block);
        }
        Ok(n)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
