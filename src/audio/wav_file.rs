use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavReader};

use crate::error::{BarkwatchError, Result};

use super::AudioSource;

/// Replays a 16-bit PCM WAV file in a loop at real-time pace, standing in
/// for the microphone on a bench.
pub struct WavFileSource {
    reader: WavReader<BufReader<File>>,
    label: String,
    /// Interleaved samples per second.
    rate: u64,
    started: Instant,
    delivered: u64,
}

impl WavFileSource {
    pub fn open(path: &Path, sample_rate: u32, channels: u16) -> Result<Self> {
        let reader = WavReader::open(path).map_err(|e| {
            BarkwatchError::Audio(format!("failed to open WAV file {}: {e}", path.display()))
        })?;

        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(BarkwatchError::Audio(format!(
                "{} is not 16-bit integer PCM",
                path.display()
            )));
        }
        if spec.sample_rate != sample_rate || spec.channels != channels {
            return Err(BarkwatchError::Audio(format!(
                "{} is {} Hz / {} ch, capture expects {sample_rate} Hz / {channels} ch",
                path.display(),
                spec.sample_rate,
                spec.channels
            )));
        }
        if reader.len() == 0 {
            return Err(BarkwatchError::Audio(format!(
                "{} contains no samples",
                path.display()
            )));
        }

        Ok(Self {
            reader,
            label: path.display().to_string(),
            rate: u64::from(sample_rate) * u64::from(channels),
            started: Instant::now(),
            delivered: 0,
        })
    }

    /// Samples whose real-time arrival has already passed.
    fn due(&self, now: Instant) -> u64 {
        let elapsed = now.duration_since(self.started);
        (elapsed.as_micros() * u128::from(self.rate) / 1_000_000) as u64
    }

    fn next_sample(&mut self) -> Result<i16> {
        if let Some(sample) = self.reader.samples::<i16>().next() {
            return sample.map_err(|e| BarkwatchError::Audio(format!("WAV read error: {e}")));
        }

        self.reader
            .seek(0)
            .map_err(|e| BarkwatchError::Audio(format!("failed to rewind WAV file: {e}")))?;
        self.reader
            .samples::<i16>()
            .next()
            .ok_or_else(|| BarkwatchError::Audio("WAV file is empty".to_string()))?
            .map_err(|e| BarkwatchError::Audio(format!("WAV read error: {e}")))
    }
}

impl AudioSource for WavFileSource {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let wanted = buf.len() as u64;

        let mut available = self.due(Instant::now()).saturating_sub(self.delivered);
        if available < wanted {
            let shortfall = wanted - available;
            let wait = Duration::from_micros(shortfall * 1_000_000 / self.rate.max(1));
            let until = (Instant::now() + wait).min(deadline);
            std::thread::sleep(until.saturating_duration_since(Instant::now()));
            available = self.due(Instant::now()).saturating_sub(self.delivered);
        }

        let n = available.min(wanted) as usize;
        for slot in &mut buf[..n] {
            *slot = self.next_sample()?;
        }
        self.delivered += n as u64;
        Ok(n)
    }

    fn discard_buffered(&mut self) {
        let due = self.due(Instant::now());
        let skip = due.saturating_sub(self.delivered);
        for _ in 0..skip {
            if self.next_sample().is_err() {
                break;
            }
        }
        self.delivered = due;
    }

    fn name(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use hound::{WavSpec, WavWriter};

    use super::*;

    fn write_fixture(dir: &Path, rate: u32, samples: &[i16]) -> std::path::PathBuf {
        let path = dir.join("fixture.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap_or_else(|e| panic!("{e}"));
        for &s in samples {
            writer.write_sample(s).unwrap_or_else(|e| panic!("{e}"));
        }
        writer.finalize().unwrap_or_else(|e| panic!("{e}"));
        path
    }

    #[test]
    fn replays_and_loops() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = write_fixture(dir.path(), 16000, &[1, 2, 3]);
        let mut src = WavFileSource::open(&path, 16000, 1).unwrap_or_else(|e| panic!("{e}"));

        let mut buf = [0i16; 8];
        let n = src
            .read(&mut buf, Duration::from_millis(50))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(n, 8);
        assert_eq!(buf, [1, 2, 3, 1, 2, 3, 1, 2]);
    }

    #[test]
    fn rejects_rate_mismatch() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = write_fixture(dir.path(), 8000, &[0; 16]);
        let err = WavFileSource::open(&path, 16000, 1)
            .err()
            .unwrap_or_else(|| panic!("expected mismatch error"));
        assert!(err.to_string().contains("8000 Hz"));
    }

    #[test]
    fn short_timeout_returns_partial_block() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = write_fixture(dir.path(), 16000, &[5; 100]);
        let mut src = WavFileSource::open(&path, 16000, 1).unwrap_or_else(|e| panic!("{e}"));

        // A full second of audio cannot be due within a 10 ms wait.
        let mut buf = vec![0i16; 16000];
        let n = src
            .read(&mut buf, Duration::from_millis(10))
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(n < 16000);
    }
}
