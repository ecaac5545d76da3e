use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use crate::config::{AudioFormat, CaptureConfig};
use crate::encode::wav::HEADER_LEN;
use crate::error::{BarkwatchError, Result};

/// Worst-case LAME flush output plus a frame of slack.
const MP3_FLUSH_MARGIN: usize = 7200 + 1441;

/// Fixed-capacity byte region the encoder writes into, plus a small header
/// region filled once the payload length is known.
///
/// `len() <= capacity()` always holds: an append that does not fit is
/// rejected and leaves the buffer untouched.
#[derive(Debug)]
pub struct OutputBuffer {
    data: Box<[u8]>,
    cursor: usize,
    header: [u8; HEADER_LEN],
    header_len: usize,
}

impl OutputBuffer {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            cursor: 0,
            header: [0u8; HEADER_LEN],
            header_len: 0,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self
            .cursor
            .checked_add(bytes.len())
            .filter(|&end| end <= self.data.len())
            .ok_or(BarkwatchError::BufferOverflow {
                requested: bytes.len(),
                cursor: self.cursor,
                capacity: self.data.len(),
            })?;

        self.data[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
        Ok(())
    }

    /// Append 16-bit samples as little-endian bytes, all or nothing.
    pub fn append_samples_le(&mut self, samples: &[i16]) -> Result<()> {
        let bytes = samples.len() * 2;
        if bytes > self.remaining() {
            return Err(BarkwatchError::BufferOverflow {
                requested: bytes,
                cursor: self.cursor,
                capacity: self.data.len(),
            });
        }

        for (dst, s) in self.data[self.cursor..self.cursor + bytes]
            .chunks_exact_mut(2)
            .zip(samples)
        {
            dst.copy_from_slice(&s.to_le_bytes());
        }
        self.cursor += bytes;
        Ok(())
    }

    pub fn set_header(&mut self, header: &[u8]) -> Result<()> {
        if header.len() > HEADER_LEN {
            return Err(BarkwatchError::BufferOverflow {
                requested: header.len(),
                cursor: 0,
                capacity: HEADER_LEN,
            });
        }
        self.header[..header.len()].copy_from_slice(header);
        self.header_len = header.len();
        Ok(())
    }

    #[must_use]
    pub fn header(&self) -> &[u8] {
        &self.header[..self.header_len]
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.data[..self.cursor]
    }

    /// Rewind for reuse. The allocation is kept.
    pub const fn reset(&mut self) {
        self.cursor = 0;
        self.header_len = 0;
    }
}

/// Owns the single output buffer and hands it to one session at a time.
#[derive(Debug, Clone)]
pub struct BufferPool {
    slot: Arc<Mutex<Option<OutputBuffer>>>,
    capacity: usize,
}

impl BufferPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(OutputBuffer::with_capacity(capacity)))),
            capacity,
        }
    }

    /// Size the buffer for the worst-case payload of one capture.
    #[must_use]
    pub fn for_capture(config: &CaptureConfig) -> Self {
        Self::new(worst_case_payload(config))
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check the buffer out. Fails with `BufferBusy` while another lease is
    /// alive.
    pub fn acquire(&self) -> Result<BufferLease> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| BarkwatchError::Other("buffer pool lock poisoned".to_string()))?;
        let buffer = slot.take().ok_or(BarkwatchError::BufferBusy)?;
        Ok(BufferLease {
            buffer: Some(buffer),
            pool: Arc::clone(&self.slot),
        })
    }

    #[must_use]
    pub fn is_checked_out(&self) -> bool {
        self.slot.lock().map_or(true, |slot| slot.is_none())
    }
}

/// Exclusive use of the pool's buffer. Dropping the lease (or calling
/// `release`) rewinds the buffer and returns it to the pool.
#[derive(Debug)]
pub struct BufferLease {
    buffer: Option<OutputBuffer>,
    pool: Arc<Mutex<Option<OutputBuffer>>>,
}

impl BufferLease {
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for BufferLease {
    type Target = OutputBuffer;

    fn deref(&self) -> &OutputBuffer {
        // Only `drop` takes the buffer out.
        self.buffer.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for BufferLease {
    fn deref_mut(&mut self) -> &mut OutputBuffer {
        self.buffer.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            buffer.reset();
            match self.pool.lock() {
                Ok(mut slot) => *slot = Some(buffer),
                Err(poisoned) => *poisoned.into_inner() = Some(buffer),
            }
        }
    }
}

/// Largest payload a capture with this config can produce, with margin.
#[must_use]
pub fn worst_case_payload(config: &CaptureConfig) -> usize {
    let block_bytes = config.block_samples * 2;
    match config.format {
        // Raw PCM; the last block may overshoot the target.
        AudioFormat::Wav => config.target_samples() * 2 + block_bytes,
        AudioFormat::Mp3 => {
            let per_sec = config.mp3_bitrate_kbps as usize * 1000 / 8;
            let nominal = per_sec * (config.duration_secs as usize + 1);
            nominal + nominal / 4 + MP3_FLUSH_MARGIN
        }
    }
}
