pub mod mp3;
pub mod wav;

use crate::buffer::OutputBuffer;
use crate::config::{AudioFormat, CaptureConfig};
use crate::error::{BarkwatchError, Result};

/// Shape of the PCM fed to an encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl PcmSpec {
    #[must_use]
    pub const fn from_config(config: &CaptureConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            bit_depth: config.bit_depth,
        }
    }

    #[must_use]
    pub const fn bytes_per_sample(&self) -> u16 {
        self.bit_depth / 8
    }
}

/// Streams PCM blocks into an `OutputBuffer`.
///
/// Every append goes through the buffer's capacity check, so a payload that
/// outgrows the buffer surfaces as `BufferOverflow` from `encode` or `flush`.
pub trait Encoder {
    fn encode(&mut self, pcm: &[i16], out: &mut OutputBuffer) -> Result<()>;

    /// Drain anything the encoder is still holding after the last block.
    fn flush(&mut self, out: &mut OutputBuffer) -> Result<()>;

    /// Write whatever depends on the final payload length (the container
    /// header). Called once, after `flush`.
    fn finalize(&mut self, _out: &mut OutputBuffer) -> Result<()> {
        Ok(())
    }

    fn mime_type(&self) -> &'static str;

    fn extension(&self) -> &'static str;
}

/// Build the encoder for the configured format. Unsupported parameter
/// combinations fail with `EncoderConfigRejected` before any capture I/O.
pub fn create_encoder(config: &CaptureConfig) -> Result<Box<dyn Encoder>> {
    let spec = PcmSpec::from_config(config);
    match config.format {
        AudioFormat::Wav => Ok(Box::new(wav::WavEncoder::new(spec)?)),
        AudioFormat::Mp3 => create_mp3(spec, config.mp3_bitrate_kbps),
    }
}

#[cfg(feature = "mp3")]
fn create_mp3(spec: PcmSpec, bitrate_kbps: u32) -> Result<Box<dyn Encoder>> {
    Ok(Box::new(mp3::Mp3Encoder::new(spec, bitrate_kbps)?))
}

#[cfg(not(feature = "mp3"))]
fn create_mp3(spec: PcmSpec, bitrate_kbps: u32) -> Result<Box<dyn Encoder>> {
    mp3::check_config(spec, bitrate_kbps)?;
    Err(BarkwatchError::EncoderConfigRejected(
        "mp3 output requires the `mp3` feature".to_string(),
    ))
}

/// The finished capture: header (container mode only) followed by body,
/// borrowed from the output buffer.
#[derive(Debug, Clone, Copy)]
pub struct EncodedPayload<'a> {
    pub header: &'a [u8],
    pub body: &'a [u8],
    pub mime_type: &'static str,
    pub file_extension: &'static str,
}

impl<'a> EncodedPayload<'a> {
    #[must_use]
    pub fn new(out: &'a OutputBuffer, encoder: &dyn Encoder) -> Self {
        Self {
            header: out.header(),
            body: out.body(),
            mime_type: encoder.mime_type(),
            file_extension: encoder.extension(),
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.header.len() + self.body.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes in wire order.
    pub fn chunks(&self) -> impl Iterator<Item = &'a [u8]> {
        [self.header, self.body].into_iter()
    }
}

fn rejected(msg: String) -> BarkwatchError {
    BarkwatchError::EncoderConfigRejected(msg)
}
