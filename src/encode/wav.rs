use crate::buffer::OutputBuffer;
use crate::error::{BarkwatchError, Result};

use super::{Encoder, PcmSpec, rejected};

pub const HEADER_LEN: usize = 44;

/// Canonical 44-byte RIFF/WAVE header for integer PCM.
///
/// ```text
///  0  "RIFF"      4  u32 data_size + 36   8  "WAVE"
/// 12  "fmt "     16  u32 16              20  u16 1 (PCM)
/// 22  u16 ch     24  u32 sample_rate     28  u32 byte_rate
/// 32  u16 align  34  u16 bit_depth       36  "data"   40  u32 data_size
/// ```
#[must_use]
pub fn header(spec: PcmSpec, data_size: u32) -> [u8; HEADER_LEN] {
    let block_align = spec.channels * spec.bytes_per_sample();
    let byte_rate = spec.sample_rate * u32::from(block_align);

    let mut h = [0u8; HEADER_LEN];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&(data_size + HEADER_LEN as u32 - 8).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&1u16.to_le_bytes());
    h[22..24].copy_from_slice(&spec.channels.to_le_bytes());
    h[24..28].copy_from_slice(&spec.sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    h[32..34].copy_from_slice(&block_align.to_le_bytes());
    h[34..36].copy_from_slice(&spec.bit_depth.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_size.to_le_bytes());
    h
}

/// Lossless container mode: PCM is copied through verbatim and the header
/// is synthesised once the data length is known.
pub struct WavEncoder {
    spec: PcmSpec,
}

impl WavEncoder {
    pub fn new(spec: PcmSpec) -> Result<Self> {
        if spec.bit_depth != 16 {
            return Err(rejected(format!(
                "wav: {}-bit samples not supported",
                spec.bit_depth
            )));
        }
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(rejected(format!(
                "wav: invalid shape {} Hz / {} ch",
                spec.sample_rate, spec.channels
            )));
        }
        Ok(Self { spec })
    }
}

impl Encoder for WavEncoder {
    fn encode(&mut self, pcm: &[i16], out: &mut OutputBuffer) -> Result<()> {
        out.append_samples_le(pcm)
    }

    fn flush(&mut self, _out: &mut OutputBuffer) -> Result<()> {
        Ok(())
    }

    fn finalize(&mut self, out: &mut OutputBuffer) -> Result<()> {
        let data_size = u32::try_from(out.len())
            .ok()
            .filter(|&n| n <= u32::MAX - HEADER_LEN as u32)
            .ok_or_else(|| {
                BarkwatchError::Encoder(format!("{} bytes is too large for WAV", out.len()))
            })?;
        out.set_header(&header(self.spec, data_size))
    }

    fn mime_type(&self) -> &'static str {
        "audio/wav"
    }

    fn extension(&self) -> &'static str {
        "wav"
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use hound::{SampleFormat, WavReader};

    use super::*;

    const MONO_16K: PcmSpec = PcmSpec {
        sample_rate: 16000,
        channels: 1,
        bit_depth: 16,
    };

    fn u32_at(h: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([h[at], h[at + 1], h[at + 2], h[at + 3]])
    }

    fn u16_at(h: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([h[at], h[at + 1]])
    }

    #[test]
    fn header_fields_for_ten_seconds_mono() {
        let h = header(MONO_16K, 320_000);
        assert_eq!(&h[0..4], b"RIFF");
        assert_eq!(u32_at(&h, 4), 320_036);
        assert_eq!(&h[8..16], b"WAVEfmt ");
        assert_eq!(u32_at(&h, 16), 16);
        assert_eq!(u16_at(&h, 20), 1);
        assert_eq!(u16_at(&h, 22), 1);
        assert_eq!(u32_at(&h, 24), 16000);
        assert_eq!(u32_at(&h, 28), 32000);
        assert_eq!(u16_at(&h, 32), 2);
        assert_eq!(u16_at(&h, 34), 16);
        assert_eq!(&h[36..40], b"data");
        assert_eq!(u32_at(&h, 40), 320_000);
    }

    #[test]
    fn stereo_block_align() {
        let spec = PcmSpec {
            sample_rate: 44100,
            channels: 2,
            bit_depth: 16,
        };
        let h = header(spec, 0);
        assert_eq!(u32_at(&h, 4), 36);
        assert_eq!(u32_at(&h, 28), 176_400);
        assert_eq!(u16_at(&h, 32), 4);
    }

    #[test]
    fn one_second_of_silence_round_trips() {
        let mut out = OutputBuffer::with_capacity(32000);
        let mut enc = WavEncoder::new(MONO_16K).unwrap_or_else(|e| panic!("{e}"));

        for block in vec![0i16; 16000].chunks(1024) {
            enc.encode(block, &mut out).unwrap_or_else(|e| panic!("{e}"));
        }
        enc.flush(&mut out).unwrap_or_else(|e| panic!("{e}"));
        enc.finalize(&mut out).unwrap_or_else(|e| panic!("{e}"));

        let mut file = out.header().to_vec();
        file.extend_from_slice(out.body());
        assert_eq!(file.len(), 44 + 32000);

        let reader = WavReader::new(Cursor::new(file)).unwrap_or_else(|e| panic!("{e}"));
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, SampleFormat::Int);
        // hound reports the sample count; the data chunk is two bytes each.
        assert_eq!(reader.len() * 2, 32000);
    }

    #[test]
    fn overflowing_block_is_rejected_whole() {
        let mut out = OutputBuffer::with_capacity(10);
        let mut enc = WavEncoder::new(MONO_16K).unwrap_or_else(|e| panic!("{e}"));
        enc.encode(&[1, 2, 3, 4], &mut out).unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(
            enc.encode(&[5, 6], &mut out),
            Err(BarkwatchError::BufferOverflow { .. })
        ));
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn rejects_24_bit() {
        let spec = PcmSpec {
            bit_depth: 24,
            ..MONO_16K
        };
        assert!(matches!(
            WavEncoder::new(spec),
            Err(BarkwatchError::EncoderConfigRejected(_))
        ));
    }
}
