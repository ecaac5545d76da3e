//! Streaming MP3 mode.
//!
//! PCM is fed to LAME one pass (one MPEG frame of samples) at a time; each pass
//! may produce zero or more bytes, which go straight into the output buffer.
//! The payload length is only known after the final flush.

use super::{PcmSpec, rejected};
use crate::error::Result;

/// Sample rates and bitrates (kbit/s) accepted for each MPEG version.
const MPEG1_RATES: [u32; 3] = [32000, 44100, 48000];
const MPEG1_BITRATES: &[u32] = &[32, 40, 48, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];

const MPEG2_RATES: [u32; 3] = [16000, 22050, 24000];
const MPEG2_BITRATES: &[u32] = &[8, 16, 24, 32, 40, 48, 64, 80, 96, 112, 128, 160];

const MPEG25_RATES: [u32; 3] = [8000, 11025, 12000];
const MPEG25_BITRATES: &[u32] = &[8, 16, 24, 32, 40, 48, 64];

/// Validate a sample rate / bitrate / channel combination and return the
/// number of samples per channel consumed by one encoder pass.
pub fn check_config(spec: PcmSpec, bitrate_kbps: u32) -> Result<usize> {
    if spec.bit_depth != 16 {
        return Err(rejected(format!(
            "mp3: {}-bit input not supported",
            spec.bit_depth
        )));
    }
    if !(1..=2).contains(&spec.channels) {
        return Err(rejected(format!(
            "mp3: {} channels not supported",
            spec.channels
        )));
    }

    let (bitrates, samples_per_pass) = if MPEG1_RATES.contains(&spec.sample_rate) {
        (MPEG1_BITRATES, 1152)
    } else if MPEG2_RATES.contains(&spec.sample_rate) {
        (MPEG2_BITRATES, 576)
    } else if MPEG25_RATES.contains(&spec.sample_rate) {
        (MPEG25_BITRATES, 576)
    } else {
        return Err(rejected(format!(
            "mp3: unsupported sample rate {} Hz",
            spec.sample_rate
        )));
    };

    if !bitrates.contains(&bitrate_kbps) {
        return Err(rejected(format!(
            "mp3: {bitrate_kbps} kbit/s not available at {} Hz",
            spec.sample_rate
        )));
    }

    Ok(samples_per_pass)
}

#[cfg(feature = "mp3")]
pub use self::lame::Mp3Encoder;

#[cfg(feature = "mp3")]
mod lame {
    use mp3lame_encoder::{
        Bitrate, Builder, FlushNoGap, InterleavedPcm, MonoPcm, max_required_buffer_size,
    };

    use super::check_config;
    use crate::buffer::OutputBuffer;
    use crate::encode::{Encoder, PcmSpec, rejected};
    use crate::error::{BarkwatchError, Result};

    /// LAME writes at most this much on flush.
    const FLUSH_RESERVE: usize = 7200;

    pub struct Mp3Encoder {
        lame: mp3lame_encoder::Encoder,
        channels: usize,
        /// Interleaved samples waiting for a full pass.
        pass: Vec<i16>,
        pass_len: usize,
        scratch: Vec<u8>,
    }

    const fn bitrate(kbps: u32) -> Option<Bitrate> {
        Some(match kbps {
            8 => Bitrate::Kbps8,
            16 => Bitrate::Kbps16,
            24 => Bitrate::Kbps24,
            32 => Bitrate::Kbps32,
            40 => Bitrate::Kbps40,
            48 => Bitrate::Kbps48,
            64 => Bitrate::Kbps64,
            80 => Bitrate::Kbps80,
            96 => Bitrate::Kbps96,
            112 => Bitrate::Kbps112,
            128 => Bitrate::Kbps128,
            160 => Bitrate::Kbps160,
            192 => Bitrate::Kbps192,
            224 => Bitrate::Kbps224,
            256 => Bitrate::Kbps256,
            320 => Bitrate::Kbps320,
            _ => return None,
        })
    }

    impl Mp3Encoder {
        pub fn new(spec: PcmSpec, bitrate_kbps: u32) -> Result<Self> {
            let samples_per_pass = check_config(spec, bitrate_kbps)?;
            let brate = bitrate(bitrate_kbps)
                .ok_or_else(|| rejected(format!("mp3: no LAME bitrate for {bitrate_kbps}")))?;

            let mut builder = Builder::new()
                .ok_or_else(|| rejected("mp3: failed to allocate LAME encoder".to_string()))?;
            builder
                .set_num_channels(spec.channels as u8)
                .map_err(|e| rejected(format!("mp3: channels rejected: {e:?}")))?;
            builder
                .set_sample_rate(spec.sample_rate)
                .map_err(|e| rejected(format!("mp3: sample rate rejected: {e:?}")))?;
            builder
                .set_brate(brate)
                .map_err(|e| rejected(format!("mp3: bitrate rejected: {e:?}")))?;
            let lame = builder
                .build()
                .map_err(|e| rejected(format!("mp3: LAME initialisation failed: {e:?}")))?;

            let channels = usize::from(spec.channels);
            let pass_len = samples_per_pass * channels;

            tracing::debug!(
                "mp3 encoder ready: {} Hz, {} ch, {bitrate_kbps} kbit/s, {samples_per_pass} samples/pass",
                spec.sample_rate,
                spec.channels
            );

            Ok(Self {
                lame,
                channels,
                pass: Vec::with_capacity(pass_len),
                pass_len,
                scratch: Vec::with_capacity(max_required_buffer_size(samples_per_pass)),
            })
        }

        fn encode_pass(&mut self, out: &mut OutputBuffer) -> Result<()> {
            let frames = self.pass.len() / self.channels;
            self.scratch.clear();
            self.scratch.reserve(max_required_buffer_size(frames));

            let encoded = if self.channels == 1 {
                self.lame.encode_to_vec(MonoPcm(&self.pass), &mut self.scratch)
            } else {
                self.lame
                    .encode_to_vec(InterleavedPcm(&self.pass), &mut self.scratch)
            };
            encoded.map_err(|e| BarkwatchError::Encoder(format!("mp3 encode failed: {e:?}")))?;
            self.pass.clear();

            if self.scratch.is_empty() {
                return Ok(());
            }
            out.append(&self.scratch)
        }
    }

    impl Encoder for Mp3Encoder {
        fn encode(&mut self, pcm: &[i16], out: &mut OutputBuffer) -> Result<()> {
            let mut rest = pcm;
            while !rest.is_empty() {
                let take = (self.pass_len - self.pass.len()).min(rest.len());
                self.pass.extend_from_slice(&rest[..take]);
                rest = &rest[take..];

                if self.pass.len() == self.pass_len {
                    self.encode_pass(out)?;
                }
            }
            Ok(())
        }

        fn flush(&mut self, out: &mut OutputBuffer) -> Result<()> {
            if !self.pass.is_empty() {
                self.encode_pass(out)?;
            }

            self.scratch.clear();
            self.scratch.reserve(FLUSH_RESERVE);
            self.lame
                .flush_to_vec::<FlushNoGap>(&mut self.scratch)
                .map_err(|e| BarkwatchError::Encoder(format!("mp3 flush failed: {e:?}")))?;

            if self.scratch.is_empty() {
                return Ok(());
            }
            out.append(&self.scratch)
        }

        fn mime_type(&self) -> &'static str {
            "audio/mpeg"
        }

        fn extension(&self) -> &'static str {
            "mp3"
        }
    }
}
