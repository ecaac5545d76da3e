use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::audioadapter::Adapter;
use rubato::{Fft, FixedSync, Resampler as RubatoResampler};

use crate::error::{BarkwatchError, Result};

const CHUNK_SIZE: usize = 1024;

/// Downmixes interleaved device audio to mono and converts it to the
/// capture sample rate.
pub struct Resampler {
    inner: Option<Fft<f32>>,
    channels: u16,
    input_buf: Vec<f32>,
}

impl Resampler {
    pub fn new(source_rate: u32, channels: u16, target_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(BarkwatchError::Resample(
                "source reports zero channels".to_string(),
            ));
        }

        let inner = if source_rate == target_rate {
            None
        } else {
            Some(
                Fft::new(
                    source_rate as usize,
                    target_rate as usize,
                    CHUNK_SIZE,
                    2, // sub_chunks
                    1, // output is always mono
                    FixedSync::Input,
                )
                .map_err(|e| {
                    BarkwatchError::Resample(format!("failed to create resampler: {e}"))
                })?,
            )
        };

        Ok(Self {
            inner,
            channels,
            input_buf: Vec::new(),
        })
    }

    fn downmix(&self, interleaved: &[f32]) -> Vec<f32> {
        if self.channels == 1 {
            return interleaved.to_vec();
        }

        let ch = self.channels as usize;
        interleaved
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    }

    /// Process interleaved samples; may return fewer (or zero) samples while
    /// the resampler accumulates a full input chunk.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        let mono = self.downmix(interleaved);

        let Some(ref mut resampler) = self.inner else {
            return Ok(mono);
        };

        self.input_buf.extend_from_slice(&mono);

        let mut output = Vec::new();
        let frames_needed = resampler.input_frames_next();

        while self.input_buf.len() >= frames_needed {
            let chunk: Vec<f32> = self.input_buf.drain(..frames_needed).collect();
            let input_data = vec![chunk];
            let input_buf = SequentialSliceOfVecs::new(&input_data, 1, frames_needed)
                .map_err(|e| BarkwatchError::Resample(format!("buffer error: {e}")))?;
            let result = resampler
                .process(&input_buf, 0, None)
                .map_err(|e| BarkwatchError::Resample(format!("resample error: {e}")))?;
            let out_frames = result.frames();
            output.extend((0..out_frames).map(|frame| result.read_sample(0, frame).unwrap_or(0.0)));
        }

        Ok(output)
    }
}
