/// dB SPL corresponding to the reference RMS (a 1 Pa calibration tone).
const REFERENCE_DB_SPL: f32 = 94.0;

const I16_FULL_SCALE: f32 = 32768.0;

/// RMS of 16-bit samples normalised to `[-1.0, 1.0)`.
#[must_use]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let n = f64::from(s) / f64::from(I16_FULL_SCALE);
            n * n
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Convert an RMS level to a dB SPL estimate. Silence maps to 0.
#[must_use]
pub fn db_spl(rms: f32, reference_rms: f32) -> f32 {
    if rms > 0.0 {
        20.0f32.mul_add((rms / reference_rms).log10(), REFERENCE_DB_SPL)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REF: f32 = 0.050_118_7;

    #[test]
    fn silence_is_zero_db() {
        let samples = vec![0i16; 1024];
        assert!(rms(&samples).abs() < f32::EPSILON);
        assert!(db_spl(rms(&samples), REF).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_window_is_silent() {
        assert!(rms(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn reference_level_is_94_db() {
        assert!((db_spl(REF, REF) - 94.0).abs() < 1e-4);
    }

    #[test]
    fn tenfold_rms_adds_20_db() {
        assert!((db_spl(REF * 10.0, REF) - 114.0).abs() < 1e-3);
    }

    #[test]
    fn full_scale_square_wave() {
        let samples: Vec<i16> = (0..1000)
            .map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        let level = rms(&samples);
        assert!((level - 1.0).abs() < 1e-3);
        // 94 + 20*log10(1/0.0501187) ~= 120 dB
        assert!((db_spl(level, REF) - 120.0).abs() < 0.05);
    }
}
