//! Audio primitives shared across the pipeline

pub mod capture;
pub mod playback;
pub mod ring;

pub use capture::AudioCapture;
pub use playback::PlaybackController;
pub use ring::PrerollRing;

use crate::{Error, Result};

/// Sample rate for capture and all pipeline math (16kHz mono for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Fixed frame length delivered by the capture source (80ms at 16kHz)
pub const FRAME_SIZE: usize = 1280;

/// Convert a duration in milliseconds to a sample count at [`SAMPLE_RATE`]
#[must_use]
pub const fn ms_to_samples(ms: u64) -> usize {
    (ms as usize) * (SAMPLE_RATE as usize) / 1000
}

/// Calculate RMS energy of normalized float samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        let silence = vec![0.0f32; 100];
        assert!(rms(&silence) < 0.001);
        assert!(rms(&[]) < f32::EPSILON);
    }

    #[test]
    fn rms_of_constant_signal() {
        let loud = vec![0.5f32; 100];
        assert!((rms(&loud) - 0.5).abs() < 0.001);
    }

    #[test]
    fn ms_to_samples_at_16k() {
        assert_eq!(ms_to_samples(1000), 16000);
        assert_eq!(ms_to_samples(80), 1280);
        assert_eq!(ms_to_samples(0), 0);
    }

    #[test]
    fn wav_header_and_roundtrip() {
        let samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
        let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.channels, 1);
        let read: Vec<i16> = reader.samples::<i16>().map(std::result::Result::unwrap).collect();
        assert_eq!(read.len(), samples.len());
    }
}
