//! Placeholder audio rendering
//!
//! Nothing in this system synthesizes real speech; generated clips and
//! simulated microphone captures are short sine tones encoded as 16-bit PCM
//! WAV with hound.

use bytes::Bytes;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::TAU;
use std::io::Cursor;
use std::time::Duration;

/// Render a mono sine tone as a complete WAV file
pub fn render_tone_wav(
    frequency_hz: f32,
    duration: Duration,
    sample_rate: u32,
    amplitude: f32,
) -> Result<Bytes, hound::Error> {
    let frames = (duration.as_secs_f64() * sample_rate as f64).round() as u64;
    render_frames(frequency_hz, frames, sample_rate, 1, amplitude)
}

/// Render `frames` frames of a sine tone on every channel
pub fn render_frames(
    frequency_hz: f32,
    frames: u64,
    sample_rate: u32,
    channels: u16,
    amplitude: f32,
) -> Result<Bytes, hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let amplitude = amplitude.clamp(0.0, 1.0) * i16::MAX as f32;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for n in 0..frames {
            let t = n as f32 / sample_rate as f32;
            let sample = ((TAU * frequency_hz * t).sin() * amplitude) as i16;
            for _ in 0..channels {
                writer.write_sample(sample)?;
            }
        }
        writer.finalize()?;
    }

    Ok(Bytes::from(cursor.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_wav_has_expected_length() {
        let wav = render_tone_wav(440.0, Duration::from_secs(1), 8000, 0.5).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav.as_ref())).unwrap();
        assert_eq!(reader.duration(), 8000);
        assert_eq!(reader.spec().channels, 1);
    }

    #[test]
    fn test_multichannel_frames() {
        let wav = render_frames(220.0, 100, 16000, 2, 0.1).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav.as_ref())).unwrap();
        assert_eq!(reader.duration(), 100);
        assert_eq!(reader.len(), 200);
    }
}
