//! Planar WAV import/export via `hound`.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{EarprintError, Result};

/// Reads a WAV file into one vector per channel, converted to f32 in [-1, 1].
pub fn read_wav(path: impl AsRef<Path>) -> Result<(u32, Vec<Vec<f32>>)> {
    let mut reader = WavReader::open(path.as_ref())?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(EarprintError::InvalidRecording("WAV file has no channels".into()));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let frames = interleaved.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (ch, &v) in planar.iter_mut().zip(frame) {
            ch.push(v);
        }
    }
    Ok((spec.sample_rate, planar))
}

/// Writes planar tracks as a 32-bit float WAV, zero-padding to the longest track.
pub fn write_wav(path: impl AsRef<Path>, sample_rate: u32, tracks: &[Vec<f32>]) -> Result<()> {
    if tracks.is_empty() {
        return Err(EarprintError::InvalidRecording("no tracks to write".into()));
    }
    let spec = WavSpec {
        channels: tracks.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let frames = tracks.iter().map(Vec::len).max().unwrap_or(0);
    let mut writer = WavWriter::create(path.as_ref(), spec)?;
    for i in 0..frames {
        for track in tracks {
            writer.write_sample(track.get(i).copied().unwrap_or(0.0))?;
        }
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_wav_round_trips_with_padding() {
        let dir = std::env::temp_dir().join(format!("earprint-wav-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tracks.wav");

        write_wav(&path, 44_100, &[vec![0.5, -0.5, 0.25], vec![1.0]]).unwrap();
        let (rate, tracks) = read_wav(&path).unwrap();
        assert_eq!(rate, 44_100);
        assert_eq!(tracks, vec![vec![0.5, -0.5, 0.25], vec![1.0, 0.0, 0.0]]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
