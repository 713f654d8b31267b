//! Offline rendering of whole signals and WAV files through the block engine.

use std::path::Path;

use tracing::info;

use super::{RealTimeConvolver, RenderConfig};
use crate::error::{EarprintError, Result};
use crate::ir::HrirTable;
use crate::wav;

/// Runs planar `input` through `convolver` block by block.
///
/// The input is zero-padded up to a whole number of blocks; the output has
/// that padded length.
pub fn render<S: AsRef<[f32]>>(convolver: &mut RealTimeConvolver, input: &[S]) -> Result<[Vec<f32>; 2]> {
    let channels = convolver.input_channels();
    let block = convolver.block_size();
    if input.len() != channels {
        return Err(EarprintError::BlockShape {
            expected_channels: channels,
            expected_frames: block,
            channels: input.len(),
            frames: input.first().map_or(0, |ch| ch.as_ref().len()),
        });
    }

    let frames = input.iter().map(|ch| ch.as_ref().len()).max().unwrap_or(0);
    let blocks = frames.div_ceil(block);
    let mut out = [vec![0.0f32; blocks * block], vec![0.0f32; blocks * block]];
    let mut chunk = vec![vec![0.0f32; block]; channels];

    for b in 0..blocks {
        let start = b * block;
        for (dst, src) in chunk.iter_mut().zip(input) {
            let src = src.as_ref();
            dst.fill(0.0);
            if start < src.len() {
                let end = (start + block).min(src.len());
                dst[..end - start].copy_from_slice(&src[start..end]);
            }
        }
        let [left, right] = &mut out;
        convolver.process_block(&chunk, &mut left[start..start + block], &mut right[start..start + block])?;
    }
    Ok(out)
}

/// Renders a multichannel WAV (one channel per table speaker, in canonical
/// order) to a stereo 32-bit float WAV.
pub fn convolve_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    table: &HrirTable,
    block_size: usize,
) -> Result<()> {
    let (sample_rate, tracks) = wav::read_wav(input.as_ref())?;
    if sample_rate != table.sample_rate() {
        return Err(EarprintError::SampleRateMismatch {
            expected: table.sample_rate(),
            actual: sample_rate,
        });
    }
    let mut convolver = RealTimeConvolver::from_table(table, &RenderConfig::new(block_size))?;
    let rendered = render(&mut convolver, &tracks)?;
    wav::write_wav(output.as_ref(), sample_rate, &rendered)?;

    info!(
        input = %input.as_ref().display(),
        output = %output.as_ref().display(),
        frames = rendered[0].len(),
        "rendered file"
    );
    Ok(())
}
