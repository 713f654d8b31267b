//! FFT overlap-add stage with preallocated buffers.
//!
//! One stage owns a forward/inverse FFT pair of `fft_size` and the overlap
//! tails of two output channels. Nothing here allocates after construction.

use std::sync::Arc;

use rustfft::{num_complex::Complex32, Fft, FftPlanner};

pub(crate) struct OverlapAdd {
    fft_size: usize,
    block_size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
    /// Length `fft_size - block_size` per output channel.
    overlap: [Vec<f32>; 2],
}

impl OverlapAdd {
    pub(crate) fn new(fft_size: usize, block_size: usize) -> Self {
        debug_assert!(fft_size >= block_size);
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let tail = fft_size - block_size;
        Self {
            fft_size,
            block_size,
            forward,
            inverse,
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
            overlap: [vec![0.0; tail], vec![0.0; tail]],
        }
    }

    pub(crate) fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Zero-padded spectrum of a filter; used at construction time only.
    pub(crate) fn spectrum_of(&mut self, taps: &[f32]) -> Vec<Complex32> {
        let mut buf = vec![Complex32::new(0.0, 0.0); self.fft_size];
        for (dst, &src) in buf.iter_mut().zip(taps) {
            dst.re = src;
        }
        self.forward.process_with_scratch(&mut buf, &mut self.scratch);
        buf
    }

    /// Spectrum of one zero-padded input block, written into `out`.
    pub(crate) fn forward_block(&mut self, block: &[f32], out: &mut [Complex32]) {
        for (dst, &src) in out.iter_mut().zip(block) {
            *dst = Complex32::new(src, 0.0);
        }
        for dst in out[block.len()..].iter_mut() {
            *dst = Complex32::new(0.0, 0.0);
        }
        self.forward.process_with_scratch(out, &mut self.scratch);
    }

    /// Inverse-transforms `spectrum` in place and overlap-adds it into `out`.
    pub(crate) fn emit(&mut self, channel: usize, spectrum: &mut [Complex32], out: &mut [f32]) {
        self.inverse.process_with_scratch(spectrum, &mut self.scratch);
        let scale = 1.0 / self.fft_size as f32;
        let overlap = &mut self.overlap[channel];
        let tail = overlap.len();

        for (i, o) in out.iter_mut().enumerate().take(self.block_size) {
            let carried = if i < tail { overlap[i] } else { 0.0 };
            *o = spectrum[i].re * scale + carried;
        }
        // Ascending order never reads a slot it has already rewritten.
        for j in 0..tail {
            let src = self.block_size + j;
            let carried = if src < tail { overlap[src] } else { 0.0 };
            overlap[j] = spectrum[src].re * scale + carried;
        }
    }

    pub(crate) fn reset(&mut self) {
        for o in &mut self.overlap {
            o.fill(0.0);
        }
    }
}

/// `acc[k] += input[k] * filter[k]`.
pub(crate) fn multiply_accumulate(acc: &mut [Complex32], input: &[Complex32], filter: &[Complex32]) {
    for ((a, x), h) in acc.iter_mut().zip(input).zip(filter) {
        *a += *x * *h;
    }
}
