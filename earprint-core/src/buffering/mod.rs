//! Lock-free SPSC ring buffer carrying interleaved input samples from the
//! capture callback to the render callback.
//!
//! `ringbuf::HeapRb<f32>` provides wait-free `push_slice`/`pop_slice`, safe to
//! call from real-time audio callbacks.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the input callback.
pub type SampleProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the output callback.
pub type SampleConsumer = ringbuf::HeapCons<f32>;

/// Blocks of input buffered between the two callbacks.
pub const RING_BLOCKS: usize = 8;

/// Create a matched producer/consumer pair holding `capacity` samples.
pub fn create_sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    HeapRb::<f32>::new(capacity.max(1)).split()
}
