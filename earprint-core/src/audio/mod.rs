//! Audio I/O backends for live rendering.
//!
//! # Design constraints
//!
//! cpal callbacks run on OS audio threads at elevated priority. They must not
//! allocate, block on a mutex or perform I/O. Captured input is written into
//! an SPSC ring buffer by the input callback; the output callback pulls whole
//! blocks from it through [`DuplexRenderer`], hands them to the session's
//! [`BlockProcessor`] and plays the result.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Streams returned by [`AudioBackend::open`] must be stopped and
//! dropped on the thread that opened them; the session does all three on its
//! own dedicated thread.

pub mod device;
pub mod stub;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{
    buffering::{Consumer, SampleConsumer},
    error::{EarprintError, Result},
};

#[cfg(feature = "audio-cpal")]
use crate::buffering::{create_sample_ring, Producer, SampleProducer, RING_BLOCKS};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Pushes captured samples, counting the ones that do not fit.
#[cfg(feature = "audio-cpal")]
fn push_input(producer: &mut SampleProducer, samples: &[f32], dropped: &AtomicUsize) {
    let written = producer.push_slice(samples);
    if written < samples.len() {
        dropped.fetch_add(samples.len() - written, Ordering::Relaxed);
    }
}

/// Parameters of a duplex stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub block_size: usize,
    pub input_channels: usize,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

/// Consumer of planar input blocks, producing a stereo output block.
///
/// Called from the audio thread: implementations must not block.
pub trait BlockProcessor: Send + 'static {
    fn process(&mut self, input: &[Vec<f32>], left: &mut [f32], right: &mut [f32]);

    /// Input did not arrive in time; the block being processed was zero-filled.
    fn input_underrun(&mut self) {}

    /// The input ring was full and `dropped` captured samples were discarded
    /// since the previous block.
    fn input_overrun(&mut self, _dropped: usize) {}
}

/// A running stream. Dropping it also stops it.
pub trait AudioStream {
    fn stop(&mut self) -> Result<()>;
}

/// Opens duplex streams that drive a [`BlockProcessor`].
pub trait AudioBackend: Send + 'static {
    fn name(&self) -> &'static str;

    fn open(&mut self, spec: &StreamSpec, processor: Box<dyn BlockProcessor>) -> Result<Box<dyn AudioStream>>;
}

/// Adapts arbitrarily sized interleaved output callbacks to fixed-size
/// processing blocks fed from the input ring.
pub struct DuplexRenderer {
    consumer: SampleConsumer,
    block_size: usize,
    input_channels: usize,
    interleaved: Vec<f32>,
    planar: Vec<Vec<f32>>,
    output: [Vec<f32>; 2],
    cursor: usize,
    dropped: Arc<AtomicUsize>,
    processor: Box<dyn BlockProcessor>,
}

impl DuplexRenderer {
    pub fn new(consumer: SampleConsumer, spec: &StreamSpec, processor: Box<dyn BlockProcessor>) -> Self {
        let block = spec.block_size;
        Self {
            consumer,
            block_size: block,
            input_channels: spec.input_channels,
            interleaved: vec![0.0; block * spec.input_channels],
            planar: vec![vec![0.0; block]; spec.input_channels],
            output: [vec![0.0; block], vec![0.0; block]],
            cursor: block,
            dropped: Arc::new(AtomicUsize::new(0)),
            processor,
        }
    }

    /// Counter the input side adds discarded samples to. Drained into
    /// [`BlockProcessor::input_overrun`] on the next block.
    pub fn overrun_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.dropped)
    }

    /// Fills an interleaved buffer of `channels` channels. A mono device gets
    /// the average of both ears; channels beyond the first two are silent.
    pub fn render(&mut self, output: &mut [f32], channels: usize) {
        for frame in output.chunks_mut(channels.max(1)) {
            if self.cursor >= self.block_size {
                self.refill();
            }
            let (left, right) = (self.output[0][self.cursor], self.output[1][self.cursor]);
            if frame.len() == 1 {
                frame[0] = 0.5 * (left + right);
            } else {
                for (ch, sample) in frame.iter_mut().enumerate() {
                    *sample = match ch {
                        0 => left,
                        1 => right,
                        _ => 0.0,
                    };
                }
            }
            self.cursor += 1;
        }
    }

    fn refill(&mut self) {
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            self.processor.input_overrun(dropped);
        }
        let needed = self.interleaved.len();
        let got = self.consumer.pop_slice(&mut self.interleaved);
        if got < needed {
            self.interleaved[got..].fill(0.0);
            self.processor.input_underrun();
        }
        if self.input_channels > 0 {
            for (f, frame) in self.interleaved.chunks_exact(self.input_channels).enumerate() {
                for (ch, &v) in self.planar.iter_mut().zip(frame) {
                    ch[f] = v;
                }
            }
        }
        let [left, right] = &mut self.output;
        self.processor.process(&self.planar, left, right);
        self.cursor = 0;
    }
}

/// System audio through cpal: one input stream, one output stream.
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "audio-cpal")]
struct CpalStream {
    input: cpal::Stream,
    output: cpal::Stream,
}

#[cfg(feature = "audio-cpal")]
impl AudioStream for CpalStream {
    fn stop(&mut self) -> Result<()> {
        use cpal::traits::StreamTrait;

        self.input
            .pause()
            .map_err(|e| EarprintError::AudioStream(e.to_string()))?;
        self.output
            .pause()
            .map_err(|e| EarprintError::AudioStream(e.to_string()))
    }
}

/// Preferred device by name, otherwise the host default, otherwise the first
/// device listed.
#[cfg(feature = "audio-cpal")]
fn select_device(
    host: &cpal::Host,
    direction: device::DeviceDirection,
    preferred: Option<&str>,
) -> Result<cpal::Device> {
    use cpal::traits::{DeviceTrait, HostTrait};
    use device::DeviceDirection;

    let list = || -> Result<Box<dyn Iterator<Item = cpal::Device>>> {
        let devices: Box<dyn Iterator<Item = cpal::Device>> = match direction {
            DeviceDirection::Input => Box::new(
                host.input_devices()
                    .map_err(|e| EarprintError::AudioDevice(e.to_string()))?,
            ),
            DeviceDirection::Output => Box::new(
                host.output_devices()
                    .map_err(|e| EarprintError::AudioDevice(e.to_string()))?,
            ),
        };
        Ok(devices)
    };

    if let Some(preferred_name) = preferred {
        match list() {
            Ok(mut devices) => {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == preferred_name).unwrap_or(false))
                {
                    return Ok(device);
                }
                warn!("preferred {direction:?} device '{preferred_name}' not found, falling back");
            }
            Err(e) => warn!("failed to list devices while resolving preference: {e}"),
        }
    }

    let default = match direction {
        DeviceDirection::Input => host.default_input_device(),
        DeviceDirection::Output => host.default_output_device(),
    };
    if let Some(device) = default {
        return Ok(device);
    }

    let missing = match direction {
        DeviceDirection::Input => EarprintError::NoDefaultInputDevice,
        DeviceDirection::Output => EarprintError::NoDefaultOutputDevice,
    };
    let fallback = list()?.next().ok_or(missing)?;
    warn!("no default {direction:?} device, falling back to first available");
    Ok(fallback)
}

#[cfg(feature = "audio-cpal")]
impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(&mut self, spec: &StreamSpec, processor: Box<dyn BlockProcessor>) -> Result<Box<dyn AudioStream>> {
        use cpal::{
            traits::{DeviceTrait, StreamTrait},
            BufferSize, SampleFormat, SampleRate, StreamConfig,
        };
        use device::DeviceDirection;

        let host = cpal::default_host();
        let input = select_device(&host, DeviceDirection::Input, spec.input_device.as_deref())?;
        let output = select_device(&host, DeviceDirection::Output, spec.output_device.as_deref())?;

        info!(
            input = input.name().unwrap_or_default().as_str(),
            output = output.name().unwrap_or_default().as_str(),
            sample_rate = spec.sample_rate,
            block_size = spec.block_size,
            input_channels = spec.input_channels,
            "opening duplex stream"
        );

        let in_format = input
            .default_input_config()
            .map_err(|e| EarprintError::AudioDevice(e.to_string()))?
            .sample_format();
        let out_supported = output
            .default_output_config()
            .map_err(|e| EarprintError::AudioDevice(e.to_string()))?;
        let out_format = out_supported.sample_format();
        let out_channels = out_supported.channels();

        let in_config = StreamConfig {
            channels: spec.input_channels as u16,
            sample_rate: SampleRate(spec.sample_rate),
            buffer_size: BufferSize::Fixed(spec.block_size as u32),
        };
        let out_config = StreamConfig {
            channels: out_channels,
            sample_rate: SampleRate(spec.sample_rate),
            buffer_size: BufferSize::Fixed(spec.block_size as u32),
        };

        let (mut producer, consumer) =
            create_sample_ring(spec.block_size * spec.input_channels * RING_BLOCKS);

        let mut renderer = DuplexRenderer::new(consumer, spec, processor);
        let dropped = renderer.overrun_counter();
        let input_scratch_len = spec.block_size * spec.input_channels;

        let input_stream = match in_format {
            SampleFormat::F32 => input.build_input_stream(
                &in_config,
                move |data: &[f32], _info| push_input(&mut producer, data, &dropped),
                |err| error!("input stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => {
                let mut scratch: Vec<f32> = vec![0.0; input_scratch_len.max(1)];
                input.build_input_stream(
                    &in_config,
                    move |data: &[i16], _info| {
                        for chunk in data.chunks(scratch.len().max(1)) {
                            let buf = &mut scratch[..chunk.len()];
                            for (dst, src) in buf.iter_mut().zip(chunk) {
                                *dst = *src as f32 / 32768.0;
                            }
                            push_input(&mut producer, buf, &dropped);
                        }
                    },
                    |err| error!("input stream error: {err}"),
                    None,
                )
            }
            fmt => {
                return Err(EarprintError::AudioStream(format!(
                    "unsupported input sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| EarprintError::AudioStream(e.to_string()))?;

        let channels = out_channels as usize;
        let output_scratch_len = spec.block_size * channels;
        let output_stream = match out_format {
            SampleFormat::F32 => output.build_output_stream(
                &out_config,
                move |data: &mut [f32], _info| renderer.render(data, channels),
                |err| error!("output stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => {
                let mut scratch: Vec<f32> = vec![0.0; output_scratch_len.max(channels)];
                let frames_per_chunk = scratch.len() / channels.max(1);
                output.build_output_stream(
                    &out_config,
                    move |data: &mut [i16], _info| {
                        for chunk in data.chunks_mut(frames_per_chunk * channels.max(1)) {
                            let buf = &mut scratch[..chunk.len()];
                            renderer.render(buf, channels);
                            for (dst, src) in chunk.iter_mut().zip(buf.iter()) {
                                *dst = (src.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                            }
                        }
                    },
                    |err| error!("output stream error: {err}"),
                    None,
                )
            }
            fmt => {
                return Err(EarprintError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| EarprintError::AudioStream(e.to_string()))?;

        input_stream
            .play()
            .map_err(|e| EarprintError::AudioStream(e.to_string()))?;
        output_stream
            .play()
            .map_err(|e| EarprintError::AudioStream(e.to_string()))?;

        Ok(Box::new(CpalStream {
            input: input_stream,
            output: output_stream,
        }))
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(&mut self, _spec: &StreamSpec, _processor: Box<dyn BlockProcessor>) -> Result<Box<dyn AudioStream>> {
        Err(EarprintError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
