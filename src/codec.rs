//! Codec collaborator interfaces.
//!
//! The engine never decodes or encodes pixels or samples itself. It drives codecs through a
//! small buffer-exchange contract:
//! - input buffers are dequeued, filled, and queued back with a `SampleInfo`
//! - output is polled without blocking; a codec answers "try again later", announces its
//!   output format exactly once before the first real buffer, or hands out a buffer index
//! - end-of-stream travels as a flagged (usually empty) buffer
//!
//! Decoded video frames never touch the engine's byte buffers directly: they go through a
//! `FrameSurface`, which makes a decoded frame appear as encoder input.

use std::time::Duration;

use crate::Result;
use crate::error::Error;
use crate::format::MediaFormat;
use crate::sample::{SampleFlags, SampleInfo};

/// How long `CopySurface` waits for a free encoder input buffer.
pub const DEFAULT_SURFACE_TIMEOUT: Duration = Duration::from_millis(100);

/// Result of polling a codec for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeued {
    /// No output is ready yet.
    TryAgainLater,
    /// The output format is now known; read it with `Codec::output_format`.
    FormatChanged,
    /// An output buffer is ready. Release it with `Codec::release_output_buffer`.
    Buffer { index: usize, info: SampleInfo },
}

/// A started-on-demand decoder or encoder.
pub trait Codec: Send {
    fn start(&mut self) -> Result<()>;

    /// Reserve an input buffer, waiting at most `timeout`. `None` means none is free.
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>>;

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]>;

    /// Hand a filled input buffer back to the codec. `info.size` bytes from the start of the
    /// buffer are valid.
    fn queue_input_buffer(&mut self, index: usize, info: SampleInfo) -> Result<()>;

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<Dequeued>;

    fn output_buffer(&self, index: usize) -> Result<&[u8]>;

    fn release_output_buffer(&mut self, index: usize) -> Result<()>;

    /// The format announced by the last `Dequeued::FormatChanged`.
    fn output_format(&self) -> Result<MediaFormat>;

    /// Mark the end of input for encoders fed through a `FrameSurface`.
    fn signal_end_of_input_stream(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Free codec resources. Must be safe to call more than once.
    fn release(&mut self);
}

/// Moves decoded video frames into an encoder's input without exposing how.
pub trait FrameSurface: Send {
    /// Make `frame` appear as encoder input at `presentation_time_us`.
    fn render(
        &mut self,
        frame: &[u8],
        presentation_time_us: i64,
        encoder: &mut dyn Codec,
    ) -> Result<()>;

    /// Must be safe to call more than once.
    fn release(&mut self);
}

/// Creates codecs (and frame surfaces) for a run.
pub trait CodecProvider: Send {
    /// Create a decoder configured for `format`. The decoder is not started.
    fn create_decoder(&mut self, format: &MediaFormat) -> Result<Box<dyn Codec>>;

    /// Create an encoder configured for `format`. The encoder is not started.
    fn create_encoder(&mut self, format: &MediaFormat) -> Result<Box<dyn Codec>>;

    /// Create the surface that carries decoded frames into an encoder producing `format`.
    fn create_frame_surface(&mut self, format: &MediaFormat) -> Result<Box<dyn FrameSurface>> {
        let _ = format;
        Ok(Box::new(CopySurface::new(DEFAULT_SURFACE_TIMEOUT)))
    }
}

/// A CPU-side frame surface: copies each frame into the next free encoder input buffer.
///
/// Waits up to `timeout` for the encoder to free an input buffer, then gives up with a codec
/// error rather than dropping the frame.
#[derive(Debug)]
pub struct CopySurface {
    timeout: Duration,
    released: bool,
}

impl CopySurface {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            released: false,
        }
    }
}

impl FrameSurface for CopySurface {
    fn render(
        &mut self,
        frame: &[u8],
        presentation_time_us: i64,
        encoder: &mut dyn Codec,
    ) -> Result<()> {
        if self.released {
            return Err(Error::invariant("frame rendered to a released surface"));
        }

        let index = encoder
            .dequeue_input_buffer(self.timeout)?
            .ok_or_else(|| Error::codec("encoder input not available for rendered frame"))?;

        let input = encoder.input_buffer(index)?;
        if frame.len() > input.len() {
            return Err(Error::codec(format!(
                "frame of {} bytes does not fit encoder input of {} bytes",
                frame.len(),
                input.len()
            )));
        }
        input[..frame.len()].copy_from_slice(frame);

        encoder.queue_input_buffer(
            index,
            SampleInfo::new(frame.len(), presentation_time_us, SampleFlags::NONE),
        )
    }

    fn release(&mut self) {
        self.released = true;
    }
}
