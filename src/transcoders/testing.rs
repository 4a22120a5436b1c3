//! Deterministic codecs for driving a single track transcoder by hand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::Result;
use crate::backends::buffers::CodecBuffers;
use crate::codec::{Codec, CodecProvider, Dequeued};
use crate::format::MediaFormat;
use crate::sample::SampleInfo;

const INPUT_SLOTS: usize = 2;
const INPUT_CAPACITY: usize = 4096;

/// Turns each input into one output right away.
///
/// Decoders announce their format with the first real output, the way software decoders only
/// learn it after decoding; encoders announce it on start.
pub(crate) struct TestCodec {
    buffers: CodecBuffers,
    format: MediaFormat,
    announce_on_start: bool,
    /// `None` passes input through unchanged.
    output_size: Option<usize>,
    last_presentation_time_us: i64,
    end_of_input_signalled: Arc<AtomicBool>,
}

impl TestCodec {
    fn new(format: MediaFormat, announce_on_start: bool, output_size: Option<usize>) -> Self {
        Self {
            buffers: CodecBuffers::new(INPUT_SLOTS, INPUT_CAPACITY),
            format,
            announce_on_start,
            output_size,
            last_presentation_time_us: 0,
            end_of_input_signalled: Arc::default(),
        }
    }
}

impl Codec for TestCodec {
    fn start(&mut self) -> Result<()> {
        self.buffers.start()?;
        if self.announce_on_start {
            self.buffers.set_output_format(self.format.clone());
        }
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        self.buffers.dequeue_input()
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        self.buffers.input_mut(index)
    }

    fn queue_input_buffer(&mut self, index: usize, info: SampleInfo) -> Result<()> {
        let data = self.buffers.take_input(index, &info)?;
        if info.is_end_of_stream() {
            self.buffers.push_output(
                Vec::new(),
                SampleInfo::end_of_stream(self.last_presentation_time_us),
            );
            return Ok(());
        }

        if !self.buffers.has_output_format() {
            self.buffers.set_output_format(self.format.clone());
        }
        let data = match self.output_size {
            Some(size) => vec![0x42; size],
            None => data,
        };
        self.last_presentation_time_us = info.presentation_time_us;
        self.buffers.push_output(
            data,
            SampleInfo::new(0, info.presentation_time_us, info.flags),
        );
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<Dequeued> {
        self.buffers.dequeue_output()
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8]> {
        self.buffers.output(index)
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<()> {
        self.buffers.release_output(index)
    }

    fn output_format(&self) -> Result<MediaFormat> {
        self.buffers.output_format()
    }

    fn signal_end_of_input_stream(&mut self) -> Result<()> {
        self.end_of_input_signalled.store(true, Ordering::SeqCst);
        self.buffers.push_output(
            Vec::new(),
            SampleInfo::end_of_stream(self.last_presentation_time_us),
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.buffers.stop();
        Ok(())
    }

    fn release(&mut self) {
        self.buffers.release();
    }
}

/// Provider of `TestCodec`s that remembers what it was asked to build.
pub(crate) struct TestCodecs {
    decoded_format: MediaFormat,
    decoded_size: Option<usize>,
    pub(crate) decoder_formats: Vec<MediaFormat>,
    /// Set once any encoder has its input ended out of band.
    pub(crate) end_of_input_signalled: Arc<AtomicBool>,
}

impl TestCodecs {
    pub(crate) fn new(decoded_format: MediaFormat, decoded_size: Option<usize>) -> Self {
        Self {
            decoded_format,
            decoded_size,
            decoder_formats: Vec::new(),
            end_of_input_signalled: Arc::default(),
        }
    }
}

impl CodecProvider for TestCodecs {
    fn create_decoder(&mut self, format: &MediaFormat) -> Result<Box<dyn Codec>> {
        self.decoder_formats.push(format.clone());
        Ok(Box::new(TestCodec::new(
            self.decoded_format.clone(),
            false,
            self.decoded_size,
        )))
    }

    fn create_encoder(&mut self, format: &MediaFormat) -> Result<Box<dyn Codec>> {
        let mut encoder = TestCodec::new(format.clone(), true, None);
        encoder.end_of_input_signalled = Arc::clone(&self.end_of_input_signalled);
        Ok(Box::new(encoder))
    }
}
