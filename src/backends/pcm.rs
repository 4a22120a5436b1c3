//! Identity encoder for interleaved signed 16-bit PCM (`audio/raw`).
//!
//! Useful as the encoder half of a WAV re-encode and as a predictable codec in tests.

use std::time::Duration;

use crate::Result;
use crate::backends::buffers::CodecBuffers;
use crate::codec::{Codec, Dequeued};
use crate::error::{ConfigError, Error};
use crate::format::{
    KEY_BITS_PER_SAMPLE, KEY_CHANNEL_COUNT, KEY_MAX_INPUT_SIZE, KEY_SAMPLE_RATE, MIMETYPE_AUDIO_RAW,
    MediaFormat,
};
use crate::sample::{SampleFlags, SampleInfo};

/// Input capacity when the format does not carry `max-input-size`.
pub const DEFAULT_PCM_INPUT_SIZE: usize = 16 * 1024;

const INPUT_SLOTS: usize = 4;

#[derive(Debug)]
pub struct PcmEncoder {
    format: MediaFormat,
    buffers: CodecBuffers,
    last_presentation_time_us: i64,
}

impl PcmEncoder {
    pub fn new(format: &MediaFormat) -> Result<Self> {
        let mime = format.mime().unwrap_or_default();
        if mime != MIMETYPE_AUDIO_RAW {
            return Err(ConfigError::UnsupportedCodec(mime.to_string()).into());
        }

        // Validated up front so a bad format fails at creation, not mid-run.
        format.integer(KEY_SAMPLE_RATE)?;
        format.integer(KEY_CHANNEL_COUNT)?;

        let capacity = match format.get_int(KEY_MAX_INPUT_SIZE) {
            Some(size) if size > 0 => size as usize,
            _ => DEFAULT_PCM_INPUT_SIZE,
        };

        let mut format = format.clone();
        format.set_int(KEY_BITS_PER_SAMPLE, 16);

        Ok(Self {
            format,
            buffers: CodecBuffers::new(INPUT_SLOTS, capacity),
            last_presentation_time_us: 0,
        })
    }
}

impl Codec for PcmEncoder {
    fn start(&mut self) -> Result<()> {
        self.buffers.start()?;
        self.buffers.set_output_format(self.format.clone());
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        self.buffers.dequeue_input()
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        self.buffers.input_mut(index)
    }

    fn queue_input_buffer(&mut self, index: usize, info: SampleInfo) -> Result<()> {
        let mut data = self.buffers.take_input(index, &info)?;
        if data.len() % 2 != 0 {
            return Err(Error::codec("PCM input is not a whole number of samples"));
        }

        if info.is_end_of_stream() {
            data.clear();
        }

        let flags = SampleFlags {
            end_of_stream: info.is_end_of_stream(),
            ..SampleFlags::NONE
        };
        self.last_presentation_time_us = info.presentation_time_us;
        self.buffers
            .push_output(data, SampleInfo::new(0, info.presentation_time_us, flags));
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
