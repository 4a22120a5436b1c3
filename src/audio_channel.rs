//! Raw audio channel from decoder output to encoder input.
//!
//! Decoded chunks rarely line up with encoder input buffers, so this module:
//! - queues decoded 16-bit chunks as they come out of the decoder
//! - remixes them (mono ↔ stereo) into whatever encoder input buffer is free
//! - carries the part of a chunk that did not fit in an overflow buffer, which is always
//!   drained before the next chunk is touched
//!
//! Sample-rate conversion is not supported. Decoders may only reveal their real output format
//! after the first bytes are processed, so that check happens in `set_actual_decoded_format`,
//! not at construction.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

use crate::Result;
use crate::codec::Codec;
use crate::error::{ChannelSide, ConfigError, Error};
use crate::format::{KEY_CHANNEL_COUNT, KEY_SAMPLE_RATE, MediaFormat};
use crate::remix::{AudioRemixer, pcm_from_le_bytes, pcm_to_le_bytes};
use crate::sample::{SampleFlags, SampleInfo};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Duration of `sample_count` interleaved samples at `sample_rate` across `channel_count`
/// channels, in microseconds.
/// Truncates once, after dividing by the full `sample_rate * channel_count` product. A zero
/// product yields `0`.
pub fn sample_count_to_duration_us(
    sample_count: usize,
    sample_rate: i64,
    channel_count: i64,
) -> i64 {
    (sample_count as i64 * MICROS_PER_SECOND)
        .checked_div(sample_rate * channel_count)
        .unwrap_or(0)
}

struct DecodedChunk {
    /// `None` marks end of stream.
    samples: Option<Vec<i16>>,
    presentation_time_us: i64,
}

#[derive(Default)]
struct Overflow {
    samples: Vec<i16>,
    position: usize,
    presentation_time_us: i64,
}

impl Overflow {
    fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

#[derive(Debug, Clone, Copy)]
struct DecodedLayout {
    sample_rate: i64,
    input_channels: i64,
    output_channels: i64,
    remixer: AudioRemixer,
}

pub struct AudioChannel {
    encode_format: MediaFormat,
    layout: Option<DecodedLayout>,
    filled: VecDeque<DecodedChunk>,
    overflow: Overflow,
    scratch: Vec<i16>,
}

impl AudioChannel {
    pub fn new(encode_format: MediaFormat) -> Self {
        Self {
            encode_format,
            layout: None,
            filled: VecDeque::new(),
            overflow: Overflow::default(),
            scratch: Vec::new(),
        }
    }

    /// Record the decoder's real output format and pick the remixer.
    ///
    /// Fails with a configuration error on a non-positive sample rate, a sample-rate mismatch,
    /// or a channel count other than 1 or 2 on either side.
    pub fn set_actual_decoded_format(&mut self, decoded: &MediaFormat) -> Result<()> {
        if self.layout.is_some() {
            return Err(Error::invariant("decoded audio format set twice"));
        }

        let sample_rate = decoded.integer(KEY_SAMPLE_RATE)?;
        let target_rate = self.encode_format.integer(KEY_SAMPLE_RATE)?;
        check_sample_rate(sample_rate)?;
        check_sample_rate(target_rate)?;
        if sample_rate != target_rate {
            return Err(ConfigError::SampleRateMismatch {
                decoded: sample_rate,
                target: target_rate,
            }
            .into());
        }

        let input_channels = decoded.integer(KEY_CHANNEL_COUNT)?;
        let output_channels = self.encode_format.integer(KEY_CHANNEL_COUNT)?;
        check_channel_count(ChannelSide::Input, input_channels)?;
        check_channel_count(ChannelSide::Output, output_channels)?;

        let remixer = AudioRemixer::for_channels(input_channels, output_channels);
        debug!(
            sample_rate,
            input_channels, output_channels, ?remixer, "audio channel configured"
        );

        self.layout = Some(DecodedLayout {
            sample_rate,
            input_channels,
            output_channels,
            remixer,
        });
        self.overflow = Overflow::default();
        Ok(())
    }

    /// Queue a decoded chunk (`None` for end of stream) for remixing.
    ///
    /// End of stream may arrive before any format, e.g. from an empty track.
    pub fn drain_decoder_buffer_and_queue(
        &mut self,
        data: Option<&[u8]>,
        presentation_time_us: i64,
    ) -> Result<()> {
        if data.is_some() && self.layout.is_none() {
            return Err(Error::invariant("audio buffer received before format"));
        }

        self.filled.push_back(DecodedChunk {
            samples: data.map(pcm_from_le_bytes),
            presentation_time_us,
        });
        Ok(())
    }

    /// Produce at most one encoder input buffer.
    ///
    /// Returns whether a buffer was queued to the encoder.
    pub fn feed_encoder(&mut self, encoder: &mut dyn Codec, timeout: Duration) -> Result<bool> {
        let has_overflow = self.overflow.remaining() > 0;
        if self.filled.is_empty() && !has_overflow {
            return Ok(false);
        }

        let Some(index) = encoder.dequeue_input_buffer(timeout)? else {
            // Encoder is full.
            return Ok(false);
        };
        let capacity = encoder.input_buffer(index)?.len() / 2;

        let (presentation_time_us, flags) = if has_overflow {
            let layout = self.layout()?;
            (self.drain_overflow(&layout, capacity), SampleFlags::NONE)
        } else {
            let Some(chunk) = self.filled.pop_front() else {
                return Err(Error::invariant("audio chunk queue drained unexpectedly"));
            };
            match chunk.samples {
                Some(samples) => {
                    let layout = self.layout()?;
                    let presentation_time_us = self.remix_and_maybe_fill_overflow(
                        &layout,
                        &samples,
                        chunk.presentation_time_us,
                        capacity,
                    )?;
                    (presentation_time_us, SampleFlags::NONE)
                }
                None => {
                    self.scratch.clear();
                    (chunk.presentation_time_us, SampleFlags::END_OF_STREAM)
                }
            }
        };

        let size = pcm_to_le_bytes(&self.scratch, encoder.input_buffer(index)?);
        encoder.queue_input_buffer(index, SampleInfo::new(size, presentation_time_us, flags))?;
        Ok(true)
    }

    /// Whether every queued chunk and all overflow have reached the encoder.
    pub fn is_idle(&self) -> bool {
        self.filled.is_empty() && self.overflow.remaining() == 0
    }

    fn layout(&self) -> Result<DecodedLayout> {
        self.layout
            .ok_or_else(|| Error::invariant("audio channel fed before format"))
    }

    fn drain_overflow(&mut self, layout: &DecodedLayout, capacity: usize) -> i64 {
        let overflow = &mut self.overflow;
        let begin_us = overflow.presentation_time_us
            + sample_count_to_duration_us(
                overflow.position,
                layout.sample_rate,
                layout.output_channels,
            );

        let n = overflow.remaining().min(capacity);
        self.scratch.clear();
        self.scratch
            .extend_from_slice(&overflow.samples[overflow.position..overflow.position + n]);
        overflow.position += n;

        if overflow.remaining() == 0 {
            overflow.samples.clear();
            overflow.position = 0;
        }

        begin_us
    }

    fn remix_and_maybe_fill_overflow(
        &mut self,
        layout: &DecodedLayout,
        samples: &[i16],
        presentation_time_us: i64,
        capacity: usize,
    ) -> Result<i64> {
        let remixer = layout.remixer;
        let fits = remixer.input_len_for(capacity);

        self.scratch.clear();
        self.scratch.resize(capacity, 0);

        if samples.len() <= fits {
            let (_, written) = remixer.remix(samples, &mut self.scratch);
            self.scratch.truncate(written);
            return Ok(presentation_time_us);
        }

        // Remix the prefix that fits, then the rest into the overflow buffer.
        let (consumed, written) = remixer.remix(&samples[..fits], &mut self.scratch);
        self.scratch.truncate(written);

        if self.overflow.remaining() != 0 {
            return Err(Error::invariant(
                "audio overflow refilled before being drained",
            ));
        }

        let rest = &samples[consumed..];
        let overflow = &mut self.overflow;
        overflow.samples.clear();
        overflow.samples.resize(remixer.output_len(rest.len()), 0);
        let (_, rest_written) = remixer.remix(rest, &mut overflow.samples);
        overflow.samples.truncate(rest_written);
        overflow.position = 0;
        overflow.presentation_time_us = presentation_time_us
            + sample_count_to_duration_us(consumed, layout.sample_rate, layout.input_channels);

        Ok(presentation_time_us)
    }
}

fn check_sample_rate(sample_rate: i64) -> Result<()> {
    if sample_rate <= 0 {
        return Err(ConfigError::InvalidParameter {
            name: "sample-rate",
            value: sample_rate.to_string(),
        }
        .into());
    }
    Ok(())
}

fn check_channel_count(side: ChannelSide, count: i64) -> Result<()> {
    if count != 1 && count != 2 {
        return Err(ConfigError::UnsupportedChannelCount { side, count }.into());
    }
    Ok(())
}
