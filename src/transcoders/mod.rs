//! Per-track pipelines driven one step at a time by the engine.
//!
//! Every track gets exactly one `TrackTranscoder`:
//! - `Video` / `Audio` decode, transform, and re-encode when the strategy produced a target format
//! - `PassThrough` forwards compressed samples unchanged when it did not
//!
//! Each `step_pipeline` call does as much work as is ready right now and reports whether it did
//! anything, so the engine can back off when a whole iteration was idle.

mod audio;
mod passthrough;
#[cfg(test)]
mod testing;
mod video;

use std::time::Duration;

use tracing::{debug, warn};

pub use audio::AudioTrackTranscoder;
pub use passthrough::PassThroughTrackTranscoder;
pub use video::VideoTrackTranscoder;

use crate::Result;
use crate::codec::{Codec, CodecProvider, Dequeued};
use crate::container::ContainerReader;
use crate::error::{ConfigError, Error};
use crate::format::{MediaFormat, TrackType};
use crate::muxer::QueuedMuxer;
use crate::sample::{SampleFlags, SampleInfo};

/// Run-scoped collaborators shared by every transcoder during one engine iteration.
pub struct StepContext<'a> {
    pub reader: &'a mut dyn ContainerReader,
    pub muxer: &'a mut QueuedMuxer,
    /// How long codec dequeues may wait.
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderState {
    NotStarted,
    Running,
    Finished,
}

/// Outcome of one attempt to move data through a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrainState {
    /// Nothing to do right now.
    None,
    /// State changed without moving a buffer; try the same stage again.
    ShouldRetryImmediately,
    /// A buffer moved.
    Consumed,
}

pub enum TrackTranscoder {
    Video(VideoTrackTranscoder),
    Audio(AudioTrackTranscoder),
    PassThrough(PassThroughTrackTranscoder),
}

impl TrackTranscoder {
    /// Create codecs and move to `Running`.
    pub fn setup(&mut self, codecs: &mut dyn CodecProvider) -> Result<()> {
        match self {
            TrackTranscoder::Video(t) => t.setup(codecs),
            TrackTranscoder::Audio(t) => t.setup(codecs),
            TrackTranscoder::PassThrough(t) => t.setup(),
        }
    }

    /// Output format actually produced, once known.
    pub fn determined_format(&self) -> Option<&MediaFormat> {
        match self {
            TrackTranscoder::Video(t) => t.determined_format(),
            TrackTranscoder::Audio(t) => t.determined_format(),
            TrackTranscoder::PassThrough(t) => Some(t.determined_format()),
        }
    }

    /// Advance the pipeline. Returns whether any work was done.
    pub fn step_pipeline(&mut self, ctx: &mut StepContext<'_>) -> Result<bool> {
        match self {
            TrackTranscoder::Video(t) => t.step_pipeline(ctx),
            TrackTranscoder::Audio(t) => t.step_pipeline(ctx),
            TrackTranscoder::PassThrough(t) => t.step_pipeline(ctx),
        }
    }

    /// Timestamp of the last sample handed to the muxer.
    pub fn written_presentation_time_us(&self) -> i64 {
        match self {
            TrackTranscoder::Video(t) => t.written_presentation_time_us(),
            TrackTranscoder::Audio(t) => t.written_presentation_time_us(),
            TrackTranscoder::PassThrough(t) => t.written_presentation_time_us(),
        }
    }

    pub fn state(&self) -> TranscoderState {
        match self {
            TrackTranscoder::Video(t) => t.state(),
            TrackTranscoder::Audio(t) => t.state(),
            TrackTranscoder::PassThrough(t) => t.state(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state() == TranscoderState::Finished
    }

    pub fn track_type(&self) -> TrackType {
        match self {
            TrackTranscoder::Video(_) => TrackType::Video,
            TrackTranscoder::Audio(_) => TrackType::Audio,
            TrackTranscoder::PassThrough(t) => t.track_type(),
        }
    }

    /// Source track index in the container reader.
    pub fn track_index(&self) -> usize {
        match self {
            TrackTranscoder::Video(t) => t.track_index(),
            TrackTranscoder::Audio(t) => t.track_index(),
            TrackTranscoder::PassThrough(t) => t.track_index(),
        }
    }

    /// Release whatever was acquired. Safe to call more than once.
    pub fn release(&mut self) {
        match self {
            TrackTranscoder::Video(t) => t.release(),
            TrackTranscoder::Audio(t) => t.release(),
            TrackTranscoder::PassThrough(t) => t.release(),
        }
    }
}

/// Moves compressed samples of one track from the reader into a decoder.
#[derive(Debug)]
pub(crate) struct ExtractorFeed {
    track_index: usize,
    done: bool,
}

impl ExtractorFeed {
    pub(crate) fn new(track_index: usize) -> Self {
        Self {
            track_index,
            done: false,
        }
    }

    pub(crate) fn drain(
        &mut self,
        decoder: &mut dyn Codec,
        ctx: &mut StepContext<'_>,
    ) -> Result<DrainState> {
        if self.done {
            return Ok(DrainState::None);
        }

        let current = ctx.reader.sample_track_index()?;
        if current.is_some_and(|index| index != self.track_index) {
            // Another track's sample is up next.
            return Ok(DrainState::None);
        }

        let Some(input) = decoder.dequeue_input_buffer(ctx.timeout)? else {
            return Ok(DrainState::None);
        };

        if current.is_none() {
            self.done = true;
            decoder.queue_input_buffer(input, SampleInfo::end_of_stream(0))?;
            debug!(
                track_index = self.track_index,
                "reader exhausted, decoder input ended"
            );
            return Ok(DrainState::None);
        }

        let size = ctx.reader.read_sample_data(decoder.input_buffer(input)?)?;
        let flags = SampleFlags {
            key_frame: ctx.reader.sample_flags().key_frame,
            ..SampleFlags::NONE
        };
        decoder.queue_input_buffer(
            input,
            SampleInfo::new(size, ctx.reader.sample_time(), flags),
        )?;
        ctx.reader.advance()?;
        Ok(DrainState::Consumed)
    }
}

/// Moves encoder output into the muxer and tracks the output format and written timestamp.
#[derive(Debug)]
pub(crate) struct EncoderSink {
    track_type: TrackType,
    actual_output_format: Option<MediaFormat>,
    written_presentation_time_us: i64,
    done: bool,
}

impl EncoderSink {
    pub(crate) fn new(track_type: TrackType) -> Self {
        Self {
            track_type,
            actual_output_format: None,
            written_presentation_time_us: 0,
            done: false,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn output_format(&self) -> Option<&MediaFormat> {
        self.actual_output_format.as_ref()
    }

    pub(crate) fn written_presentation_time_us(&self) -> i64 {
        self.written_presentation_time_us
    }

    pub(crate) fn drain(
        &mut self,
        encoder: &mut dyn Codec,
        ctx: &mut StepContext<'_>,
    ) -> Result<DrainState> {
        if self.done {
            return Ok(DrainState::None);
        }

        let (index, mut info) = match encoder.dequeue_output_buffer(ctx.timeout)? {
            Dequeued::TryAgainLater => return Ok(DrainState::None),
            Dequeued::FormatChanged => {
                let track_type = self.track_type;
                if self.actual_output_format.is_some() {
                    return Err(ConfigError::OutputFormatChangedTwice(track_type).into());
                }
                let format = encoder.output_format()?;
                debug!(%track_type, %format, "encoder output format determined");
                ctx.muxer.set_output_format(self.track_type, format.clone())?;
                self.actual_output_format = Some(format);
                return Ok(DrainState::ShouldRetryImmediately);
            }
            Dequeued::Buffer { index, info } => (index, info),
        };

        if self.actual_output_format.is_none() {
            return Err(Error::invariant("could not determine actual output format"));
        }

        if info.is_end_of_stream() {
            self.done = true;
            info.size = 0;
            info.presentation_time_us = self.written_presentation_time_us;
            debug!(track_type = %self.track_type, "encoder reached end of stream");
        }

        if info.flags.codec_config {
            // Already carried by the registered output format.
            encoder.release_output_buffer(index)?;
            return Ok(DrainState::ShouldRetryImmediately);
        }

        ctx.muxer
            .write_sample_data(self.track_type, encoder.output_buffer(index)?, &info)?;
        if !info.is_end_of_stream() {
            self.written_presentation_time_us = info.presentation_time_us;
        }
        encoder.release_output_buffer(index)?;
        Ok(DrainState::Consumed)
    }
}

/// Stop a codec only if it was started, then release it. Errors are logged, not returned.
pub(crate) fn release_codec(codec: Option<Box<dyn Codec>>, started: bool, what: &str) {
    let Some(mut codec) = codec else {
        return;
    };
    if started {
        if let Err(err) = codec.stop() {
            warn!(error = %err, codec = what, "codec stop failed during release");
        }
    }
    codec.release();
}
