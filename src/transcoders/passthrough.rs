use tracing::debug;

use crate::Result;
use crate::format::{KEY_MAX_INPUT_SIZE, MediaFormat, TrackType};
use crate::muxer::QueuedMuxer;
use crate::sample::{SampleFlags, SampleInfo};
use crate::transcoders::{StepContext, TranscoderState};

/// Sample buffer size when the source format does not say how large samples get.
pub const DEFAULT_PASSTHROUGH_BUFFER_SIZE: usize = 1024 * 1024;

/// Forwards compressed samples of one track to the muxer unchanged.
pub struct PassThroughTrackTranscoder {
    track_index: usize,
    track_type: TrackType,
    format: MediaFormat,
    buffer: Vec<u8>,
    written_presentation_time_us: i64,
    state: TranscoderState,
}

impl PassThroughTrackTranscoder {
    /// Registers `format` with the muxer immediately: the output track is the input track.
    pub fn new(
        track_index: usize,
        track_type: TrackType,
        format: MediaFormat,
        muxer: &mut QueuedMuxer,
    ) -> Result<Self> {
        muxer.set_output_format(track_type, format.clone())?;

        let buffer_size = match format.get_int(KEY_MAX_INPUT_SIZE) {
            Some(size) if size > 0 => size as usize,
            _ => DEFAULT_PASSTHROUGH_BUFFER_SIZE,
        };

        Ok(Self {
            track_index,
            track_type,
            format,
            buffer: vec![0u8; buffer_size],
            written_presentation_time_us: 0,
            state: TranscoderState::NotStarted,
        })
    }

    pub fn setup(&mut self) -> Result<()> {
        self.state = TranscoderState::Running;
        Ok(())
    }

    pub fn step_pipeline(&mut self, ctx: &mut StepContext<'_>) -> Result<bool> {
        if self.state == TranscoderState::Finished {
            return Ok(false);
        }

        let Some(current) = ctx.reader.sample_track_index()? else {
            ctx.muxer.write_sample_data(
                self.track_type,
                &[],
                &SampleInfo::end_of_stream(self.written_presentation_time_us),
            )?;
            debug!(
                track_index = self.track_index,
                track_type = %self.track_type,
                "pass-through finished"
            );
            self.state = TranscoderState::Finished;
            return Ok(true);
        };

        if current != self.track_index {
            return Ok(false);
        }

        let size = ctx.reader.read_sample_data(&mut self.buffer)?;
        let flags = SampleFlags {
            key_frame: ctx.reader.sample_flags().key_frame,
            ..SampleFlags::NONE
        };
        let presentation_time_us = ctx.reader.sample_time();

        ctx.muxer.write_sample_data(
            self.track_type,
            &self.buffer[..size],
            &SampleInfo::new(size, presentation_time_us, flags),
        )?;
        self.written_presentation_time_us = presentation_time_us;
        ctx.reader.advance()?;
        Ok(true)
    }

    pub fn determined_format(&self) -> &MediaFormat {
        &self.format
    }

    pub fn written_presentation_time_us(&self) -> i64 {
        self.written_presentation_time_us
    }

    pub fn state(&self) -> TranscoderState {
        self.state
    }

    pub fn track_type(&self) -> TrackType {
        self.track_type
    }

    pub fn track_index(&self) -> usize {
        self.track_index
    }

    pub fn release(&mut self) {
        self.buffer = Vec::new();
    }
}
