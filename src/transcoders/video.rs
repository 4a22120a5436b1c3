use tracing::{debug, info};

use crate::Result;
use crate::codec::{Codec, CodecProvider, Dequeued, FrameSurface};
use crate::error::Error;
use crate::format::{KEY_ROTATION_DEGREES, MediaFormat, TrackType};
use crate::transcoders::{
    DrainState, EncoderSink, ExtractorFeed, StepContext, TranscoderState, release_codec,
};

/// Decode → frame surface → encode pipeline for the video track.
pub struct VideoTrackTranscoder {
    track_index: usize,
    input_format: MediaFormat,
    output_format: MediaFormat,
    decoder: Option<Box<dyn Codec>>,
    encoder: Option<Box<dyn Codec>>,
    surface: Option<Box<dyn FrameSurface>>,
    decoder_started: bool,
    encoder_started: bool,
    decoder_done: bool,
    feed: ExtractorFeed,
    sink: EncoderSink,
    state: TranscoderState,
}

impl VideoTrackTranscoder {
    pub fn new(track_index: usize, input_format: MediaFormat, output_format: MediaFormat) -> Self {
        Self {
            track_index,
            input_format,
            output_format,
            decoder: None,
            encoder: None,
            surface: None,
            decoder_started: false,
            encoder_started: false,
            decoder_done: false,
            feed: ExtractorFeed::new(track_index),
            sink: EncoderSink::new(TrackType::Video),
            state: TranscoderState::NotStarted,
        }
    }

    pub fn setup(&mut self, codecs: &mut dyn CodecProvider) -> Result<()> {
        if self.state != TranscoderState::NotStarted {
            return Err(Error::invariant("video transcoder set up twice"));
        }

        let encoder = self
            .encoder
            .insert(codecs.create_encoder(&self.output_format)?);
        self.surface = Some(codecs.create_frame_surface(&self.output_format)?);
        encoder.start()?;
        self.encoder_started = true;

        // Rotation travels in the container header, so the decoder must not apply it again.
        let mut decoder_format = self.input_format.clone();
        if decoder_format.contains_key(KEY_ROTATION_DEGREES) {
            decoder_format.set_int(KEY_ROTATION_DEGREES, 0);
        }

        let decoder = self.decoder.insert(codecs.create_decoder(&decoder_format)?);
        decoder.start()?;
        self.decoder_started = true;

        info!(
            track_index = self.track_index,
            output = %self.output_format,
            "video transcoder ready"
        );
        self.state = TranscoderState::Running;
        Ok(())
    }

    pub fn step_pipeline(&mut self, ctx: &mut StepContext<'_>) -> Result<bool> {
        if self.state == TranscoderState::Finished {
            return Ok(false);
        }

        let (Some(decoder), Some(encoder), Some(surface)) = (
            self.decoder.as_deref_mut(),
            self.encoder.as_deref_mut(),
            self.surface.as_deref_mut(),
        ) else {
            return Err(Error::invariant("video transcoder stepped before setup"));
        };

        let mut busy = false;

        while self.sink.drain(encoder, ctx)? != DrainState::None {
            busy = true;
        }

        loop {
            let status = drain_decoder(decoder, encoder, surface, &mut self.decoder_done, ctx)?;
            if status != DrainState::None {
                busy = true;
            }
            // Only a format change is worth an immediate retry; the encoder may be full.
            if status != DrainState::ShouldRetryImmediately {
                break;
            }
        }

        while self.feed.drain(decoder, ctx)? != DrainState::None {
            busy = true;
        }

        if self.sink.is_done() {
            debug!(track_index = self.track_index, "video track finished");
            self.state = TranscoderState::Finished;
        }

        Ok(busy)
    }

    pub fn determined_format(&self) -> Option<&MediaFormat> {
        self.sink.output_format()
    }

    pub fn written_presentation_time_us(&self) -> i64 {
        self.sink.written_presentation_time_us()
    }

    pub fn state(&self) -> TranscoderState {
        self.state
    }

    pub fn track_index(&self) -> usize {
        self.track_index
    }

    pub fn release(&mut self) {
        release_codec(self.decoder.take(), self.decoder_started, "video decoder");
        if let Some(mut surface) = self.surface.take() {
            surface.release();
        }
        release_codec(self.encoder.take(), self.encoder_started, "video encoder");
        self.decoder_started = false;
        self.encoder_started = false;
    }
}

fn drain_decoder(
    decoder: &mut dyn Codec,
    encoder: &mut dyn Codec,
    surface: &mut dyn FrameSurface,
    decoder_done: &mut bool,
    ctx: &mut StepContext<'_>,
) -> Result<DrainState> {
    if *decoder_done {
        return Ok(DrainState::None);
    }

    let (index, mut info) = match decoder.dequeue_output_buffer(ctx.timeout)? {
        Dequeued::TryAgainLater => return Ok(DrainState::None),
        // Frames go through the surface, so the decoded format needs no handling here.
        Dequeued::FormatChanged => return Ok(DrainState::ShouldRetryImmediately),
        Dequeued::Buffer { index, info } => (index, info),
    };

    if info.is_end_of_stream() {
        encoder.signal_end_of_input_stream()?;
        *decoder_done = true;
        info.size = 0;
    }

    if info.size > 0 {
        let frame = decoder.output_buffer(index)?;
        let frame = frame.get(..info.size).ok_or_else(|| {
            Error::codec("decoded frame is smaller than its reported size")
        })?;
        surface.render(frame, info.presentation_time_us, encoder)?;
    }

    decoder.release_output_buffer(index)?;
    Ok(DrainState::Consumed)
}
