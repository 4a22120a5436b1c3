use tracing::{debug, info};

use crate::Result;
use crate::audio_channel::AudioChannel;
use crate::codec::{Codec, CodecProvider, Dequeued};
use crate::error::Error;
use crate::format::{MediaFormat, TrackType};
use crate::transcoders::{
    DrainState, EncoderSink, ExtractorFeed, StepContext, TranscoderState, release_codec,
};

/// Decode → remix → encode pipeline for the audio track.
pub struct AudioTrackTranscoder {
    track_index: usize,
    input_format: MediaFormat,
    output_format: MediaFormat,
    decoder: Option<Box<dyn Codec>>,
    encoder: Option<Box<dyn Codec>>,
    channel: AudioChannel,
    decoder_started: bool,
    encoder_started: bool,
    decoder_done: bool,
    feed: ExtractorFeed,
    sink: EncoderSink,
    state: TranscoderState,
}

impl AudioTrackTranscoder {
    pub fn new(track_index: usize, input_format: MediaFormat, output_format: MediaFormat) -> Self {
        Self {
            track_index,
            input_format,
            channel: AudioChannel::new(output_format.clone()),
            output_format,
            decoder: None,
            encoder: None,
            decoder_started: false,
            encoder_started: false,
            decoder_done: false,
            feed: ExtractorFeed::new(track_index),
            sink: EncoderSink::new(TrackType::Audio),
            state: TranscoderState::NotStarted,
        }
    }

    pub fn setup(&mut self, codecs: &mut dyn CodecProvider) -> Result<()> {
        if self.state != TranscoderState::NotStarted {
            return Err(Error::invariant("audio transcoder set up twice"));
        }

        let encoder = self
            .encoder
            .insert(codecs.create_encoder(&self.output_format)?);
        encoder.start()?;
        self.encoder_started = true;

        let decoder = self
            .decoder
            .insert(codecs.create_decoder(&self.input_format)?);
        decoder.start()?;
        self.decoder_started = true;

        info!(
            track_index = self.track_index,
            output = %self.output_format,
            "audio transcoder ready"
        );
        self.state = TranscoderState::Running;
        Ok(())
    }

    pub fn step_pipeline(&mut self, ctx: &mut StepContext<'_>) -> Result<bool> {
        if self.state == TranscoderState::Finished {
            return Ok(false);
        }

        let (Some(decoder), Some(encoder)) =
            (self.decoder.as_deref_mut(), self.encoder.as_deref_mut())
        else {
            return Err(Error::invariant("audio transcoder stepped before setup"));
        };

        let mut busy = false;

        while self.sink.drain(encoder, ctx)? != DrainState::None {
            busy = true;
        }

        loop {
            let status = drain_decoder(decoder, &mut self.channel, &mut self.decoder_done, ctx)?;
            if status != DrainState::None {
                busy = true;
            }
            if status != DrainState::ShouldRetryImmediately {
                break;
            }
        }

        while self.channel.feed_encoder(encoder, ctx.timeout)? {
            busy = true;
        }

        while self.feed.drain(decoder, ctx)? != DrainState::None {
            busy = true;
        }

        if self.sink.is_done() {
            debug!(track_index = self.track_index, "audio track finished");
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
        release_codec(self.decoder.take(), self.decoder_started, "audio decoder");
        release_codec(self.encoder.take(), self.encoder_started, "audio encoder");
        self.decoder_started = false;
        self.encoder_started = false;
    }
}

fn drain_decoder(
    decoder: &mut dyn Codec,
    channel: &mut AudioChannel,
    decoder_done: &mut bool,
    ctx: &mut StepContext<'_>,
) -> Result<DrainState> {
    if *decoder_done {
        return Ok(DrainState::None);
    }

    let (index, info) = match decoder.dequeue_output_buffer(ctx.timeout)? {
        Dequeued::TryAgainLater => return Ok(DrainState::None),
        Dequeued::FormatChanged => {
            channel.set_actual_decoded_format(&decoder.output_format()?)?;
            return Ok(DrainState::ShouldRetryImmediately);
        }
        Dequeued::Buffer { index, info } => (index, info),
    };

    if info.size > 0 {
        let data = decoder.output_buffer(index)?;
        let data = data
            .get(..info.size)
            .ok_or_else(|| Error::codec("decoded audio is smaller than its reported size"))?;
        channel.drain_decoder_buffer_and_queue(Some(data), info.presentation_time_us)?;
    }

    if info.is_end_of_stream() {
        *decoder_done = true;
        channel.drain_decoder_buffer_and_queue(None, info.presentation_time_us)?;
    }

    // The channel keeps its own copy, so the decoder buffer goes back right away.
    decoder.release_output_buffer(index)?;
    Ok(DrainState::Consumed)
}
