//! The transcode run: one reader, one writer, one stepping loop.
//!
//! Responsibilities:
//! - Read header metadata (duration, rotation, location) and carry what parses into the output
//! - Pick the first video/audio tracks and ask the strategy for their output formats
//! - Build one track transcoder per present track and step them until all finish
//! - Report progress and honor cancellation once per iteration
//! - Always stop/release the writer, every transcoder, and the reader, whatever happened

use std::thread;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::codec::CodecProvider;
use crate::container::{
    ContainerMetadata, ContainerReader, ContainerWriter, first_video_and_audio_track,
};
use crate::error::ConfigError;
use crate::format::{MediaFormat, TrackType};
use crate::location::parse_iso6709;
use crate::muxer::QueuedMuxer;
use crate::opts::TranscodeOpts;
use crate::strategy::FormatStrategy;
use crate::transcoders::{
    AudioTrackTranscoder, PassThroughTrackTranscoder, StepContext, TrackTranscoder,
    VideoTrackTranscoder,
};

/// Reported once, instead of ratios, when the source duration is unknown.
pub const PROGRESS_UNKNOWN: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TranscodeReport {
    pub outcome: TranscodeOutcome,
    /// Loop iterations run before finishing or observing cancellation.
    pub iterations: u64,
}

/// Header metadata after parsing. Fields that fail to parse are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceMetadata {
    pub duration_us: Option<i64>,
    pub rotation: Option<i32>,
    pub location: Option<(f32, f32)>,
}

impl SourceMetadata {
    pub fn parse(metadata: &ContainerMetadata) -> Self {
        let duration_us = metadata
            .duration_ms
            .as_deref()
            .and_then(|ms| ms.trim().parse::<i64>().ok())
            .filter(|ms| *ms > 0)
            .map(|ms| ms * 1000);

        let rotation = metadata
            .rotation
            .as_deref()
            .and_then(|degrees| degrees.trim().parse::<i32>().ok());

        let location = metadata.location.as_deref().and_then(parse_iso6709);

        Self {
            duration_us,
            rotation,
            location,
        }
    }
}

/// What a source holds, without transcoding anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaInfo {
    pub video: Option<MediaFormat>,
    pub audio: Option<MediaFormat>,
    pub metadata: SourceMetadata,
}

/// Describe the first video and audio tracks of `reader` and its header metadata.
pub fn extract_info(reader: &dyn ContainerReader) -> Result<MediaInfo> {
    let tracks = first_video_and_audio_track(reader)?;
    Ok(MediaInfo {
        video: tracks.video.map(|t| t.format),
        audio: tracks.audio.map(|t| t.format),
        metadata: SourceMetadata::parse(&reader.metadata()),
    })
}

pub struct TranscoderEngine {
    reader: Box<dyn ContainerReader>,
    muxer: QueuedMuxer,
    codecs: Box<dyn CodecProvider>,
    transcoders: Vec<TrackTranscoder>,
}

impl TranscoderEngine {
    pub fn new(
        reader: Box<dyn ContainerReader>,
        writer: Box<dyn ContainerWriter>,
        codecs: Box<dyn CodecProvider>,
    ) -> Self {
        Self {
            reader,
            muxer: QueuedMuxer::new(writer),
            codecs,
            transcoders: Vec::new(),
        }
    }

    /// Run to completion or cancellation.
    ///
    /// `progress` receives `PROGRESS_UNKNOWN` once if the duration is unknown, otherwise
    /// strictly increasing ratios from `0.0`, ending with `1.0` on completion.
    ///
    /// The writer, every track transcoder, and the reader are released before this returns,
    /// on every path.
    pub fn run(
        mut self,
        strategy: &FormatStrategy,
        opts: &TranscodeOpts,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(f64),
    ) -> Result<TranscodeReport> {
        let run_res = self.run_inner(strategy, opts, cancel, progress);
        merge_run_and_release(run_res, self.finalize())
    }

    fn run_inner(
        &mut self,
        strategy: &FormatStrategy,
        opts: &TranscodeOpts,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(f64),
    ) -> Result<TranscodeReport> {
        let metadata = SourceMetadata::parse(&self.reader.metadata());
        self.apply_metadata(&metadata)?;
        self.build_transcoders(strategy)?;

        for transcoder in &mut self.transcoders {
            transcoder.setup(self.codecs.as_mut())?;
            self.reader.select_track(transcoder.track_index())?;
        }

        info!(
            tracks = self.transcoders.len(),
            duration_us = metadata.duration_us,
            "transcode started"
        );
        self.step_until_done(metadata.duration_us, opts, cancel, progress)
    }

    fn apply_metadata(&mut self, metadata: &SourceMetadata) -> Result<()> {
        let raw = self.reader.metadata();

        match metadata.rotation {
            Some(degrees) => self.muxer.set_orientation_hint(degrees)?,
            None if raw.rotation.is_some() => {
                debug!(rotation = ?raw.rotation, "ignoring unparseable rotation");
            }
            None => {}
        }

        match metadata.location {
            Some((latitude, longitude)) => self.muxer.set_location(latitude, longitude)?,
            None if raw.location.is_some() => {
                debug!(location = ?raw.location, "ignoring unparseable location");
            }
            None => {}
        }

        if metadata.duration_us.is_none() {
            debug!(
                duration_ms = ?raw.duration_ms,
                "duration unknown, progress will not be reported"
            );
        }
        Ok(())
    }

    fn build_transcoders(&mut self, strategy: &FormatStrategy) -> Result<()> {
        let tracks = first_video_and_audio_track(self.reader.as_ref())?;
        if tracks.is_empty() {
            return Err(ConfigError::NoTracks.into());
        }

        // Ask the strategy for both sides before any codec exists.
        let video_output = match &tracks.video {
            Some(track) => strategy.create_video_output_format(&track.format)?,
            None => None,
        };
        let audio_output = match &tracks.audio {
            Some(track) => strategy.create_audio_output_format(&track.format)?,
            None => None,
        };

        for (track_type, output) in [
            (TrackType::Video, video_output),
            (TrackType::Audio, audio_output),
        ] {
            let Some(source) = tracks.get(track_type) else {
                self.muxer.mark_track_absent(track_type)?;
                continue;
            };

            let transcoder = match (track_type, output) {
                (TrackType::Video, Some(output)) => TrackTranscoder::Video(
                    VideoTrackTranscoder::new(source.index, source.format.clone(), output),
                ),
                (TrackType::Audio, Some(output)) => TrackTranscoder::Audio(
                    AudioTrackTranscoder::new(source.index, source.format.clone(), output),
                ),
                (_, None) => TrackTranscoder::PassThrough(PassThroughTrackTranscoder::new(
                    source.index,
                    track_type,
                    source.format.clone(),
                    &mut self.muxer,
                )?),
            };
            debug!(
                %track_type,
                index = source.index,
                pass_through = matches!(transcoder, TrackTranscoder::PassThrough(_)),
                "track transcoder created"
            );
            self.transcoders.push(transcoder);
        }

        Ok(())
    }

    fn step_until_done(
        &mut self,
        duration_us: Option<i64>,
        opts: &TranscodeOpts,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(f64),
    ) -> Result<TranscodeReport> {
        let interval = opts.progress_interval_steps.max(1);
        let mut last_reported = match duration_us {
            Some(_) => 0.0,
            None => PROGRESS_UNKNOWN,
        };
        progress(last_reported);

        let mut iterations = 0u64;
        while !self.transcoders.iter().all(TrackTranscoder::is_finished) {
            if cancel.is_cancelled() {
                info!(iterations, "transcode cancelled");
                return Ok(TranscodeReport {
                    outcome: TranscodeOutcome::Cancelled,
                    iterations,
                });
            }

            let mut ctx = StepContext {
                reader: self.reader.as_mut(),
                muxer: &mut self.muxer,
                timeout: opts.codec_timeout,
            };
            let mut busy = false;
            for transcoder in &mut self.transcoders {
                // Step every track, finished or not, so none blocks the others.
                busy |= transcoder.step_pipeline(&mut ctx)?;
            }
            iterations += 1;

            if let Some(duration_us) = duration_us {
                if iterations % interval == 0 {
                    let ratio = self.progress_ratio(duration_us);
                    if ratio > last_reported {
                        debug!(iterations, progress = ratio, "transcode progress");
                        progress(ratio);
                        last_reported = ratio;
                    }
                }
            }

            if !busy {
                thread::sleep(opts.idle_wait);
            }
        }

        if duration_us.is_some() && last_reported < 1.0 {
            progress(1.0);
        }

        info!(iterations, "transcode completed");
        Ok(TranscodeReport {
            outcome: TranscodeOutcome::Completed,
            iterations,
        })
    }

    /// Mean of per-track progress; finished tracks count as 1.0.
    fn progress_ratio(&self, duration_us: i64) -> f64 {
        let total: f64 = self
            .transcoders
            .iter()
            .map(|t| {
                if t.is_finished() {
                    1.0
                } else {
                    (t.written_presentation_time_us() as f64 / duration_us as f64).clamp(0.0, 1.0)
                }
            })
            .sum();
        total / self.transcoders.len().max(1) as f64
    }

    fn finalize(&mut self) -> Result<()> {
        let stop_res = self.muxer.stop();
        self.muxer.release();
        for transcoder in &mut self.transcoders {
            transcoder.release();
        }
        self.reader.release();
        debug!("transcode resources released");
        stop_res
    }
}

fn merge_run_and_release<T>(run_res: Result<T>, release_res: Result<()>) -> Result<T> {
    match (run_res, release_res) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release_err)) => Err(release_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(release_err)) => {
            warn!(error = %release_err, "release failed after a failed run");
            Err(err)
        }
    }
}
