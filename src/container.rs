//! Container reader/writer collaborator interfaces and track selection.
//!
//! Responsibilities:
//! - Describe what the engine needs from a demuxer (track enumeration, selection, sequential
//!   sample reads) and from a container writer (up-front track registration, start, writes, stop)
//! - Pick the first video and first audio track of an input

use tracing::debug;

use crate::Result;
use crate::format::{MediaFormat, TrackType};
use crate::sample::{SampleFlags, SampleInfo};

/// Header metadata as reported by the input, still in its textual form.
///
/// Parsing is left to the engine so that malformed values can be tolerated per field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerMetadata {
    /// Total duration in milliseconds.
    pub duration_ms: Option<String>,
    /// Clockwise rotation in degrees.
    pub rotation: Option<String>,
    /// ISO 6709 location string (e.g. `+37.5090-122.2500/`).
    pub location: Option<String>,
}

/// Sequential, track-filtered sample reader over a seekable input.
pub trait ContainerReader: Send {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> Result<MediaFormat>;

    /// Include `index` in the set of tracks whose samples are returned.
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Track of the current sample, or `None` once every selected track is exhausted.
    fn sample_track_index(&mut self) -> Result<Option<usize>>;

    /// Presentation timestamp of the current sample, in microseconds.
    fn sample_time(&self) -> i64;

    fn sample_flags(&self) -> SampleFlags;

    /// Copy the current sample into `buf` and return its size.
    fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Move to the next sample. Returns `false` once exhausted.
    fn advance(&mut self) -> Result<bool>;

    fn metadata(&self) -> ContainerMetadata;

    /// Must be safe to call more than once.
    fn release(&mut self);
}

/// Multiplexing container writer. All tracks must be added before `start`.
pub trait ContainerWriter: Send {
    fn set_orientation_hint(&mut self, degrees: i32) -> Result<()>;

    fn set_location(&mut self, latitude: f32, longitude: f32) -> Result<()>;

    fn add_track(&mut self, format: &MediaFormat) -> Result<usize>;

    fn start(&mut self) -> Result<()>;

    fn write_sample_data(&mut self, track_index: usize, data: &[u8], info: &SampleInfo)
    -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Must be safe to call more than once.
    fn release(&mut self);
}

/// A selected source track.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTrack {
    pub index: usize,
    pub format: MediaFormat,
}

/// First video and first audio track of an input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSelection {
    pub video: Option<SourceTrack>,
    pub audio: Option<SourceTrack>,
}

impl TrackSelection {
    pub fn get(&self, track_type: TrackType) -> Option<&SourceTrack> {
        match track_type {
            TrackType::Video => self.video.as_ref(),
            TrackType::Audio => self.audio.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}

/// Scan tracks in order; the first match per type wins and the scan stops once both are found.
pub fn first_video_and_audio_track(reader: &dyn ContainerReader) -> Result<TrackSelection> {
    let mut selection = TrackSelection::default();

    for index in 0..reader.track_count() {
        let format = reader.track_format(index)?;
        match format.track_type() {
            Some(TrackType::Video) if selection.video.is_none() => {
                debug!(index, mime = format.mime(), "selected video track");
                selection.video = Some(SourceTrack { index, format });
            }
            Some(TrackType::Audio) if selection.audio.is_none() => {
                debug!(index, mime = format.mime(), "selected audio track");
                selection.audio = Some(SourceTrack { index, format });
            }
            _ => {}
        }

        if selection.video.is_some() && selection.audio.is_some() {
            break;
        }
    }

    Ok(selection)
}
