//! Buffering front for the container writer.
//!
//! Container writers need every track format before `start`, but the two track transcoders learn
//! their output formats independently and may produce samples long before the other side does.
//! `QueuedMuxer` bridges that gap:
//! - samples written before start are copied into one growing byte buffer with a small record
//!   (type, size, timestamp, flags) per sample
//! - once every track type is either registered or explicitly marked absent, the real tracks are
//!   added (video first), the writer is started, and the records are replayed in arrival order
//!   from a single running offset
//! - after that, writes go straight through

use tracing::{debug, info};

use crate::Result;
use crate::container::ContainerWriter;
use crate::error::Error;
use crate::format::{MediaFormat, TrackType};
use crate::sample::{SampleFlags, SampleInfo};

/// Metadata of a sample held back until the writer starts.
///
/// The payload lives in the muxer's byte buffer, right after the previous record's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferedSample {
    pub track_type: TrackType,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

#[derive(Debug, Clone, Default, PartialEq)]
enum OutputTrack {
    #[default]
    Pending,
    Absent,
    Format(MediaFormat),
}

impl OutputTrack {
    fn is_resolved(&self) -> bool {
        !matches!(self, OutputTrack::Pending)
    }
}

pub struct QueuedMuxer {
    writer: Box<dyn ContainerWriter>,
    video: OutputTrack,
    audio: OutputTrack,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    byte_buffer: Vec<u8>,
    records: Vec<BufferedSample>,
    started: bool,
}

impl QueuedMuxer {
    pub fn new(writer: Box<dyn ContainerWriter>) -> Self {
        Self {
            writer,
            video: OutputTrack::Pending,
            audio: OutputTrack::Pending,
            video_index: None,
            audio_index: None,
            byte_buffer: Vec::new(),
            records: Vec::new(),
            started: false,
        }
    }

    /// Record the output format of `track_type`, starting the writer once both sides are known.
    pub fn set_output_format(&mut self, track_type: TrackType, format: MediaFormat) -> Result<()> {
        debug!(%track_type, %format, "muxer output format registered");
        self.resolve(track_type, OutputTrack::Format(format))
    }

    /// Declare that the output will have no track of `track_type`.
    pub fn mark_track_absent(&mut self, track_type: TrackType) -> Result<()> {
        debug!(%track_type, "muxer track marked absent");
        self.resolve(track_type, OutputTrack::Absent)
    }

    pub fn write_sample_data(
        &mut self,
        track_type: TrackType,
        data: &[u8],
        info: &SampleInfo,
    ) -> Result<()> {
        if info.size > data.len() {
            return Err(Error::invariant(format!(
                "{track_type} sample size {} exceeds its {} byte buffer",
                info.size,
                data.len()
            )));
        }
        if matches!(self.slot(track_type), OutputTrack::Absent) {
            return Err(Error::invariant(format!(
                "{track_type} sample written for an absent track"
            )));
        }

        if self.started {
            let index = self.track_index(track_type)?;
            return self.writer.write_sample_data(index, data, info);
        }

        self.byte_buffer.extend_from_slice(&data[..info.size]);
        self.records.push(BufferedSample {
            track_type,
            size: info.size,
            presentation_time_us: info.presentation_time_us,
            flags: info.flags,
        });
        Ok(())
    }

    /// Forward the orientation hint to the writer. Only valid before start.
    pub fn set_orientation_hint(&mut self, degrees: i32) -> Result<()> {
        self.ensure_not_started("orientation hint")?;
        self.writer.set_orientation_hint(degrees)
    }

    /// Forward the capture location to the writer. Only valid before start.
    pub fn set_location(&mut self, latitude: f32, longitude: f32) -> Result<()> {
        self.ensure_not_started("location")?;
        self.writer.set_location(latitude, longitude)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Samples held back waiting for the writer to start.
    pub fn buffered_samples(&self) -> &[BufferedSample] {
        &self.records
    }

    /// Stop the writer. A writer that never started is left alone.
    pub fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        self.writer.stop()
    }

    pub fn release(&mut self) {
        self.writer.release();
    }

    fn slot(&self, track_type: TrackType) -> &OutputTrack {
        match track_type {
            TrackType::Video => &self.video,
            TrackType::Audio => &self.audio,
        }
    }

    fn track_index(&self, track_type: TrackType) -> Result<usize> {
        let index = match track_type {
            TrackType::Video => self.video_index,
            TrackType::Audio => self.audio_index,
        };
        index.ok_or_else(|| Error::invariant(format!("{track_type} track was never added")))
    }

    fn ensure_not_started(&self, what: &str) -> Result<()> {
        if self.started {
            return Err(Error::invariant(format!("{what} set after the muxer started")));
        }
        Ok(())
    }

    fn resolve(&mut self, track_type: TrackType, track: OutputTrack) -> Result<()> {
        self.ensure_not_started(&format!("{track_type} output format"))?;

        match track_type {
            TrackType::Video => self.video = track,
            TrackType::Audio => self.audio = track,
        }
        self.start_when_ready()
    }

    fn start_when_ready(&mut self) -> Result<()> {
        if !self.video.is_resolved() || !self.audio.is_resolved() {
            return Ok(());
        }

        if let OutputTrack::Format(format) = &self.video {
            let index = self.writer.add_track(format)?;
            debug!(index, "added video track");
            self.video_index = Some(index);
        }
        if let OutputTrack::Format(format) = &self.audio {
            let index = self.writer.add_track(format)?;
            debug!(index, "added audio track");
            self.audio_index = Some(index);
        }
        if self.video_index.is_none() && self.audio_index.is_none() {
            return Err(Error::invariant("muxer has neither a video nor an audio track"));
        }

        self.writer.start()?;
        self.started = true;

        info!(
            samples = self.records.len(),
            bytes = self.byte_buffer.len(),
            "muxer started, replaying buffered samples"
        );

        let records = std::mem::take(&mut self.records);
        let byte_buffer = std::mem::take(&mut self.byte_buffer);
        let mut offset = 0;
        for record in &records {
            let index = self.track_index(record.track_type)?;
            let info = SampleInfo::new(record.size, record.presentation_time_us, record.flags);
            self.writer.write_sample_data(
                index,
                &byte_buffer[offset..offset + record.size],
                &info,
            )?;
            offset += record.size;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::{MemoryWriter, WriterLog};
    use crate::format::{MIMETYPE_AUDIO_AAC, MIMETYPE_VIDEO_AVC};
    use std::sync::{Arc, Mutex};

    fn muxer() -> (QueuedMuxer, Arc<Mutex<WriterLog>>) {
        let writer = MemoryWriter::new();
        let log = writer.log();
        (QueuedMuxer::new(Box::new(writer)), log)
    }

    fn snapshot(log: &Arc<Mutex<WriterLog>>) -> anyhow::Result<WriterLog> {
        Ok(log
            .lock()
            .map_err(|_| anyhow::anyhow!("writer log poisoned"))?
            .clone())
    }

    fn sample(pts: i64, len: usize) -> SampleInfo {
        SampleInfo::new(len, pts, SampleFlags::NONE)
    }

    #[test]
    fn replays_buffered_samples_in_arrival_order() -> anyhow::Result<()> {
        let (mut muxer, log) = muxer();

        muxer.set_output_format(
            TrackType::Audio,
            MediaFormat::audio(MIMETYPE_AUDIO_AAC, 44_100, 1),
        )?;
        muxer.write_sample_data(TrackType::Audio, &[1, 1, 0xFF], &sample(0, 2))?;
        muxer.write_sample_data(TrackType::Video, &[2, 2, 2], &sample(0, 3))?;
        muxer.write_sample_data(TrackType::Audio, &[3], &sample(23_000, 1))?;
        assert!(!muxer.is_started());
        assert_eq!(muxer.buffered_samples().len(), 3);
        assert!(snapshot(&log)?.samples.is_empty());

        muxer.set_output_format(
            TrackType::Video,
            MediaFormat::video(MIMETYPE_VIDEO_AVC, 1280, 720),
        )?;
        assert!(muxer.is_started());
        assert!(muxer.buffered_samples().is_empty());

        muxer.write_sample_data(TrackType::Video, &[4, 4], &sample(33_000, 2))?;

        let log = snapshot(&log)?;
        // Video is always added first.
        assert_eq!(log.tracks[0].mime(), Some(MIMETYPE_VIDEO_AVC));
        assert_eq!(log.tracks[1].mime(), Some(MIMETYPE_AUDIO_AAC));

        let written: Vec<(usize, Vec<u8>, i64)> = log
            .samples
            .iter()
            .map(|s| (s.track_index, s.data.clone(), s.info.presentation_time_us))
            .collect();
        assert_eq!(
            written,
            vec![
                (1, vec![1, 1], 0),
                (0, vec![2, 2, 2], 0),
                (1, vec![3], 23_000),
                (0, vec![4, 4], 33_000),
            ]
        );
        Ok(())
    }

    #[test]
    fn never_starts_with_a_single_registration() -> anyhow::Result<()> {
        let (mut muxer, log) = muxer();

        muxer.set_output_format(
            TrackType::Video,
            MediaFormat::video(MIMETYPE_VIDEO_AVC, 1280, 720),
        )?;
        for i in 0..5 {
            muxer.write_sample_data(TrackType::Video, &[i], &sample(i as i64, 1))?;
        }
        muxer.stop()?;
        muxer.release();

        assert!(!muxer.is_started());
        let log = snapshot(&log)?;
        assert!(log.tracks.is_empty());
        assert!(log.samples.is_empty());
        assert!(!log.started);
        assert!(!log.stopped);
        assert_eq!(log.release_count, 1);
        Ok(())
    }

    #[test]
    fn absent_track_counts_toward_start() -> anyhow::Result<()> {
        let (mut muxer, log) = muxer();

        muxer.write_sample_data(TrackType::Audio, &[7], &sample(0, 1))?;
        muxer.mark_track_absent(TrackType::Video)?;
        assert!(!muxer.is_started());
        muxer.set_output_format(
            TrackType::Audio,
            MediaFormat::audio(MIMETYPE_AUDIO_AAC, 44_100, 2),
        )?;
        assert!(muxer.is_started());

        let log = snapshot(&log)?;
        assert_eq!(log.tracks.len(), 1);
        assert_eq!(log.samples.len(), 1);
        assert_eq!(log.samples[0].track_index, 0);
        Ok(())
    }

    #[test]
    fn writes_for_absent_tracks_are_rejected() -> anyhow::Result<()> {
        let (mut muxer, _log) = muxer();
        muxer.mark_track_absent(TrackType::Video)?;
        let err = muxer
            .write_sample_data(TrackType::Video, &[1], &sample(0, 1))
            .unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
        Ok(())
    }

    #[test]
    fn formats_are_frozen_after_start() -> anyhow::Result<()> {
        let (mut muxer, _log) = muxer();
        muxer.mark_track_absent(TrackType::Video)?;
        muxer.set_output_format(
            TrackType::Audio,
            MediaFormat::audio(MIMETYPE_AUDIO_AAC, 44_100, 2),
        )?;

        let err = muxer
            .set_output_format(
                TrackType::Audio,
                MediaFormat::audio(MIMETYPE_AUDIO_AAC, 48_000, 2),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
        Ok(())
    }
}
