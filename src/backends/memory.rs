//! In-memory container reader and writer.
//!
//! `MemoryReader` serves pre-built tracks interleaved by timestamp, the way a demuxer walks a
//! file. `MemoryWriter` enforces the container writer's ordering rules and records everything it
//! is given in a shared `WriterLog`, so callers can inspect the result after the writer has been
//! moved into a run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::Result;
use crate::container::{ContainerMetadata, ContainerReader, ContainerWriter};
use crate::error::Error;
use crate::format::MediaFormat;
use crate::sample::{SampleFlags, SampleInfo};

#[derive(Debug, Clone, PartialEq)]
pub struct MemorySample {
    pub data: Vec<u8>,
    pub presentation_time_us: i64,
    pub key_frame: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryTrack {
    format: MediaFormat,
    samples: Vec<MemorySample>,
}

impl MemoryTrack {
    pub fn new(format: MediaFormat) -> Self {
        Self {
            format,
            samples: Vec::new(),
        }
    }

    /// Append a sample. Samples must be pushed in presentation order.
    pub fn push_sample(&mut self, data: Vec<u8>, presentation_time_us: i64, key_frame: bool) {
        self.samples.push(MemorySample {
            data,
            presentation_time_us,
            key_frame,
        });
    }

    pub fn with_sample(
        mut self,
        data: Vec<u8>,
        presentation_time_us: i64,
        key_frame: bool,
    ) -> Self {
        self.push_sample(data, presentation_time_us, key_frame);
        self
    }

    pub fn format(&self) -> &MediaFormat {
        &self.format
    }

    pub fn samples(&self) -> &[MemorySample] {
        &self.samples
    }
}

#[derive(Debug)]
pub struct MemoryReader {
    tracks: Vec<MemoryTrack>,
    selected: Vec<bool>,
    cursors: Vec<usize>,
    metadata: ContainerMetadata,
    release_count: Arc<AtomicUsize>,
}

impl MemoryReader {
    pub fn new(tracks: Vec<MemoryTrack>) -> Self {
        let n = tracks.len();
        Self {
            tracks,
            selected: vec![false; n],
            cursors: vec![0; n],
            metadata: ContainerMetadata::default(),
            release_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_metadata(mut self, metadata: ContainerMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Shared counter of `release` calls, readable after the reader is moved.
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.release_count)
    }

    /// The selected track whose next sample has the lowest timestamp (ties go to the lower index).
    fn current(&self) -> Option<(usize, &MemorySample)> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(index, _)| self.selected[*index])
            .filter_map(|(index, track)| {
                track
                    .samples
                    .get(self.cursors[index])
                    .map(|sample| (index, sample))
            })
            .min_by_key(|(index, sample)| (sample.presentation_time_us, *index))
    }
}

impl ContainerReader for MemoryReader {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<MediaFormat> {
        self.tracks
            .get(index)
            .map(|track| track.format.clone())
            .ok_or_else(|| Error::container(format!("no track at index {index}")))
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        let selected = self
            .selected
            .get_mut(index)
            .ok_or_else(|| Error::container(format!("no track at index {index}")))?;
        *selected = true;
        Ok(())
    }

    fn sample_track_index(&mut self) -> Result<Option<usize>> {
        Ok(self.current().map(|(index, _)| index))
    }

    fn sample_time(&self) -> i64 {
        self.current()
            .map(|(_, sample)| sample.presentation_time_us)
            .unwrap_or(-1)
    }

    fn sample_flags(&self) -> SampleFlags {
        match self.current() {
            Some((_, sample)) if sample.key_frame => SampleFlags::KEY_FRAME,
            _ => SampleFlags::NONE,
        }
    }

    fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (_, sample) = self
            .current()
            .ok_or_else(|| Error::container("read past the last sample"))?;
        let size = sample.data.len();
        if size > buf.len() {
            return Err(Error::container(format!(
                "sample of {size} bytes does not fit a {} byte buffer",
                buf.len()
            )));
        }
        buf[..size].copy_from_slice(&sample.data);
        Ok(size)
    }

    fn advance(&mut self) -> Result<bool> {
        let Some((index, _)) = self.current() else {
            return Ok(false);
        };
        self.cursors[index] += 1;
        Ok(self.current().is_some())
    }

    fn metadata(&self) -> ContainerMetadata {
        self.metadata.clone()
    }

    fn release(&mut self) {
        self.release_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenSample {
    pub track_index: usize,
    pub data: Vec<u8>,
    pub info: SampleInfo,
}

/// Everything a `MemoryWriter` was told, in order.
#[derive(Debug, Clone, Default)]
pub struct WriterLog {
    pub orientation_hint: Option<i32>,
    pub location: Option<(f32, f32)>,
    pub tracks: Vec<MediaFormat>,
    pub samples: Vec<WrittenSample>,
    pub started: bool,
    pub stopped: bool,
    pub release_count: usize,
}

impl WriterLog {
    pub fn samples_for(&self, track_index: usize) -> impl Iterator<Item = &WrittenSample> {
        self.samples
            .iter()
            .filter(move |sample| sample.track_index == track_index)
    }
}

#[derive(Debug, Default)]
pub struct MemoryWriter {
    log: Arc<Mutex<WriterLog>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of what has been written, readable after the writer is moved.
    pub fn log(&self) -> Arc<Mutex<WriterLog>> {
        Arc::clone(&self.log)
    }

    fn lock(&self) -> Result<MutexGuard<'_, WriterLog>> {
        self.log
            .lock()
            .map_err(|_| Error::invariant("memory writer log poisoned"))
    }

    fn lock_before_start(&self, what: &str) -> Result<MutexGuard<'_, WriterLog>> {
        let log = self.lock()?;
        if log.started {
            return Err(Error::container(format!("{what} after writer start")));
        }
        Ok(log)
    }
}

impl ContainerWriter for MemoryWriter {
    fn set_orientation_hint(&mut self, degrees: i32) -> Result<()> {
        self.lock_before_start("orientation hint")?.orientation_hint = Some(degrees);
        Ok(())
    }

    fn set_location(&mut self, latitude: f32, longitude: f32) -> Result<()> {
        self.lock_before_start("location")?.location = Some((latitude, longitude));
        Ok(())
    }

    fn add_track(&mut self, format: &MediaFormat) -> Result<usize> {
        let mut log = self.lock_before_start("track added")?;
        log.tracks.push(format.clone());
        Ok(log.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<()> {
        let mut log = self.lock_before_start("start")?;
        if log.tracks.is_empty() {
            return Err(Error::container("writer started without tracks"));
        }
        log.started = true;
        Ok(())
    }

    fn write_sample_data(
        &mut self,
        track_index: usize,
        data: &[u8],
        info: &SampleInfo,
    ) -> Result<()> {
        let mut log = self.lock()?;
        if !log.started || log.stopped {
            return Err(Error::container("sample written while writer not running"));
        }
        if track_index >= log.tracks.len() {
            return Err(Error::container(format!("no track at index {track_index}")));
        }
        if info.size > data.len() {
            return Err(Error::container("sample size exceeds its data"));
        }

        log.samples.push(WrittenSample {
            track_index,
            data: data[..info.size].to_vec(),
            info: *info,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut log = self.lock()?;
        if !log.started {
            return Err(Error::container("writer stopped before start"));
        }
        log.stopped = true;
        Ok(())
    }

    fn release(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.release_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{MIMETYPE_AUDIO_AAC, MIMETYPE_VIDEO_AVC};

    fn two_track_reader() -> MemoryReader {
        let video = MemoryTrack::new(MediaFormat::video(MIMETYPE_VIDEO_AVC, 640, 360))
            .with_sample(vec![1], 0, true)
            .with_sample(vec![2], 33_333, false);
        let audio = MemoryTrack::new(MediaFormat::audio(MIMETYPE_AUDIO_AAC, 44_100, 1))
            .with_sample(vec![10], 0, true)
            .with_sample(vec![11], 23_219, true);
        MemoryReader::new(vec![video, audio])
    }

    #[test]
    fn interleaves_selected_tracks_by_timestamp() -> anyhow::Result<()> {
        let mut reader = two_track_reader();
        reader.select_track(0)?;
        reader.select_track(1)?;

        let mut order = Vec::new();
        let mut buf = [0u8; 4];
        while let Some(track) = reader.sample_track_index()? {
            let n = reader.read_sample_data(&mut buf)?;
            order.push((track, reader.sample_time(), buf[..n].to_vec()));
            reader.advance()?;
        }

        assert_eq!(
            order,
            vec![
                (0, 0, vec![1]),
                (1, 0, vec![10]),
                (1, 23_219, vec![11]),
                (0, 33_333, vec![2]),
            ]
        );
        Ok(())
    }

    #[test]
    fn unselected_tracks_are_skipped() -> anyhow::Result<()> {
        let mut reader = two_track_reader();
        assert_eq!(reader.sample_track_index()?, None);

        reader.select_track(1)?;
        assert_eq!(reader.sample_track_index()?, Some(1));
        assert!(reader.advance()?);
        assert!(!reader.advance()?);
        assert_eq!(reader.sample_track_index()?, None);
        Ok(())
    }

    #[test]
    fn writer_enforces_ordering_rules() -> anyhow::Result<()> {
        let mut writer = MemoryWriter::new();
        let log = writer.log();
        let info = SampleInfo::new(1, 0, SampleFlags::NONE);

        assert!(writer.start().is_err());
        assert!(writer.write_sample_data(0, &[1], &info).is_err());

        writer.set_orientation_hint(90)?;
        assert_eq!(writer.add_track(&MediaFormat::new(MIMETYPE_AUDIO_AAC))?, 0);
        writer.start()?;
        assert!(
            writer
                .add_track(&MediaFormat::new(MIMETYPE_VIDEO_AVC))
                .is_err()
        );
        assert!(writer.set_location(1.0, 2.0).is_err());

        writer.write_sample_data(0, &[9, 9], &info)?;
        writer.stop()?;
        writer.release();
        writer.release();

        let log = log.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(log.orientation_hint, Some(90));
        assert_eq!(log.samples.len(), 1);
        assert_eq!(log.samples[0].data, vec![9]);
        assert!(log.stopped);
        assert_eq!(log.release_count, 2);
        Ok(())
    }
}
