#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use recode::backends::buffers::CodecBuffers;
use recode::backends::memory::{MemoryReader, MemoryTrack, WriterLog};
use recode::codec::{Codec, CodecProvider, Dequeued};
use recode::container::ContainerMetadata;
use recode::format::{
    KEY_BITS_PER_SAMPLE, KEY_CHANNEL_COUNT, KEY_CSD_0, KEY_FRAME_RATE, KEY_HEIGHT,
    KEY_MAX_INPUT_SIZE, KEY_SAMPLE_RATE, KEY_WIDTH, MIMETYPE_AUDIO_AAC, MIMETYPE_AUDIO_RAW,
    MIMETYPE_VIDEO_AVC, MediaFormat, TrackType,
};
use recode::opts::TranscodeOpts;
use recode::sample::{SampleFlags, SampleInfo};

pub const DURATION_MS: &str = "2000";
pub const DURATION_US: i64 = 2_000_000;

pub const FRAME_DURATION_US: i64 = 33_333;
pub const VIDEO_PACKET_SIZE: usize = 512;
pub const DECODED_FRAME_SIZE: usize = 1024;

pub const AAC_SAMPLE_RATE: i64 = 44_100;
pub const AAC_FRAMES_PER_PACKET: i64 = 1024;
pub const AAC_PACKET_SIZE: usize = 200;

const INPUT_SLOTS: usize = 4;
const INPUT_CAPACITY: usize = 64 * 1024;

/// What a fake codec does to each input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Output equals input.
    Identity,
    /// Every input becomes a fixed-size output (a decoded frame or PCM block).
    Expand(usize),
    /// Output is an eighth of the input (an encoded packet).
    Compress,
}

impl Transform {
    fn apply(self, input: Vec<u8>) -> Vec<u8> {
        match self {
            Transform::Identity => input,
            Transform::Expand(size) => vec![0x10; size],
            Transform::Compress => vec![0x5A; (input.len() / 8).max(1)],
        }
    }
}

/// A synchronous codec: each queued input immediately becomes one output.
pub struct FakeCodec {
    buffers: CodecBuffers,
    output_format: MediaFormat,
    transform: Transform,
    codec_config: Option<Vec<u8>>,
    repeat_format: bool,
    last_presentation_time_us: i64,
    released: Arc<AtomicUsize>,
    is_released: bool,
}

impl FakeCodec {
    pub fn new(
        output_format: MediaFormat,
        transform: Transform,
        released: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            buffers: CodecBuffers::new(INPUT_SLOTS, INPUT_CAPACITY),
            output_format,
            transform,
            codec_config: None,
            repeat_format: false,
            last_presentation_time_us: 0,
            released,
            is_released: false,
        }
    }

    /// Emit `config` as a codec-config buffer right after the format announcement.
    pub fn with_codec_config(mut self, config: Vec<u8>) -> Self {
        self.codec_config = Some(config);
        self
    }

    /// Announce the output format a second time after the first real output.
    pub fn with_repeated_format(mut self) -> Self {
        self.repeat_format = true;
        self
    }
}

impl Codec for FakeCodec {
    fn start(&mut self) -> recode::Result<()> {
        self.buffers.start()?;
        self.buffers.set_output_format(self.output_format.clone());
        if let Some(config) = self.codec_config.clone() {
            self.buffers
                .push_output(config, SampleInfo::new(0, 0, SampleFlags::CODEC_CONFIG));
        }
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> recode::Result<Option<usize>> {
        self.buffers.dequeue_input()
    }

    fn input_buffer(&mut self, index: usize) -> recode::Result<&mut [u8]> {
        self.buffers.input_mut(index)
    }

    fn queue_input_buffer(&mut self, index: usize, info: SampleInfo) -> recode::Result<()> {
        let data = self.buffers.take_input(index, &info)?;
        if info.is_end_of_stream() {
            self.buffers.push_output(
                Vec::new(),
                SampleInfo::end_of_stream(info.presentation_time_us),
            );
            return Ok(());
        }

        self.last_presentation_time_us = info.presentation_time_us;
        self.buffers.push_output(
            self.transform.apply(data),
            SampleInfo::new(0, info.presentation_time_us, info.flags),
        );
        if self.repeat_format {
            self.repeat_format = false;
            self.buffers.set_output_format(self.output_format.clone());
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> recode::Result<Dequeued> {
        self.buffers.dequeue_output()
    }

    fn output_buffer(&self, index: usize) -> recode::Result<&[u8]> {
        self.buffers.output(index)
    }

    fn release_output_buffer(&mut self, index: usize) -> recode::Result<()> {
        self.buffers.release_output(index)
    }

    fn output_format(&self) -> recode::Result<MediaFormat> {
        self.buffers.output_format()
    }

    fn signal_end_of_input_stream(&mut self) -> recode::Result<()> {
        self.buffers.push_output(
            Vec::new(),
            SampleInfo::end_of_stream(self.last_presentation_time_us),
        );
        Ok(())
    }

    fn stop(&mut self) -> recode::Result<()> {
        self.buffers.stop();
        Ok(())
    }

    fn release(&mut self) {
        if !self.is_released {
            self.is_released = true;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
        self.buffers.release();
    }
}

/// Hands out `FakeCodec`s and counts how many were created and released.
#[derive(Debug, Clone, Default)]
pub struct FakeCodecs {
    pub created: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
    /// Video encoders announce their output format twice.
    pub repeat_video_format: bool,
}

impl FakeCodecs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repeated_video_format() -> Self {
        Self {
            repeat_video_format: true,
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn codec(&self, output_format: MediaFormat, transform: Transform) -> FakeCodec {
        self.created.fetch_add(1, Ordering::SeqCst);
        FakeCodec::new(output_format, transform, Arc::clone(&self.released))
    }
}

impl CodecProvider for FakeCodecs {
    fn create_decoder(&mut self, format: &MediaFormat) -> recode::Result<Box<dyn Codec>> {
        let codec = match format.track_type() {
            Some(TrackType::Video) => {
                let width = format.integer(KEY_WIDTH)?;
                let height = format.integer(KEY_HEIGHT)?;
                self.codec(
                    MediaFormat::video("video/raw", width, height),
                    Transform::Expand(DECODED_FRAME_SIZE),
                )
            }
            _ => {
                let sample_rate = format.integer(KEY_SAMPLE_RATE)?;
                let channels = format.integer(KEY_CHANNEL_COUNT)?;
                let transform = if format.mime() == Some(MIMETYPE_AUDIO_RAW) {
                    Transform::Identity
                } else {
                    Transform::Expand(AAC_FRAMES_PER_PACKET as usize * channels as usize * 2)
                };
                self.codec(
                    MediaFormat::audio(MIMETYPE_AUDIO_RAW, sample_rate, channels),
                    transform,
                )
            }
        };
        Ok(Box::new(codec))
    }

    fn create_encoder(&mut self, format: &MediaFormat) -> recode::Result<Box<dyn Codec>> {
        let mut output = format.clone();
        let codec = if format.mime() == Some(MIMETYPE_AUDIO_RAW) {
            output.set_int(KEY_BITS_PER_SAMPLE, 16);
            self.codec(output, Transform::Identity)
        } else {
            let video = format.track_type() == Some(TrackType::Video);
            let config = if video {
                vec![0x67, 0x42, 0x00, 0x1F]
            } else {
                vec![0x12, 0x08]
            };
            output.set_bytes(KEY_CSD_0, config.clone());
            let codec = self
                .codec(output, Transform::Compress)
                .with_codec_config(config);
            if video && self.repeat_video_format {
                codec.with_repeated_format()
            } else {
                codec
            }
        };
        Ok(Box::new(codec))
    }
}

pub fn video_track(width: i64, height: i64) -> MemoryTrack {
    let mut format = MediaFormat::video(MIMETYPE_VIDEO_AVC, width, height);
    format.set_int(KEY_FRAME_RATE, 30);
    format.set_int(KEY_MAX_INPUT_SIZE, 4096);

    let mut track = MemoryTrack::new(format);
    let mut pts = 0;
    let mut frame = 0;
    while pts < DURATION_US {
        track.push_sample(vec![0xAB; VIDEO_PACKET_SIZE], pts, frame % 30 == 0);
        frame += 1;
        pts = frame * FRAME_DURATION_US;
    }
    track
}

pub fn aac_track(channels: i64) -> MemoryTrack {
    let mut format = MediaFormat::audio(MIMETYPE_AUDIO_AAC, AAC_SAMPLE_RATE, channels);
    format.set_bytes(KEY_CSD_0, vec![0x12, 0x08]);

    let mut track = MemoryTrack::new(format);
    let mut pts = 0;
    let mut packet = 0;
    while pts < DURATION_US {
        track.push_sample(vec![0xCD; AAC_PACKET_SIZE], pts, true);
        packet += 1;
        pts = packet * AAC_FRAMES_PER_PACKET * 1_000_000 / AAC_SAMPLE_RATE;
    }
    track
}

/// Raw PCM packets whose sample values are their running frame index.
pub fn raw_track(sample_rate: i64, frames_per_packet: usize, packets: usize) -> MemoryTrack {
    let mut track = MemoryTrack::new(MediaFormat::audio(MIMETYPE_AUDIO_RAW, sample_rate, 1));
    for packet in 0..packets {
        let data: Vec<u8> = (0..frames_per_packet)
            .flat_map(|i| ((packet * frames_per_packet + i) as i16).to_le_bytes())
            .collect();
        let pts = (packet * frames_per_packet) as i64 * 1_000_000 / sample_rate;
        track.push_sample(data, pts, true);
    }
    track
}

pub fn reader(tracks: Vec<MemoryTrack>) -> MemoryReader {
    MemoryReader::new(tracks).with_metadata(ContainerMetadata {
        duration_ms: Some(DURATION_MS.to_string()),
        ..ContainerMetadata::default()
    })
}

pub fn opts() -> TranscodeOpts {
    TranscodeOpts {
        idle_wait: Duration::ZERO,
        ..TranscodeOpts::default()
    }
}

pub fn snapshot(log: &Arc<Mutex<WriterLog>>) -> anyhow::Result<WriterLog> {
    Ok(log
        .lock()
        .map_err(|_| anyhow::anyhow!("writer log poisoned"))?
        .clone())
}
