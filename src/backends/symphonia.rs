//! Container reader and audio decoder built on Symphonia.
//!
//! Responsibilities:
//! - Probe any container Symphonia understands and describe its tracks as `MediaFormat`s
//! - Serve packets of the selected tracks in file order with microsecond timestamps
//! - Decode audio packets to interleaved 16-bit PCM behind the `Codec` contract
//!
//! Symphonia only handles audio, so inputs read this way never have a video track.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use symphonia::core::audio::{Channels, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{
    CODEC_TYPE_AAC, CODEC_TYPE_ADPCM_IMA_WAV, CODEC_TYPE_ADPCM_MS, CODEC_TYPE_ALAC, CODEC_TYPE_FLAC,
    CODEC_TYPE_MP1, CODEC_TYPE_MP2, CODEC_TYPE_MP3, CODEC_TYPE_NULL, CODEC_TYPE_OPUS,
    CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64LE, CODEC_TYPE_PCM_S16BE, CODEC_TYPE_PCM_S16LE,
    CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_U8, CODEC_TYPE_VORBIS,
    CodecParameters, CodecType, Decoder, DecoderOptions,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;
use tracing::{debug, warn};

use crate::Result;
use crate::backends::buffers::CodecBuffers;
use crate::codec::{Codec, Dequeued};
use crate::container::{ContainerMetadata, ContainerReader};
use crate::error::{ConfigError, Error};
use crate::format::{
    KEY_BITS_PER_SAMPLE, KEY_CHANNEL_COUNT, KEY_CSD_0, KEY_DURATION_US, KEY_MAX_FRAMES_PER_PACKET,
    KEY_MAX_INPUT_SIZE, KEY_SAMPLE_RATE, MIMETYPE_AUDIO_AAC, MIMETYPE_AUDIO_RAW, MediaFormat,
};
use crate::remix::pcm_to_le_bytes;
use crate::sample::{SampleFlags, SampleInfo};

/// Bits per coded sample, when the container stores samples wider than their precision.
pub const KEY_BITS_PER_CODED_SAMPLE: &str = "bits-per-coded-sample";

/// Decoder input capacity when the format does not carry `max-input-size`.
pub const DEFAULT_PACKET_CAPACITY: usize = 1024 * 1024;

const DECODER_INPUT_SLOTS: usize = 2;

/// Codec ↔ MIME mapping. Uncompressed 16-bit little-endian PCM is `audio/raw`, the format the
/// rest of the pipeline speaks.
const CODEC_MIME_TYPES: [(CodecType, &str); 17] = [
    (CODEC_TYPE_PCM_S16LE, MIMETYPE_AUDIO_RAW),
    (CODEC_TYPE_AAC, MIMETYPE_AUDIO_AAC),
    (CODEC_TYPE_MP3, "audio/mpeg"),
    (CODEC_TYPE_MP2, "audio/mpeg-l2"),
    (CODEC_TYPE_MP1, "audio/mpeg-l1"),
    (CODEC_TYPE_FLAC, "audio/flac"),
    (CODEC_TYPE_VORBIS, "audio/vorbis"),
    (CODEC_TYPE_OPUS, "audio/opus"),
    (CODEC_TYPE_ALAC, "audio/alac"),
    (CODEC_TYPE_ADPCM_MS, "audio/x-adpcm-ms"),
    (CODEC_TYPE_ADPCM_IMA_WAV, "audio/x-adpcm-ima"),
    (CODEC_TYPE_PCM_U8, "audio/x-pcm-u8"),
    (CODEC_TYPE_PCM_S16BE, "audio/x-pcm-s16be"),
    (CODEC_TYPE_PCM_S24LE, "audio/x-pcm-s24le"),
    (CODEC_TYPE_PCM_S32LE, "audio/x-pcm-s32le"),
    (CODEC_TYPE_PCM_F32LE, "audio/x-pcm-f32le"),
    (CODEC_TYPE_PCM_F64LE, "audio/x-pcm-f64le"),
];

pub fn mime_for_codec(codec: CodecType) -> Option<&'static str> {
    CODEC_MIME_TYPES
        .iter()
        .find(|(candidate, _)| *candidate == codec)
        .map(|(_, mime)| *mime)
}

pub fn codec_for_mime(mime: &str) -> Option<CodecType> {
    CODEC_MIME_TYPES
        .iter()
        .find(|(_, candidate)| *candidate == mime)
        .map(|(codec, _)| *codec)
}

/// Convert a timestamp in `time_base` units to microseconds.
fn to_micros(ts: u64, time_base: Option<TimeBase>) -> i64 {
    match time_base {
        Some(tb) if tb.denom > 0 => {
            (ts as u128 * tb.numer as u128 * 1_000_000 / tb.denom as u128) as i64
        }
        _ => ts as i64,
    }
}

fn format_from_codec_params(params: &CodecParameters) -> MediaFormat {
    let mime = match mime_for_codec(params.codec) {
        Some(mime) => mime.to_string(),
        None if params.codec == CODEC_TYPE_NULL => "application/octet-stream".to_string(),
        // Still an audio track, so selection picks it and decoder creation reports it.
        None => "audio/x-unknown".to_string(),
    };

    let mut format = MediaFormat::new(mime);
    if let Some(rate) = params.sample_rate {
        format.set_int(KEY_SAMPLE_RATE, rate as i64);
    }
    if let Some(channels) = params.channels {
        format.set_int(KEY_CHANNEL_COUNT, channels.count() as i64);
    }
    if let Some(bits) = params.bits_per_sample {
        format.set_int(KEY_BITS_PER_SAMPLE, bits as i64);
    }
    if let Some(bits) = params.bits_per_coded_sample {
        format.set_int(KEY_BITS_PER_CODED_SAMPLE, bits as i64);
    }
    if let Some(frames) = params.max_frames_per_packet {
        format.set_int(KEY_MAX_FRAMES_PER_PACKET, frames as i64);
    }
    if let Some(extra) = &params.extra_data {
        format.set_bytes(KEY_CSD_0, extra.to_vec());
    }

    let time_base = params
        .time_base
        .or_else(|| params.sample_rate.map(|rate| TimeBase::new(1, rate)));
    if let Some(frames) = params.n_frames {
        format.set_int(KEY_DURATION_US, to_micros(frames, time_base));
    }

    format
}

fn codec_params_from_format(format: &MediaFormat) -> Result<CodecParameters> {
    let mime = format.mime().unwrap_or_default();
    let codec =
        codec_for_mime(mime).ok_or_else(|| ConfigError::UnsupportedCodec(mime.to_string()))?;

    let sample_rate = format.integer(KEY_SAMPLE_RATE)?;
    let channel_count = format.integer(KEY_CHANNEL_COUNT)?;
    if !(1..=32).contains(&channel_count) {
        return Err(ConfigError::InvalidParameter {
            name: "channel-count",
            value: channel_count.to_string(),
        }
        .into());
    }

    let mut params = CodecParameters::new();
    params
        .for_codec(codec)
        .with_sample_rate(sample_rate as u32)
        .with_channels(Channels::from_bits_truncate(
            ((1u64 << channel_count) - 1) as u32,
        ));

    if let Some(bits) = format.get_int(KEY_BITS_PER_SAMPLE) {
        params.with_bits_per_sample(bits as u32);
    }
    if let Some(bits) = format.get_int(KEY_BITS_PER_CODED_SAMPLE) {
        params.with_bits_per_coded_sample(bits as u32);
    }
    if let Some(frames) = format.get_int(KEY_MAX_FRAMES_PER_PACKET) {
        params.with_max_frames_per_packet(frames as u64);
    }
    if let Some(extra) = format.get_bytes(KEY_CSD_0) {
        params.with_extra_data(extra.to_vec().into_boxed_slice());
    }

    Ok(params)
}

struct SymphoniaTrack {
    id: u32,
    format: MediaFormat,
    time_base: Option<TimeBase>,
}

/// Sequential packet reader over any container Symphonia can probe.
pub struct SymphoniaReader {
    reader: Box<dyn FormatReader>,
    tracks: Vec<SymphoniaTrack>,
    selected: Vec<bool>,
    current: Option<(usize, Packet)>,
    exhausted: bool,
    metadata: ContainerMetadata,
    released: bool,
}

impl SymphoniaReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let extension = path.extension().and_then(|ext| ext.to_str());
        Self::from_source(Box::new(file), extension)
    }

    /// `hint_extension` can improve probe accuracy for ambiguous inputs (e.g. "mp4", "ogg").
    pub fn from_source(source: Box<dyn MediaSource>, hint_extension: Option<&str>) -> Result<Self> {
        let mss_opts = MediaSourceStreamOptions {
            // Symphonia expects a power-of-two buffer > 32KiB for good probing behavior.
            buffer_len: 256 * 1024,
        };
        let mss = MediaSourceStream::new(source, mss_opts);

        let mut hint = Hint::new();
        if let Some(ext) = hint_extension {
            hint.with_extension(ext);
        }

        let format_opts: FormatOptions = Default::default();
        let metadata_opts: MetadataOptions = Default::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| anyhow!(e))
            .context("failed to probe media stream")?;

        let mut reader = probed.format;

        let tracks: Vec<SymphoniaTrack> = reader
            .tracks()
            .iter()
            .map(|track| SymphoniaTrack {
                id: track.id,
                format: format_from_codec_params(&track.codec_params),
                time_base: track.codec_params.time_base.or_else(|| {
                    track
                        .codec_params
                        .sample_rate
                        .map(|rate| TimeBase::new(1, rate))
                }),
            })
            .collect();

        let metadata = read_metadata(reader.as_mut(), &tracks);
        debug!(tracks = tracks.len(), ?metadata, "probed input");

        Ok(Self {
            selected: vec![false; tracks.len()],
            reader,
            tracks,
            current: None,
            exhausted: false,
            metadata,
            released: false,
        })
    }

    /// Pull packets until one belongs to a selected track, or the input ends.
    fn fill_current(&mut self) -> Result<()> {
        while self.current.is_none() && !self.exhausted {
            if self.released {
                return Err(Error::invariant("reader used after release"));
            }

            match self.reader.next_packet() {
                Ok(packet) => {
                    let index = self.tracks.iter().position(|t| t.id == packet.track_id());
                    if let Some(index) = index.filter(|i| self.selected[*i]) {
                        self.current = Some((index, packet));
                    }
                }
                // Treat IO errors as end of stream.
                Err(SymphoniaError::IoError(_)) => self.exhausted = true,
                Err(SymphoniaError::ResetRequired) => {
                    warn!("stream reset required, treating as end of input");
                    self.exhausted = true;
                }
                Err(e) => return Err(Error::container(format!("failed reading packet: {e}"))),
            }
        }
        Ok(())
    }
}

fn read_metadata(reader: &mut dyn FormatReader, tracks: &[SymphoniaTrack]) -> ContainerMetadata {
    let duration_ms = tracks
        .iter()
        .filter_map(|t| t.format.get_int(KEY_DURATION_US))
        .max()
        .map(|us| (us / 1000).to_string());

    let mut metadata = ContainerMetadata {
        duration_ms,
        ..ContainerMetadata::default()
    };

    if let Some(revision) = reader.metadata().current() {
        for tag in revision.tags() {
            let key = tag.key.to_ascii_lowercase();
            if key == "location" || key.ends_with("iso6709") {
                metadata.location = Some(tag.value.to_string());
            } else if key == "rotate" || key == "rotation" {
                metadata.rotation = Some(tag.value.to_string());
            }
        }
    }

    metadata
}

impl ContainerReader for SymphoniaReader {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<MediaFormat> {
        self.tracks
            .get(index)
            .map(|t| t.format.clone())
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
        self.fill_current()?;
        Ok(self.current.as_ref().map(|(index, _)| *index))
    }

    fn sample_time(&self) -> i64 {
        match &self.current {
            Some((index, packet)) => to_micros(packet.ts(), self.tracks[*index].time_base),
            None => -1,
        }
    }

    fn sample_flags(&self) -> SampleFlags {
        // Every audio packet is independently decodable.
        match self.current {
            Some(_) => SampleFlags::KEY_FRAME,
            None => SampleFlags::NONE,
        }
    }

    fn read_sample_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (_, packet) = self
            .current
            .as_ref()
            .ok_or_else(|| Error::container("read past the last packet"))?;
        let data = packet.buf();
        if data.len() > buf.len() {
            return Err(Error::container(format!(
                "packet of {} bytes does not fit a {} byte buffer",
                data.len(),
                buf.len()
            )));
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn advance(&mut self) -> Result<bool> {
        self.current = None;
        self.fill_current()?;
        Ok(self.current.is_some())
    }

    fn metadata(&self) -> ContainerMetadata {
        self.metadata.clone()
    }

    fn release(&mut self) {
        self.current = None;
        self.exhausted = true;
        self.released = true;
    }
}

/// Audio decoder producing interleaved 16-bit PCM (`audio/raw`).
///
/// The output format is announced after the first packet decodes, since only then are the real
/// rate and channel layout known.
pub struct SymphoniaDecoder {
    decoder: Box<dyn Decoder>,
    buffers: CodecBuffers,
    sample_buf: Option<SampleBuffer<i16>>,
    spec: Option<SignalSpec>,
    last_presentation_time_us: i64,
}

impl SymphoniaDecoder {
    pub fn new(format: &MediaFormat) -> Result<Self> {
        let params = codec_params_from_format(format)?;
        let decoder_opts: DecoderOptions = Default::default();
        let mime = format.mime().unwrap_or_default();
        let decoder = symphonia::default::get_codecs()
            .make(&params, &decoder_opts)
            .map_err(|e| ConfigError::UnsupportedCodec(format!("{mime}: {e}")))?;

        let capacity = match format.get_int(KEY_MAX_INPUT_SIZE) {
            Some(size) if size > 0 => size as usize,
            _ => DEFAULT_PACKET_CAPACITY,
        };

        Ok(Self {
            decoder,
            buffers: CodecBuffers::new(DECODER_INPUT_SLOTS, capacity),
            sample_buf: None,
            spec: None,
            last_presentation_time_us: 0,
        })
    }

    /// Decode one packet into the output queue.
    ///
    /// Error handling policy:
    /// - `DecodeError` → skip the bad packet
    /// - `IoError`     → skip (nothing decodable in this packet)
    /// - other errors  → fatal
    fn decode_packet(&mut self, data: &[u8], presentation_time_us: i64) -> Result<()> {
        let packet = Packet::new_from_slice(0, 0, 0, data);
        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                warn!(msg, "skipping undecodable packet");
                return Ok(());
            }
            Err(SymphoniaError::IoError(_)) => return Ok(()),
            Err(e) => return Err(Error::codec(format!("decoder failure: {e}"))),
        };

        let spec = *decoded.spec();
        match self.spec {
            None => {
                let mut format = MediaFormat::audio(
                    MIMETYPE_AUDIO_RAW,
                    spec.rate as i64,
                    spec.channels.count() as i64,
                );
                format.set_int(KEY_BITS_PER_SAMPLE, 16);
                self.buffers.set_output_format(format);
                self.spec = Some(spec);
            }
            Some(known) if known != spec => {
                return Err(Error::codec("decoded audio format changed mid-stream"));
            }
            Some(_) => {}
        }

        if decoded.frames() == 0 {
            return Ok(());
        }

        // `SampleBuffer` counts interleaved samples, the decoded buffer counts frames.
        let needed = decoded.capacity() * spec.channels.count();
        let needs_alloc = self
            .sample_buf
            .as_ref()
            .is_none_or(|buf| buf.capacity() < needed);
        if needs_alloc {
            self.sample_buf = Some(SampleBuffer::<i16>::new(decoded.capacity() as u64, spec));
        }
        let Some(sample_buf) = self.sample_buf.as_mut() else {
            return Err(Error::invariant("sample buffer missing after allocation"));
        };
        sample_buf.copy_interleaved_ref(decoded);

        let samples = sample_buf.samples();
        let mut bytes = vec![0u8; samples.len() * 2];
        pcm_to_le_bytes(samples, &mut bytes);
        self.buffers.push_output(
            bytes,
            SampleInfo::new(0, presentation_time_us, SampleFlags::NONE),
        );
        Ok(())
    }
}

impl Codec for SymphoniaDecoder {
    fn start(&mut self) -> Result<()> {
        self.buffers.start()
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        self.buffers.dequeue_input()
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        self.buffers.input_mut(index)
    }

    fn queue_input_buffer(&mut self, index: usize, info: SampleInfo) -> Result<()> {
        let data = self.buffers.take_input(index, &info)?;
        if !data.is_empty() {
            self.decode_packet(&data, info.presentation_time_us)?;
            self.last_presentation_time_us = info.presentation_time_us;
        }
        if info.is_end_of_stream() {
            self.buffers.push_output(
                Vec::new(),
                SampleInfo::end_of_stream(self.last_presentation_time_us),
            );
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<Dequeued> {
        self.buffers.dequeue_output()
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8]> {
        self.buffers.output(index)
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<()> {
        self.buffers.release_output(index)
    }

    fn output_format(&self) -> Result<MediaFormat> {
        self.buffers.output_format()
    }

    fn signal_end_of_input_stream(&mut self) -> Result<()> {
        Err(Error::invariant(
            "audio decoders take end of stream as a queued input",
        ))
    }

    fn stop(&mut self) -> Result<()> {
        self.buffers.stop();
        self.decoder.reset();
        Ok(())
    }

    fn release(&mut self) {
        self.buffers.release();
        self.sample_buf = None;
    }
}
