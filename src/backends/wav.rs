//! WAV container writer backed by `hound`.
//!
//! Accepts exactly one `audio/raw` track (interleaved 16-bit PCM). Header metadata such as
//! orientation and location has no place in a WAV file and is ignored.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use hound::{SampleFormat, WavSpec};
use tracing::{debug, warn};

use crate::Result;
use crate::container::ContainerWriter;
use crate::error::{ConfigError, Error};
use crate::format::{KEY_CHANNEL_COUNT, KEY_SAMPLE_RATE, MIMETYPE_AUDIO_RAW, MediaFormat};
use crate::remix::pcm_from_le_bytes;
use crate::sample::SampleInfo;

pub struct WavWriter {
    path: PathBuf,
    spec: Option<WavSpec>,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavWriter {
    /// The file is created on `start`, once the track format is known.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            spec: None,
            writer: None,
        }
    }
}

impl ContainerWriter for WavWriter {
    fn set_orientation_hint(&mut self, degrees: i32) -> Result<()> {
        debug!(degrees, "WAV has no orientation, ignoring hint");
        Ok(())
    }

    fn set_location(&mut self, latitude: f32, longitude: f32) -> Result<()> {
        debug!(latitude, longitude, "WAV has no location, ignoring");
        Ok(())
    }

    fn add_track(&mut self, format: &MediaFormat) -> Result<usize> {
        let mime = format.mime().unwrap_or_default();
        if mime != MIMETYPE_AUDIO_RAW {
            return Err(ConfigError::UnsupportedCodec(format!("{mime} in a WAV file")).into());
        }
        if self.spec.is_some() {
            return Err(Error::container("WAV holds a single audio track"));
        }

        let channels = format.integer(KEY_CHANNEL_COUNT)?;
        let sample_rate = format.integer(KEY_SAMPLE_RATE)?;
        let (Ok(channels), Ok(sample_rate)) = (u16::try_from(channels), u32::try_from(sample_rate))
        else {
            return Err(ConfigError::InvalidParameter {
                name: "wav spec",
                value: format!("{channels} channels at {sample_rate} Hz"),
            }
            .into());
        };

        self.spec = Some(WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        });
        Ok(0)
    }

    fn start(&mut self) -> Result<()> {
        let spec = self
            .spec
            .ok_or_else(|| Error::container("WAV writer started without a track"))?;
        if self.writer.is_some() {
            return Err(Error::container("WAV writer started twice"));
        }
        self.writer = Some(hound::WavWriter::create(&self.path, spec)?);
        debug!(path = %self.path.display(), ?spec, "WAV writer started");
        Ok(())
    }

    fn write_sample_data(
        &mut self,
        track_index: usize,
        data: &[u8],
        info: &SampleInfo,
    ) -> Result<()> {
        if track_index != 0 {
            return Err(Error::container(format!("no track at index {track_index}")));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::container("sample written while WAV writer not running"))?;

        let payload = data
            .get(..info.size)
            .ok_or_else(|| Error::container("sample size exceeds its data"))?;
        for sample in pcm_from_le_bytes(payload) {
            writer.write_sample(sample)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::container("WAV writer stopped before start"))?;
        writer.finalize()?;
        debug!(path = %self.path.display(), "WAV writer finalized");
        Ok(())
    }

    fn release(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(err) = writer.finalize() {
                warn!(error = %err, "failed to finalize WAV on release");
            }
        }
    }
}
