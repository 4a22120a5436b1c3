//! Track formats.
//!
//! A `MediaFormat` is a MIME-rooted key/value map describing one elementary stream:
//! dimensions, sample rate, channel count, bit rate, codec-specific config, and so on.
//! Keys follow the conventional lowercase-hyphenated names so formats can be logged or
//! serialized as-is.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::{ConfigError, Result};

pub const KEY_MIME: &str = "mime";
pub const KEY_WIDTH: &str = "width";
pub const KEY_HEIGHT: &str = "height";
pub const KEY_SAMPLE_RATE: &str = "sample-rate";
pub const KEY_CHANNEL_COUNT: &str = "channel-count";
pub const KEY_BIT_RATE: &str = "bitrate";
pub const KEY_FRAME_RATE: &str = "frame-rate";
pub const KEY_I_FRAME_INTERVAL: &str = "i-frame-interval";
pub const KEY_ROTATION_DEGREES: &str = "rotation-degrees";
pub const KEY_MAX_INPUT_SIZE: &str = "max-input-size";
pub const KEY_COLOR_FORMAT: &str = "color-format";
pub const KEY_AAC_PROFILE: &str = "aac-profile";
pub const KEY_DURATION_US: &str = "durationUs";
pub const KEY_BITS_PER_SAMPLE: &str = "bits-per-sample";
pub const KEY_MAX_FRAMES_PER_PACKET: &str = "max-frames-per-packet";
/// Codec-specific configuration bytes (e.g. an AAC AudioSpecificConfig).
pub const KEY_CSD_0: &str = "csd-0";

pub const MIMETYPE_VIDEO_AVC: &str = "video/avc";
pub const MIMETYPE_AUDIO_AAC: &str = "audio/mp4a-latm";
/// Interleaved signed 16-bit PCM.
pub const MIMETYPE_AUDIO_RAW: &str = "audio/raw";

/// Encoder input is fed through a frame-transfer surface rather than byte buffers.
pub const COLOR_FORMAT_SURFACE: i64 = 0x7F00_0789;
pub const AAC_OBJECT_LC: i64 = 2;

/// The kind of elementary stream a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Video,
    Audio,
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackType::Video => f.write_str("video"),
            TrackType::Audio => f.write_str("audio"),
        }
    }
}

/// A single format entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FormatValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

/// MIME-rooted key/value description of a track.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MediaFormat {
    entries: BTreeMap<String, FormatValue>,
}

impl MediaFormat {
    pub fn new(mime: impl Into<String>) -> Self {
        let mut format = Self::default();
        format.set_str(KEY_MIME, mime);
        format
    }

    pub fn video(mime: impl Into<String>, width: i64, height: i64) -> Self {
        let mut format = Self::new(mime);
        format.set_int(KEY_WIDTH, width);
        format.set_int(KEY_HEIGHT, height);
        format
    }

    pub fn audio(mime: impl Into<String>, sample_rate: i64, channel_count: i64) -> Self {
        let mut format = Self::new(mime);
        format.set_int(KEY_SAMPLE_RATE, sample_rate);
        format.set_int(KEY_CHANNEL_COUNT, channel_count);
        format
    }

    pub fn mime(&self) -> Option<&str> {
        self.get_str(KEY_MIME)
    }

    /// Classify the track by MIME prefix.
    pub fn track_type(&self) -> Option<TrackType> {
        let mime = self.mime()?;
        if mime.starts_with("video/") {
            Some(TrackType::Video)
        } else if mime.starts_with("audio/") {
            Some(TrackType::Audio)
        } else {
            None
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.entries.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            FormatValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.entries.get(key)? {
            FormatValue::Float(v) => Some(*v),
            FormatValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            FormatValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.entries.get(key)? {
            FormatValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Like `get_int`, but a missing key is a configuration error.
    pub fn integer(&self, key: &str) -> Result<i64> {
        self.get_int(key)
            .ok_or_else(|| ConfigError::MissingFormatKey(key.to_string()).into())
    }

    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.entries.insert(key.into(), FormatValue::Int(value));
    }

    pub fn set_float(&mut self, key: impl Into<String>, value: f64) {
        self.entries.insert(key.into(), FormatValue::Float(value));
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .insert(key.into(), FormatValue::Str(value.into()));
    }

    pub fn set_bytes(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries
            .insert(key.into(), FormatValue::Bytes(value.into()));
    }

    pub fn remove(&mut self, key: &str) -> Option<FormatValue> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                FormatValue::Int(v) => write!(f, "{key}={v}")?,
                FormatValue::Float(v) => write!(f, "{key}={v}")?,
                FormatValue::Str(v) => write!(f, "{key}={v}")?,
                FormatValue::Bytes(v) => write!(f, "{key}=<{} bytes>", v.len())?,
            }
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tracks_by_mime_prefix() {
        assert_eq!(
            MediaFormat::video(MIMETYPE_VIDEO_AVC, 640, 480).track_type(),
            Some(TrackType::Video)
        );
        assert_eq!(
            MediaFormat::audio(MIMETYPE_AUDIO_AAC, 44_100, 2).track_type(),
            Some(TrackType::Audio)
        );
        assert_eq!(MediaFormat::new("text/vtt").track_type(), None);
    }

    #[test]
    fn missing_integer_is_a_config_error() {
        let format = MediaFormat::new(MIMETYPE_AUDIO_AAC);
        let err = format.integer(KEY_SAMPLE_RATE).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains(KEY_SAMPLE_RATE));
    }

    #[test]
    fn serializes_as_flat_json_object() -> anyhow::Result<()> {
        let mut format = MediaFormat::audio(MIMETYPE_AUDIO_AAC, 48_000, 1);
        format.set_bytes(KEY_CSD_0, vec![0x11, 0x90]);
        let json = serde_json::to_value(&format)?;
        assert_eq!(json["mime"], "audio/mp4a-latm");
        assert_eq!(json["sample-rate"], 48_000);
        assert_eq!(json["csd-0"], serde_json::json!([0x11, 0x90]));
        Ok(())
    }
}
