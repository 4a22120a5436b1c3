//! Output format strategies.
//!
//! A strategy maps each input track format to the format we want the encoder to produce.
//! `Ok(None)` means "pass this track through unchanged".
//!
//! Strategies are pure: no I/O, no codec access. The only failure is a source that the
//! strategy refuses outright (e.g. a 4:3 source under the 720p cap), which fails the run.

use tracing::debug;

use crate::Result;
use crate::error::ConfigError;
use crate::format::{
    AAC_OBJECT_LC, COLOR_FORMAT_SURFACE, KEY_AAC_PROFILE, KEY_BIT_RATE, KEY_CHANNEL_COUNT,
    KEY_COLOR_FORMAT, KEY_FRAME_RATE, KEY_HEIGHT, KEY_I_FRAME_INTERVAL, KEY_SAMPLE_RATE, KEY_WIDTH,
    MIMETYPE_AUDIO_AAC, MIMETYPE_AUDIO_RAW, MIMETYPE_VIDEO_AVC, MediaFormat,
};

/// Video bitrate used when the caller does not pick one.
pub const DEFAULT_VIDEO_BITRATE: i64 = 8_000 * 1000;
pub const DEFAULT_FRAME_RATE: i64 = 30;
pub const DEFAULT_I_FRAME_INTERVAL: i64 = 3;
pub const DEFAULT_AUDIO_BITRATE: i64 = 128 * 1000;

pub const CAPPED_LONGER_LENGTH: i64 = 1280;
pub const CAPPED_SHORTER_LENGTH: i64 = 720;

/// Audio encoder target. Unset fields follow the source track.
///
/// The sample rate always follows the source: sample-rate conversion is not supported.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTarget {
    pub mime: String,
    pub bitrate: Option<i64>,
    pub channels: Option<i64>,
}

impl Default for AudioTarget {
    fn default() -> Self {
        Self {
            mime: MIMETYPE_AUDIO_AAC.to_string(),
            bitrate: None,
            channels: None,
        }
    }
}

impl AudioTarget {
    /// Interleaved 16-bit PCM, optionally remixed to `channels`.
    pub fn pcm(channels: Option<i64>) -> Self {
        Self {
            mime: MIMETYPE_AUDIO_RAW.to_string(),
            bitrate: None,
            channels,
        }
    }

    fn output_format(&self, input: &MediaFormat) -> Result<MediaFormat> {
        let sample_rate = input.integer(KEY_SAMPLE_RATE)?;
        let channels = match self.channels {
            Some(channels) => channels,
            None => input.integer(KEY_CHANNEL_COUNT)?,
        };

        let mut format = MediaFormat::audio(self.mime.clone(), sample_rate, channels);
        if self.mime == MIMETYPE_AUDIO_AAC {
            format.set_int(KEY_AAC_PROFILE, AAC_OBJECT_LC);
            let bitrate = self
                .bitrate
                .or_else(|| input.get_int(KEY_BIT_RATE))
                .unwrap_or(DEFAULT_AUDIO_BITRATE);
            format.set_int(KEY_BIT_RATE, bitrate);
        } else if let Some(bitrate) = self.bitrate {
            format.set_int(KEY_BIT_RATE, bitrate);
        }
        Ok(format)
    }
}

/// Maps input track formats to output formats. Selected once per run.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatStrategy {
    /// AVC at the source resolution with fixed bitrate/frame-rate/key-frame interval, and AAC at
    /// the source sample rate.
    NoOp,

    /// Caller-supplied video parameters as strings (typically straight from a form or CLI).
    /// Absent width/height keep the source size; frame rate and key-frame interval follow the
    /// source when it declares them.
    Custom {
        width: Option<String>,
        height: Option<String>,
        bitrate: Option<String>,
        audio: AudioTarget,
    },

    /// Downscale 16:9 sources larger than 720p to 1280x720. Sources at or below 720p pass
    /// through; non-16:9 sources are rejected.
    Capped { video_bitrate: i64, audio: AudioTarget },

    /// Video passes through; audio is re-encoded to `audio`.
    AudioOnly { audio: AudioTarget },

    /// Every track passes through (a pure remux).
    PassThrough,
}

impl FormatStrategy {
    pub fn capped_720p() -> Self {
        FormatStrategy::Capped {
            video_bitrate: DEFAULT_VIDEO_BITRATE,
            audio: AudioTarget::default(),
        }
    }

    pub fn create_video_output_format(&self, input: &MediaFormat) -> Result<Option<MediaFormat>> {
        match self {
            FormatStrategy::NoOp => {
                let width = input.integer(KEY_WIDTH)?;
                let height = input.integer(KEY_HEIGHT)?;
                Ok(Some(avc_format(
                    width,
                    height,
                    DEFAULT_VIDEO_BITRATE,
                    DEFAULT_FRAME_RATE,
                    DEFAULT_I_FRAME_INTERVAL,
                )))
            }
            FormatStrategy::Custom {
                width,
                height,
                bitrate,
                ..
            } => {
                let width = match width {
                    Some(w) => parse_param("width", w)?,
                    None => input.integer(KEY_WIDTH)?,
                };
                let height = match height {
                    Some(h) => parse_param("height", h)?,
                    None => input.integer(KEY_HEIGHT)?,
                };
                let bitrate = match bitrate {
                    Some(b) => parse_param("bitrate", b)?,
                    None => DEFAULT_VIDEO_BITRATE,
                };
                let frame_rate = input.get_int(KEY_FRAME_RATE).unwrap_or(DEFAULT_FRAME_RATE);
                let i_frame_interval = input
                    .get_int(KEY_I_FRAME_INTERVAL)
                    .unwrap_or(DEFAULT_I_FRAME_INTERVAL);
                Ok(Some(avc_format(
                    width,
                    height,
                    bitrate,
                    frame_rate,
                    i_frame_interval,
                )))
            }
            FormatStrategy::Capped { video_bitrate, .. } => {
                capped_video_format(input, *video_bitrate)
            }
            FormatStrategy::AudioOnly { .. } | FormatStrategy::PassThrough => Ok(None),
        }
    }

    pub fn create_audio_output_format(&self, input: &MediaFormat) -> Result<Option<MediaFormat>> {
        match self {
            FormatStrategy::NoOp => AudioTarget::default().output_format(input).map(Some),
            FormatStrategy::Custom { audio, .. }
            | FormatStrategy::Capped { audio, .. }
            | FormatStrategy::AudioOnly { audio } => audio.output_format(input).map(Some),
            FormatStrategy::PassThrough => Ok(None),
        }
    }
}

fn capped_video_format(input: &MediaFormat, bitrate: i64) -> Result<Option<MediaFormat>> {
    let width = input.integer(KEY_WIDTH)?;
    let height = input.integer(KEY_HEIGHT)?;

    let (longer, shorter, out_width, out_height) = if width >= height {
        (width, height, CAPPED_LONGER_LENGTH, CAPPED_SHORTER_LENGTH)
    } else {
        (height, width, CAPPED_SHORTER_LENGTH, CAPPED_LONGER_LENGTH)
    };

    if longer * 9 != shorter * 16 {
        return Err(ConfigError::AspectRatio { width, height }.into());
    }

    if shorter <= CAPPED_SHORTER_LENGTH {
        debug!(width, height, "source is at or below 720p, passing video through");
        return Ok(None);
    }

    Ok(Some(avc_format(
        out_width,
        out_height,
        bitrate,
        DEFAULT_FRAME_RATE,
        DEFAULT_I_FRAME_INTERVAL,
    )))
}

fn avc_format(
    width: i64,
    height: i64,
    bitrate: i64,
    frame_rate: i64,
    i_frame_interval: i64,
) -> MediaFormat {
    let mut format = MediaFormat::video(MIMETYPE_VIDEO_AVC, width, height);
    format.set_int(KEY_BIT_RATE, bitrate);
    format.set_int(KEY_FRAME_RATE, frame_rate);
    format.set_int(KEY_I_FRAME_INTERVAL, i_frame_interval);
    format.set_int(KEY_COLOR_FORMAT, COLOR_FORMAT_SURFACE);
    format
}

fn parse_param(name: &'static str, value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            ConfigError::InvalidParameter {
                name,
                value: value.to_string(),
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn video(width: i64, height: i64) -> MediaFormat {
        MediaFormat::video(MIMETYPE_VIDEO_AVC, width, height)
    }

    fn aac(sample_rate: i64, channels: i64) -> MediaFormat {
        MediaFormat::audio(MIMETYPE_AUDIO_AAC, sample_rate, channels)
    }

    #[test]
    fn noop_keeps_source_size_with_fixed_rate_control() -> anyhow::Result<()> {
        let out = FormatStrategy::NoOp
            .create_video_output_format(&video(1920, 1080))?
            .expect("noop always transcodes video");
        assert_eq!(out.get_int(KEY_WIDTH), Some(1920));
        assert_eq!(out.get_int(KEY_BIT_RATE), Some(DEFAULT_VIDEO_BITRATE));
        assert_eq!(out.get_int(KEY_FRAME_RATE), Some(30));
        assert_eq!(out.get_int(KEY_I_FRAME_INTERVAL), Some(3));
        Ok(())
    }

    #[test]
    fn noop_audio_is_aac_at_source_rate() -> anyhow::Result<()> {
        let out = FormatStrategy::NoOp
            .create_audio_output_format(&aac(22_050, 2))?
            .expect("noop always transcodes audio");
        assert_eq!(out.mime(), Some(MIMETYPE_AUDIO_AAC));
        assert_eq!(out.get_int(KEY_SAMPLE_RATE), Some(22_050));
        assert_eq!(out.get_int(KEY_CHANNEL_COUNT), Some(2));
        Ok(())
    }

    #[test]
    fn custom_parses_strings_and_falls_back_to_source_timing() -> anyhow::Result<()> {
        let mut input = video(1920, 1080);
        input.set_int(KEY_FRAME_RATE, 24);

        let strategy = FormatStrategy::Custom {
            width: Some("640".into()),
            height: Some(" 360 ".into()),
            bitrate: None,
            audio: AudioTarget::default(),
        };
        let out = strategy
            .create_video_output_format(&input)?
            .expect("custom always transcodes video");
        assert_eq!(out.get_int(KEY_WIDTH), Some(640));
        assert_eq!(out.get_int(KEY_HEIGHT), Some(360));
        assert_eq!(out.get_int(KEY_FRAME_RATE), Some(24));
        assert_eq!(out.get_int(KEY_I_FRAME_INTERVAL), Some(DEFAULT_I_FRAME_INTERVAL));
        Ok(())
    }

    #[test]
    fn custom_rejects_unparseable_dimensions() {
        let strategy = FormatStrategy::Custom {
            width: Some("wide".into()),
            height: None,
            bitrate: None,
            audio: AudioTarget::default(),
        };
        let err = strategy
            .create_video_output_format(&video(1920, 1080))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidParameter { name: "width", .. })
        ));
    }

    #[test]
    fn capped_downscales_1080p_to_720p() -> anyhow::Result<()> {
        let out = FormatStrategy::capped_720p()
            .create_video_output_format(&video(1920, 1080))?
            .expect("1080p is above the cap");
        assert_eq!(out.get_int(KEY_WIDTH), Some(1280));
        assert_eq!(out.get_int(KEY_HEIGHT), Some(720));
        Ok(())
    }

    #[test]
    fn capped_keeps_portrait_orientation() -> anyhow::Result<()> {
        let out = FormatStrategy::capped_720p()
            .create_video_output_format(&video(1080, 1920))?
            .expect("1080p is above the cap");
        assert_eq!(out.get_int(KEY_WIDTH), Some(720));
        assert_eq!(out.get_int(KEY_HEIGHT), Some(1280));
        Ok(())
    }

    #[test]
    fn capped_passes_through_at_or_below_720p() -> anyhow::Result<()> {
        let strategy = FormatStrategy::capped_720p();
        assert!(strategy.create_video_output_format(&video(1280, 720))?.is_none());
        assert!(strategy.create_video_output_format(&video(640, 360))?.is_none());
        Ok(())
    }

    #[test]
    fn capped_rejects_4_3_sources() {
        let err = FormatStrategy::capped_720p()
            .create_video_output_format(&video(1440, 1080))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::AspectRatio {
                width: 1440,
                height: 1080
            })
        ));
    }

    #[test]
    fn audio_target_overrides_channels() -> anyhow::Result<()> {
        let strategy = FormatStrategy::AudioOnly {
            audio: AudioTarget::pcm(Some(1)),
        };
        assert!(strategy.create_video_output_format(&video(1920, 1080))?.is_none());

        let out = strategy
            .create_audio_output_format(&aac(48_000, 2))?
            .expect("audio-only transcodes audio");
        assert_eq!(out.mime(), Some(MIMETYPE_AUDIO_RAW));
        assert_eq!(out.get_int(KEY_CHANNEL_COUNT), Some(1));
        assert_eq!(out.get_int(KEY_SAMPLE_RATE), Some(48_000));
        Ok(())
    }

    #[test]
    fn pass_through_produces_no_formats() -> anyhow::Result<()> {
        let strategy = FormatStrategy::PassThrough;
        assert!(strategy.create_video_output_format(&video(1920, 1080))?.is_none());
        assert!(strategy.create_audio_output_format(&aac(48_000, 2))?.is_none());
        Ok(())
    }
}
