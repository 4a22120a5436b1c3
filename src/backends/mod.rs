//! Concrete collaborators: software codecs and container readers/writers.

pub mod buffers;
pub mod memory;
pub mod pcm;
pub mod symphonia;
pub mod wav;

use tracing::debug;

use crate::Result;
use crate::codec::{Codec, CodecProvider};
use crate::error::ConfigError;
use crate::format::{MediaFormat, TrackType};

use self::pcm::PcmEncoder;
use self::symphonia::SymphoniaDecoder;

/// Symphonia audio decoders paired with the PCM encoder. No video codecs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareCodecs;

impl SoftwareCodecs {
    pub fn new() -> Self {
        Self
    }
}

impl CodecProvider for SoftwareCodecs {
    fn create_decoder(&mut self, format: &MediaFormat) -> Result<Box<dyn Codec>> {
        reject_video(format)?;
        debug!(mime = format.mime(), "creating symphonia decoder");
        Ok(Box::new(SymphoniaDecoder::new(format)?))
    }

    fn create_encoder(&mut self, format: &MediaFormat) -> Result<Box<dyn Codec>> {
        reject_video(format)?;
        debug!(mime = format.mime(), "creating PCM encoder");
        Ok(Box::new(PcmEncoder::new(format)?))
    }
}

fn reject_video(format: &MediaFormat) -> Result<()> {
    if format.track_type() == Some(TrackType::Video) {
        return Err(
            ConfigError::UnsupportedCodec(format.mime().unwrap_or_default().to_string()).into(),
        );
    }
    Ok(())
}
