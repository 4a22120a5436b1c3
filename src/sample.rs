//! Per-sample metadata shared by codecs, containers, and the muxer.

/// Flags carried alongside a compressed or encoded sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub key_frame: bool,
    /// The payload is codec configuration only (e.g. SPS/PPS), not media data.
    pub codec_config: bool,
    pub end_of_stream: bool,
}

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags {
        key_frame: false,
        codec_config: false,
        end_of_stream: false,
    };

    pub const KEY_FRAME: SampleFlags = SampleFlags {
        key_frame: true,
        ..SampleFlags::NONE
    };

    pub const CODEC_CONFIG: SampleFlags = SampleFlags {
        codec_config: true,
        ..SampleFlags::NONE
    };

    pub const END_OF_STREAM: SampleFlags = SampleFlags {
        end_of_stream: true,
        ..SampleFlags::NONE
    };
}

/// Size, presentation timestamp (microseconds), and flags of one sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleInfo {
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

impl SampleInfo {
    pub fn new(size: usize, presentation_time_us: i64, flags: SampleFlags) -> Self {
        Self {
            size,
            presentation_time_us,
            flags,
        }
    }

    /// A zero-length end-of-stream marker.
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self::new(0, presentation_time_us, SampleFlags::END_OF_STREAM)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.end_of_stream
    }
}
