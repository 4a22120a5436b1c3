//! Channel-count conversion for interleaved signed 16-bit PCM.
//!
//! Only mono and stereo are supported:
//! - stereo → mono downmixes with Viktor Toth's mixing equations, which avoid the clipping you
//!   get from summing two loud signals (see <http://www.vttoth.com/CMS/index.php/technical-notes/68>)
//! - mono → stereo duplicates each sample into both slots
//! - equal channel counts copy samples unchanged
//!
//! Remixing is stateless. Each call converts as many whole frames as fit in the output and
//! reports how much it consumed and wrote, so callers can carry the remainder.

const SIGNED_SHORT_LIMIT: i64 = 32_768;
const UNSIGNED_SHORT_MAX: i64 = 65_535;

/// The remix applied between a decoded and an encoded channel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioRemixer {
    /// Stereo to mono.
    Downmix,
    /// Mono to stereo.
    Upmix,
    /// Same channel count on both sides.
    Passthrough,
}

impl AudioRemixer {
    /// Pick the remixer for a channel-count pair. Counts must already be validated as 1 or 2.
    pub fn for_channels(input_channels: i64, output_channels: i64) -> Self {
        if input_channels > output_channels {
            AudioRemixer::Downmix
        } else if input_channels < output_channels {
            AudioRemixer::Upmix
        } else {
            AudioRemixer::Passthrough
        }
    }

    /// Number of output samples produced from `input_len` input samples.
    pub fn output_len(&self, input_len: usize) -> usize {
        match self {
            AudioRemixer::Downmix => input_len / 2,
            AudioRemixer::Upmix => input_len * 2,
            AudioRemixer::Passthrough => input_len,
        }
    }

    /// Number of input samples that fit into `output_capacity` output samples (whole frames only).
    pub fn input_len_for(&self, output_capacity: usize) -> usize {
        match self {
            AudioRemixer::Downmix => output_capacity * 2,
            AudioRemixer::Upmix => output_capacity / 2,
            AudioRemixer::Passthrough => output_capacity,
        }
    }

    /// Remix as much of `input` as fits into `output`.
    ///
    /// Returns `(consumed, written)` sample counts.
    pub fn remix(&self, input: &[i16], output: &mut [i16]) -> (usize, usize) {
        match self {
            AudioRemixer::Downmix => {
                let frames = (input.len() / 2).min(output.len());
                for (out, pair) in output.iter_mut().zip(input.chunks_exact(2)).take(frames) {
                    *out = downmix_sample(pair[0], pair[1]);
                }
                (frames * 2, frames)
            }
            AudioRemixer::Upmix => {
                let frames = input.len().min(output.len() / 2);
                for (pair, sample) in output.chunks_exact_mut(2).zip(input).take(frames) {
                    pair[0] = *sample;
                    pair[1] = *sample;
                }
                (frames, frames * 2)
            }
            AudioRemixer::Passthrough => {
                let n = input.len().min(output.len());
                output[..n].copy_from_slice(&input[..n]);
                (n, n)
            }
        }
    }
}

fn downmix_sample(left: i16, right: i16) -> i16 {
    // Shift into the unsigned range.
    let a = left as i64 + SIGNED_SHORT_LIMIT;
    let b = right as i64 + SIGNED_SHORT_LIMIT;

    let m = if a < SIGNED_SHORT_LIMIT || b < SIGNED_SHORT_LIMIT {
        // At least one side is quiet (below the middle of the dynamic range).
        a * b / SIGNED_SHORT_LIMIT
    } else {
        // Both sides are loud.
        2 * (a + b) - a * b / SIGNED_SHORT_LIMIT - (UNSIGNED_SHORT_MAX + 1)
    };

    (m.clamp(0, UNSIGNED_SHORT_MAX) - SIGNED_SHORT_LIMIT) as i16
}

/// Decode little-endian 16-bit PCM bytes. A trailing odd byte is ignored.
pub fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Encode samples as little-endian bytes into `out`. Returns the number of bytes written.
pub fn pcm_to_le_bytes(samples: &[i16], out: &mut [u8]) -> usize {
    let n = samples.len().min(out.len() / 2);
    for (dst, sample) in out.chunks_exact_mut(2).zip(samples).take(n) {
        dst.copy_from_slice(&sample.to_le_bytes());
    }
    n * 2
}
