use std::time::Duration;

/// How many loop iterations pass between progress reports.
pub const DEFAULT_PROGRESS_INTERVAL_STEPS: u64 = 10;

/// Sleep after an iteration in which no track did any work.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(10);

/// Options that control how a transcode run is driven.
///
/// This struct represents *library-level configuration*, not CLI flags directly.
/// The CLI maps user input into this type (plus a `FormatStrategy`) so that:
/// - the library remains reusable outside of a CLI context
/// - other frontends (tests, batch jobs) can construct options programmatically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOpts {
    /// Report progress every this many loop iterations.
    ///
    /// Progress is only computed when the source duration is known. Zero is treated as one.
    pub progress_interval_steps: u64,

    /// Bounded wait after an iteration that moved no data.
    ///
    /// Keeps the loop from spinning while codecs are busy; cancellation is still checked
    /// every iteration.
    pub idle_wait: Duration,

    /// Timeout passed to every codec dequeue.
    ///
    /// Zero means non-blocking polls, which is what the stepping loop is designed around.
    pub codec_timeout: Duration,
}

impl Default for TranscodeOpts {
    fn default() -> Self {
        Self {
            progress_interval_steps: DEFAULT_PROGRESS_INTERVAL_STEPS,
            idle_wait: DEFAULT_IDLE_WAIT,
            codec_timeout: Duration::ZERO,
        }
    }
}
