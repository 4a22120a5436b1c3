//! Caller-facing async surface.
//!
//! The engine is a synchronous stepping loop, so a run goes onto tokio's blocking pool and the
//! caller gets a handle with:
//! - a `watch` receiver carrying the latest progress value (a slow reader only ever sees the
//!   newest estimate, never a backlog)
//! - a `CancellationToken` checked once per loop iteration
//! - `join()` for the final outcome

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::Result;
use crate::codec::CodecProvider;
use crate::container::{ContainerReader, ContainerWriter};
use crate::engine::{TranscodeReport, TranscoderEngine};
use crate::error::Error;
use crate::opts::TranscodeOpts;
use crate::strategy::FormatStrategy;

pub struct Transcoder;

impl Transcoder {
    /// Start a run on the blocking pool. Must be called from within a tokio runtime.
    pub fn spawn(
        reader: Box<dyn ContainerReader>,
        writer: Box<dyn ContainerWriter>,
        codecs: Box<dyn CodecProvider>,
        strategy: FormatStrategy,
        opts: TranscodeOpts,
    ) -> TranscodeHandle {
        Self::spawn_with_token(
            reader,
            writer,
            codecs,
            strategy,
            opts,
            CancellationToken::new(),
        )
    }

    /// Like `spawn`, but cancelled through a caller-owned token (e.g. a child of an app-wide one).
    pub fn spawn_with_token(
        reader: Box<dyn ContainerReader>,
        writer: Box<dyn ContainerWriter>,
        codecs: Box<dyn CodecProvider>,
        strategy: FormatStrategy,
        opts: TranscodeOpts,
        cancel: CancellationToken,
    ) -> TranscodeHandle {
        let (progress_tx, progress_rx) = watch::channel(0.0);
        let task_cancel = cancel.clone();

        let task = tokio::task::spawn_blocking(move || {
            let engine = TranscoderEngine::new(reader, writer, codecs);
            let res = engine.run(&strategy, &opts, &task_cancel, &mut |progress| {
                progress_tx.send_replace(progress);
            });
            if let Err(err) = &res {
                error!(error = %err, "transcode failed");
            }
            res
        });

        TranscodeHandle {
            progress: progress_rx,
            cancel,
            task,
        }
    }
}

pub struct TranscodeHandle {
    progress: watch::Receiver<f64>,
    cancel: CancellationToken,
    task: JoinHandle<Result<TranscodeReport>>,
}

impl TranscodeHandle {
    /// Latest-value progress channel. `-1.0` means the duration is unknown.
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the run to stop. It finishes its current iteration and releases everything.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to end.
    pub async fn join(self) -> Result<TranscodeReport> {
        self.task
            .await
            .map_err(|err| Error::msg(format!("transcode task failed: {err}")))?
    }
}
