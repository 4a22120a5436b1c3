use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use recode::backends::SoftwareCodecs;
use recode::backends::symphonia::SymphoniaReader;
use recode::backends::wav::WavWriter;
use recode::engine::{PROGRESS_UNKNOWN, extract_info};
use recode::logging;
use recode::opts::TranscodeOpts;
use recode::strategy::{AudioTarget, FormatStrategy};
use recode::transcoder::Transcoder;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let params = get_params()?;

    match params.command {
        Command::Probe { input } => probe(&input),
        Command::Wav {
            input,
            output,
            channels,
        } => wav(&input, output, channels).await,
    }
}

#[derive(Parser, Debug)]
#[command(name = "recode")]
#[command(about = "Inspect and re-encode media files")]
struct Params {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the first video/audio track formats and header metadata as JSON.
    Probe { input: PathBuf },

    /// Re-encode the audio track into a 16-bit PCM WAV file.
    Wav {
        input: PathBuf,
        output: PathBuf,

        /// Remix to mono (1) or stereo (2). Defaults to the source channel count.
        #[arg(short = 'c', long = "channels", value_parser = clap::value_parser!(i64).range(1..=2))]
        channels: Option<i64>,
    },
}

fn get_params() -> Result<Params> {
    Ok(Params::parse())
}

fn probe(input: &Path) -> Result<()> {
    let reader = SymphoniaReader::open(input)
        .with_context(|| format!("failed to open {}", input.display()))?;
    let info = extract_info(&reader)?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn wav(input: &Path, output: PathBuf, channels: Option<i64>) -> Result<()> {
    let reader = SymphoniaReader::open(input)
        .with_context(|| format!("failed to open {}", input.display()))?;

    let handle = Transcoder::spawn(
        Box::new(reader),
        Box::new(WavWriter::new(output)),
        Box::new(SoftwareCodecs::new()),
        FormatStrategy::AudioOnly {
            audio: AudioTarget::pcm(channels),
        },
        TranscodeOpts::default(),
    );

    let mut progress = handle.progress();
    let join = handle.join();
    tokio::pin!(join);

    let report = loop {
        tokio::select! {
            res = &mut join => break res?,
            changed = progress.changed() => {
                if changed.is_err() {
                    // The run dropped its sender; only the outcome is left.
                    break (&mut join).await?;
                }
                let value = *progress.borrow_and_update();
                if value != PROGRESS_UNKNOWN {
                    eprint!("\r{:5.1}%", value * 100.0);
                    std::io::stderr().flush()?;
                }
            }
        }
    };

    eprintln!();
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
