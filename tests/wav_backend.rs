mod common;

use recode::backends::wav::WavWriter;
use recode::engine::{TranscodeOutcome, TranscoderEngine};
use recode::strategy::{AudioTarget, FormatStrategy};
use tokio_util::sync::CancellationToken;

use common::{FakeCodecs, opts, raw_track, reader};

#[test]
fn mono_pcm_is_upmixed_into_a_stereo_wav() -> anyhow::Result<()> {
    const RATE: i64 = 8_000;
    const FRAMES_PER_PACKET: usize = 400;
    const PACKETS: usize = 10;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("upmixed.wav");

    let report = TranscoderEngine::new(
        Box::new(reader(vec![raw_track(RATE, FRAMES_PER_PACKET, PACKETS)])),
        Box::new(WavWriter::new(&path)),
        Box::new(FakeCodecs::new()),
    )
    .run(
        &FormatStrategy::AudioOnly {
            audio: AudioTarget::pcm(Some(2)),
        },
        &opts(),
        &CancellationToken::new(),
        &mut |_| {},
    )?;
    assert_eq!(report.outcome, TranscodeOutcome::Completed);

    let mut wav = hound::WavReader::open(&path)?;
    let spec = wav.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, RATE as u32);
    assert_eq!(spec.bits_per_sample, 16);

    let samples = wav.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
    assert_eq!(samples.len(), FRAMES_PER_PACKET * PACKETS * 2);
    for (frame, pair) in samples.chunks_exact(2).enumerate() {
        assert_eq!(pair, [frame as i16, frame as i16]);
    }
    Ok(())
}

#[test]
fn video_tracks_are_refused_by_the_wav_writer() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("refused.wav");

    let err = TranscoderEngine::new(
        Box::new(reader(vec![common::video_track(1280, 720)])),
        Box::new(WavWriter::new(&path)),
        Box::new(FakeCodecs::new()),
    )
    .run(
        &FormatStrategy::PassThrough,
        &opts(),
        &CancellationToken::new(),
        &mut |_| {},
    )
    .unwrap_err();

    assert!(err.is_config());
    assert!(!path.exists());
    Ok(())
}
