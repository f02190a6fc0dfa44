//! Shared fixtures for the integration suites
//!
//! Synthesizes WAV tones on disk (hound + tempfile) and builds headless
//! players over the null sink, so every scenario runs without audio
//! hardware.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use stillpoint_engine::{
    NullSink, Player, PlayerConfiguration, PlayerEvent, PlayerOptions, Track,
};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration, Instant};

/// Write a stereo 44.1 kHz sine tone
pub fn write_tone(path: &Path, seconds: f64, freq: f64) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (seconds * 44_100.0) as u32;
    for i in 0..frames {
        let t = f64::from(i) / 44_100.0;
        let value = ((2.0 * std::f64::consts::PI * freq * t).sin() * 0.4 * 32767.0) as i16;
        writer.write_sample(value).unwrap();
        writer.write_sample(value).unwrap();
    }
    writer.finalize().unwrap();
}

/// A tone file per track, all in one temp dir
pub fn tone_tracks(dir: &TempDir, count: usize, seconds: f64) -> Vec<Track> {
    (0..count)
        .map(|i| {
            let path: PathBuf = dir.path().join(format!("tone_{i}.wav"));
            write_tone(&path, seconds, 220.0 + 55.0 * i as f64);
            Track::from_file(path).unwrap()
        })
        .collect()
}

/// Install a test subscriber once (RUST_LOG controls verbosity)
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Headless player with the given configuration and playlist loaded
pub async fn headless_player(
    config: PlayerConfiguration,
    tracks: Vec<Track>,
) -> Arc<Player> {
    init_tracing();
    let player = Arc::new(Player::with_options(
        config,
        PlayerOptions {
            sink: Some(Box::new(NullSink::new())),
            ..Default::default()
        },
    ));
    player.load_playlist(tracks).await.unwrap();
    player
}

/// Drain events until `predicate` matches or the deadline passes.
/// Returns every event seen (matching one included), or panics on timeout.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<PlayerEvent>,
    deadline: Duration,
    predicate: impl Fn(&PlayerEvent) -> bool,
) -> Vec<PlayerEvent> {
    let mut seen = Vec::new();
    let end = Instant::now() + deadline;
    loop {
        let remaining = end.saturating_duration_since(Instant::now());
        match timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) => {
                let matched = predicate(&event);
                seen.push(event);
                if matched {
                    return seen;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                panic!("event bus closed while waiting; saw {seen:?}")
            }
            Err(_) => panic!("timed out waiting for event; saw {seen:?}"),
        }
    }
}
