//! Overlay and sound-effect scenarios: loop modes, replacement stress with
//! an undisturbed main track, cache eviction semantics.

mod helpers;

use helpers::{headless_player, tone_tracks, write_tone};
use stillpoint_engine::{
    EngineError, OverlayConfiguration, OverlayLoopMode, OverlayState, PlayerConfiguration,
    PlayerOptions, PlayerState, SoundEffect, Track,
};
use tempfile::tempdir;
use tokio::time::{sleep, Duration};

#[tokio::test]
async fn test_overlay_count_loop_returns_to_idle() {
    let dir = tempdir().unwrap();
    let tracks = tone_tracks(&dir, 1, 10.0);
    let player = headless_player(PlayerConfiguration::default(), tracks).await;
    player.start_playing(0.0).await.unwrap();

    let overlay_path = dir.path().join("chime.wav");
    write_tone(&overlay_path, 0.3, 880.0);
    let overlay_track = Track::from_file(&overlay_path).unwrap();

    player
        .start_overlay(
            &overlay_track,
            OverlayConfiguration {
                loop_mode: OverlayLoopMode::Count { count: 2 },
                loop_delay: 0.1,
                volume: 0.5,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(player.overlay_state(), OverlayState::Playing);

    // Two 0.3s iterations plus one 0.1s delay, with polling slack
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(player.overlay_state(), OverlayState::Idle);

    assert_eq!(player.state().await, PlayerState::Playing);
    player.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_overlay_pause_resume() {
    let dir = tempdir().unwrap();
    let tracks = tone_tracks(&dir, 1, 10.0);
    let player = headless_player(PlayerConfiguration::default(), tracks).await;
    player.start_playing(0.0).await.unwrap();

    let overlay_path = dir.path().join("bed.wav");
    write_tone(&overlay_path, 5.0, 110.0);
    let overlay_track = Track::from_file(&overlay_path).unwrap();

    player
        .start_overlay(
            &overlay_track,
            OverlayConfiguration {
                loop_mode: OverlayLoopMode::Infinite,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    player.pause_overlay().unwrap();
    assert_eq!(player.overlay_state(), OverlayState::Paused);
    player.resume_overlay().unwrap();
    assert_eq!(player.overlay_state(), OverlayState::Playing);

    player.stop_overlay().await.unwrap();
    assert_eq!(player.overlay_state(), OverlayState::Idle);
    player.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_overlay_replacement_stress_leaves_main_uninterrupted() {
    let dir = tempdir().unwrap();
    let tracks = tone_tracks(&dir, 1, 30.0);
    let player = headless_player(PlayerConfiguration::default(), tracks).await;
    player.start_playing(0.0).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let overlay_a = dir.path().join("a.wav");
    let overlay_b = dir.path().join("b.wav");
    write_tone(&overlay_a, 2.0, 440.0);
    write_tone(&overlay_b, 2.0, 550.0);
    let track_a = Track::from_file(&overlay_a).unwrap();
    let track_b = Track::from_file(&overlay_b).unwrap();

    player
        .start_overlay(
            &track_a,
            OverlayConfiguration {
                loop_mode: OverlayLoopMode::Infinite,
                volume: 0.4,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut last_position = player.position().unwrap().0;
    for i in 0..10 {
        let next = if i % 2 == 0 { &track_b } else { &track_a };
        player.replace_overlay(next).await.unwrap();

        // Main track keeps moving forward, at full node gain
        let (position, _) = player.position().unwrap();
        assert!(
            position >= last_position,
            "main position went backwards during replacement {i}"
        );
        last_position = position;
    }

    assert_eq!(player.state().await, PlayerState::Playing);
    assert!(player.is_state_consistent().await);
    player.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_effect_cache_lru_eviction_via_player() {
    let dir = tempdir().unwrap();
    let tracks = tone_tracks(&dir, 1, 5.0);
    let player = std::sync::Arc::new(stillpoint_engine::Player::with_options(
        PlayerConfiguration::default(),
        PlayerOptions {
            sink: Some(Box::new(stillpoint_engine::NullSink::new())),
            effect_cache_capacity: 2,
            ..Default::default()
        },
    ));
    player.load_playlist(tracks).await.unwrap();

    for name in ["one", "two", "three"] {
        let path = dir.path().join(format!("{name}.wav"));
        write_tone(&path, 0.2, 660.0);
        player
            .preload_effect(SoundEffect::new(name, &path))
            .await
            .unwrap();
    }

    // Capacity 2: the oldest preload is gone
    assert!(matches!(
        player.play_effect("one"),
        Err(EngineError::EffectNotFound { .. })
    ));
    player.play_effect("two").unwrap();
    player.play_effect("three").unwrap();

    // Explicit eviction
    assert!(player.evict_effect("two"));
    assert!(matches!(
        player.play_effect("two"),
        Err(EngineError::EffectNotFound { .. })
    ));
}

#[tokio::test]
async fn test_effect_plays_and_stops_without_touching_main() {
    let dir = tempdir().unwrap();
    let tracks = tone_tracks(&dir, 1, 10.0);
    let player = headless_player(PlayerConfiguration::default(), tracks).await;
    player.start_playing(0.0).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let gong = dir.path().join("gong.wav");
    write_tone(&gong, 2.0, 330.0);
    player
        .preload_effect(
            SoundEffect::new("gong", &gong)
                .normalized(),
        )
        .await
        .unwrap();

    player.play_effect("gong").unwrap();
    sleep(Duration::from_millis(200)).await;
    player.stop_effect();
    sleep(Duration::from_millis(300)).await;

    // Main flow unaffected
    assert_eq!(player.state().await, PlayerState::Playing);
    let (position, _) = player.position().unwrap();
    assert!(position > 0.5, "main track stalled: {position:.2}");
    player.shutdown().await.unwrap();
}
