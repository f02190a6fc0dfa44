//! End-to-end crossfade scenarios
//!
//! Auto-advance, pause/resume at both sides of the midpoint, skip during
//! an in-flight crossfade, and effect isolation. All headless (null sink).

mod helpers;

use helpers::{headless_player, tone_tracks, wait_for_event};
use std::sync::Arc;
use stillpoint_engine::{
    PlayerConfiguration, PlayerEvent, PlayerState, SoundEffect,
};
use tempfile::tempdir;
use tokio::time::{sleep, Duration, Instant};

fn config(crossfade: f64) -> PlayerConfiguration {
    PlayerConfiguration {
        crossfade_duration: crossfade,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_auto_advance_with_crossfade() {
    let dir = tempdir().unwrap();
    let tracks = tone_tracks(&dir, 2, 2.0);
    let target_id = tracks[1].id;
    let player = headless_player(config(1.0), tracks).await;
    let mut rx = player.subscribe();

    player.start_playing(0.0).await.unwrap();

    // The scheduler fires when remaining <= 1s; the fade then takes ~1s
    let seen = wait_for_event(&mut rx, Duration::from_secs(5), |event| {
        matches!(event, PlayerEvent::CrossfadeCompleted { .. })
    })
    .await;

    // Event shape: started, then monotonic progress, then completed
    let started = seen
        .iter()
        .position(|e| matches!(e, PlayerEvent::CrossfadeStarted { .. }))
        .expect("crossfade-started missing");
    let mut last_progress = -1.0;
    for event in &seen[started..] {
        if let PlayerEvent::CrossfadeProgress { progress } = event {
            assert!(
                *progress >= last_progress,
                "crossfade progress regressed: {progress} after {last_progress}"
            );
            last_progress = *progress;
        }
    }
    assert!(last_progress >= 0.9, "final progress was {last_progress}");

    // track-changed for the incoming track follows completion
    wait_for_event(&mut rx, Duration::from_secs(1), |event| {
        matches!(event, PlayerEvent::TrackChanged { track_id, .. } if *track_id == target_id)
    })
    .await;

    assert_eq!(player.current_track().await.unwrap().id, target_id);
    assert_eq!(player.state().await, PlayerState::Playing);
    assert!(!player.has_active_crossfade());
    assert!(player.is_state_consistent().await);
    player.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pause_before_midpoint_resumes_remaining() {
    let dir = tempdir().unwrap();
    let tracks = tone_tracks(&dir, 2, 10.0);
    let target_id = tracks[1].id;
    let player = headless_player(config(2.0), tracks).await;

    player.start_playing(0.0).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let skipper = Arc::clone(&player);
    let skip = tokio::spawn(async move { skipper.skip_to_next().await });

    // ~0.5s into a 2s fade: 25%
    sleep(Duration::from_millis(600)).await;
    player.pause().await.unwrap();
    skip.await.unwrap().unwrap();

    assert_eq!(player.state().await, PlayerState::Paused);
    assert!(player.has_paused_crossfade().await);
    assert!(player.is_state_consistent().await);

    let resume_start = Instant::now();
    player.resume().await.unwrap();
    let elapsed = resume_start.elapsed().as_secs_f64();

    // Full remaining duration (~1.5s) ran, not a quick finish
    assert!(elapsed > 1.0, "resume finished too fast: {elapsed:.2}s");
    assert!(elapsed < 2.2, "resume overran: {elapsed:.2}s");

    assert_eq!(player.state().await, PlayerState::Playing);
    assert_eq!(player.current_track().await.unwrap().id, target_id);
    assert!(!player.has_paused_crossfade().await);
    assert!(player.is_state_consistent().await);
    player.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pause_past_midpoint_quick_finishes() {
    let dir = tempdir().unwrap();
    let tracks = tone_tracks(&dir, 2, 10.0);
    let target_id = tracks[1].id;
    let player = headless_player(config(2.0), tracks).await;

    player.start_playing(0.0).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let skipper = Arc::clone(&player);
    let skip = tokio::spawn(async move { skipper.skip_to_next().await });

    // ~1.4s into a 2s fade: 70%
    sleep(Duration::from_millis(1500)).await;
    player.pause().await.unwrap();
    skip.await.unwrap().unwrap();
    assert!(player.has_paused_crossfade().await);

    let resume_start = Instant::now();
    player.resume().await.unwrap();
    let elapsed = resume_start.elapsed().as_secs_f64();

    // Quick finish is bounded at one second
    assert!(elapsed <= 1.4, "quick finish overran: {elapsed:.2}s");
    assert_eq!(player.current_track().await.unwrap().id, target_id);
    assert!(player.is_state_consistent().await);
    player.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_skip_during_crossfade_rolls_back_and_retargets() {
    let dir = tempdir().unwrap();
    let tracks = tone_tracks(&dir, 3, 10.0);
    let third_id = tracks[2].id;
    let player = headless_player(config(2.0), tracks).await;
    let mut rx = player.subscribe();

    player.start_playing(0.0).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    // First transition in flight...
    let skipper = Arc::clone(&player);
    let first = tokio::spawn(async move { skipper.skip_to_next().await });
    sleep(Duration::from_millis(600)).await;

    // ...superseded by a second skip, which lands on the third track
    player.skip_to_next().await.unwrap();
    first.await.unwrap().unwrap();

    let seen = wait_for_event(&mut rx, Duration::from_secs(1), |event| {
        matches!(event, PlayerEvent::CrossfadeCancelled { .. })
    })
    .await;
    assert!(
        seen.iter()
            .filter(|e| matches!(e, PlayerEvent::CrossfadeStarted { .. }))
            .count()
            >= 2,
        "expected both crossfades to have started"
    );

    assert_eq!(player.current_track().await.unwrap().id, third_id);
    assert_eq!(player.state().await, PlayerState::Playing);
    assert!(!player.has_active_crossfade());
    // At most two nodes ever sound: the superseded incoming node is gone
    assert!(player.is_state_consistent().await);
    player.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_effect_during_crossfade_leaves_fade_untouched() {
    let dir = tempdir().unwrap();
    let tracks = tone_tracks(&dir, 2, 10.0);
    let player = headless_player(config(2.0), tracks).await;

    let gong_path = dir.path().join("gong.wav");
    helpers::write_tone(&gong_path, 0.5, 660.0);
    player
        .preload_effect(SoundEffect::new("gong", &gong_path))
        .await
        .unwrap();

    player.start_playing(0.0).await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let start = Instant::now();
    let skipper = Arc::clone(&player);
    let skip = tokio::spawn(async move { skipper.skip_to_next().await });

    sleep(Duration::from_millis(500)).await;
    player.play_effect("gong").unwrap();

    skip.await.unwrap().unwrap();
    let elapsed = start.elapsed().as_secs_f64();

    // The fade completed on schedule despite the effect trigger
    assert!(elapsed < 3.2, "crossfade delayed by effect: {elapsed:.2}s");
    assert_eq!(player.state().await, PlayerState::Playing);
    assert!(player.is_state_consistent().await);
    player.shutdown().await.unwrap();
}
