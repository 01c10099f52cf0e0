//! End-to-end playback scenarios over the simulated engine
//!
//! Timing-sensitive tests run on a paused tokio clock so fades and
//! auto-advance can be observed deterministically.

mod helpers;

use std::time::Duration;

use cadenza_common::events::{NoticeKind, PlaybackPhase, PlayerEvent, RepeatMode};
use cadenza_player::config::RuntimeSettings;
use cadenza_player::db;
use cadenza_player::engine::EngineProbe;
use cadenza_player::error::SourceErrorKind;
use cadenza_player::library::Library;
use cadenza_player::playback::Command;
use helpers::{settle, track, TestPlayer};
use tokio::time::sleep;

async fn player(tracks: Vec<cadenza_player::library::Track>) -> TestPlayer {
    let pool = db::open_in_memory().await.unwrap();
    TestPlayer::start(pool, RuntimeSettings::default(), tracks).await
}

/// Player whose clock is paused once the database is open
async fn paused_player(tracks: Vec<cadenza_player::library::Track>) -> TestPlayer {
    let p = player(tracks).await;
    tokio::time::pause();
    p
}

#[tokio::test]
async fn test_auto_advance_crossfades_into_next_track() {
    let mut p = paused_player(vec![track(1, 180), track(2, 200)]).await;

    p.send(Command::PlayQueue {
        tracks: vec![1, 2],
        start_index: 0,
    })
    .await;
    p.wait_for_playing(true).await;
    p.send(Command::Seek(178_000)).await;

    // Inside the crossfade window the outgoing track fades out
    sleep(Duration::from_millis(1200)).await;
    assert!(p.probe.volume() < 1.0, "volume {}", p.probe.volume());

    p.wait_for_track(2).await;
    assert!(p.probe.volume() <= 0.05, "volume {}", p.probe.volume());

    sleep(Duration::from_millis(1500)).await;
    let midway = p.probe.volume();
    assert!((0.35..=0.65).contains(&midway), "volume {}", midway);

    sleep(Duration::from_millis(1700)).await;
    assert_eq!(p.probe.volume(), 1.0);

    let snapshot = p.handle.snapshot();
    assert_eq!(snapshot.track_id, Some(2));
    assert!(snapshot.is_playing);
    assert_eq!(snapshot.current_index, Some(1));
}

#[tokio::test]
async fn test_manual_pause_fades_before_pausing_engine() {
    let mut p = paused_player(vec![track(1, 300)]).await;
    p.send(Command::Play(1)).await;
    p.wait_for_playing(true).await;
    sleep(Duration::from_secs(2)).await;
    assert_eq!(p.probe.volume(), 1.0);

    p.send(Command::TogglePlayPause).await;
    p.wait_for_playing(false).await;
    // Still rendering during the fade-out
    assert!(p.probe.play_when_ready());

    sleep(Duration::from_millis(600)).await;
    assert!(!p.probe.play_when_ready());
    assert_eq!(p.probe.volume(), 0.0);

    p.send(Command::TogglePlayPause).await;
    p.wait_for_playing(true).await;
    sleep(Duration::from_millis(600)).await;
    assert_eq!(p.probe.volume(), 1.0);
}

#[tokio::test]
async fn test_user_volume_scales_envelope() {
    let mut p = paused_player(vec![track(1, 300)]).await;
    p.send(Command::Play(1)).await;
    p.wait_for_playing(true).await;
    sleep(Duration::from_secs(1)).await;

    p.send(Command::SetVolume(0.5)).await;
    p.wait_for("VolumeChanged", |e| matches!(e, PlayerEvent::VolumeChanged { .. }))
        .await;
    assert!((p.probe.volume() - 0.5).abs() < 1e-6);
    assert_eq!(p.handle.snapshot().volume, 0.5);
}

#[tokio::test]
async fn test_source_error_removes_track_and_advances() {
    let mut p = player(vec![track(1, 120), track(2, 120), track(3, 120)]).await;
    p.faults.break_track(2, SourceErrorKind::Decode);

    p.send(Command::PlayQueue {
        tracks: vec![1, 2, 3],
        start_index: 1,
    })
    .await;

    let notice = p
        .wait_for("TrackSkipped notice", |e| {
            matches!(
                e,
                PlayerEvent::Notice {
                    kind: NoticeKind::TrackSkipped,
                    ..
                }
            )
        })
        .await;
    if let PlayerEvent::Notice { message, .. } = notice {
        assert!(message.contains("Track 2"), "{}", message);
    }

    p.wait_for_track(3).await;
    assert!(p.library.resolve(2).is_none());
    assert_eq!(p.handle.snapshot().queue, vec![1, 3]);
}

#[tokio::test]
async fn test_end_of_queue_halts() {
    let mut p = paused_player(vec![track(1, 20)]).await;
    p.send(Command::Play(1)).await;
    p.wait_for_playing(true).await;

    p.wait_for("Ended phase", |e| {
        matches!(
            e,
            PlayerEvent::PlayStateChanged {
                phase: PlaybackPhase::Ended,
                ..
            }
        )
    })
    .await;
    let snapshot = p.handle.snapshot();
    assert!(!snapshot.is_playing);
    assert_eq!(snapshot.track_id, Some(1));
}

#[tokio::test]
async fn test_repeat_all_wraps_and_repeat_one_replays() {
    let mut p = paused_player(vec![track(1, 20), track(2, 20)]).await;
    p.send(Command::ToggleRepeat).await;
    p.send(Command::PlayQueue {
        tracks: vec![1, 2],
        start_index: 1,
    })
    .await;
    p.wait_for_track(2).await;
    assert_eq!(p.handle.snapshot().repeat, RepeatMode::All);

    // Repeat-all wraps from the last entry to the first
    p.wait_for_track(1).await;

    p.send(Command::ToggleRepeat).await;
    p.wait_for("RepeatChanged", |e| {
        matches!(
            e,
            PlayerEvent::RepeatChanged {
                repeat: RepeatMode::One,
                ..
            }
        )
    })
    .await;
    p.wait_for_track(1).await;
    assert_eq!(p.handle.snapshot().current_index, Some(0));
}

#[tokio::test]
async fn test_previous_restarts_after_three_seconds() {
    let mut p = paused_player(vec![track(1, 120), track(2, 120)]).await;
    p.send(Command::PlayQueue {
        tracks: vec![1, 2],
        start_index: 1,
    })
    .await;
    p.wait_for_playing(true).await;
    sleep(Duration::from_secs(10)).await;

    p.send(Command::Previous).await;
    settle().await;
    assert!(p.probe.position_ms() < 1000);
    assert_eq!(p.handle.snapshot().track_id, Some(2));

    p.send(Command::Previous).await;
    p.wait_for_track(1).await;
}

#[tokio::test]
async fn test_skip_while_paused_stays_paused() {
    let mut p = paused_player(vec![track(1, 120), track(2, 120)]).await;
    p.send(Command::PlayQueue {
        tracks: vec![1, 2],
        start_index: 0,
    })
    .await;
    p.wait_for_playing(true).await;
    p.send(Command::TogglePlayPause).await;
    p.wait_for_playing(false).await;
    sleep(Duration::from_secs(1)).await;

    p.send(Command::Next).await;
    p.wait_for_track(2).await;
    settle().await;
    let snapshot = p.handle.snapshot();
    assert!(!snapshot.is_playing);
    assert_eq!(snapshot.phase, PlaybackPhase::Ready);
}

#[tokio::test]
async fn test_skip_survives_track_ending_during_fade_out() {
    let mut p = paused_player(vec![track(1, 60), track(2, 60), track(3, 60)]).await;
    p.send(Command::PlayQueue {
        tracks: vec![1, 2, 3],
        start_index: 0,
    })
    .await;
    p.wait_for_playing(true).await;
    sleep(Duration::from_secs(1)).await;

    // The track runs out while the skip fade-out is still going
    p.send(Command::Seek(59_800)).await;
    p.send(Command::Next).await;
    p.wait_for_track(2).await;
    sleep(Duration::from_secs(3)).await;

    let snapshot = p.handle.snapshot();
    assert_eq!(snapshot.track_id, Some(2));
    assert_eq!(snapshot.current_index, Some(1));
    assert!(snapshot.is_playing);
}

#[tokio::test]
async fn test_skip_to_last_entry_survives_track_ending() {
    let mut p = paused_player(vec![track(1, 60), track(2, 60)]).await;
    p.send(Command::PlayQueue {
        tracks: vec![1, 2],
        start_index: 0,
    })
    .await;
    p.wait_for_playing(true).await;
    sleep(Duration::from_secs(1)).await;

    p.send(Command::Seek(59_800)).await;
    p.send(Command::Next).await;
    p.wait_for_track(2).await;
    sleep(Duration::from_secs(3)).await;

    let snapshot = p.handle.snapshot();
    assert_eq!(snapshot.track_id, Some(2));
    assert_eq!(snapshot.phase, PlaybackPhase::Playing);
}

#[tokio::test]
async fn test_shuffle_round_trip_restores_order() {
    let tracks: Vec<_> = (1..=6).map(|id| track(id, 120)).collect();
    let mut p = player(tracks).await;
    p.send(Command::PlayQueue {
        tracks: vec![1, 2, 3, 4, 5, 6],
        start_index: 2,
    })
    .await;
    p.wait_for_track(3).await;

    p.send(Command::ToggleShuffle).await;
    let event = p
        .wait_for("ShuffleChanged", |e| {
            matches!(e, PlayerEvent::ShuffleChanged { shuffle: true, .. })
        })
        .await;
    if let PlayerEvent::ShuffleChanged { snapshot, .. } = event {
        assert_eq!(snapshot.queue[0], 3);
        assert_eq!(snapshot.current_index, Some(0));
        assert_eq!(snapshot.original_queue, vec![1, 2, 3, 4, 5, 6]);
    }

    p.send(Command::ToggleShuffle).await;
    p.wait_for("ShuffleChanged", |e| {
        matches!(e, PlayerEvent::ShuffleChanged { shuffle: false, .. })
    })
    .await;
    let snapshot = p.handle.snapshot();
    assert_eq!(snapshot.queue, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(snapshot.current_index, Some(2));
    assert_eq!(snapshot.track_id, Some(3));
}

#[tokio::test]
async fn test_invalid_commands_are_ignored() {
    let mut p = player(vec![track(1, 120)]).await;
    p.send(Command::PlayQueue {
        tracks: vec![],
        start_index: 0,
    })
    .await;
    p.send(Command::Enqueue(99)).await;
    p.send(Command::ResolveResumePrompt { resume: true }).await;
    p.send(Command::Seek(5000)).await;
    settle().await;

    let snapshot = p.handle.snapshot();
    assert!(snapshot.queue.is_empty());
    assert_eq!(snapshot.phase, PlaybackPhase::Idle);
    assert!(p
        .drain_events()
        .iter()
        .all(|e| !matches!(e, PlayerEvent::TrackChanged { .. })));
}

#[tokio::test]
async fn test_toggle_favorite_updates_snapshot() {
    let mut p = player(vec![track(1, 120)]).await;
    p.send(Command::Play(1)).await;
    p.wait_for_track(1).await;

    p.send(Command::ToggleFavorite(1)).await;
    p.wait_for("FavoriteChanged", |e| {
        matches!(e, PlayerEvent::FavoriteChanged { favorite: true, .. })
    })
    .await;
    assert!(p.handle.snapshot().favorite);
    assert!(p.library.is_favorite(1));
}

#[tokio::test]
async fn test_shutdown_rejects_commands_and_is_idempotent() {
    let mut p = player(vec![track(1, 120)]).await;
    p.send(Command::Play(1)).await;
    p.wait_for_playing(true).await;

    p.orchestrator.shutdown().await;
    p.orchestrator.shutdown().await;

    assert!(p.handle.send(Command::Next).await.is_err());
    assert!(!p.probe.play_when_ready());
}
