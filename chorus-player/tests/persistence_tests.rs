//! Persistence round-trip tests
//!
//! Saving and reloading a session must reproduce the queue, history, playing
//! index, and toggles, while the loaded deck never survives a restart.

mod helpers;

use chorus_common::params::PARAMS;
use chorus_player::mixer::MixerLink;
use chorus_player::session::SessionState;
use helpers::{song, Harness, GUILD};
use std::sync::Once;
use std::time::Duration;

fn test_params() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        *PARAMS.barrier_min_throttle_ms.write().unwrap() = 0;
        *PARAMS.initial_play_gap_ms.write().unwrap() = 10;
        *PARAMS.preload_delay_ms.write().unwrap() = 40;
    });
}

#[tokio::test]
async fn test_playing_session_round_trips() {
    test_params();
    let harness = Harness::playing(&["x", "y", "z"]).await;
    harness.player.set_loop(true).await.unwrap();
    harness.player.set_fade(true).await.unwrap();

    let backup = harness.store.load_guild(GUILD).await.unwrap().unwrap();
    assert_eq!(backup.songs.len(), 3);
    assert_eq!(backup.play_index, 0);
    assert!(backup.loop_enabled);
    assert!(backup.fade_enabled);
    assert_eq!(backup.current_deck_loaded.as_deref(), Some("x"));

    let restored = SessionState::restore(backup);
    assert_eq!(restored.songs.len(), 3);
    assert_eq!(restored.play_index, 0);
    assert!(restored.loop_enabled);
    assert!(restored.fade_enabled);
    assert!(restored.session_restored);
    // Restart rule: nothing is loaded until playback begins again.
    assert!(restored.current_deck_loaded.is_none());
    assert!(restored.next_deck_loaded.is_none());
    assert!(!restored.buffer_ready.iter().any(|b| *b));
}

#[tokio::test]
async fn test_dashboard_ids_survive_round_trip() {
    test_params();
    let harness = Harness::new().await;
    {
        let mut state = harness.player.session().state.write().await;
        state.dashboard_message_id = Some("msg-1".into());
        state.text_channel_id = Some("chan-2".into());
    }
    harness.player.enqueue(vec![song("a")]).await.unwrap();

    let backup = harness.store.load_guild(GUILD).await.unwrap().unwrap();
    assert_eq!(backup.dashboard_message_id.as_deref(), Some("msg-1"));
    assert_eq!(backup.text_channel_id.as_deref(), Some("chan-2"));

    let restored = SessionState::restore(backup);
    assert_eq!(restored.dashboard_message_id.as_deref(), Some("msg-1"));
    assert_eq!(restored.text_channel_id.as_deref(), Some("chan-2"));
}

#[tokio::test]
async fn test_queue_end_persists_finished_state() {
    test_params();
    let harness = Harness::playing(&["only"]).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    harness.player.skip().await.unwrap();

    let backup = harness.store.load_guild(GUILD).await.unwrap().unwrap();
    assert_eq!(backup.songs.len(), 1);
    assert_eq!(backup.songs[0].url, "only");
    assert_eq!(backup.play_index, 0);
    assert!(backup.current_deck_loaded.is_none());
    assert_eq!(backup.history.last().unwrap().url, "only");
}

#[tokio::test]
async fn test_restored_session_resumes_via_pause_toggle() {
    test_params();
    // First life: play and persist.
    let first = Harness::playing(&["x", "y"]).await;
    let backup = first.store.load_guild(GUILD).await.unwrap().unwrap();

    // Second life: restore into a fresh harness (new stores, no mixer).
    let second = Harness::with_state(SessionState::restore(backup)).await;
    {
        let state = second.player.session().state.read().await;
        assert!(state.session_restored);
        assert!(state.current_deck_loaded.is_none());
    }

    // The play/pause button starts playback again from the stored index.
    second.player.toggle_pause().await.unwrap();
    let state = second.player.session().state.read().await;
    assert!(!state.session_restored);
    assert_eq!(state.current_deck_loaded.as_deref(), Some("x"));
    drop(state);
    assert_eq!(second.factory.spawn_count(), 1);
    assert_eq!(
        second.gateway.connect_calls.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_teardown_snapshots_queue() {
    test_params();
    let harness = Harness::playing(&["x", "y"]).await;

    harness.player.teardown("shutdown").await;

    let backup = harness.store.load_guild(GUILD).await.unwrap().unwrap();
    assert_eq!(backup.songs.len(), 2);
    assert!(!harness.mixer().is_alive(), "mixer stopped on teardown");
}
