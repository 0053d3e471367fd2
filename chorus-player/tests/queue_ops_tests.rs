//! Queue operation tests
//!
//! Index arithmetic around the playing song, preload invalidation, the
//! finished-state reset on enqueue, the size cap, suffix-only shuffling,
//! and synchronous persistence of every mutation.

mod helpers;

use chorus_common::params::PARAMS;
use chorus_common::types::DeckId;
use chorus_player::error::Error;
use chorus_player::session::SessionState;
use helpers::{song, Harness, GUILD};
use std::sync::Once;

fn test_params() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        *PARAMS.barrier_min_throttle_ms.write().unwrap() = 0;
        *PARAMS.max_queue_size.write().unwrap() = 10;
    });
}

fn queued_state(urls: &[&str], play_index: usize) -> SessionState {
    let mut state = SessionState::default();
    state.songs = urls.iter().map(|u| song(u)).collect();
    state.play_index = play_index;
    state
}

fn urls(state: &SessionState) -> Vec<String> {
    state.songs.iter().map(|s| s.url.clone()).collect()
}

#[tokio::test]
async fn test_enqueue_appends_and_persists() {
    test_params();
    let harness = Harness::new().await;

    harness
        .player
        .enqueue(vec![song("a"), song("b"), song("c")])
        .await
        .unwrap();

    let state = harness.player.session().state.read().await;
    assert_eq!(urls(&state), vec!["a", "b", "c"]);
    drop(state);

    // Persisted synchronously before the call returned.
    let backup = harness.store.load_guild(GUILD).await.unwrap().unwrap();
    assert_eq!(backup.songs.len(), 3);
    assert_eq!(backup.songs[0].url, "a");

    assert!(harness.player.session().version.current() >= 1);
}

#[tokio::test]
async fn test_enqueue_respects_size_cap() {
    test_params();
    let harness = Harness::new().await;

    let max = *PARAMS.max_queue_size.read().unwrap();
    let batch: Vec<_> = (0..max).map(|i| song(&format!("u{i}"))).collect();
    harness.player.enqueue(batch).await.unwrap();

    let result = harness.player.enqueue(vec![song("overflow")]).await;
    assert!(matches!(result, Err(Error::Queue(_))));

    let state = harness.player.session().state.read().await;
    assert_eq!(state.songs.len(), max);
}

#[tokio::test]
async fn test_insert_before_playing_shifts_index() {
    test_params();
    let harness = Harness::with_state(queued_state(&["a", "b", "c"], 1)).await;

    harness.player.insert_at(song("new"), 0).await.unwrap();

    let state = harness.player.session().state.read().await;
    assert_eq!(urls(&state), vec!["new", "a", "b", "c"]);
    assert_eq!(state.play_index, 2, "playing entry keeps pointing at b");
}

#[tokio::test]
async fn test_insert_after_playing_keeps_index() {
    test_params();
    let harness = Harness::with_state(queued_state(&["a", "b", "c"], 1)).await;

    harness.player.insert_at(song("new"), 2).await.unwrap();

    let state = harness.player.session().state.read().await;
    assert_eq!(urls(&state), vec!["a", "b", "new", "c"]);
    assert_eq!(state.play_index, 1);
}

#[tokio::test]
async fn test_insert_bounds_checked() {
    test_params();
    let harness = Harness::with_state(queued_state(&["a"], 0)).await;

    assert!(harness.player.insert_at(song("x"), 1).await.is_ok());
    let result = harness.player.insert_at(song("y"), 5).await;
    assert!(matches!(result, Err(Error::Queue(_))));
}

#[tokio::test]
async fn test_remove_before_playing_shifts_index() {
    test_params();
    let harness = Harness::with_state(queued_state(&["a", "b", "c"], 2)).await;

    let removed = harness.player.remove_at(0).await.unwrap();
    assert_eq!(removed.url, "a");

    let state = harness.player.session().state.read().await;
    assert_eq!(urls(&state), vec!["b", "c"]);
    assert_eq!(state.play_index, 1, "still pointing at c");
}

#[tokio::test]
async fn test_remove_playing_clamps_to_last() {
    test_params();
    let harness = Harness::with_state(queued_state(&["a", "b", "c"], 2)).await;

    harness.player.remove_at(2).await.unwrap();

    let state = harness.player.session().state.read().await;
    assert_eq!(urls(&state), vec!["a", "b"]);
    assert_eq!(state.play_index, 1, "clamped to the last index");
}

#[tokio::test]
async fn test_remove_invalidates_matching_preload() {
    test_params();
    let mut preset = queued_state(&["a", "b"], 0);
    preset.next_deck_loaded = Some("b".into());
    preset.next_deck_target = Some(DeckId::B);
    preset.buffer_ready[DeckId::B.index()] = true;
    let harness = Harness::with_state(preset).await;

    harness.player.remove_at(1).await.unwrap();

    let state = harness.player.session().state.read().await;
    assert!(state.next_deck_loaded.is_none());
    assert!(state.next_deck_target.is_none());
    assert!(!state.buffer_ready[DeckId::B.index()]);
}

#[tokio::test]
async fn test_remove_unrelated_keeps_preload() {
    test_params();
    let mut preset = queued_state(&["a", "b", "c"], 0);
    preset.next_deck_loaded = Some("b".into());
    preset.next_deck_target = Some(DeckId::B);
    let harness = Harness::with_state(preset).await;

    harness.player.remove_at(2).await.unwrap();

    let state = harness.player.session().state.read().await;
    assert_eq!(state.next_deck_loaded.as_deref(), Some("b"));
}

#[tokio::test]
async fn test_shuffle_touches_only_upcoming() {
    test_params();
    let harness =
        Harness::with_state(queued_state(&["a", "b", "c", "d", "e", "f"], 1)).await;

    harness.player.shuffle().await.unwrap();

    let state = harness.player.session().state.read().await;
    let after = urls(&state);
    assert_eq!(&after[..2], &["a", "b"], "played prefix untouched");
    assert_eq!(state.play_index, 1);

    let mut tail: Vec<_> = after[2..].to_vec();
    tail.sort();
    assert_eq!(tail, vec!["c", "d", "e", "f"], "tail is a permutation");
    assert!(state.next_deck_loaded.is_none());
}

#[tokio::test]
async fn test_clear_queue_except_current() {
    test_params();
    let harness = Harness::with_state(queued_state(&["a", "b", "c"], 1)).await;

    harness.player.clear_queue_except_current().await.unwrap();

    let state = harness.player.session().state.read().await;
    assert_eq!(urls(&state), vec!["b"]);
    assert_eq!(state.play_index, 0);
}

#[tokio::test]
async fn test_enqueue_resets_finished_queue() {
    test_params();
    let mut preset = queued_state(&["last"], 0);
    preset.push_history(song("last"));
    // Finished state: nothing loaded, only the historical last track.
    let harness = Harness::with_state(preset).await;

    harness
        .player
        .enqueue(vec![song("fresh1"), song("fresh2")])
        .await
        .unwrap();

    let state = harness.player.session().state.read().await;
    assert_eq!(urls(&state), vec!["fresh1", "fresh2"]);
    assert_eq!(state.play_index, 0);
}

#[tokio::test]
async fn test_mutations_rejected_during_transition() {
    test_params();
    let harness = Harness::with_state(queued_state(&["a", "b"], 0)).await;

    let session = harness.player.session().clone();
    let _guard = session
        .locks
        .try_acquire(&session.skip_lock_name(), std::time::Duration::from_secs(30))
        .unwrap();

    assert!(matches!(
        harness.player.enqueue(vec![song("x")]).await,
        Err(Error::SkipInProgress)
    ));
    assert!(matches!(
        harness.player.remove_at(1).await,
        Err(Error::SkipInProgress)
    ));
}

#[tokio::test]
async fn test_versions_bump_per_mutation() {
    test_params();
    let harness = Harness::new().await;
    let version = &harness.player.session().version;
    let v0 = version.current();

    harness.player.enqueue(vec![song("a")]).await.unwrap();
    let v1 = version.current();
    assert!(v1 > v0);

    harness.player.insert_at(song("b"), 1).await.unwrap();
    let v2 = version.current();
    assert!(v2 > v1);

    harness.player.remove_at(1).await.unwrap();
    assert!(version.current() > v2);
}
