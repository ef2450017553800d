use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use microlearn_core::catalog::builtin_lessons;
use microlearn_core::sync::{SessionSnapshot, SESSION_KEY, USER_KEY};
use microlearn_core::{
    ApiError, Connectivity, LessonApi, LessonSource, LessonSync, LocalCache, MockLessonApi,
    ProgressSnapshot, StateStore, StateUpdate, SyncError, SyncEvent, UserProfile,
};
use tokio::sync::mpsc;

struct Harness {
    sync: Arc<LessonSync>,
    api: Arc<MockLessonApi>,
    cache: LocalCache,
    events: mpsc::Receiver<SyncEvent>,
}

fn harness(cache: LocalCache, api: MockLessonApi, online: bool) -> Harness {
    let api = Arc::new(api);
    let dyn_api: Arc<dyn LessonApi> = api.clone();
    let (tx, events) = mpsc::channel(64);
    let sync = LessonSync::new(
        cache.clone(),
        dyn_api,
        StateStore::default(),
        Connectivity::new(online),
        tx,
    );
    Harness {
        sync: Arc::new(sync),
        api,
        cache,
        events,
    }
}

fn drain(events: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

async fn next_event(events: &mut mpsc::Receiver<SyncEvent>) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

async fn cache_with_lessons(count: usize) -> LocalCache {
    let cache = LocalCache::in_memory();
    cache.save_lessons(&builtin_lessons()[..count]).await.unwrap();
    cache
}

#[tokio::test]
async fn cached_lessons_publish_first_then_network_replaces_them() {
    let cache = LocalCache::in_memory();
    cache.save_lessons(&builtin_lessons()[5..8]).await.unwrap();
    let api = MockLessonApi::with_lessons(builtin_lessons()[..5].to_vec());
    let mut h = harness(cache, api, true);

    let source = h.sync.startup().await.unwrap();

    assert_eq!(source, Some(LessonSource::Network));
    assert_eq!(
        drain(&mut h.events),
        vec![
            SyncEvent::LessonsLoaded {
                source: LessonSource::Cache,
                count: 3
            },
            SyncEvent::LessonsLoaded {
                source: LessonSource::Network,
                count: 5
            },
        ]
    );
    let ids: Vec<u32> = h.sync.store().select(|s| s.lessons.iter().map(|l| l.id).collect());
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    let cached: Vec<u32> = h.cache.get_lessons().await.unwrap().iter().map(|l| l.id).collect();
    for id in 1..=5 {
        assert!(cached.contains(&id), "lesson {id} missing from cache");
    }
}

#[tokio::test]
async fn unreadable_cache_is_reported_and_startup_continues() {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "microlearn_sync_corrupt_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(dir.join("lessons.json"), b"{ \"records\": {")
        .await
        .unwrap();
    let mut h = harness(LocalCache::open_dir(&dir), MockLessonApi::new(), true);

    let source = h.sync.startup().await.unwrap();

    assert_eq!(source, Some(LessonSource::Network));
    let events = drain(&mut h.events);
    assert!(matches!(
        events.first(),
        Some(SyncEvent::CacheFailed(message)) if message.contains("lessons")
    ));
    assert_eq!(h.cache.get_lessons().await.unwrap().len(), 8);

    let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
    let mut preserved = false;
    while let Some(entry) = entries.next_entry().await.unwrap() {
        preserved |= entry
            .file_name()
            .to_string_lossy()
            .starts_with("lessons.json.corrupt-");
    }
    assert!(preserved);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn offline_startup_serves_cache_without_network_calls() {
    let cache = cache_with_lessons(4).await;
    let mut h = harness(cache, MockLessonApi::new(), false);

    let source = h.sync.startup().await.unwrap();

    assert_eq!(source, Some(LessonSource::Cache));
    assert_eq!(h.api.calls(), 0);
    assert_eq!(h.sync.store().select(|s| s.lessons.len()), 4);
    assert!(!drain(&mut h.events)
        .iter()
        .any(|event| matches!(event, SyncEvent::LoadFailed(_))));
}

#[tokio::test]
async fn offline_startup_with_empty_cache_has_no_lessons() {
    let h = harness(LocalCache::in_memory(), MockLessonApi::new(), false);

    assert_eq!(h.sync.startup().await.unwrap(), None);
    assert_eq!(h.api.calls(), 0);
}

#[tokio::test]
async fn network_failure_keeps_cached_lessons_silently() {
    let cache = cache_with_lessons(2).await;
    let api = MockLessonApi::new();
    api.fail_with(ApiError::network("connection refused"));
    let mut h = harness(cache, api, true);

    let source = h.sync.startup().await.unwrap();

    assert_eq!(source, Some(LessonSource::Cache));
    assert_eq!(h.sync.store().select(|s| s.lessons.len()), 2);
    assert!(!drain(&mut h.events)
        .iter()
        .any(|event| matches!(event, SyncEvent::LoadFailed(_))));
}

#[tokio::test]
async fn network_failure_without_cache_reports_load_failure() {
    let api = MockLessonApi::new();
    api.fail_with(ApiError::new("HTTP error! status: 503", 503, "Service Unavailable"));
    let mut h = harness(LocalCache::in_memory(), api, true);

    let err = h.sync.startup().await.unwrap_err();

    assert!(matches!(err, SyncError::NoLessons(ref e) if e.status == 503));
    assert!(drain(&mut h.events)
        .iter()
        .any(|event| matches!(event, SyncEvent::LoadFailed(e) if e.status == 503)));
}

#[tokio::test]
async fn startup_works_without_persistent_storage() {
    let mut h = harness(LocalCache::unsupported(), MockLessonApi::new(), true);

    let source = h.sync.startup().await.unwrap();

    assert_eq!(source, Some(LessonSource::Network));
    assert_eq!(h.sync.store().select(|s| s.lessons.len()), 8);
    assert!(!drain(&mut h.events)
        .iter()
        .any(|event| matches!(event, SyncEvent::CacheFailed(_))));
}

#[tokio::test]
async fn completing_twice_counts_once() {
    let mut h = harness(LocalCache::in_memory(), MockLessonApi::new(), true);
    h.sync.startup().await.unwrap();

    let first = h.sync.complete_lesson(1).await;
    let second = h.sync.complete_lesson(1).await;

    assert!(first.newly_completed);
    assert_eq!(first.progress, 13);
    assert!(!second.newly_completed);
    assert!(second.remote.is_none());
    first.remote.expect("remote report").await.unwrap().unwrap();

    let state = h.sync.store().get_state();
    assert_eq!(state.completed_lessons, vec![1]);
    assert_eq!(state.progress, 13);

    let cached = h.cache.current_progress().await.unwrap().unwrap();
    assert_eq!(cached.completed_lessons, vec![1]);
    assert!(!drain(&mut h.events)
        .iter()
        .any(|event| matches!(event, SyncEvent::RemoteSyncFailed(_))));
}

#[tokio::test]
async fn remote_failure_does_not_roll_back_completion() {
    let mut h = harness(LocalCache::in_memory(), MockLessonApi::new(), true);
    h.sync.startup().await.unwrap();
    h.api.fail_with(ApiError::new("HTTP error! status: 500", 500, "Internal Server Error"));

    let completion = h.sync.complete_lesson(4).await;
    let remote = completion.remote.expect("remote report").await.unwrap();

    assert!(remote.is_err());
    assert_eq!(h.sync.store().select(|s| s.completed_lessons.clone()), vec![4]);
    assert_eq!(
        h.cache.current_progress().await.unwrap().map(|p| p.completed_lessons),
        Some(vec![4])
    );
    assert!(drain(&mut h.events)
        .iter()
        .any(|event| matches!(event, SyncEvent::RemoteSyncFailed(e) if e.status == 500)));
}

#[tokio::test]
async fn offline_completion_stays_local() {
    let cache = cache_with_lessons(4).await;
    let h = harness(cache, MockLessonApi::new(), false);
    h.sync.startup().await.unwrap();

    let completion = h.sync.complete_lesson(2).await;

    assert!(completion.newly_completed);
    assert_eq!(completion.progress, 25);
    assert!(completion.remote.is_none());
    assert_eq!(h.api.calls(), 0);
}

#[tokio::test]
async fn progress_is_zero_without_known_lessons() {
    let h = harness(LocalCache::in_memory(), MockLessonApi::new(), false);

    let completion = h.sync.complete_lesson(1).await;

    assert!(completion.newly_completed);
    assert_eq!(completion.progress, 0);
}

#[tokio::test]
async fn reconnect_refreshes_and_disconnect_is_reported() {
    let cache = cache_with_lessons(2).await;
    let mut h = harness(cache, MockLessonApi::new(), false);
    h.sync.startup().await.unwrap();
    drain(&mut h.events);
    let watcher = h.sync.watch_connectivity();

    assert!(h.sync.connectivity().set_online(true));
    assert_eq!(next_event(&mut h.events).await, SyncEvent::Online);
    assert_eq!(
        next_event(&mut h.events).await,
        SyncEvent::LessonsLoaded {
            source: LessonSource::Network,
            count: 8
        }
    );

    assert!(h.sync.connectivity().set_online(false));
    assert_eq!(next_event(&mut h.events).await, SyncEvent::Offline);
    assert_eq!(h.sync.store().select(|s| s.lessons.len()), 8);

    watcher.stop().await.unwrap();
    assert!(!h.sync.connectivity().set_online(false));
}

#[tokio::test]
async fn quiz_submission_records_answers_and_history() {
    let h = harness(LocalCache::in_memory(), MockLessonApi::new(), true);
    h.sync.startup().await.unwrap();

    let outcome = h.sync.submit_quiz(1, &[1, 1]).await.unwrap();

    assert_eq!(outcome.score, 2);
    assert!(outcome.passed);
    let answers = h.sync.store().select(|s| s.quiz_answers.clone());
    assert_eq!(answers.get("1-0").map(String::as_str), Some("1"));
    assert_eq!(answers.get("1-1").map(String::as_str), Some("1"));
    assert_eq!(h.cache.get_quiz_results_by_lesson(1).await.unwrap().len(), 1);

    let missing = h.sync.submit_quiz(99, &[0]).await.unwrap_err();
    assert!(matches!(missing, SyncError::Api(ref e) if e.is_not_found()));
}

#[tokio::test]
async fn quiz_submission_requires_connection() {
    let h = harness(LocalCache::in_memory(), MockLessonApi::new(), false);

    let err = h.sync.submit_quiz(1, &[1]).await.unwrap_err();

    assert!(matches!(err, SyncError::Offline));
    assert_eq!(h.api.calls(), 0);
}

#[tokio::test]
async fn lesson_lookup_prefers_state_then_network() {
    let cache = cache_with_lessons(2).await;
    let h = harness(cache, MockLessonApi::new(), false);
    h.sync.startup().await.unwrap();

    assert_eq!(h.sync.lesson(2).await.unwrap().id, 2);
    let offline = h.sync.lesson(7).await.unwrap_err();
    assert!(!offline.is_not_found());

    h.sync.connectivity().set_online(true);
    assert_eq!(h.sync.lesson(7).await.unwrap().id, 7);
    assert!(h.sync.lesson(42).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn offline_search_filters_published_lessons() {
    let cache = cache_with_lessons(8).await;
    let h = harness(cache, MockLessonApi::new(), false);
    h.sync.startup().await.unwrap();

    let found = h.sync.search("  Intermediate ").await.unwrap();

    assert!(!found.is_empty());
    assert!(found.iter().all(|lesson| lesson.matches("intermediate")));
    assert_eq!(h.api.calls(), 0);
}

#[tokio::test]
async fn local_state_is_restored_on_startup() {
    let cache = LocalCache::in_memory();
    cache
        .save_progress(ProgressSnapshot::current(vec![1, 2], 25))
        .await
        .unwrap();
    let user = UserProfile {
        name: "Grace".into(),
        enrolled: true,
    };
    cache.save_user_data(USER_KEY, &user).await.unwrap();
    let session = SessionSnapshot {
        current_lesson: Some(2),
        quiz_answers: BTreeMap::from([("2-0".to_string(), "0".to_string())]),
        current_route: "/lesson/2".into(),
    };
    cache.save_user_data(SESSION_KEY, &session).await.unwrap();

    let h = harness(cache, MockLessonApi::new(), false);
    h.sync.startup().await.unwrap();

    let state = h.sync.store().get_state();
    assert_eq!(state.completed_lessons, vec![1, 2]);
    assert_eq!(state.progress, 25);
    assert_eq!(state.user, user);
    assert_eq!(state.current_lesson, Some(2));
    assert_eq!(state.quiz_answers, session.quiz_answers);
}

#[tokio::test]
async fn session_changes_are_persisted() {
    let h = harness(LocalCache::in_memory(), MockLessonApi::new(), false);
    let subscription = h.sync.persist_session();

    h.sync
        .store()
        .set_state(StateUpdate::new().current_lesson(Some(3)));

    let mut saved = None;
    for _ in 0..50 {
        saved = h
            .cache
            .get_user_data::<SessionSnapshot>(SESSION_KEY)
            .await
            .unwrap();
        if saved.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(saved.and_then(|s| s.current_lesson), Some(3));

    subscription.unsubscribe();
    assert!(h.sync.store().subscriber_ids().is_empty());
}

#[tokio::test]
async fn rapid_session_changes_leave_the_latest_snapshot() {
    let h = harness(LocalCache::in_memory(), MockLessonApi::new(), false);
    let subscription = h.sync.persist_session();

    for lesson in 1..=20 {
        h.sync
            .store()
            .set_state(StateUpdate::new().current_lesson(Some(lesson)));
    }

    let mut saved = None;
    for _ in 0..100 {
        saved = h
            .cache
            .get_user_data::<SessionSnapshot>(SESSION_KEY)
            .await
            .unwrap()
            .and_then(|s| s.current_lesson);
        if saved == Some(20) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(saved, Some(20));

    // nothing older lands afterwards, and the writer stops with the subscription
    subscription.unsubscribe();
    h.sync
        .store()
        .set_state(StateUpdate::new().current_lesson(Some(99)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stored = h
        .cache
        .get_user_data::<SessionSnapshot>(SESSION_KEY)
        .await
        .unwrap();
    assert_eq!(stored.and_then(|s| s.current_lesson), Some(20));
}

#[tokio::test]
async fn saved_user_survives_in_cache() {
    let h = harness(LocalCache::in_memory(), MockLessonApi::new(), false);
    let user = UserProfile {
        name: "Linus".into(),
        enrolled: false,
    };

    h.sync.save_user(user.clone()).await;

    assert_eq!(h.sync.store().select(|s| s.user.clone()), user);
    assert_eq!(
        h.cache.get_user_data::<UserProfile>(USER_KEY).await.unwrap(),
        Some(user)
    );
}
