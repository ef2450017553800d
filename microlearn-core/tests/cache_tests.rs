use std::path::PathBuf;

use microlearn_core::catalog::builtin_lessons;
use microlearn_core::{
    CacheError, Lesson, LocalCache, ProgressRecord, ProgressSnapshot, QuizResultRecord,
    UserProfile,
};

fn temp_db_dir(tag: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "microlearn_{tag}_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    dir
}

#[tokio::test]
async fn init_creates_collections_and_is_idempotent() {
    let dir = temp_db_dir("init");
    let cache = LocalCache::open_dir(&dir);

    assert!(cache.init().await.unwrap());
    assert!(cache.init().await.unwrap());

    for name in ["lessons", "progress", "quizResults", "userData"] {
        assert!(dir.join(format!("{name}.json")).exists(), "{name} should exist");
    }

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn unsupported_environment_reports_false_and_rejects_operations() {
    let cache = LocalCache::unsupported();

    assert!(!cache.is_supported());
    assert!(!cache.init().await.unwrap());
    assert!(matches!(
        cache.get_lessons().await,
        Err(CacheError::Unsupported)
    ));
    assert!(matches!(
        cache.save_user_data("user", &UserProfile::default()).await,
        Err(CacheError::Unsupported)
    ));
}

#[tokio::test]
async fn lessons_upsert_and_survive_reopen() {
    let dir = temp_db_dir("reopen");
    let lessons = builtin_lessons();
    {
        let cache = LocalCache::open_dir(&dir);
        assert_eq!(cache.save_lessons(&lessons[..3]).await.unwrap(), 3);
        assert_eq!(cache.save_lessons(&lessons[1..5]).await.unwrap(), 4);
    }

    let cache = LocalCache::open_dir(&dir);
    let mut stored = cache.get_lessons().await.unwrap();
    stored.sort_by_key(|lesson| lesson.id);
    assert_eq!(stored, lessons[..5].to_vec());

    let second: Option<Lesson> = cache.get(2).await.unwrap();
    assert_eq!(second.map(|l| l.title), Some(lessons[1].title.clone()));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn add_rejects_existing_key_and_put_overwrites() {
    let cache = LocalCache::in_memory();
    let mut lesson = builtin_lessons().remove(0);

    cache.add(&lesson).await.unwrap();
    let err = cache.add(&lesson).await.unwrap_err();
    assert!(matches!(err, CacheError::KeyExists { collection: "lessons", .. }));

    lesson.title = "Renamed".into();
    assert_eq!(cache.put(&lesson).await.unwrap(), "1");
    let stored: Lesson = cache.get(1).await.unwrap().unwrap();
    assert_eq!(stored.title, "Renamed");

    assert!(cache.delete::<Lesson>(1).await.unwrap());
    assert!(!cache.delete::<Lesson>(1).await.unwrap());
}

#[tokio::test]
async fn saved_progress_reads_back() {
    let dir = temp_db_dir("progress");
    let cache = LocalCache::open_dir(&dir);

    cache
        .save_progress(ProgressSnapshot::new(vec![1, 2], 20))
        .await
        .unwrap();

    let records = cache.get_progress().await.unwrap();
    assert!(records
        .iter()
        .any(|record| record.completed_lessons == vec![1, 2] && record.progress == 20));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn progress_keeps_current_snapshot_and_history() {
    let cache = LocalCache::in_memory();

    let first = cache
        .save_progress(ProgressSnapshot::new(vec![1], 13))
        .await
        .unwrap();
    let second = cache
        .save_progress(ProgressSnapshot::new(vec![1, 2], 25))
        .await
        .unwrap();
    assert_ne!(first, second);

    cache
        .save_progress(ProgressSnapshot::current(vec![1, 2], 25))
        .await
        .unwrap();
    cache
        .save_progress(ProgressSnapshot::current(vec![1, 2, 3], 38))
        .await
        .unwrap();

    let current = cache.current_progress().await.unwrap().unwrap();
    assert_eq!(current.completed_lessons, vec![1, 2, 3]);
    assert_eq!(current.progress, 38);

    let all: Vec<ProgressRecord> = cache.get_progress().await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn quiz_results_are_found_by_lesson() {
    let cache = LocalCache::in_memory();
    let lessons = builtin_lessons();

    cache.save_quiz_result(1, lessons[0].grade(&[1, 1])).await.unwrap();
    cache.save_quiz_result(1, lessons[0].grade(&[0, 0])).await.unwrap();
    cache.save_quiz_result(2, lessons[1].grade(&[0])).await.unwrap();

    let for_first: Vec<QuizResultRecord> = cache.get_quiz_results_by_lesson(1).await.unwrap();
    assert_eq!(for_first.len(), 2);
    assert!(for_first.iter().all(|record| record.lesson_id == 1));
    assert!(for_first.iter().any(|record| record.result.passed));

    assert_eq!(cache.get_quiz_results_by_lesson(2).await.unwrap().len(), 1);
    assert!(cache.get_quiz_results_by_lesson(9).await.unwrap().is_empty());
}

#[tokio::test]
async fn user_data_returns_value_only() {
    let cache = LocalCache::in_memory();
    let profile = UserProfile {
        name: "Ada".into(),
        enrolled: true,
    };

    cache.save_user_data("user", &profile).await.unwrap();
    cache.save_user_data("theme", "dark").await.unwrap();

    assert_eq!(
        cache.get_user_data::<UserProfile>("user").await.unwrap(),
        Some(profile)
    );
    assert_eq!(
        cache.get_user_data::<String>("theme").await.unwrap().as_deref(),
        Some("dark")
    );
    assert_eq!(cache.get_user_data::<String>("missing").await.unwrap(), None);
}

#[tokio::test]
async fn clear_empties_one_collection() {
    let cache = LocalCache::in_memory();
    cache.save_lessons(&builtin_lessons()).await.unwrap();
    cache.save_user_data("user", &UserProfile::default()).await.unwrap();

    cache.clear::<Lesson>().await.unwrap();

    assert!(cache.get_lessons().await.unwrap().is_empty());
    assert!(cache
        .get_user_data::<UserProfile>("user")
        .await
        .unwrap()
        .is_some());
}
