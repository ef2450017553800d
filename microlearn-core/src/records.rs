use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::lesson::{Lesson, LessonId, QuizOutcome};

/// Well-known key of the single "latest" progress snapshot.
pub const CURRENT_PROGRESS_KEY: &str = "current-progress";

/// The four persisted collections. Names are part of the on-disk contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Lessons,
    Progress,
    QuizResults,
    UserData,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Lessons,
        Collection::Progress,
        Collection::QuizResults,
        Collection::UserData,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Lessons => "lessons",
            Collection::Progress => "progress",
            Collection::QuizResults => "quizResults",
            Collection::UserData => "userData",
        }
    }

    /// Field holding each record's primary key.
    pub fn key_path(self) -> &'static str {
        match self {
            Collection::UserData => "key",
            _ => "id",
        }
    }

    /// Whether a missing key is assigned from a per-collection counter.
    pub fn auto_increment(self) -> bool {
        matches!(self, Collection::Progress | Collection::QuizResults)
    }

    /// Field maintained as a non-unique secondary index.
    pub fn index_field(self) -> Option<&'static str> {
        match self {
            Collection::QuizResults => Some("lessonId"),
            _ => None,
        }
    }
}

/// A value stored in one statically known collection.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;
}

impl Record for Lesson {
    const COLLECTION: Collection = Collection::Lessons;
}

/// Progress as reported by the portal, before it is stamped and stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub completed_lessons: Vec<LessonId>,
    pub progress: u8,
}

impl ProgressSnapshot {
    /// A snapshot that gets an auto-assigned key when saved.
    pub fn new(completed_lessons: Vec<LessonId>, progress: u8) -> Self {
        Self {
            id: None,
            completed_lessons,
            progress,
        }
    }

    /// A snapshot stored under [`CURRENT_PROGRESS_KEY`].
    pub fn current(completed_lessons: Vec<LessonId>, progress: u8) -> Self {
        Self {
            id: Some(CURRENT_PROGRESS_KEY.to_owned()),
            completed_lessons,
            progress,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub completed_lessons: Vec<LessonId>,
    pub progress: u8,
    pub timestamp: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn stamp(snapshot: ProgressSnapshot) -> Self {
        Self {
            id: snapshot.id,
            completed_lessons: snapshot.completed_lessons,
            progress: snapshot.progress,
            timestamp: Utc::now(),
        }
    }
}

impl Record for ProgressRecord {
    const COLLECTION: Collection = Collection::Progress;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizResultRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub lesson_id: LessonId,
    pub result: QuizOutcome,
    pub timestamp: DateTime<Utc>,
}

impl Record for QuizResultRecord {
    const COLLECTION: Collection = Collection::QuizResults;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserDataRecord {
    pub key: String,
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Record for UserDataRecord {
    const COLLECTION: Collection = Collection::UserData;
}
