pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod lesson;
pub mod records;
pub mod router;
pub mod state;
pub mod sync;
pub mod validation;

pub use api::{ApiResponse, HttpLessonApi, LessonApi, MockLessonApi, ProgressReceipt};
pub use cache::LocalCache;
pub use config::{ApiConfig, ApiMode, PortalConfig};
pub use error::{ApiError, CacheError, ConfigError, SubscriberError, SyncError};
pub use lesson::{Difficulty, Lesson, LessonId, QuizOutcome, QuizQuestion};
pub use records::{
    Collection, ProgressRecord, ProgressSnapshot, QuizResultRecord, Record, UserDataRecord,
    CURRENT_PROGRESS_KEY,
};
pub use router::{HashLocation, Location, Resolution, RouteParams, Router};
pub use state::{
    ApplicationState, StateKey, StateStore, StateUpdate, StateValue, Subscriber, Subscription,
    UserProfile,
};
pub use sync::{Completion, Connectivity, ConnectivityWatcher, LessonSource, LessonSync, SyncEvent};
