use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::LessonApi;
use crate::cache::LocalCache;
use crate::error::{ApiError, CacheError, SyncError};
use crate::lesson::{percentage_of, sort_by_id, Lesson, LessonId, QuizOutcome};
use crate::records::ProgressSnapshot;
use crate::state::{ApplicationState, StateStore, StateUpdate, Subscription, UserProfile};

pub const SESSION_KEY: &str = "session";
pub const USER_KEY: &str = "user";
pub const SESSION_SUBSCRIBER: &str = "session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonSource {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    LessonsLoaded { source: LessonSource, count: usize },
    Online,
    /// Running from cached data only.
    Offline,
    /// No lessons could be loaded from anywhere.
    LoadFailed(ApiError),
    CacheFailed(String),
    RemoteSyncFailed(ApiError),
}

/// Shared online/offline flag. Watchers only see real transitions.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[derive(Debug)]
pub struct Completion {
    pub newly_completed: bool,
    pub progress: u8,
    /// Remote report, if one was started. Dropping it leaves it running.
    pub remote: Option<JoinHandle<Result<(), ApiError>>>,
}

/// What the portal remembers about the last session besides progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub current_lesson: Option<LessonId>,
    pub quiz_answers: BTreeMap<String, String>,
    pub current_route: String,
}

impl SessionSnapshot {
    fn of(state: &ApplicationState) -> Self {
        Self {
            current_lesson: state.current_lesson,
            quiz_answers: state.quiz_answers.clone(),
            current_route: state.current_route.clone(),
        }
    }
}

pub struct ConnectivityWatcher {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl ConnectivityWatcher {
    pub async fn stop(self) -> Result<(), SyncError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(SyncError::from)
    }
}

pub struct LessonSync {
    cache: LocalCache,
    api: Arc<dyn LessonApi>,
    store: StateStore,
    connectivity: Connectivity,
    events: mpsc::Sender<SyncEvent>,
}

impl LessonSync {
    pub fn new(
        cache: LocalCache,
        api: Arc<dyn LessonApi>,
        store: StateStore,
        connectivity: Connectivity,
        events: mpsc::Sender<SyncEvent>,
    ) -> Self {
        Self {
            cache,
            api,
            store,
            connectivity,
            events,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    async fn emit(&self, event: SyncEvent) {
        if self.events.send(event).await.is_err() {
            debug!("sync event receiver dropped");
        }
    }

    async fn report_cache_failure(&self, context: &str, err: CacheError) {
        if matches!(err, CacheError::Unsupported) {
            debug!(context, "local cache unsupported, skipping");
            return;
        }
        warn!(context, error = %err, "local cache operation failed");
        self.emit(SyncEvent::CacheFailed(format!("{context}: {err}")))
            .await;
    }

    /// Startup sequence: open the cache, restore local state, publish cached
    /// lessons, then refresh from the network when online.
    ///
    /// Returns where the published lessons came from, or `None` when there are
    /// none yet (offline with an empty cache). Fails only when the network was
    /// tried and nothing at all is available.
    pub async fn startup(&self) -> Result<Option<LessonSource>, SyncError> {
        match self.cache.init().await {
            Ok(true) => {}
            Ok(false) => info!("local cache unsupported, lessons come from the network only"),
            Err(e) => self.report_cache_failure("open", e).await,
        }

        self.restore_local_state().await;

        let mut source = None;
        match self.cache.get_lessons().await {
            Ok(mut cached) if !cached.is_empty() => {
                sort_by_id(&mut cached);
                let count = cached.len();
                self.store.set_state(StateUpdate::new().lessons(cached));
                info!(count, "published cached lessons");
                self.emit(SyncEvent::LessonsLoaded {
                    source: LessonSource::Cache,
                    count,
                })
                .await;
                source = Some(LessonSource::Cache);
            }
            Ok(_) => debug!("no cached lessons"),
            Err(e) => self.report_cache_failure("read lessons", e).await,
        }

        if !self.connectivity.is_online() {
            info!("offline at startup, serving cached lessons only");
            return Ok(source);
        }

        match self.refresh().await {
            Ok(_) => Ok(Some(LessonSource::Network)),
            Err(e) if self.has_lessons() => {
                warn!(error = %e, "lesson refresh failed, keeping cached lessons");
                Ok(source)
            }
            Err(e) => {
                self.emit(SyncEvent::LoadFailed(e.clone())).await;
                Err(SyncError::NoLessons(e))
            }
        }
    }

    fn has_lessons(&self) -> bool {
        self.store.select(|state| !state.lessons.is_empty())
    }

    pub async fn refresh(&self) -> Result<usize, ApiError> {
        let response = self.api.get_all_lessons().await?;
        let mut lessons = response.data;
        sort_by_id(&mut lessons);
        let count = lessons.len();

        self.store
            .set_state(StateUpdate::new().lessons(lessons.clone()));
        if let Err(e) = self.cache.save_lessons(&lessons).await {
            self.report_cache_failure("save lessons", e).await;
        }

        info!(count, "lessons refreshed from network");
        self.emit(SyncEvent::LessonsLoaded {
            source: LessonSource::Network,
            count,
        })
        .await;
        Ok(count)
    }

    /// Reacts to a connectivity transition. Going offline never clears state.
    pub async fn handle_connectivity(&self, online: bool) {
        if !online {
            info!("connection lost, working from cached data");
            self.emit(SyncEvent::Offline).await;
            return;
        }

        info!("connection restored, refreshing lessons");
        self.emit(SyncEvent::Online).await;
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "refresh after reconnect failed");
            if !self.has_lessons() {
                self.emit(SyncEvent::LoadFailed(e)).await;
            }
        }
    }

    /// Spawns a task that calls [`LessonSync::handle_connectivity`] on every
    /// transition of the shared connectivity flag.
    pub fn watch_connectivity(self: &Arc<Self>) -> ConnectivityWatcher {
        let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
        let mut changes = self.connectivity.subscribe();
        let sync = Arc::clone(self);

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_rx.recv() => {
                        info!("connectivity watcher shutdown requested");
                        break;
                    }
                    changed = changes.changed() => {
                        if changed.is_err() {
                            debug!("connectivity sender dropped");
                            break;
                        }
                        let online = *changes.borrow_and_update();
                        sync.handle_connectivity(online).await;
                    }
                }
            }
        });

        ConnectivityWatcher { cancel_tx, join }
    }

    /// Marks `lesson_id` complete. The local update is authoritative: it is
    /// committed and cached before the remote report starts, and a failing
    /// report never rolls it back.
    pub async fn complete_lesson(&self, lesson_id: LessonId) -> Completion {
        let mut committed = None;
        self.store.update(|state| {
            if state.completed_lessons.contains(&lesson_id) {
                return None;
            }
            let mut completed = state.completed_lessons.clone();
            completed.push(lesson_id);
            let progress = percentage_of(completed.len(), state.lessons.len());
            committed = Some((completed.clone(), progress));
            Some(
                StateUpdate::new()
                    .completed_lessons(completed)
                    .progress(progress),
            )
        });

        let Some((completed, progress)) = committed else {
            debug!(lesson_id, "lesson already completed");
            return Completion {
                newly_completed: false,
                progress: self.store.select(|state| state.progress),
                remote: None,
            };
        };

        let snapshot = ProgressSnapshot::current(completed, progress);
        if let Err(e) = self.cache.save_progress(snapshot.clone()).await {
            self.report_cache_failure("save progress", e).await;
        }

        let remote = if self.connectivity.is_online() {
            Some(self.report_progress(snapshot))
        } else {
            debug!(lesson_id, "offline, progress stays local");
            None
        };

        info!(lesson_id, progress, "lesson completed");
        Completion {
            newly_completed: true,
            progress,
            remote,
        }
    }

    fn report_progress(&self, snapshot: ProgressSnapshot) -> JoinHandle<Result<(), ApiError>> {
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        tokio::spawn(async move {
            match api.save_progress(&snapshot).await {
                Ok(_) => Ok(()),
                Err(e) => {
                    warn!(error = %e, "remote progress sync failed");
                    if events.send(SyncEvent::RemoteSyncFailed(e.clone())).await.is_err() {
                        debug!("sync event receiver dropped");
                    }
                    Err(e)
                }
            }
        })
    }

    /// Grades answers through the API, appends the result to the local quiz
    /// history and records the answers in state.
    pub async fn submit_quiz(
        &self,
        lesson_id: LessonId,
        answers: &[usize],
    ) -> Result<QuizOutcome, SyncError> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        let outcome = self
            .api
            .submit_quiz_answers(lesson_id, answers)
            .await?
            .data;

        if let Err(e) = self.cache.save_quiz_result(lesson_id, outcome.clone()).await {
            self.report_cache_failure("save quiz result", e).await;
        }

        self.store.update(|state| {
            let mut recorded = state.quiz_answers.clone();
            for (index, answer) in answers.iter().enumerate() {
                recorded.insert(format!("{lesson_id}-{index}"), answer.to_string());
            }
            Some(StateUpdate::new().quiz_answers(recorded))
        });

        info!(lesson_id, score = outcome.score, passed = outcome.passed, "quiz submitted");
        Ok(outcome)
    }

    pub async fn lesson(&self, lesson_id: LessonId) -> Result<Lesson, ApiError> {
        let known = self.store.select(|state| {
            state
                .lessons
                .iter()
                .find(|lesson| lesson.id == lesson_id)
                .cloned()
        });
        if let Some(lesson) = known {
            return Ok(lesson);
        }
        if !self.connectivity.is_online() {
            return Err(ApiError::network("offline and lesson not cached"));
        }
        Ok(self.api.get_lesson_by_id(lesson_id).await?.data)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Lesson>, ApiError> {
        if self.connectivity.is_online() {
            return Ok(self.api.search_lessons(query).await?.data);
        }
        let needle = query.trim().to_lowercase();
        Ok(self.store.select(|state| {
            state
                .lessons
                .iter()
                .filter(|lesson| lesson.matches(&needle))
                .cloned()
                .collect()
        }))
    }

    pub async fn save_user(&self, user: UserProfile) {
        self.store.set_state(StateUpdate::new().user(user.clone()));
        if let Err(e) = self.cache.save_user_data(USER_KEY, &user).await {
            self.report_cache_failure("save user", e).await;
        }
    }

    /// Restores local-only state: the latest progress snapshot, the user
    /// profile and the last session. Never reconciled with the network.
    pub async fn restore_local_state(&self) {
        let mut update = StateUpdate::new();

        match self.cache.current_progress().await {
            Ok(Some(record)) => {
                update = update
                    .completed_lessons(record.completed_lessons)
                    .progress(record.progress);
            }
            Ok(None) => {}
            Err(e) => self.report_cache_failure("read progress", e).await,
        }

        match self.cache.get_user_data::<UserProfile>(USER_KEY).await {
            Ok(Some(user)) => update = update.user(user),
            Ok(None) => {}
            Err(e) => self.report_cache_failure("read user", e).await,
        }

        match self.cache.get_user_data::<SessionSnapshot>(SESSION_KEY).await {
            Ok(Some(session)) => {
                update = update
                    .current_lesson(session.current_lesson)
                    .quiz_answers(session.quiz_answers);
            }
            Ok(None) => {}
            Err(e) => self.report_cache_failure("read session", e).await,
        }

        if !update.is_empty() {
            debug!("restored local state");
            self.store.set_state(update);
        }
    }

    /// Registers a subscriber that hands every changed session snapshot to a
    /// single background writer. The writer only ever saves the latest
    /// snapshot and stops once the subscription is removed.
    pub fn persist_session(&self) -> Subscription {
        let (tx, mut rx) = watch::channel(self.store.select(SessionSnapshot::of));
        let cache = self.cache.clone();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let session = rx.borrow_and_update().clone();
                if let Err(e) = cache.save_user_data(SESSION_KEY, &session).await {
                    if !matches!(e, CacheError::Unsupported) {
                        warn!(error = %e, "failed to persist session");
                    }
                }
            }
            debug!("session writer stopped");
        });

        self.store.subscribe_fn(SESSION_SUBSCRIBER, move |_, new| {
            let session = SessionSnapshot::of(new);
            tx.send_if_modified(|current| {
                if *current == session {
                    false
                } else {
                    *current = session;
                    true
                }
            });
            Ok(())
        })
    }
}
