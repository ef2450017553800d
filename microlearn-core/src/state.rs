use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SubscriberError;
use crate::lesson::{Lesson, LessonId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    pub enrolled: bool,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: "Guest".to_owned(),
            enrolled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationState {
    pub current_lesson: Option<LessonId>,
    pub completed_lessons: Vec<LessonId>,
    /// question id -> selected answer
    pub quiz_answers: BTreeMap<String, String>,
    pub progress: u8,
    pub current_route: String,
    pub lessons: Vec<Lesson>,
    pub user: UserProfile,
}

impl Default for ApplicationState {
    fn default() -> Self {
        Self {
            current_lesson: None,
            completed_lessons: Vec::new(),
            quiz_answers: BTreeMap::new(),
            progress: 0,
            current_route: "/".to_owned(),
            lessons: Vec::new(),
            user: UserProfile::default(),
        }
    }
}

impl ApplicationState {
    /// Overwrites exactly the fields present in `update`.
    pub fn merge(&mut self, update: StateUpdate) {
        let StateUpdate {
            current_lesson,
            completed_lessons,
            quiz_answers,
            progress,
            current_route,
            lessons,
            user,
        } = update;

        if let Some(v) = current_lesson {
            self.current_lesson = v;
        }
        if let Some(v) = completed_lessons {
            self.completed_lessons = v;
        }
        if let Some(v) = quiz_answers {
            self.quiz_answers = v;
        }
        if let Some(v) = progress {
            self.progress = v;
        }
        if let Some(v) = current_route {
            self.current_route = v;
        }
        if let Some(v) = lessons {
            self.lessons = v;
        }
        if let Some(v) = user {
            self.user = v;
        }
    }

    pub fn value(&self, key: StateKey) -> StateValue {
        match key {
            StateKey::CurrentLesson => StateValue::CurrentLesson(self.current_lesson),
            StateKey::CompletedLessons => {
                StateValue::CompletedLessons(self.completed_lessons.clone())
            }
            StateKey::QuizAnswers => StateValue::QuizAnswers(self.quiz_answers.clone()),
            StateKey::Progress => StateValue::Progress(self.progress),
            StateKey::CurrentRoute => StateValue::CurrentRoute(self.current_route.clone()),
            StateKey::Lessons => StateValue::Lessons(self.lessons.clone()),
            StateKey::User => StateValue::User(self.user.clone()),
        }
    }
}

/// A partial update: `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub current_lesson: Option<Option<LessonId>>,
    pub completed_lessons: Option<Vec<LessonId>>,
    pub quiz_answers: Option<BTreeMap<String, String>>,
    pub progress: Option<u8>,
    pub current_route: Option<String>,
    pub lessons: Option<Vec<Lesson>>,
    pub user: Option<UserProfile>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_lesson(mut self, lesson: Option<LessonId>) -> Self {
        self.current_lesson = Some(lesson);
        self
    }

    pub fn completed_lessons(mut self, completed: Vec<LessonId>) -> Self {
        self.completed_lessons = Some(completed);
        self
    }

    pub fn quiz_answers(mut self, answers: BTreeMap<String, String>) -> Self {
        self.quiz_answers = Some(answers);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn current_route(mut self, route: impl Into<String>) -> Self {
        self.current_route = Some(route.into());
        self
    }

    pub fn lessons(mut self, lessons: Vec<Lesson>) -> Self {
        self.lessons = Some(lessons);
        self
    }

    pub fn user(mut self, user: UserProfile) -> Self {
        self.user = Some(user);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    CurrentLesson,
    CompletedLessons,
    QuizAnswers,
    Progress,
    CurrentRoute,
    Lessons,
    User,
}

impl StateKey {
    pub const ALL: [StateKey; 7] = [
        StateKey::CurrentLesson,
        StateKey::CompletedLessons,
        StateKey::QuizAnswers,
        StateKey::Progress,
        StateKey::CurrentRoute,
        StateKey::Lessons,
        StateKey::User,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StateKey::CurrentLesson => "currentLesson",
            StateKey::CompletedLessons => "completedLessons",
            StateKey::QuizAnswers => "quizAnswers",
            StateKey::Progress => "progress",
            StateKey::CurrentRoute => "currentRoute",
            StateKey::Lessons => "lessons",
            StateKey::User => "user",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| format!("unknown state key `{s}`"))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StateValue {
    CurrentLesson(Option<LessonId>),
    CompletedLessons(Vec<LessonId>),
    QuizAnswers(BTreeMap<String, String>),
    Progress(u8),
    CurrentRoute(String),
    Lessons(Vec<Lesson>),
    User(UserProfile),
}

/// Receives `(previous, current)` snapshots after every state change.
pub trait Subscriber: Send + Sync {
    fn notify(&self, old: &ApplicationState, new: &ApplicationState) -> Result<(), SubscriberError>;
}

struct FnSubscriber<F>(F);

impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(&ApplicationState, &ApplicationState) -> Result<(), SubscriberError> + Send + Sync,
{
    fn notify(
        &self,
        old: &ApplicationState,
        new: &ApplicationState,
    ) -> Result<(), SubscriberError> {
        (self.0)(old, new)
    }
}

type SubscriberList = Vec<(String, Arc<dyn Subscriber>)>;

struct StoreInner {
    state: RwLock<ApplicationState>,
    subscribers: Mutex<SubscriberList>,
}

impl StoreInner {
    fn subscribers(&self) -> MutexGuard<'_, SubscriberList> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe(&self, id: &str) {
        self.subscribers().retain(|(existing, _)| existing != id);
    }
}

#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(ApplicationState::default())
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("subscribers", &self.subscriber_ids())
            .finish_non_exhaustive()
    }
}

impl StateStore {
    pub fn new(initial: ApplicationState) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(initial),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn get_state(&self) -> ApplicationState {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, key: StateKey) -> StateValue {
        self.select(|state| state.value(key))
    }

    pub fn select<T>(&self, f: impl FnOnce(&ApplicationState) -> T) -> T {
        let state = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    pub fn set_state(&self, update: StateUpdate) {
        let (old, new) = {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let old = state.clone();
            state.merge(update);
            (old, state.clone())
        };
        self.notify(&old, &new);
    }

    /// Computes an update from the current state and merges it under the same
    /// lock. Subscribers are notified only when `f` returns an update.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&ApplicationState) -> Option<StateUpdate>,
    {
        let (old, new) = {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(update) = f(&state) else {
                return false;
            };
            let old = state.clone();
            state.merge(update);
            (old, state.clone())
        };
        self.notify(&old, &new);
        true
    }

    pub fn reset(&self, initial: ApplicationState) {
        let (old, new) = {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let old = std::mem::replace(&mut *state, initial);
            (old, state.clone())
        };
        self.notify(&old, &new);
    }

    /// Registers `subscriber` under `id`, replacing any previous registration
    /// with the same id in place.
    pub fn subscribe(
        &self,
        id: impl Into<String>,
        subscriber: impl Subscriber + 'static,
    ) -> Subscription {
        let id = id.into();
        let subscriber: Arc<dyn Subscriber> = Arc::new(subscriber);
        {
            let mut subscribers = self.inner.subscribers();
            match subscribers.iter_mut().find(|(existing, _)| *existing == id) {
                Some(slot) => slot.1 = subscriber,
                None => subscribers.push((id.clone(), subscriber)),
            }
        }
        debug!(subscriber = %id, "state subscriber registered");
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    pub fn subscribe_fn<F>(&self, id: impl Into<String>, f: F) -> Subscription
    where
        F: Fn(&ApplicationState, &ApplicationState) -> Result<(), SubscriberError>
            + Send
            + Sync
            + 'static,
    {
        self.subscribe(id, FnSubscriber(f))
    }

    pub fn unsubscribe(&self, id: &str) {
        self.inner.unsubscribe(id);
    }

    pub fn subscriber_ids(&self) -> Vec<String> {
        self.inner
            .subscribers()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    // Each subscriber is isolated: an error is logged and the rest still run.
    fn notify(&self, old: &ApplicationState, new: &ApplicationState) {
        let subscribers: SubscriberList = self.inner.subscribers().clone();
        for (id, subscriber) in subscribers {
            if let Err(e) = subscriber.notify(old, new) {
                warn!(subscriber = %id, error = %e, "state subscriber failed");
            }
        }
    }
}

/// Handle returned by [`StateStore::subscribe`]. Dropping it keeps the
/// subscription alive; only [`Subscription::unsubscribe`] removes it.
pub struct Subscription {
    id: String,
    store: Weak<StoreInner>,
    active: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.store.upgrade() {
            inner.unsubscribe(&self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish()
    }
}
