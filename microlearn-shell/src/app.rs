use std::io::Write as _;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};

use microlearn_core::router::{self, register_portal_routes, PortalHandlers, RouteHandler};
use microlearn_core::validation::{parse_lesson_id, validate_answer};
use microlearn_core::{
    ApiError, Lesson, LessonId, LessonSource, LessonSync, Location, Resolution, RouteParams, Router,
    StateKey, StateUpdate, SyncError, SyncEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::views::{self, View};

const HELP: &str = "\
Navigation:
  home | lessons | quiz | progress   open a page
  lesson <id>                        open a lesson
  go <path>                          open any route, e.g. `go /lesson/3`
  back                               previous page
Learning:
  complete [id]                      mark the open (or given) lesson complete
  answer <id> <option>...            submit quiz answers, e.g. `answer 1 1 2`
  results <id>                       quiz history for a lesson
  search <text>                      search lessons
Session:
  online | offline                   toggle connectivity
  refresh                            reload lessons from the server
  name <name> | enroll               update your profile
  state [key]                        dump application state as JSON
  help | quit";

pub struct AppInit {
    pub sync: Arc<LessonSync>,
    pub location: Arc<dyn Location>,
    pub default_route: String,
    pub events: mpsc::Receiver<SyncEvent>,
}

type PendingView = Arc<Mutex<Option<View>>>;

/// Line-oriented front-end. Route handlers only record which view to show;
/// rendering happens after each command so views may await data.
pub struct PortalShell {
    sync: Arc<LessonSync>,
    router: Router,
    events: mpsc::Receiver<SyncEvent>,
    pending: PendingView,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Go(String),
    Back,
    Complete(Option<String>),
    Answer { lesson: String, answers: Vec<String> },
    Results(String),
    Search(String),
    Online,
    Offline,
    Refresh,
    Name(String),
    Enroll,
    State(Option<String>),
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Self::Empty;
        };
        let head = head.to_ascii_lowercase();
        let rest: Vec<&str> = words.collect();

        match (head.as_str(), rest.as_slice()) {
            ("go" | "open", [path]) => Self::Go((*path).to_owned()),
            ("home", []) => Self::Go(router::HOME.to_owned()),
            ("lessons", []) => Self::Go(router::LESSONS.to_owned()),
            ("quiz", []) => Self::Go(router::QUIZ.to_owned()),
            ("progress", []) => Self::Go(router::PROGRESS.to_owned()),
            ("lesson", [id]) => Self::Go(format!("/lesson/{id}")),
            ("back", []) => Self::Back,
            ("complete", []) => Self::Complete(None),
            ("complete", [id]) => Self::Complete(Some((*id).to_owned())),
            ("answer", [lesson, answers @ ..]) if !answers.is_empty() => Self::Answer {
                lesson: (*lesson).to_owned(),
                answers: answers.iter().map(|a| (*a).to_owned()).collect(),
            },
            ("results", [id]) => Self::Results((*id).to_owned()),
            ("search", words) if !words.is_empty() => Self::Search(words.join(" ")),
            ("online", []) => Self::Online,
            ("offline", []) => Self::Offline,
            ("refresh", []) => Self::Refresh,
            ("name", words) if !words.is_empty() => Self::Name(words.join(" ")),
            ("enroll", []) => Self::Enroll,
            ("state", []) => Self::State(None),
            ("state", [key]) => Self::State(Some((*key).to_owned())),
            ("help" | "?", []) => Self::Help,
            ("quit" | "exit", []) => Self::Quit,
            _ => Self::Unknown(line.trim().to_owned()),
        }
    }
}

fn set_view(pending: &PendingView, view: View) {
    *pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(view);
}

fn show(pending: &PendingView, view: View) -> Option<RouteHandler> {
    let pending = Arc::clone(pending);
    Some(Box::new(move |_: &RouteParams| set_view(&pending, view.clone())))
}

fn portal_router(init: &AppInit, pending: &PendingView) -> Router {
    let mut router = Router::new(init.sync.store().clone(), Arc::clone(&init.location));
    router.set_default_route(&init.default_route);

    let detail = Arc::clone(pending);
    let handlers = PortalHandlers {
        home: show(pending, View::Home),
        lessons: show(pending, View::Lessons),
        lesson_detail: Some(Box::new(move |params: &RouteParams| {
            let raw = params.get("id").unwrap_or_default().to_owned();
            set_view(&detail, View::Lesson(raw));
        })),
        quiz: show(pending, View::Quiz),
        progress: show(pending, View::Progress),
    };
    register_portal_routes(&mut router, handlers);
    router
}

fn notice(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::LessonsLoaded {
            source: LessonSource::Network,
            count,
        } => Some(format!("{count} lessons up to date.")),
        SyncEvent::LessonsLoaded {
            source: LessonSource::Cache,
            ..
        } => None,
        SyncEvent::Online => Some("Back online.".to_owned()),
        SyncEvent::Offline => Some("You are offline. Showing cached lessons.".to_owned()),
        SyncEvent::LoadFailed(e) => Some(format!(
            "Failed to load lessons: {e}. Type `refresh` to try again."
        )),
        SyncEvent::CacheFailed(message) => Some(format!("Local storage problem: {message}")),
        SyncEvent::RemoteSyncFailed(e) => Some(format!(
            "Progress is saved on this device but the server could not be reached: {e}"
        )),
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

impl PortalShell {
    pub fn new(init: AppInit) -> Self {
        let pending = Arc::new(Mutex::new(None));
        let router = portal_router(&init, &pending);
        Self {
            sync: init.sync,
            router,
            events: init.events,
            pending,
        }
    }

    pub async fn run(mut self) -> Result<(), SyncError> {
        let watcher = self.sync.watch_connectivity();
        match self.sync.startup().await {
            Ok(Some(source)) => debug!(?source, "lessons ready"),
            Ok(None) => println!("No lessons cached yet. Go `online` to download them."),
            Err(e) => debug!(error = %e, "startup finished without lessons"),
        }
        let session = self.sync.persist_session();
        self.drain_events();

        self.router.handle_route_change();
        self.render_pending().await;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            prompt();
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read input");
                    break;
                }
            };

            let flow = self.execute(Command::parse(&line)).await;
            self.render_pending().await;
            self.drain_events();
            if flow.is_break() {
                break;
            }
        }

        session.unsubscribe();
        watcher.stop().await
    }

    async fn execute(&self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Go(path) => self.announce(self.router.navigate(&path)),
            Command::Back => match self.router.back() {
                Some(resolution) => self.announce(resolution),
                None => println!("Nothing to go back to."),
            },
            Command::Complete(raw) => self.complete(raw).await,
            Command::Answer { lesson, answers } => self.answer(&lesson, &answers).await,
            Command::Results(raw) => self.results(&raw).await,
            Command::Search(query) => match self.sync.search(&query).await {
                Ok(found) => println!("{}", views::search_results(&query, &found)),
                Err(e) => println!("Search failed: {e}"),
            },
            Command::Online => self.set_online(true).await,
            Command::Offline => self.set_online(false).await,
            Command::Refresh => self.refresh().await,
            Command::Name(name) => {
                let mut user = self.sync.store().select(|state| state.user.clone());
                user.name = name;
                self.sync.save_user(user).await;
                println!("Profile updated.");
            }
            Command::Enroll => {
                let mut user = self.sync.store().select(|state| state.user.clone());
                user.enrolled = true;
                let name = user.name.clone();
                self.sync.save_user(user).await;
                println!("Enrolled. Welcome aboard, {name}!");
            }
            Command::State(key) => self.dump_state(key.as_deref()),
            Command::Help => println!("{HELP}"),
            Command::Quit => return ControlFlow::Break(()),
            Command::Empty => {}
            Command::Unknown(line) => println!("Unknown command `{line}`. Type `help`."),
        }
        ControlFlow::Continue(())
    }

    fn announce(&self, resolution: Resolution) {
        match resolution {
            Resolution::Matched { .. } => {}
            Resolution::Redirected { from, .. } => {
                println!("No page at `{from}`, showing `{}`.", self.router.default_route());
            }
            Resolution::Unresolved { path } => println!("Nothing to show for `{path}`."),
        }
    }

    fn take_pending(&self) -> Option<View> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn render_pending(&self) {
        let Some(view) = self.take_pending() else {
            return;
        };
        let state = self.sync.store().get_state();
        let text = match view {
            View::Home => views::home(&state),
            View::Lessons => views::lessons(&state),
            View::Progress => views::progress(&state),
            View::Quiz => {
                let lesson = state
                    .current_lesson
                    .and_then(|id| find_lesson(&state.lessons, id))
                    .or_else(|| state.lessons.first());
                views::quiz(lesson)
            }
            View::Lesson(raw) => self.lesson_view(&raw).await,
        };
        println!("{text}");
    }

    async fn lesson_view(&self, raw: &str) -> String {
        let Some(id) = parse_lesson_id(raw) else {
            let err = ApiError::not_found(format!("Lesson {raw} not found"));
            return views::lesson_error(raw, &err);
        };
        match self.sync.lesson(id).await {
            Ok(lesson) => {
                self.sync
                    .store()
                    .set_state(StateUpdate::new().current_lesson(Some(id)));
                let completed = self
                    .sync
                    .store()
                    .select(|state| state.completed_lessons.contains(&id));
                views::lesson(&lesson, completed)
            }
            Err(e) => views::lesson_error(raw, &e),
        }
    }

    async fn complete(&self, raw: Option<String>) {
        let id = match raw.as_deref() {
            Some(raw) => parse_lesson_id(raw),
            None => self.sync.store().select(|state| state.current_lesson),
        };
        let Some(id) = id else {
            println!("Which lesson? Use `complete <id>`.");
            return;
        };
        let known = self
            .sync
            .store()
            .select(|state| find_lesson(&state.lessons, id).is_some());
        if !known {
            println!("Lesson {id} not found.");
            return;
        }

        let completion = self.sync.complete_lesson(id).await;
        if completion.newly_completed {
            println!("Lesson {id} completed. Progress: {}%", completion.progress);
        } else {
            println!("Lesson {id} was already completed. Progress: {}%", completion.progress);
        }
    }

    async fn answer(&self, raw_lesson: &str, raw_answers: &[String]) {
        let Some(lesson_id) = parse_lesson_id(raw_lesson) else {
            println!("`{raw_lesson}` is not a lesson id.");
            return;
        };
        let mut answers = Vec::with_capacity(raw_answers.len());
        for (index, raw) in raw_answers.iter().enumerate() {
            let Some(answer) = validate_answer(&format!("{lesson_id}-{index}"), raw) else {
                println!(
                    "`{raw}` is not an option number. Try e.g. `answer {lesson_id} 1 0 2`."
                );
                return;
            };
            answers.push(answer);
        }

        match self.sync.submit_quiz(lesson_id, &answers).await {
            Ok(outcome) => println!("{}", views::quiz_review(&outcome)),
            Err(SyncError::Offline) => {
                println!("Quizzes are graded online. Type `online` to reconnect.")
            }
            Err(SyncError::Api(e)) if e.is_not_found() => println!("Lesson {lesson_id} not found."),
            Err(e) => println!("Could not submit answers: {e}"),
        }
    }

    async fn results(&self, raw: &str) {
        let Some(lesson_id) = parse_lesson_id(raw) else {
            println!("`{raw}` is not a lesson id.");
            return;
        };
        match self.sync.cache().get_quiz_results_by_lesson(lesson_id).await {
            Ok(results) => println!("{}", views::quiz_history(lesson_id, &results)),
            Err(e) => println!("Quiz history unavailable: {e}"),
        }
    }

    async fn set_online(&self, online: bool) {
        if !self.sync.connectivity().set_online(online) {
            println!("Already {}.", if online { "online" } else { "offline" });
            return;
        }
        // let the watcher pick up the transition before events are drained
        tokio::task::yield_now().await;
    }

    async fn refresh(&self) {
        if !self.sync.connectivity().is_online() {
            println!("You are offline. Type `online` first.");
            return;
        }
        if let Err(e) = self.sync.refresh().await {
            println!("Refresh failed: {e}");
        }
    }

    fn dump_state(&self, key: Option<&str>) {
        let json = match key {
            None => serde_json::to_string_pretty(&self.sync.store().get_state()),
            Some(raw) => match raw.parse::<StateKey>() {
                Ok(key) => serde_json::to_string_pretty(&self.sync.store().get(key)),
                Err(e) => {
                    println!("{e}");
                    return;
                }
            },
        };
        match json {
            Ok(json) => println!("{json}"),
            Err(e) => println!("Could not serialize state: {e}"),
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            debug!(?event, "sync event");
            if let Some(text) = notice(&event) {
                println!("{text}");
            }
        }
    }
}

fn find_lesson(lessons: &[Lesson], id: LessonId) -> Option<&Lesson> {
    lessons.iter().find(|lesson| lesson.id == id)
}
