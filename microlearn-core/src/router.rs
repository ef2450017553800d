use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use url::Url;

use crate::state::{StateStore, StateUpdate};

pub const HOME: &str = "/";
pub const LESSONS: &str = "/lessons";
pub const LESSON_DETAIL: &str = "/lesson/:id";
pub const QUIZ: &str = "/quiz";
pub const PROGRESS: &str = "/progress";

/// The host's addressable location; only the fragment path matters here.
pub trait Location: Send + Sync {
    fn hash(&self) -> String;
    fn set_hash(&self, path: &str);
    fn back(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct History {
    current: String,
    previous: Vec<String>,
}

/// In-process location with a back stack, standing in for the browser's
/// `window.location`.
#[derive(Debug, Default)]
pub struct HashLocation {
    history: Mutex<History>,
}

impl HashLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hash(path: &str) -> Self {
        let location = Self::new();
        location.history().current = strip_hash(path).to_owned();
        location
    }

    /// Seeds the location from a full address such as
    /// `https://host/index.html#/lesson/42`.
    pub fn from_url(address: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(address)?;
        Ok(Self::with_hash(url.fragment().unwrap_or_default()))
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Location for HashLocation {
    fn hash(&self) -> String {
        self.history().current.clone()
    }

    fn set_hash(&self, path: &str) {
        let mut history = self.history();
        let path = strip_hash(path);
        if history.current != path {
            let previous = std::mem::replace(&mut history.current, path.to_owned());
            history.previous.push(previous);
        }
    }

    fn back(&self) -> bool {
        let mut history = self.history();
        match history.previous.pop() {
            Some(previous) => {
                history.current = previous;
                true
            }
            None => false,
        }
    }
}

fn strip_hash(path: &str) -> &str {
    path.strip_prefix('#').unwrap_or(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A route pattern split into segment tokens once, at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .split('/')
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_owned()),
                None => Segment::Literal(segment.to_owned()),
            })
            .collect();
        Self {
            raw: raw.to_owned(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn has_params(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Param(_)))
    }

    /// Segment-wise match; `None` when counts differ, a literal differs or a
    /// parameter would capture an empty segment.
    pub fn match_path(&self, path: &str) -> Option<RouteParams> {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_owned());
                }
            }
        }
        Some(RouteParams(params))
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams(BTreeMap<String, String>);

impl RouteParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn parse<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|value| value.parse().ok())
    }
}

/// Outcome of resolving one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Matched {
        pattern: String,
        path: String,
        params: RouteParams,
    },
    Redirected { from: String, outcome: Box<Resolution> },
    Unresolved { path: String },
}

impl Resolution {
    /// The pattern whose handler ran, following redirects.
    pub fn handled_pattern(&self) -> Option<&str> {
        match self {
            Resolution::Matched { pattern, .. } => Some(pattern),
            Resolution::Redirected { outcome, .. } => outcome.handled_pattern(),
            Resolution::Unresolved { .. } => None,
        }
    }
}

pub type RouteHandler = Box<dyn Fn(&RouteParams) + Send + Sync>;

struct Route {
    pattern: RoutePattern,
    handler: RouteHandler,
}

pub struct Router {
    routes: Vec<Route>,
    exact: HashMap<String, usize>,
    default_route: String,
    current_route: Mutex<Option<String>>,
    location: Arc<dyn Location>,
    store: StateStore,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.patterns())
            .field("default_route", &self.default_route)
            .field("current_route", &self.current_route())
            .finish_non_exhaustive()
    }
}

impl Router {
    pub fn new(store: StateStore, location: Arc<dyn Location>) -> Self {
        Self {
            routes: Vec::new(),
            exact: HashMap::new(),
            default_route: HOME.to_owned(),
            current_route: Mutex::new(None),
            location,
            store,
        }
    }

    /// Associates `pattern` with `handler`. Registering the same pattern again
    /// replaces its handler but keeps its original precedence.
    pub fn register<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&RouteParams) + Send + Sync + 'static,
    {
        let handler: RouteHandler = Box::new(handler);
        if let Some(&index) = self.exact.get(pattern) {
            self.routes[index].handler = handler;
            return;
        }
        self.exact.insert(pattern.to_owned(), self.routes.len());
        self.routes.push(Route {
            pattern: RoutePattern::parse(pattern),
            handler,
        });
    }

    pub fn set_default_route(&mut self, path: &str) {
        self.default_route = strip_hash(path).to_owned();
    }

    pub fn default_route(&self) -> &str {
        &self.default_route
    }

    pub fn patterns(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.pattern.as_str()).collect()
    }

    pub fn location(&self) -> &Arc<dyn Location> {
        &self.location
    }

    pub fn current_route(&self) -> Option<String> {
        self.current().clone()
    }

    pub fn navigate(&self, path: &str) -> Resolution {
        let path = strip_hash(path);
        self.location.set_hash(path);
        self.resolve(path)
    }

    /// Resolves whatever the location currently holds; an empty fragment
    /// means the default route.
    pub fn handle_route_change(&self) -> Resolution {
        let hash = self.location.hash();
        let path = if hash.is_empty() {
            self.default_route.clone()
        } else {
            hash
        };
        self.resolve(&path)
    }

    pub fn back(&self) -> Option<Resolution> {
        if self.location.back() {
            Some(self.handle_route_change())
        } else {
            None
        }
    }

    pub fn match_route(&self, path: &str) -> Option<(&RoutePattern, RouteParams)> {
        self.find(path)
            .map(|(index, params)| (&self.routes[index].pattern, params))
    }

    fn find(&self, path: &str) -> Option<(usize, RouteParams)> {
        if let Some(&index) = self.exact.get(path) {
            return Some((index, RouteParams::default()));
        }
        self.routes
            .iter()
            .enumerate()
            .find_map(|(index, route)| route.pattern.match_path(path).map(|p| (index, p)))
    }

    fn resolve(&self, path: &str) -> Resolution {
        match self.find(path) {
            Some((index, params)) => {
                let route = &self.routes[index];
                *self.current() = Some(path.to_owned());
                self.store
                    .set_state(StateUpdate::new().current_route(path));
                debug!(path, pattern = %route.pattern, "route matched");
                (route.handler)(&params);
                Resolution::Matched {
                    pattern: route.pattern.as_str().to_owned(),
                    path: path.to_owned(),
                    params,
                }
            }
            None if path == self.default_route => {
                warn!(path, "default route is not registered");
                Resolution::Unresolved {
                    path: path.to_owned(),
                }
            }
            None => {
                info!(path, to = %self.default_route, "no route matched, redirecting");
                let default_route = self.default_route.clone();
                let outcome = self.navigate(&default_route);
                Resolution::Redirected {
                    from: path.to_owned(),
                    outcome: Box::new(outcome),
                }
            }
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<String>> {
        self.current_route
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handlers for the five portal routes; missing ones do nothing.
#[derive(Default)]
pub struct PortalHandlers {
    pub home: Option<RouteHandler>,
    pub lessons: Option<RouteHandler>,
    pub lesson_detail: Option<RouteHandler>,
    pub quiz: Option<RouteHandler>,
    pub progress: Option<RouteHandler>,
}

pub fn register_portal_routes(router: &mut Router, handlers: PortalHandlers) {
    let PortalHandlers {
        home,
        lessons,
        lesson_detail,
        quiz,
        progress,
    } = handlers;

    for (pattern, handler) in [
        (HOME, home),
        (LESSONS, lessons),
        (LESSON_DETAIL, lesson_detail),
        (QUIZ, quiz),
        (PROGRESS, progress),
    ] {
        match handler {
            Some(handler) => router.register(pattern, handler),
            None => router.register(pattern, |_: &RouteParams| {}),
        }
    }
}
