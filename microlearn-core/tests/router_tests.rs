use std::sync::{Arc, Mutex};

use microlearn_core::router::{register_portal_routes, PortalHandlers, RouteHandler};
use microlearn_core::{HashLocation, Location, Resolution, RouteParams, Router, StateStore};

type Hits = Arc<Mutex<Vec<String>>>;

fn tracker(hits: &Hits, name: &'static str) -> impl Fn(&RouteParams) + Send + Sync + 'static {
    let hits = hits.clone();
    move |params: &RouteParams| {
        let entry = match params.get("id") {
            Some(id) => format!("{name}:{id}"),
            None => name.to_string(),
        };
        hits.lock().unwrap().push(entry);
    }
}

fn boxed(hits: &Hits, name: &'static str) -> Option<RouteHandler> {
    Some(Box::new(tracker(hits, name)))
}

fn portal(location: Arc<HashLocation>) -> (Router, Hits, StateStore) {
    let store = StateStore::default();
    let hits: Hits = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new(store.clone(), location);
    register_portal_routes(
        &mut router,
        PortalHandlers {
            home: boxed(&hits, "home"),
            lessons: boxed(&hits, "lessons"),
            lesson_detail: boxed(&hits, "lesson"),
            quiz: boxed(&hits, "quiz"),
            progress: boxed(&hits, "progress"),
        },
    );
    (router, hits, store)
}

#[test]
fn parameterized_route_captures_id() {
    let (router, hits, store) = portal(Arc::new(HashLocation::new()));

    let resolution = router.navigate("/lesson/42");

    match resolution {
        Resolution::Matched { pattern, params, .. } => {
            assert_eq!(pattern, "/lesson/:id");
            assert_eq!(params.get("id"), Some("42"));
            assert_eq!(params.parse::<u32>("id"), Some(42));
        }
        other => panic!("expected a match, got {other:?}"),
    }
    assert_eq!(*hits.lock().unwrap(), vec!["lesson:42".to_string()]);
    assert_eq!(router.current_route().as_deref(), Some("/lesson/42"));
    assert_eq!(store.get_state().current_route, "/lesson/42");
}

#[test]
fn unknown_path_redirects_to_default_once() {
    let location = Arc::new(HashLocation::new());
    let (router, hits, _store) = portal(location.clone());

    let resolution = router.navigate("/nonexistent");

    assert!(matches!(
        &resolution,
        Resolution::Redirected { from, .. } if from == "/nonexistent"
    ));
    assert_eq!(resolution.handled_pattern(), Some("/"));
    assert_eq!(location.hash(), "/");
    assert_eq!(*hits.lock().unwrap(), vec!["home".to_string()]);
}

#[test]
fn extra_segment_falls_back_to_default_route() {
    let (router, hits, _store) = portal(Arc::new(HashLocation::new()));

    let resolution = router.navigate("/lesson/42/extra");

    assert!(matches!(resolution, Resolution::Redirected { .. }));
    assert_eq!(*hits.lock().unwrap(), vec!["home".to_string()]);
}

#[test]
fn segment_counts_must_match() {
    let (router, _hits, _store) = portal(Arc::new(HashLocation::new()));

    assert!(router.match_route("/lesson").is_none());
    assert!(router.match_route("/lesson/").is_none());
    assert!(router.match_route("/lesson/1/extra").is_none());
    assert!(router.match_route("/lesson/abc").is_some());
}

#[test]
fn exact_pattern_wins_over_earlier_parameterized_pattern() {
    let store = StateStore::default();
    let hits: Hits = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new(store, Arc::new(HashLocation::new()));
    router.register("/lesson/:id", tracker(&hits, "detail"));
    router.register("/lesson/new", tracker(&hits, "new"));

    router.navigate("/lesson/new");
    router.navigate("/lesson/7");

    assert_eq!(
        *hits.lock().unwrap(),
        vec!["new".to_string(), "detail:7".to_string()]
    );
}

#[test]
fn overlapping_patterns_resolve_in_registration_order() {
    let store = StateStore::default();
    let hits: Hits = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new(store, Arc::new(HashLocation::new()));
    router.register("/a/:id", tracker(&hits, "first"));
    router.register("/:section/:id", tracker(&hits, "second"));

    router.navigate("/a/1");
    router.navigate("/b/2");

    assert_eq!(
        *hits.lock().unwrap(),
        vec!["first:1".to_string(), "second:2".to_string()]
    );
}

#[test]
fn empty_fragment_resolves_default_route() {
    let (router, hits, _store) = portal(Arc::new(HashLocation::with_hash("")));

    let resolution = router.handle_route_change();

    assert_eq!(resolution.handled_pattern(), Some("/"));
    assert_eq!(*hits.lock().unwrap(), vec!["home".to_string()]);
}

#[test]
fn initial_location_comes_from_url_fragment() {
    let location = HashLocation::from_url("https://portal.example/index.html#/lesson/3").unwrap();
    let (router, hits, _store) = portal(Arc::new(location));

    router.handle_route_change();

    assert_eq!(*hits.lock().unwrap(), vec!["lesson:3".to_string()]);
}

#[test]
fn back_restores_previous_route() {
    let (router, hits, _store) = portal(Arc::new(HashLocation::new()));

    router.navigate("/lessons");
    router.navigate("/lesson/2");
    let back = router.back().expect("history entry");

    assert_eq!(back.handled_pattern(), Some("/lessons"));
    assert_eq!(router.current_route().as_deref(), Some("/lessons"));
    assert_eq!(
        *hits.lock().unwrap(),
        vec!["lessons".to_string(), "lesson:2".to_string(), "lessons".to_string()]
    );
}

#[test]
fn unregistered_default_route_does_not_loop() {
    let store = StateStore::default();
    let mut router = Router::new(store, Arc::new(HashLocation::new()));
    router.register("/lessons", |_: &RouteParams| {});
    router.set_default_route("/missing");

    let resolution = router.navigate("/nowhere");

    match resolution {
        Resolution::Redirected { outcome, .. } => {
            assert!(matches!(*outcome, Resolution::Unresolved { ref path } if path == "/missing"));
        }
        other => panic!("expected a redirect, got {other:?}"),
    }
    assert_eq!(router.current_route(), None);
}

#[test]
fn reregistering_pattern_replaces_handler() {
    let store = StateStore::default();
    let hits: Hits = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new(store, Arc::new(HashLocation::new()));
    router.register("/quiz", tracker(&hits, "old"));
    router.register("/quiz", tracker(&hits, "new"));

    router.navigate("#/quiz");

    assert_eq!(*hits.lock().unwrap(), vec!["new".to_string()]);
    assert_eq!(router.patterns(), vec!["/quiz"]);
}
