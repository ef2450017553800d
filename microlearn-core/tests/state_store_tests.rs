use std::sync::{Arc, Mutex};

use microlearn_core::{ApplicationState, StateKey, StateStore, StateUpdate, StateValue};

type Seen = Arc<Mutex<Vec<(u8, u8)>>>;

fn recording(store: &StateStore, id: &str) -> (Seen, microlearn_core::Subscription) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = store.subscribe_fn(id, move |old, new| {
        sink.lock().unwrap().push((old.progress, new.progress));
        Ok(())
    });
    (seen, sub)
}

#[test]
fn partial_update_leaves_other_fields_untouched() {
    let store = StateStore::default();
    store.set_state(StateUpdate::new().completed_lessons(vec![1, 2]).progress(25));

    store.set_state(StateUpdate::new().current_lesson(Some(2)));

    let state = store.get_state();
    assert_eq!(state.current_lesson, Some(2));
    assert_eq!(state.completed_lessons, vec![1, 2]);
    assert_eq!(state.progress, 25);
    assert_eq!(state.current_route, "/");
    assert_eq!(state.user.name, "Guest");
}

#[test]
fn returned_state_is_an_independent_copy() {
    let store = StateStore::default();
    store.set_state(StateUpdate::new().completed_lessons(vec![1]));

    let mut copy = store.get_state();
    copy.completed_lessons.push(99);
    copy.user.name = "Mallory".into();
    if let StateValue::CompletedLessons(mut ids) = store.get(StateKey::CompletedLessons) {
        ids.clear();
    }

    let state = store.get_state();
    assert_eq!(state.completed_lessons, vec![1]);
    assert_eq!(state.user.name, "Guest");
}

#[test]
fn subscribers_see_previous_and_new_state() {
    let store = StateStore::default();
    let (seen, _sub) = recording(&store, "progress-log");

    store.set_state(StateUpdate::new().progress(40));
    store.set_state(StateUpdate::new().progress(60));

    assert_eq!(*seen.lock().unwrap(), vec![(0, 40), (40, 60)]);
}

#[test]
fn unsubscribed_callback_is_not_called_and_unsubscribe_is_idempotent() {
    let store = StateStore::default();
    let (seen, sub) = recording(&store, "once");

    store.set_state(StateUpdate::new().progress(10));
    sub.unsubscribe();
    sub.unsubscribe();
    store.set_state(StateUpdate::new().progress(20));

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(store.subscriber_ids().is_empty());
}

#[test]
fn subscribing_with_same_id_replaces_in_place() {
    let store = StateStore::default();
    let (first, _a) = recording(&store, "a");
    let (_b_seen, _b) = recording(&store, "b");
    let (second, _a2) = recording(&store, "a");

    store.set_state(StateUpdate::new().progress(5));

    assert!(first.lock().unwrap().is_empty());
    assert_eq!(second.lock().unwrap().len(), 1);
    assert_eq!(store.subscriber_ids(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn failing_subscriber_does_not_block_others() {
    let store = StateStore::default();
    let _bad = store.subscribe_fn("bad", |_, _| Err("boom".into()));
    let (seen, _good) = recording(&store, "good");

    store.set_state(StateUpdate::new().progress(50));

    assert_eq!(*seen.lock().unwrap(), vec![(0, 50)]);
    assert_eq!(store.get_state().progress, 50);
}

#[test]
fn update_skips_notification_when_nothing_changes() {
    let store = StateStore::default();
    let (seen, _sub) = recording(&store, "log");

    assert!(!store.update(|_| None));
    assert!(store.update(|state| Some(StateUpdate::new().progress(state.progress + 10))));

    assert_eq!(*seen.lock().unwrap(), vec![(0, 10)]);
}

#[test]
fn reset_replaces_whole_state() {
    let store = StateStore::default();
    store.set_state(StateUpdate::new().completed_lessons(vec![3]).progress(30));

    store.reset(ApplicationState::default());

    assert_eq!(store.get_state(), ApplicationState::default());
}

#[test]
fn single_keys_are_readable_by_name() {
    let store = StateStore::default();
    store.set_state(StateUpdate::new().progress(75).current_route("/quiz"));

    let key: StateKey = "progress".parse().unwrap();
    assert_eq!(store.get(key), StateValue::Progress(75));
    assert_eq!(
        store.get(StateKey::CurrentRoute),
        StateValue::CurrentRoute("/quiz".into())
    );
    assert!("nope".parse::<StateKey>().is_err());

    let json = serde_json::to_value(store.get(StateKey::CompletedLessons)).unwrap();
    assert_eq!(json, serde_json::json!([]));
}
