use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::*;

/// Recording answer path shared with the test body.
fn recording_token(log: &Arc<Mutex<Vec<AuthDecision>>>) -> AuthToken {
    let log = log.clone();
    AuthToken::new(move |decision| {
        log.lock().unwrap().push(decision);
    })
}

#[test]
fn explicit_resolve_delivers_exactly_once() {
    let authorizer = Authorizer::new(Duration::from_secs(60));
    let log = Arc::new(Mutex::new(Vec::new()));

    let id = authorizer.next_event_id();
    authorizer.track(id, recording_token(&log));

    assert!(authorizer.resolve(id, AuthDecision::Deny));
    assert!(!authorizer.resolve(id, AuthDecision::Deny));

    assert_eq!(*log.lock().unwrap(), vec![AuthDecision::Deny]);
    assert_eq!(authorizer.pending_count(), 0);
}

#[test]
fn resolving_unknown_event_is_a_noop() {
    let authorizer = Authorizer::new(Duration::from_secs(60));
    assert!(!authorizer.resolve(777, AuthDecision::Allow));
}

#[test]
fn timeout_fails_open_exactly_once() {
    let authorizer = Authorizer::new(Duration::from_millis(30));
    let log = Arc::new(Mutex::new(Vec::new()));

    let id = authorizer.next_event_id();
    authorizer.track(id, recording_token(&log));

    std::thread::sleep(Duration::from_millis(250));

    assert_eq!(*log.lock().unwrap(), vec![AuthDecision::Allow]);
    assert_eq!(authorizer.pending_count(), 0);
    // A late explicit reply after the timeout already fired.
    assert!(!authorizer.resolve(id, AuthDecision::Deny));
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn resolve_before_timeout_suppresses_the_deadline() {
    let authorizer = Authorizer::new(Duration::from_millis(50));
    let log = Arc::new(Mutex::new(Vec::new()));

    let id = authorizer.next_event_id();
    authorizer.track(id, recording_token(&log));
    assert!(authorizer.resolve(id, AuthDecision::Deny));

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(*log.lock().unwrap(), vec![AuthDecision::Deny]);
}

#[test]
fn shutdown_allows_everything_still_pending() {
    let authorizer = Authorizer::new(Duration::from_secs(60));
    let log = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let id = authorizer.next_event_id();
        authorizer.track(id, recording_token(&log));
    }
    assert_eq!(authorizer.pending_count(), 3);

    authorizer.shutdown();
    assert_eq!(
        *log.lock().unwrap(),
        vec![AuthDecision::Allow, AuthDecision::Allow, AuthDecision::Allow]
    );

    // Tracking after shutdown answers immediately instead of hanging.
    let id = authorizer.next_event_id();
    authorizer.track(id, recording_token(&log));
    assert_eq!(log.lock().unwrap().len(), 4);
}

#[test]
fn concurrent_resolve_and_timeout_deliver_one_decision() {
    for _ in 0..20 {
        let authorizer = Arc::new(Authorizer::new(Duration::from_millis(5)));
        let log = Arc::new(Mutex::new(Vec::new()));

        let id = authorizer.next_event_id();
        authorizer.track(id, recording_token(&log));

        let racer = {
            let authorizer = authorizer.clone();
            std::thread::spawn(move || {
                authorizer.resolve(id, AuthDecision::Deny);
            })
        };
        racer.join().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(log.lock().unwrap().len(), 1, "exactly one terminal decision");
    }
}

#[test]
fn event_ids_are_nonzero_and_unique() {
    let authorizer = Authorizer::default();
    let a = authorizer.next_event_id();
    let b = authorizer.next_event_id();
    assert_ne!(a, 0);
    assert_ne!(a, b);
}
