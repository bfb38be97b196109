use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};

use checkwarden::check::CheckKey;
use checkwarden::counters::GLOBAL_COUNTERS_KEY;
use checkwarden::processor::{BurstLock, EventOutcome, ProcessorHandle, RunOutcome, Stores};
use checkwarden::{
    CheckStore, EntityStore, Event, InMemoryStore, Notification, NotificationType, Processor,
    ProcessorConfig, Severity, StateLabel, StateStore,
};

fn quick_config() -> ProcessorConfig {
    ProcessorConfig {
        new_check_scheduled_maintenance_duration: "none".to_string(),
        initial_failure_delay: Duration::ZERO,
        repeat_failure_delay: Duration::ZERO,
        ..ProcessorConfig::default()
    }
}

fn processor(store: &Arc<InMemoryStore>, config: ProcessorConfig) -> Processor {
    Processor::with_instance_id(config, Stores::shared(Arc::clone(store)), "e2e:1").unwrap()
}

fn service(entity: &str, check: &str, state: &str) -> String {
    format!(r#"{{"entity":"{entity}","check":"{check}","type":"service","state":"{state}"}}"#)
}

fn notifications(store: &InMemoryStore) -> Vec<Notification> {
    store
        .list("notifications")
        .iter()
        .map(|raw| serde_json::from_str(raw).unwrap())
        .collect()
}

fn wait_for(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn new_failing_check_is_held_by_its_maintenance_window() {
    let store = Arc::new(InMemoryStore::new());
    let p = processor(
        &store,
        ProcessorConfig {
            initial_failure_delay: Duration::ZERO,
            ..ProcessorConfig::default()
        },
    );
    p.counters().initialize(store.as_ref(), Utc::now()).unwrap();
    let t0 = Utc::now();

    let raw = r#"{"entity":"web01","check":"PING","type":"service","state":"critical","summary":"timeout"}"#;
    let outcome = p.process_event_at(Event::parse(raw).unwrap(), t0).unwrap();
    assert_eq!(
        outcome,
        EventOutcome::Blocked {
            filter: "scheduled_maintenance"
        }
    );

    let check = store.find(&CheckKey::new("web01", "PING")).unwrap().unwrap();
    assert_eq!(check.state(), Some(StateLabel::Critical));
    assert_eq!(check.summary(), Some("timeout"));
    let windows = check.scheduled_maintenances_by_start();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].window.start, t0);
    assert!(windows[0].window.contains(t0 + ChronoDuration::days(365 * 50)));

    let entity = store.find_by_name("web01").unwrap().unwrap();
    assert_eq!(entity.checks, vec![CheckKey::new("web01", "PING")]);
    assert!(store.list("notifications").is_empty());
}

#[test]
fn recovery_after_maintenance_reports_previous_state() {
    let store = Arc::new(InMemoryStore::new());
    let p = processor(
        &store,
        ProcessorConfig {
            new_check_scheduled_maintenance_duration: "1h".to_string(),
            ..quick_config()
        },
    );
    p.counters().initialize(store.as_ref(), Utc::now()).unwrap();
    let t0 = Utc::now();

    let held = p
        .process_event_at(Event::parse(&service("web01", "PING", "critical")).unwrap(), t0)
        .unwrap();
    assert_eq!(
        held,
        EventOutcome::Blocked {
            filter: "scheduled_maintenance"
        }
    );

    // Still failing once the window has passed.
    let problem = p
        .process_event_at(
            Event::parse(&service("web01", "PING", "critical")).unwrap(),
            t0 + ChronoDuration::hours(2),
        )
        .unwrap();
    assert_eq!(
        problem.notification().unwrap().notification_type,
        NotificationType::Problem
    );

    let outcome = p
        .process_event_at(
            Event::parse(&service("web01", "PING", "ok")).unwrap(),
            t0 + ChronoDuration::hours(2) + ChronoDuration::seconds(30),
        )
        .unwrap();

    let n = outcome.notification().unwrap();
    assert_eq!(n.notification_type, NotificationType::Recovery);
    assert_eq!(n.previous_state, Some(StateLabel::Critical));
    assert_eq!(n.state, Some(StateLabel::Ok));
    // Recoveries carry the worst severity of the streak they close.
    assert_eq!(n.severity, Severity::Critical);
    assert_eq!(notifications(&store).last(), Some(n));
    assert_eq!(notifications(&store).len(), 2);
}

#[test]
fn short_failure_held_by_delay_recovers_silently() {
    let store = Arc::new(InMemoryStore::new());
    let p = processor(
        &store,
        ProcessorConfig {
            new_check_scheduled_maintenance_duration: "none".to_string(),
            ..ProcessorConfig::default()
        },
    );
    p.counters().initialize(store.as_ref(), Utc::now()).unwrap();
    let t0 = Utc::now();

    let first = p
        .process_event_at(Event::parse(&service("web01", "PING", "ok")).unwrap(), t0)
        .unwrap();
    assert_eq!(first, EventOutcome::Suppressed);

    let failing = p
        .process_event_at(
            Event::parse(&service("web01", "PING", "critical")).unwrap(),
            t0 + ChronoDuration::seconds(60),
        )
        .unwrap();
    assert_eq!(failing, EventOutcome::Blocked { filter: "delays" });

    let recovered = p
        .process_event_at(
            Event::parse(&service("web01", "PING", "ok")).unwrap(),
            t0 + ChronoDuration::seconds(70),
        )
        .unwrap();
    assert_eq!(recovered, EventOutcome::Blocked { filter: "ok" });
    assert!(store.list("notifications").is_empty());
}

#[test]
fn acknowledgement_marks_its_maintenance_window_notified() {
    let store = Arc::new(InMemoryStore::new());
    let p = processor(&store, quick_config());
    p.counters().initialize(store.as_ref(), Utc::now()).unwrap();
    let t0 = Utc::now();

    let problem = p
        .process_event_at(Event::parse(&service("db01", "DISK", "warning")).unwrap(), t0)
        .unwrap();
    assert!(problem.notification().is_some());

    let ack = Event::parse(
        r#"{"entity":"db01","check":"DISK","type":"action","state":"acknowledgement","summary":"on it","duration":600}"#,
    )
    .unwrap();
    let outcome = p.process_event_at(ack, t0 + ChronoDuration::seconds(5)).unwrap();
    let n = outcome.notification().unwrap();
    assert_eq!(n.notification_type, NotificationType::Acknowledgement);
    assert_eq!(n.severity, Severity::Warning);

    let check = store.find(&CheckKey::new("db01", "DISK")).unwrap().unwrap();
    let windows = check.unscheduled_maintenances_by_start();
    assert_eq!(windows.len(), 1);
    assert!(windows[0].notified);
    assert_eq!(windows[0].last_notification_count, Some(n.count));
    assert_eq!(windows[0].opened_by, Some(n.count));
    assert_eq!(
        windows[0].window.end - windows[0].window.start,
        ChronoDuration::seconds(600)
    );

    // Failures while acknowledged stay quiet.
    let quiet = p
        .process_event_at(
            Event::parse(&service("db01", "DISK", "critical")).unwrap(),
            t0 + ChronoDuration::seconds(60),
        )
        .unwrap();
    assert_eq!(
        quiet,
        EventOutcome::Blocked {
            filter: "unscheduled_maintenance"
        }
    );

    // A second acknowledgement is redundant.
    let again = Event::parse(
        r#"{"entity":"db01","check":"DISK","type":"action","state":"acknowledgement"}"#,
    )
    .unwrap();
    let outcome = p.process_event_at(again, t0 + ChronoDuration::seconds(90)).unwrap();
    assert_eq!(
        outcome,
        EventOutcome::Blocked {
            filter: "acknowledgement"
        }
    );
}

#[test]
fn blocked_processor_wakes_on_activity_signal() {
    let store = Arc::new(InMemoryStore::new());
    let p = processor(
        &store,
        ProcessorConfig {
            queue_wait_timeout: Duration::from_secs(10),
            ..quick_config()
        },
    );
    let handle = ProcessorHandle::spawn(p).unwrap();

    // Let the processor finish its first (empty) burst and block.
    assert!(wait_for(Duration::from_secs(2), || store
        .hash(GLOBAL_COUNTERS_KEY)
        .contains_key("all")));
    thread::sleep(Duration::from_millis(50));

    let pushed_at = Instant::now();
    store.push("events", &service("web01", "HTTP", "critical")).unwrap();
    store.push("events_actions", "+").unwrap();

    assert!(wait_for(Duration::from_secs(2), || !store
        .list("notifications")
        .is_empty()));
    assert!(pushed_at.elapsed() < Duration::from_secs(10));

    handle.stop();
    store.push("events_actions", "+").unwrap();
    assert_eq!(
        handle.join_timeout(Duration::from_secs(5)).unwrap(),
        RunOutcome::Stopped
    );
    assert_eq!(store.disconnect_count(), 1);
}

#[test]
fn archiving_keeps_every_event_exactly_once() {
    let store = Arc::new(InMemoryStore::new());
    let p = processor(
        &store,
        ProcessorConfig {
            archive_events: true,
            exit_on_queue_empty: true,
            ..quick_config()
        },
    );

    let payloads: Vec<String> = (0..5)
        .map(|i| service("web01", &format!("CHECK{i}"), "ok"))
        .collect();
    for raw in &payloads {
        store.push("events", raw).unwrap();
    }

    assert_eq!(p.run().unwrap(), RunOutcome::QueueDrained);

    assert!(store.list("events").is_empty());
    let archives = store.list_keys("events_archive:");
    assert_eq!(archives.len(), 1);
    assert_eq!(store.list(&archives[0]), payloads);
    let ttl = store.ttl(&archives[0]).unwrap();
    assert!(ttl <= Duration::from_secs(3 * 60 * 60));
    assert!(ttl > Duration::from_secs(60 * 60));
}

#[test]
fn malformed_payloads_are_dropped_without_stopping() {
    let store = Arc::new(InMemoryStore::new());
    let p = processor(
        &store,
        ProcessorConfig {
            exit_on_queue_empty: true,
            ..quick_config()
        },
    );

    store.push("events", "not json at all").unwrap();
    store
        .push("events", r#"{"entity":"","check":"PING","type":"service","state":"ok"}"#)
        .unwrap();
    store
        .push("events", r#"{"entity":"web01","check":"PING","type":"service","state":"sideways"}"#)
        .unwrap();
    store.push("events", &service("web01", "PING", "critical")).unwrap();

    assert_eq!(p.run().unwrap(), RunOutcome::QueueDrained);

    let sent = notifications(&store);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].notification_type, NotificationType::Problem);
    let global = store.hash(GLOBAL_COUNTERS_KEY);
    assert_eq!(global["all"], 1);
    assert_eq!(global["failure"], 1);
}

#[test]
fn store_failure_ends_run_and_still_disconnects() {
    let store = Arc::new(InMemoryStore::new());
    let p = processor(&store, quick_config());
    store.push("events", &service("web01", "PING", "critical")).unwrap();
    store.set_unavailable(true);

    let err = p.run().unwrap_err();
    assert!(err.is_store());
    assert!(err.is_retryable());
    assert_eq!(store.disconnect_count(), 1);
    assert!(!store.is_connected());
}

#[test]
fn history_grows_in_processing_order() {
    let store = Arc::new(InMemoryStore::new());
    let p = processor(&store, quick_config());
    p.counters().initialize(store.as_ref(), Utc::now()).unwrap();
    let t0 = Utc::now();

    let states = ["ok", "warning", "critical", "critical", "ok", "unknown", "ok"];
    for (i, state) in states.iter().enumerate() {
        p.process_event_at(
            Event::parse(&service("web01", "LOAD", state)).unwrap(),
            t0 + ChronoDuration::seconds(i as i64 * 10),
        )
        .unwrap();
    }

    let check = store.find(&CheckKey::new("web01", "LOAD")).unwrap().unwrap();
    let history = check.states();
    assert_eq!(history.len(), states.len());
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(history.windows(2).all(|w| w[0].count < w[1].count));
}

#[test]
fn severity_never_drops_within_a_failure_streak() {
    let store = Arc::new(InMemoryStore::new());
    let p = processor(&store, quick_config());
    p.counters().initialize(store.as_ref(), Utc::now()).unwrap();
    let t0 = Utc::now();

    for (i, state) in ["warning", "critical", "warning", "unknown"].iter().enumerate() {
        p.process_event_at(
            Event::parse(&service("web01", "MEM", state)).unwrap(),
            t0 + ChronoDuration::seconds(i as i64 * 10),
        )
        .unwrap();
    }

    let severities: Vec<Severity> = notifications(&store).iter().map(|n| n.severity).collect();
    assert_eq!(
        severities,
        vec![
            Severity::Warning,
            Severity::Critical,
            Severity::Critical,
            Severity::Critical
        ]
    );
}

#[test]
fn competing_processors_deliver_each_event_once() {
    let store = InMemoryStore::new();
    let lock = BurstLock::in_process();
    let config = ProcessorConfig {
        queue_wait_timeout: Duration::from_millis(20),
        ..quick_config()
    };

    let mut workers: Vec<_> = (0..2)
        .map(|n| {
            let p = Processor::with_instance_id(
                config.clone(),
                Stores::shared(Arc::new(store.new_connection())),
                format!("e2e:{n}"),
            )
            .unwrap()
            .with_lock(lock.clone());
            ProcessorHandle::spawn(p).unwrap()
        })
        .collect();

    let handled_by = |n: usize| {
        store
            .hash(&format!("{GLOBAL_COUNTERS_KEY}:e2e:{n}"))
            .get("all")
            .copied()
            .unwrap_or(0)
    };
    assert!(wait_for(Duration::from_secs(2), || (0..2)
        .all(|n| !store.hash(&format!("executive_instance:e2e:{n}")).is_empty())));

    // One event at a time, so each wake-up is a separate burst.
    let mut pushed: i64 = 0;
    while pushed < 40 || handled_by(0) == 0 || handled_by(1) == 0 {
        assert!(pushed < 500, "one processor never got a burst");
        store
            .push("events", &service("web01", &format!("C{}", pushed % 4), "ok"))
            .unwrap();
        store.push("events_actions", "+").unwrap();
        pushed += 1;
        assert!(wait_for(Duration::from_secs(2), || store
            .hash(GLOBAL_COUNTERS_KEY)
            .get("all")
            .copied()
            == Some(pushed)));
    }
    assert_eq!(handled_by(0) + handled_by(1), pushed);
    assert_eq!(store.hash(GLOBAL_COUNTERS_KEY)["ok"], pushed);

    // The first processor to leave does not take the other's connection.
    let first = workers.remove(0);
    first.stop();
    assert_eq!(
        first.join_timeout(Duration::from_secs(5)).unwrap(),
        RunOutcome::Stopped
    );

    store.push("events", &service("web01", "LAST", "critical")).unwrap();
    store.push("events_actions", "+").unwrap();
    assert!(wait_for(Duration::from_secs(2), || store
        .list("notifications")
        .len()
        == 1));

    let second = workers.remove(0);
    second.stop();
    assert_eq!(
        second.join_timeout(Duration::from_secs(5)).unwrap(),
        RunOutcome::Stopped
    );
    assert_eq!(store.disconnect_count(), 2);
    assert_eq!(store.hash(GLOBAL_COUNTERS_KEY)["all"], pushed + 1);
}
