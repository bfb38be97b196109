use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::{Notification, Severity};
use crate::check::{Check, CheckState};
use crate::error::{WardenError, WardenResult};
use crate::event::{Event, EventType};
use crate::storage::{CheckStore, StateStore};

/// Builds notifications and enqueues them for delivery.
///
/// This is the only writer of the `notified` / `last_notification_count`
/// bookkeeping and of a check's `last_problem_alert`.
pub struct NotificationGenerator {
    store: Arc<dyn StateStore>,
    checks: Arc<dyn CheckStore>,
    queue: String,
}

impl NotificationGenerator {
    /// A generator pushing onto `queue`.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, checks: Arc<dyn CheckStore>, queue: impl Into<String>) -> Self {
        Self {
            store,
            checks,
            queue: queue.into(),
        }
    }

    /// Name of the delivery queue.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Record the notification on the check and push it to the delivery queue.
    ///
    /// `event` must carry its store-assigned counter.
    pub fn generate(
        &self,
        event: &Event,
        check: &mut Check,
        timestamp: DateTime<Utc>,
        previous_state: Option<&CheckState>,
    ) -> WardenResult<Notification> {
        let count = event
            .counter
            .ok_or_else(|| WardenError::internal(format!("event {} has no counter", event.id())))?;

        let max_notified_severity = check.max_notified_severity_of_current_failure();

        match event.event_type {
            EventType::Service => {
                if event.state.is_failing() {
                    check.set_last_problem_alert(timestamp);
                }
                if let Some(current) = check.last_state_mut() {
                    current.mark_notified(count);
                }
            }
            EventType::Action => {
                if event.is_acknowledgement() {
                    if let Some(um) = check.latest_unscheduled_maintenance_mut() {
                        um.mark_notified(count);
                    }
                }
            }
        }
        self.checks.save(check)?;

        let severity = Severity::for_state(event.state, max_notified_severity);
        let current = check.last_state();

        let mut tags = check.tags.clone();
        tags.extend(event.tags.iter().cloned());

        let notification = Notification {
            id: Uuid::new_v4(),
            event_id: event.id(),
            check_id: check.id,
            entity: check.key.entity.clone(),
            check: check.key.check.clone(),
            state_id: current.map(|s| s.id),
            state: current.map(|s| s.state),
            summary: current.and_then(|s| s.summary.clone()),
            details: current.and_then(|s| s.details.clone()),
            previous_state_id: previous_state.map(|s| s.id),
            previous_state: previous_state.map(|s| s.state),
            state_duration: current.map(|s| (timestamp - s.timestamp).num_seconds()),
            severity,
            notification_type: event.notification_type(),
            time: event.time,
            duration: event.duration,
            tags,
            count,
        };

        debug!(
            event_id = %event.id(),
            severity = %severity,
            notification_type = %notification.notification_type,
            "notification generated"
        );

        let payload = serde_json::to_string(&notification).map_err(crate::storage::StoreError::from)?;
        self.store.push(&self.queue, &payload)?;

        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::check::{CheckKey, StateLabel, StateReport, UnscheduledMaintenance};
    use crate::notification::NotificationType;
    use crate::storage::InMemoryStore;
    use crate::time::TimeRange;

    fn setup() -> (Arc<InMemoryStore>, NotificationGenerator) {
        let store = Arc::new(InMemoryStore::new());
        let generator = NotificationGenerator::new(
            Arc::clone(&store) as Arc<dyn StateStore>,
            Arc::clone(&store) as Arc<dyn CheckStore>,
            "notifications",
        );
        (store, generator)
    }

    fn record(check: &mut Check, state: StateLabel, count: i64, at: DateTime<Utc>) {
        check.record_state(StateReport {
            state,
            summary: Some(state.to_string()),
            details: None,
            count,
            timestamp: at,
        });
    }

    fn service(state: &str, counter: i64) -> Event {
        Event::parse(&format!(
            r#"{{"entity":"web01","check":"PING","type":"service","state":"{state}","tags":["web"]}}"#
        ))
        .unwrap()
        .with_counter(counter)
    }

    #[test]
    fn problem_marks_state_and_problem_alert() {
        let (store, generator) = setup();
        let t0 = Utc::now();
        let mut check = Check::new(CheckKey::new("web01", "PING"));
        record(&mut check, StateLabel::Critical, 1, t0);

        let n = generator
            .generate(&service("critical", 1), &mut check, t0 + Duration::seconds(5), None)
            .unwrap();

        assert_eq!(n.severity, Severity::Critical);
        assert_eq!(n.notification_type, NotificationType::Problem);
        assert_eq!(n.state_duration, Some(5));
        assert!(n.tags.contains("web"));
        assert_eq!(check.last_problem_alert(), Some(t0 + Duration::seconds(5)));
        assert!(check.last_state().unwrap().notified);
        assert_eq!(check.last_state().unwrap().last_notification_count, Some(1));

        let queued = store.list("notifications");
        assert_eq!(queued.len(), 1);
        let decoded: Notification = serde_json::from_str(&queued[0]).unwrap();
        assert_eq!(decoded, n);

        let saved = store.find(&check.key).unwrap().unwrap();
        assert!(saved.last_state().unwrap().notified);
    }

    #[test]
    fn recovery_carries_previous_state_and_streak_severity() {
        let (_store, generator) = setup();
        let t0 = Utc::now();
        let mut check = Check::new(CheckKey::new("web01", "PING"));
        record(&mut check, StateLabel::Critical, 1, t0);
        generator
            .generate(&service("critical", 1), &mut check, t0, None)
            .unwrap();

        let previous = check.last_state().cloned();
        record(&mut check, StateLabel::Ok, 2, t0 + Duration::seconds(60));
        let n = generator
            .generate(
                &service("ok", 2),
                &mut check,
                t0 + Duration::seconds(60),
                previous.as_ref(),
            )
            .unwrap();

        assert_eq!(n.notification_type, NotificationType::Recovery);
        assert_eq!(n.previous_state, Some(StateLabel::Critical));
        assert_eq!(n.previous_state_id, previous.map(|s| s.id));
        assert_eq!(n.severity, Severity::Critical);
        // Recovery does not count as a problem alert.
        assert_eq!(check.last_problem_alert(), Some(t0));
    }

    #[test]
    fn severity_is_monotonic_within_a_streak() {
        let (_store, generator) = setup();
        let t0 = Utc::now();
        let mut check = Check::new(CheckKey::new("web01", "PING"));
        let mut last = Severity::Ok;

        for (i, state) in ["warning", "critical", "warning", "unknown"].iter().enumerate() {
            let counter = i as i64 + 1;
            let label: StateLabel = serde_json::from_str(&format!("\"{state}\"")).unwrap();
            record(&mut check, label, counter, t0);
            let n = generator
                .generate(&service(state, counter), &mut check, t0, None)
                .unwrap();
            assert!(n.severity >= last);
            last = n.severity;
        }
        assert_eq!(last, Severity::Critical);
    }

    #[test]
    fn acknowledgement_marks_latest_unscheduled_maintenance() {
        let (_store, generator) = setup();
        let t0 = Utc::now();
        let mut check = Check::new(CheckKey::new("web01", "PING"));
        record(&mut check, StateLabel::Critical, 1, t0);
        check.add_unscheduled_maintenance(UnscheduledMaintenance::new(
            TimeRange::starting_at_for(t0, std::time::Duration::from_secs(600)),
            None,
            Some(2),
        ));

        let ack = Event::parse(
            r#"{"entity":"web01","check":"PING","type":"action","state":"acknowledgement"}"#,
        )
        .unwrap()
        .with_counter(2);
        let n = generator.generate(&ack, &mut check, t0, None).unwrap();

        assert_eq!(n.notification_type, NotificationType::Acknowledgement);
        let um = &check.unscheduled_maintenances_by_start()[0];
        assert!(um.notified);
        assert_eq!(um.last_notification_count, Some(2));
        assert!(!check.last_state().unwrap().notified);
    }

    #[test]
    fn event_without_counter_is_rejected() {
        let (store, generator) = setup();
        let mut check = Check::new(CheckKey::new("web01", "PING"));
        record(&mut check, StateLabel::Critical, 1, Utc::now());
        let event = Event::parse(
            r#"{"entity":"web01","check":"PING","type":"service","state":"critical"}"#,
        )
        .unwrap();

        assert!(generator.generate(&event, &mut check, Utc::now(), None).is_err());
        assert!(store.list("notifications").is_empty());
    }
}
