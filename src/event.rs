//! Inbound events.
//!
//! An event is either a `service` report (the current state of a check on a
//! monitored system) or an `action` (human or automated interaction, such as
//! an acknowledgement). Events arrive as JSON payloads on the inbound queue
//! and are immutable once parsed; the store-assigned counter is attached by
//! building a new value with [`Event::with_counter`].

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::check::{CheckKey, StateLabel};
use crate::error::ValidationError;
use crate::notification::NotificationType;

/// Kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Current state of a check.
    Service,
    /// Interaction with the alerting system.
    Action,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => write!(f, "service"),
            Self::Action => write!(f, "action"),
        }
    }
}

/// A deserialized unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Entity name.
    pub entity: String,

    /// Check name.
    pub check: String,

    /// `service` or `action`.
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Reported state, or the action performed.
    pub state: StateLabel,

    /// One-line description from the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Longer output from the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// When the event occurred, as reported by the producer.
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub time: Option<DateTime<Utc>>,

    /// Duration in seconds; for acknowledgements, how long the ack lasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,

    /// Tags added to any resulting notification.
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Producer-side id of an acknowledgement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledgement_id: Option<String>,

    /// Position in the global event sequence; assigned by the store.
    #[serde(skip)]
    pub counter: Option<i64>,
}

impl Event {
    /// Parses and validates a raw JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MalformedEvent` for invalid JSON, unknown
    /// types or states, empty names, or a state that does not belong to the
    /// event's type.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let event: Self = serde_json::from_str(raw).map_err(|e| ValidationError::MalformedEvent {
            reason: e.to_string(),
        })?;
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.entity.trim().is_empty() {
            return Err(ValidationError::MalformedEvent {
                reason: "entity is empty".to_string(),
            });
        }
        if self.check.trim().is_empty() {
            return Err(ValidationError::MalformedEvent {
                reason: "check is empty".to_string(),
            });
        }

        let consistent = match self.event_type {
            EventType::Service => self.state.is_service_state(),
            EventType::Action => !self.state.is_service_state(),
        };
        if !consistent {
            return Err(ValidationError::MalformedEvent {
                reason: format!("state '{}' is not valid for {} events", self.state, self.event_type),
            });
        }

        Ok(())
    }

    /// Composite identity, `entity:check`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}:{}", self.entity, self.check)
    }

    /// Key of the check this event refers to.
    #[must_use]
    pub fn check_key(&self) -> CheckKey {
        CheckKey::new(self.entity.clone(), self.check.clone())
    }

    /// Returns a copy of this event carrying the store-assigned counter.
    #[must_use]
    pub fn with_counter(mut self, counter: i64) -> Self {
        self.counter = Some(counter);
        self
    }

    /// True for `service` events.
    #[must_use]
    pub const fn is_service(&self) -> bool {
        matches!(self.event_type, EventType::Service)
    }

    /// True for `action` events.
    #[must_use]
    pub const fn is_action(&self) -> bool {
        matches!(self.event_type, EventType::Action)
    }

    /// True for acknowledgement actions.
    #[must_use]
    pub const fn is_acknowledgement(&self) -> bool {
        self.is_action() && matches!(self.state, StateLabel::Acknowledgement)
    }

    /// True for test-notification actions.
    #[must_use]
    pub const fn is_test_notification(&self) -> bool {
        self.is_action() && matches!(self.state, StateLabel::TestNotifications)
    }

    /// Service event reporting an ok state.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.is_service() && self.state.is_ok()
    }

    /// Service event reporting a failing state.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.is_service() && self.state.is_failing()
    }

    /// The kind of notification this event would produce.
    #[must_use]
    pub const fn notification_type(&self) -> NotificationType {
        match (self.event_type, self.state) {
            (EventType::Service, StateLabel::Ok) => NotificationType::Recovery,
            (EventType::Service, _) => NotificationType::Problem,
            (EventType::Action, StateLabel::Acknowledgement) => NotificationType::Acknowledgement,
            (EventType::Action, StateLabel::TestNotifications) => NotificationType::Test,
            (EventType::Action, _) => NotificationType::Unknown,
        }
    }

    /// One-line description for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = format!(
            "{}, {}, {}, {}",
            self.id(),
            self.event_type,
            self.state,
            self.summary.as_deref().unwrap_or("")
        );
        if let Some(time) = self.time {
            out.push_str(&format!(", {time}"));
        }
        out
    }
}
