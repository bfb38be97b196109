//! Monitored entities.
//!
//! An entity is a host or service grouping that owns checks. Entities are
//! created lazily the first time an event names one the store has never
//! seen, and start out enabled.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::check::CheckKey;
use crate::error::ValidationError;

/// A monitored host or service grouping.
///
/// # Examples
///
/// ```
/// use checkwarden::Entity;
///
/// let entity = Entity::new("web01").unwrap();
/// assert!(entity.enabled);
/// assert!(entity.checks.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique name.
    pub name: String,

    /// Whether the entity is enabled. New entities start enabled.
    pub enabled: bool,

    /// Checks owned by this entity, in the order they were first seen.
    #[serde(default)]
    pub checks: Vec<CheckKey>,
}

impl Entity {
    /// Creates a new enabled entity with no checks.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyEntityName` for a blank name.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyEntityName);
        }
        Ok(Self {
            name,
            enabled: true,
            checks: Vec::new(),
        })
    }

    /// Appends a check to this entity's list. Duplicates are ignored.
    pub fn add_check(&mut self, key: CheckKey) {
        if !self.checks.contains(&key) {
            self.checks.push(key);
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_rejects_blank_name() {
        assert!(matches!(
            Entity::new("  "),
            Err(ValidationError::EmptyEntityName)
        ));
    }

    #[test]
    fn test_add_check_is_append_only_and_deduplicated() {
        let mut entity = Entity::new("web01").unwrap();
        entity.add_check(CheckKey::new("web01", "PING"));
        entity.add_check(CheckKey::new("web01", "HTTP"));
        entity.add_check(CheckKey::new("web01", "PING"));
        assert_eq!(
            entity.checks,
            vec![CheckKey::new("web01", "PING"), CheckKey::new("web01", "HTTP")]
        );
    }
}
