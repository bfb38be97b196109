//! # checkwarden - event processing for monitoring and alerting
//!
//! checkwarden consumes check results and human actions from a shared queue,
//! keeps the state history of every monitored check, decides through an
//! ordered chain of suppression filters whether a transition deserves an
//! alert, and enqueues structured notifications for a delivery subsystem.
//!
//! ## Core Concepts
//!
//! - **Entity**: a monitored host or service, owning checks
//! - **Check**: one monitored service on an entity, with its state history and maintenance windows
//! - **Event**: one inbound unit of work, either a service state or an action
//! - **Filter**: a suppression rule voting on whether a transition should notify
//! - **Notification**: the outbound record of an unsuppressed transition
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use checkwarden::processor::{Processor, Stores};
//! use checkwarden::storage::InMemoryStore;
//! use checkwarden::ProcessorConfig;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let processor = Processor::new(ProcessorConfig::default(), Stores::shared(store))?;
//! let outcome = processor.run()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Domain model
pub mod check;
pub mod entity;
pub mod error;
pub mod event;
pub mod time;

// Storage and bookkeeping
pub mod counters;
pub mod storage;

// Decision pipeline
pub mod config;
pub mod filters;
pub mod notification;
pub mod processor;

// Re-export primary types at crate root for convenience
pub use check::{Check, CheckId, CheckKey, CheckState, StateLabel};
pub use config::{ConfigError, ProcessorConfig};
pub use entity::Entity;
pub use error::{ValidationError, WardenError, WardenResult};
pub use event::{Event, EventType};
pub use filters::{Filter, FilterChain, FilterContext};
pub use notification::{Notification, NotificationType, Severity};
pub use processor::{EventOutcome, Processor, ProcessorHandle, RunOutcome, StopHandle, Stores};
pub use storage::{CheckStore, EntityStore, InMemoryStore, StateStore, StoreError};
pub use time::TimeRange;
