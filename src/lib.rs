#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Commander Core
//!
//! Command delivery workflow engine for IoT device fleets.
//!
//! ## Overview
//!
//! A **command** is a reusable operation template. A **message** dispatches a
//! command to a set of targets: devices named directly, members of device
//! groups, or the results of a fleet index query. Each message moves through
//! a queue-driven workflow that resolves its targets, splits them into
//! batches and delivers every batch over the command's delivery method:
//!
//! - **Topic**: pub/sub publish, per device or to one shared topic
//! - **Shadow**: desired-state update on each device's named shadow
//! - **Job**: one fleet job per batch, with an ephemeral group when the
//!   batch exceeds the job target ceiling
//!
//! Device replies are matched back to their dispatch by correlation id.
//!
//! ## Module Organization
//!
//! - [`models`] - Commands, messages, recipients, replies
//! - [`storage`] - Single-table item store, key codec, tag intersection
//! - [`repositories`] - Entity to item mapping
//! - [`orchestration`] - Workflow steps, delivery strategies, system wiring
//! - [`messaging`] - Work items and queues
//! - [`fleet`] - External fleet service seams
//! - [`correlation`] - Reply topics and the response correlator
//! - [`services`] - Caller-facing command and message operations
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use commander_core::config::ConfigManager;
//! use commander_core::orchestration::{CommanderSystem, FleetClients};
//!
//! # async fn example(fleet: FleetClients) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! commander_core::logging::init_structured_logging(&manager.config().logging);
//!
//! let system = CommanderSystem::connect_postgres(manager.config().clone(), fleet).await?;
//! let mut handle = system.start();
//! // ... serve requests through system.commands / system.messages ...
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```
//!
//! The in-memory fixtures in `test_helpers` are compiled only for this
//! crate's own tests or with the `test-helpers` feature.

pub mod config;
pub mod correlation;
pub mod error;
pub mod fleet;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod repositories;
pub mod services;
pub mod state_machine;
pub mod storage;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
pub mod validation;

pub use config::{CommanderConfig, ConfigManager};
pub use error::{CommanderError, CommanderResult};
pub use models::{Command, DeliveryMethod, Message, Recipient, Reply};
pub use orchestration::{CommanderSystem, CommanderSystemHandle, FleetClients};
pub use services::{CommandService, MessageService};
pub use state_machine::{MessageStatus, RecipientStatus};
