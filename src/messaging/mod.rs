//! # Messaging Module
//!
//! Queue-driven execution: every workflow step arrives as a [`WorkItem`] on a
//! [`WorkQueue`]. Delays implement the provisioning poll and visibility
//! timeouts give crash recovery by redelivery.

pub mod errors;
pub mod memory_queue;
pub mod pg_queue;
pub mod queue;
pub mod work_item;

pub use errors::{MessagingError, MessagingResult};
pub use memory_queue::InMemoryWorkQueue;
pub use pg_queue::PgWorkQueue;
pub use queue::WorkQueue;
pub use work_item::{ReceivedWorkItem, WorkItem};
