// Test Helpers - in-memory collaborators and a wired system fixture
//
// Shared by unit tests and the integration tests under `tests/`. Nothing in
// here touches a network or a database.

pub mod flaky_store;
pub mod fleet;
pub mod system;

pub use flaky_store::FlakyItemStore;
pub use fleet::{InMemoryFleet, PublishedMessage, ShadowUpdate};
pub use system::TestSystem;
