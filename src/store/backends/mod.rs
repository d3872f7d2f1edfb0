//! Document store backend implementations.
//!
//! - [`mongo`] - MongoDB via the official driver
//! - `memory` - In-process store with MongoDB's uniqueness and validation
//!   semantics, compiled for tests and the `testing` feature only

#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod mongo;

#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryStore;
pub use mongo::MongoStore;
