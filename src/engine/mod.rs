//! Storage Engine Adapters
//!
//! The provider core talks to the storage engine only through the
//! [`StorageEngine`](crate::domain::StorageEngine) port. This module ships
//! the in-memory engine used by the host binary's snapshot mode and by
//! the test suite.

pub mod memory;

pub use memory::{DeviceSnapshot, MemoryEngine};
