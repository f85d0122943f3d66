//! Domain layer - Core types and port definitions
//!
//! This module defines the storage engine port that adapters implement,
//! the device model the engine exposes, and the external CIM identifiers
//! the core maps devices to.

pub mod name;
pub mod ports;

pub use name::*;
pub use ports::*;
