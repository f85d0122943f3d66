//! Device Registry Module
//!
//! Maps live engine devices and their formats to stable CIM instance names
//! and back, through ordered first-match lists of resolvers.

pub mod device_registry;
pub mod formats;
pub mod resolvers;

pub use device_registry::*;
pub use formats::*;
pub use resolvers::*;
