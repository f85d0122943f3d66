//! Capability/Setting Catalog
//!
//! Capabilities (static or derived per device), settings in four
//! persistence tiers, and the INI store backing the persistent ones.

pub mod capability;
pub mod manager;
pub mod persistence;
pub mod setting;
pub mod sources;

pub use capability::*;
pub use manager::*;
pub use persistence::*;
pub use setting::*;
pub use sources::*;
