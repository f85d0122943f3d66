//! CIM Storage Provider - Local Storage Model Core
//!
//! Exposes the local block storage of a Linux host (disks, partitions,
//! LVM volume groups and logical volumes, MD RAID arrays) as CIM instances,
//! associations, capabilities and settings for a WBEM server.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                        CIMOM (enumerate / get / invoke)                      │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                    ┌───────────────────────┐                                │
//! │                    │   Provider Context    │ ── IndicationQueue ──┐         │
//! │                    │   (dispatch tables)   │                      │         │
//! │                    └───────────┬───────────┘                      ▼         │
//! │           ┌────────────────────┼─────────────────────┐    ┌──────────────┐  │
//! │  ┌────────┴────────┐  ┌────────┴────────┐  ┌─────────┴──┐ │  Dispatcher  │  │
//! │  │ Device Registry │  │  Associations   │  │  Catalog   │ │   (sinks)    │  │
//! │  │ (name ↔ device) │  │ (relation pairs)│  │ (cap/set)  │ └──────────────┘  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────┬──┘                   │
//! │           │          ┌─────────┴─────────┐           │                      │
//! │           │          │    Redundancy     │           │                      │
//! │           │          └─────────┬─────────┘           │                      │
//! │           └────────────────────┼─────────────────────┘                      │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                    ┌───────────┴───────────┐                                │
//! │                    │    Storage Engine     │                                │
//! │                    │   (device graph)      │                                │
//! │                    └───────────────────────┘                                │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`registry`]: Device providers, format providers and name resolution
//! - [`redundancy`]: Redundancy records of devices and their compositions
//! - [`association`]: Relation-driven association enumeration
//! - [`catalog`]: Capabilities, settings and their persistence
//! - [`dispatch`]: Provider context and request dispatch
//! - [`services`]: Extrinsic methods of the configuration services
//! - [`indication`]: Lifecycle indications and their delivery
//! - [`engine`]: In-memory storage engine
//! - [`domain`]: Object paths, devices and the engine trait
//! - [`error`]: Error types and CIM fault mapping

pub mod association;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod error;
pub mod indication;
pub mod metrics;
pub mod redundancy;
pub mod registry;
pub mod services;

// Re-export commonly used types
pub use association::{AssociationRecord, AssociationSource, AssociationSourceRef};

pub use catalog::{
    Capability, CapabilitiesProvider, CapabilitiesProviderRef, Setting, SettingChange,
    SettingGoal, SettingManager, SettingSource, SettingSourceRef, SettingType,
};

pub use config::ProviderConfig;

pub use dispatch::{Instance, ProviderContext, ProviderContextBuilder};

pub use domain::name::InstanceName;

pub use domain::ports::{Device, DeviceKind, StorageEngine, StorageEngineRef};

pub use engine::{DeviceSnapshot, MemoryEngine};

pub use error::{Error, FaultCategory, Result};

pub use indication::{
    Indication, IndicationDispatcher, IndicationFilter, IndicationKind, IndicationQueue,
    IndicationSink, IndicationSinkRef, LoggingSink,
};

pub use metrics::{MetricsSnapshot, ProviderMetrics};

pub use redundancy::{CompositionMode, Redundancy};

pub use registry::{DeviceRegistry, FormatRegistry, SystemIdentity};

pub use services::{ServiceProvider, ServiceProviderRef};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
