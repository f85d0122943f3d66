//! Error types for the storage provider core
//!
//! Every fault raised by the core carries one of four CIM fault categories
//! (not-found, invalid-parameter, not-supported, failed) plus a human
//! readable reason. Ambient failures (configuration, IO, parsing) are
//! reported as `Failed` to the protocol layer.

use thiserror::Error;

/// Unified error type for the provider core
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Client Faults
    // =========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Setting not found: {class_name}/{instance_id}")]
    SettingNotFound {
        class_name: String,
        instance_id: String,
    },

    #[error("Relationship {class_name} does not hold between {left} and {right}")]
    NotAssociated {
        class_name: String,
        left: String,
        right: String,
    },

    #[error("Invalid parameter {parameter}: {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("Invalid instance ID: {0}")]
    InvalidInstanceId(String),

    #[error("Invalid object path: {0}")]
    InvalidObjectPath(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Setting {instance_id} is read-only ({setting_type})")]
    ReadOnlySetting {
        instance_id: String,
        setting_type: String,
    },

    // =========================================================================
    // Internal Faults
    // =========================================================================
    #[error("Failed: {0}")]
    Failed(String),

    #[error("Unrecognized RAID level {level} on {device}")]
    UnknownRaidLevel { device: String, level: String },

    #[error("No provider registered for {0}")]
    NoProvider(String),

    #[error("Storage engine operation failed: {operation}: {reason}")]
    EngineFailed { operation: String, reason: String },

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Setting store error: {path}: {reason}")]
    SettingStore { path: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// CIM fault category of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCategory {
    /// Referenced object does not resolve, or a claimed relationship does not hold
    NotFound,
    /// Caller supplied value failed a precondition
    InvalidParameter,
    /// Operation is structurally disallowed for this class or state
    NotSupported,
    /// Unexpected internal inconsistency
    Failed,
}

impl FaultCategory {
    /// CIM status code carried back to the broker
    pub fn cim_status(&self) -> u32 {
        match self {
            FaultCategory::Failed => 1,
            FaultCategory::InvalidParameter => 4,
            FaultCategory::NotFound => 6,
            FaultCategory::NotSupported => 7,
        }
    }
}

impl std::fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultCategory::NotFound => write!(f, "CIM_ERR_NOT_FOUND"),
            FaultCategory::InvalidParameter => write!(f, "CIM_ERR_INVALID_PARAMETER"),
            FaultCategory::NotSupported => write!(f, "CIM_ERR_NOT_SUPPORTED"),
            FaultCategory::Failed => write!(f, "CIM_ERR_FAILED"),
        }
    }
}

impl Error {
    /// Shorthand for an invalid parameter fault
    pub fn invalid(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Determine the CIM fault category of this error
    pub fn category(&self) -> FaultCategory {
        match self {
            Error::NotFound(_)
            | Error::DeviceNotFound { .. }
            | Error::SettingNotFound { .. }
            | Error::NotAssociated { .. } => FaultCategory::NotFound,

            Error::InvalidParameter { .. }
            | Error::InvalidInstanceId(_)
            | Error::InvalidObjectPath(_) => FaultCategory::InvalidParameter,

            Error::NotSupported(_) | Error::ReadOnlySetting { .. } => FaultCategory::NotSupported,

            Error::Failed(_)
            | Error::UnknownRaidLevel { .. }
            | Error::NoProvider(_)
            | Error::EngineFailed { .. }
            | Error::Configuration(_)
            | Error::SettingStore { .. }
            | Error::Json(_)
            | Error::Yaml(_)
            | Error::Io(_) => FaultCategory::Failed,
        }
    }

    /// Check if this fault was caused by the caller rather than by the provider
    pub fn is_client_error(&self) -> bool {
        !matches!(self.category(), FaultCategory::Failed)
    }

    /// Log this error at the level matching its category
    pub fn trace(&self) {
        if self.is_client_error() {
            tracing::debug!(category = %self.category(), "{}", self);
        } else {
            tracing::error!(category = %self.category(), "{}", self);
        }
    }
}

/// Result type alias for the provider core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let err = Error::DeviceNotFound {
            device: "/dev/sdz".into(),
        };
        assert_eq!(err.category(), FaultCategory::NotFound);

        let err = Error::invalid("RaidLevel", "unsupported level 7");
        assert_eq!(err.category(), FaultCategory::InvalidParameter);

        let err = Error::ReadOnlySetting {
            instance_id: "LMI:LMI_VGStorageSetting:1".into(),
            setting_type: "preconfigured".into(),
        };
        assert_eq!(err.category(), FaultCategory::NotSupported);

        let err = Error::UnknownRaidLevel {
            device: "/dev/md0".into(),
            level: "raid7".into(),
        };
        assert_eq!(err.category(), FaultCategory::Failed);
    }

    #[test]
    fn test_client_errors() {
        assert!(Error::NotFound("x".into()).is_client_error());
        assert!(!Error::NoProvider("/dev/sda".into()).is_client_error());
        assert!(!Error::Configuration("bad".into()).is_client_error());
    }

    #[test]
    fn test_cim_status_codes() {
        assert_eq!(FaultCategory::Failed.cim_status(), 1);
        assert_eq!(FaultCategory::InvalidParameter.cim_status(), 4);
        assert_eq!(FaultCategory::NotFound.cim_status(), 6);
        assert_eq!(FaultCategory::NotSupported.cim_status(), 7);
        assert_eq!(format!("{}", FaultCategory::NotFound), "CIM_ERR_NOT_FOUND");
    }
}
