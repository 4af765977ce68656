//! Error types for the Resource Aggregator
//!
//! Provides structured error types for every stage of device discovery:
//! plugin contact, document parsing, persistence, task tracking and the
//! add-compute validation steps.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Status Messages
// =============================================================================

/// Message ids carried in the structured error response
pub mod status {
    pub const SUCCESS: &str = "Base.1.13.0.Success";
    pub const COULD_NOT_ESTABLISH_CONNECTION: &str = "Base.1.13.0.CouldNotEstablishConnection";
    pub const RESOURCE_AT_URI_UNAUTHORIZED: &str = "Base.1.13.0.ResourceAtURIUnauthorized";
    pub const INTERNAL_ERROR: &str = "Base.1.13.0.InternalError";
    pub const RESOURCE_ALREADY_EXISTS: &str = "Base.1.13.0.ResourceAlreadyExists";
    pub const PROPERTY_VALUE_NOT_IN_LIST: &str = "Base.1.13.0.PropertyValueNotInList";
    pub const PROPERTY_VALUE_FORMAT_ERROR: &str = "Base.1.13.0.PropertyValueFormatError";
    pub const TASK_CANCELLED: &str = "TaskEvent.1.0.3.TaskCancelled";
}

/// Unified error type for the aggregator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Plugin Contact Errors
    // =========================================================================
    #[error("Could not establish connection to {url}: {reason}")]
    UnreachablePlugin { url: String, reason: String },

    #[error("Timed out contacting {url}")]
    PluginTimeout { url: String },

    #[error("Invalid resource username/password for {url}")]
    Unauthorized { url: String },

    #[error("Plugin returned status {status} for {url}: {body}")]
    UpstreamStatus {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Malformed response from {path}: {reason}")]
    MalformedUpstreamBody { path: String, reason: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Add-Compute Validation Errors
    // =========================================================================
    #[error("Provided firmware version {expected} does not match supported firmware version {found} of the plugin {plugin_id}")]
    UnsupportedFirmwareVersion {
        plugin_id: String,
        expected: String,
        found: String,
    },

    #[error("Plugin type {0} is not supported")]
    UnsupportedPluginType(String),

    #[error("Invalid connection method variant: {0}")]
    InvalidConnectionMethod(String),

    #[error("Resource already exists: {kind} with UUID {uuid}")]
    DuplicateResource { kind: String, uuid: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Persistence failure for {table}:{key}: {reason}")]
    PersistenceFailure {
        table: String,
        key: String,
        reason: String,
    },

    // =========================================================================
    // Task Errors
    // =========================================================================
    /// Sentinel returned by the task service when an operator asked for cancellation
    #[error("Task {task_id} is being cancelled")]
    TaskCancelling { task_id: String },

    #[error("Task {task_id} cancelled by operator at {percent}%")]
    CancelledByOperator { task_id: String, percent: u32 },

    #[error("Task update failed: {0}")]
    TaskUpdate(String),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a persistence failure from any displayable reason
    pub fn persistence(table: &str, key: &str, reason: impl std::fmt::Display) -> Self {
        Error::PersistenceFailure {
            table: table.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Build a malformed-body error from any displayable reason
    pub fn malformed(path: &str, reason: impl std::fmt::Display) -> Self {
        Error::MalformedUpstreamBody {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is a connection-level contact failure.
    ///
    /// Only these are eligible for the status-probe retry; an auth rejection
    /// or an error status from a reachable plugin is never retried.
    pub fn is_contact_failure(&self) -> bool {
        matches!(
            self,
            Error::UnreachablePlugin { .. } | Error::PluginTimeout { .. } | Error::Http(_)
        )
    }

    /// Whether this error means the operator cancelled the task
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Error::TaskCancelling { .. } | Error::CancelledByOperator { .. }
        )
    }

    /// HTTP-style status code reported to the top-level caller
    pub fn status_code(&self) -> u16 {
        match self {
            Error::UnreachablePlugin { .. } | Error::PluginTimeout { .. } | Error::Http(_) => 503,
            Error::Unauthorized { .. } => 401,
            Error::UpstreamStatus { status, .. } => *status,
            Error::DuplicateResource { .. } => 409,
            Error::UnsupportedFirmwareVersion { .. }
            | Error::UnsupportedPluginType(_)
            | Error::InvalidConnectionMethod(_) => 400,
            _ => 500,
        }
    }

    /// Message id reported to the top-level caller
    pub fn status_message(&self) -> &'static str {
        match self {
            Error::UnreachablePlugin { .. } | Error::PluginTimeout { .. } | Error::Http(_) => {
                status::COULD_NOT_ESTABLISH_CONNECTION
            }
            Error::Unauthorized { .. } => status::RESOURCE_AT_URI_UNAUTHORIZED,
            Error::DuplicateResource { .. } => status::RESOURCE_ALREADY_EXISTS,
            Error::UnsupportedFirmwareVersion { .. } | Error::UnsupportedPluginType(_) => {
                status::PROPERTY_VALUE_NOT_IN_LIST
            }
            Error::InvalidConnectionMethod(_) => status::PROPERTY_VALUE_FORMAT_ERROR,
            Error::TaskCancelling { .. } | Error::CancelledByOperator { .. } => {
                status::TASK_CANCELLED
            }
            _ => status::INTERNAL_ERROR,
        }
    }

    /// Structured message arguments identifying the offending resource
    pub fn message_args(&self) -> Vec<String> {
        match self {
            Error::UnreachablePlugin { url, .. }
            | Error::PluginTimeout { url }
            | Error::Unauthorized { url } => {
                vec![url.clone()]
            }
            Error::DuplicateResource { kind, .. } => vec![kind.clone(), kind.clone(), kind.clone()],
            Error::UnsupportedFirmwareVersion { found, .. } => {
                vec!["FirmwareVersion".to_string(), found.clone()]
            }
            Error::UnsupportedPluginType(plugin_type) => {
                vec!["PluginType".to_string(), plugin_type.clone()]
            }
            Error::MalformedUpstreamBody { path, .. } => vec![path.clone()],
            Error::TaskCancelling { task_id } | Error::CancelledByOperator { task_id, .. } => {
                vec![task_id.clone()]
            }
            _ => Vec::new(),
        }
    }

    /// Convert into the structured response handed to the caller
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            status_code: self.status_code(),
            status_message: self.status_message().to_string(),
            message: self.to_string(),
            message_args: self.message_args(),
        }
    }
}

/// Structured failure result returned to the top-level caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status_code: u16,
    pub status_message: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_args: Vec<String>,
}

/// Result type alias for the aggregator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_failure_classification() {
        let err = Error::UnreachablePlugin {
            url: "https://10.0.0.1:45001/redfish/v1/Systems".into(),
            reason: "connection refused".into(),
        };
        assert!(err.is_contact_failure());
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.status_message(), status::COULD_NOT_ESTABLISH_CONNECTION);

        let err = Error::PluginTimeout {
            url: "https://10.0.0.1:45001/redfish/v1/Systems".into(),
        };
        assert!(err.is_contact_failure());
        assert_eq!(err.status_code(), 503);

        let err = Error::Unauthorized {
            url: "https://10.0.0.1:45001/redfish/v1/Systems".into(),
        };
        assert!(!err.is_contact_failure());
        assert_eq!(err.status_code(), 401);
        assert_eq!(
            err.message_args(),
            vec!["https://10.0.0.1:45001/redfish/v1/Systems".to_string()]
        );

        let err = Error::UpstreamStatus {
            status: 404,
            url: "https://10.0.0.1:45001/redfish/v1/Chassis".into(),
            body: "not found".into(),
        };
        assert!(!err.is_contact_failure());
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.status_message(), status::INTERNAL_ERROR);
    }

    #[test]
    fn test_error_response() {
        let err = Error::UnsupportedFirmwareVersion {
            plugin_id: "GRF_v1.0.0".into(),
            expected: "v1.0.0".into(),
            found: "v2.0.0".into(),
        };
        let response = err.to_response();
        assert_eq!(response.status_code, 400);
        assert_eq!(response.status_message, status::PROPERTY_VALUE_NOT_IN_LIST);
        assert_eq!(response.message_args, vec!["FirmwareVersion", "v2.0.0"]);

        let err = Error::DuplicateResource {
            kind: "ComputerSystem".into(),
            uuid: "u1".into(),
        };
        assert_eq!(err.to_response().status_code, 409);
    }

    #[test]
    fn test_cancellation() {
        let err = Error::TaskCancelling {
            task_id: "task-1".into(),
        };
        assert!(err.is_cancellation());
        assert_eq!(err.status_message(), status::TASK_CANCELLED);
        assert!(!Error::Internal("x".into()).is_cancellation());
    }
}
