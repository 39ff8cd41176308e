//! Error types for Slashpay operations.
//!
//! Every failure surfaced by the core library maps onto one of a small set of
//! families: malformed input, wrong-state transitions, conflicts, missing
//! resources, plugin contract violations and errors raised by plugin code.

/// Error codes for host integration (grouped by family).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SlashpayErrorCode {
    /// Feature not implemented
    Unimplemented = 1000,
    /// Transport/discovery layer error
    Transport = 2000,
    /// Malformed input
    Validation = 3000,
    /// Serialization error
    Serialization = 3001,
    /// Transition attempted from the wrong state
    InvalidState = 4000,
    /// Duplicate identifier
    Conflict = 5000,
    /// Resource not found
    NotFound = 6000,
    /// Plugin manifest violates the plugin contract
    Manifest = 7000,
    /// Plugin `init` failed
    PluginInit = 7001,
    /// Plugin manifest could not be produced
    PluginManifest = 7002,
    /// Plugin `stop` failed
    PluginStop = 7003,
    /// Plugin code failed while running
    PluginRuntime = 7004,
    /// Event handler of a plugin failed
    EventDispatch = 7005,
}

/// Error type for the core Slashpay library.
#[derive(Debug, thiserror::Error)]
pub enum SlashpayError {
    /// Feature not implemented yet.
    #[error("{0} is not implemented yet")]
    Unimplemented(&'static str),

    /// Transport/discovery layer error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed input.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Field or parameter name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transition attempted from the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Duplicate identifier.
    #[error("{resource_type} already exists: {identifier}")]
    Conflict {
        /// Type of resource (e.g., "plugin", "payment")
        resource_type: String,
        /// Resource identifier
        identifier: String,
    },

    /// Resource not found.
    #[error("{resource_type} not found: {identifier}")]
    NotFound {
        /// Type of resource (e.g., "plugin", "discovery document")
        resource_type: String,
        /// Resource identifier
        identifier: String,
    },

    /// Plugin manifest violates the plugin contract.
    #[error("invalid manifest for plugin {plugin}: {reason}")]
    Manifest {
        /// Plugin name (or `<unnamed>`)
        plugin: String,
        /// Violated rule
        reason: String,
    },

    /// Plugin `init` raised an error.
    #[error("plugin {plugin} failed to initialize: {reason}")]
    PluginInit {
        /// Plugin name as requested by the caller
        plugin: String,
        /// Underlying error message
        reason: String,
    },

    /// Plugin manifest could not be produced.
    #[error("plugin {plugin} failed to produce a manifest: {reason}")]
    PluginManifest {
        /// Plugin name as requested by the caller
        plugin: String,
        /// Underlying error message
        reason: String,
    },

    /// Plugin `stop` raised an error.
    #[error("plugin {plugin} failed to stop: {reason}")]
    PluginStop {
        /// Plugin name
        plugin: String,
        /// Underlying error message
        reason: String,
    },

    /// Plugin code failed while running (pay, rpc call, ...).
    #[error("plugin {plugin} failed: {reason}")]
    PluginRuntime {
        /// Plugin name
        plugin: String,
        /// Underlying error message
        reason: String,
    },

    /// A plugin event handler failed.
    #[error("EventDispatchError({plugin}): {reason}")]
    EventDispatch {
        /// Plugin name
        plugin: String,
        /// Underlying error message
        reason: String,
    },
}

impl SlashpayError {
    /// Get the error code for host integration.
    pub fn code(&self) -> SlashpayErrorCode {
        match self {
            Self::Unimplemented(_) => SlashpayErrorCode::Unimplemented,
            Self::Transport(_) => SlashpayErrorCode::Transport,
            Self::Validation { .. } => SlashpayErrorCode::Validation,
            Self::Serialization(_) => SlashpayErrorCode::Serialization,
            Self::InvalidState(_) => SlashpayErrorCode::InvalidState,
            Self::Conflict { .. } => SlashpayErrorCode::Conflict,
            Self::NotFound { .. } => SlashpayErrorCode::NotFound,
            Self::Manifest { .. } => SlashpayErrorCode::Manifest,
            Self::PluginInit { .. } => SlashpayErrorCode::PluginInit,
            Self::PluginManifest { .. } => SlashpayErrorCode::PluginManifest,
            Self::PluginStop { .. } => SlashpayErrorCode::PluginStop,
            Self::PluginRuntime { .. } => SlashpayErrorCode::PluginRuntime,
            Self::EventDispatch { .. } => SlashpayErrorCode::EventDispatch,
        }
    }

    /// Returns true if this error is potentially recoverable by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::PluginRuntime { .. })
    }

    /// Create a validation error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::Conflict {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
        }
    }

    /// Create a manifest error.
    pub fn manifest(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Manifest {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an error raised by plugin code while running.
    pub fn plugin_runtime(plugin: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::PluginRuntime {
            plugin: plugin.into(),
            reason: err.to_string(),
        }
    }

    /// Create a transport error from any error type.
    pub fn transport<E: std::error::Error>(err: E) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SlashpayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = SlashpayError::conflict("plugin", "p2sh");
        assert_eq!(err.code(), SlashpayErrorCode::Conflict);
        assert!(!err.is_retryable());

        let err = SlashpayError::Transport("relay offline".into());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SlashpayError::EventDispatch {
            plugin: "lightning".into(),
            reason: "boom".into(),
        };
        assert_eq!(err.to_string(), "EventDispatchError(lightning): boom");

        let err = SlashpayError::validation("amount", "must be positive");
        assert!(err.to_string().contains("invalid amount"));
    }

    #[test]
    fn test_helper_constructors() {
        let err = SlashpayError::not_found("plugin", "p2tr");
        assert_eq!(err.code(), SlashpayErrorCode::NotFound);
        assert!(err.to_string().contains("p2tr"));

        let err = SlashpayError::manifest("p2sh", "missing pay");
        assert_eq!(err.code(), SlashpayErrorCode::Manifest);
    }
}
