//! Error types for the migration controller
//!
//! Errors carry the cluster, hub or work they concern so a failed reconcile
//! can be traced back to the object that caused it. Every error also has a
//! [`ErrorClass`] that decides how the state machine reacts to it.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// How the migration state machine reacts to an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Requeue within the current phase (API unavailable, conflict, not found yet)
    Transient,
    /// An input the phase needs does not exist yet; wait until the phase budget runs out
    Precondition,
    /// Malformed data; retried a fixed number of times, then the migration fails
    Data,
}

/// Main error type for migration operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The migration request itself is invalid
    #[error("validation error for {migration}: {message}")]
    Validation {
        /// Name of the migration
        migration: String,
        /// Description of what's invalid
        message: String,
    },

    /// Something a phase depends on is missing on one of the hubs
    #[error("prerequisite missing on {hub}: {message}")]
    PrerequisiteMissing {
        /// Hub where the input was expected
        hub: String,
        /// What is missing
        message: String,
    },

    /// A work order reported status feedback that cannot be interpreted
    #[error("malformed feedback from {work} for {cluster}: {message}")]
    Feedback {
        /// Managed cluster the work targets
        cluster: String,
        /// Name of the work
        work: String,
        /// What was wrong with the value
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// An optimistic-concurrency write lost the race
    #[error("conflict writing {resource}")]
    Conflict {
        /// Resource that was being written
        resource: String,
    },

    /// Building a client for a hub failed
    #[error("cannot connect to hub {hub}: {message}")]
    HubConnection {
        /// Hub name
        hub: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "runner", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a validation error without migration context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            migration: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a named migration
    pub fn validation_for(migration: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            migration: migration.into(),
            message: msg.into(),
        }
    }

    /// Create a missing-prerequisite error for a hub
    pub fn prerequisite_missing(hub: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PrerequisiteMissing {
            hub: hub.into(),
            message: msg.into(),
        }
    }

    /// Create a malformed-feedback error
    pub fn feedback(
        cluster: impl Into<String>,
        work: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Feedback {
            cluster: cluster.into(),
            work: work.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a resource kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a conflict error for a resource
    pub fn conflict(resource: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
        }
    }

    /// Create a hub connection error
    pub fn hub_connection(hub: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::HubConnection {
            hub: hub.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(msg: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Classify the error for the state machine
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Kube { source } => match source {
                kube::Error::SerdeError(_) => ErrorClass::Data,
                kube::Error::Api(ae) if ae.code == 400 || ae.code == 422 => ErrorClass::Data,
                _ => ErrorClass::Transient,
            },
            Error::PrerequisiteMissing { .. } => ErrorClass::Precondition,
            Error::Validation { .. } | Error::Feedback { .. } | Error::Serialization { .. } => {
                ErrorClass::Data
            }
            Error::Conflict { .. } | Error::HubConnection { .. } | Error::Internal { .. } => {
                ErrorClass::Transient
            }
        }
    }

    /// Check if this error is retryable
    ///
    /// Data errors are retried only by the state machine's bounded counter;
    /// everything else may be retried freely.
    pub fn is_retryable(&self) -> bool {
        self.class() != ErrorClass::Data
    }

    /// Check if this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }

    /// Check if this error means the object no longer exists
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
