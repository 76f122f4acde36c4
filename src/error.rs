//! Error types for the CredentialsBinding controller
//!
//! Errors are structured with fields to aid debugging in production. Store
//! failures are classified into not-found, conflict and everything else so
//! that each call site can decide whether an absent object is benign.

use std::time::Duration;

use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that is neither not-found nor a conflict
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A referenced object does not exist in the store
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Kind of the missing object (e.g. "Secret")
        kind: String,
        /// Namespace of the missing object
        namespace: String,
        /// Name of the missing object
        name: String,
    },

    /// A conditional write lost against a concurrent writer
    #[error("conflict writing {kind} {namespace}/{name}: object was modified")]
    Conflict {
        /// Kind of the contended object
        kind: String,
        /// Namespace of the contended object
        namespace: String,
        /// Name of the contended object
        name: String,
    },

    /// Deletion refused because consumers still depend on the binding
    #[error(
        "Cannot delete CredentialsBinding {binding}, because the following Shoots are still referencing it: {}",
        consumers.join(", ")
    )]
    DeletionBlocked {
        /// Binding key (namespace/name)
        binding: String,
        /// Consumers still referencing the binding
        consumers: Vec<String>,
    },

    /// The reconcile pass ran out of time before starting a step
    #[error("reconcile deadline of {}s exceeded before step '{step}'", budget.as_secs())]
    DeadlineExceeded {
        /// The step that was not started
        step: String,
        /// The configured budget for one pass
        budget: Duration,
    },

    /// Invalid object or configuration
    #[error("validation error for {object}: {message}")]
    Validation {
        /// Object or setting that failed validation
        object: String,
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "cache", "events")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for the given object
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error for the given object
    pub fn conflict(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a blocked-deletion error naming the consumers
    pub fn deletion_blocked(binding: impl Into<String>, consumers: Vec<String>) -> Self {
        Self::DeletionBlocked {
            binding: binding.into(),
            consumers,
        }
    }

    /// Create a deadline error for a step that was not started
    pub fn deadline_exceeded(step: impl Into<String>, budget: Duration) -> Self {
        Self::DeadlineExceeded {
            step: step.into(),
            budget,
        }
    }

    /// Create a validation error for a specific object or setting
    pub fn validation_for(object: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True if the store reported the object as absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// True if a conditional write was rejected by the store
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Everything the reconciler produces is retried by the controller's error
    /// policy except invalid objects, which need a user fix first. A missing
    /// Secret or Quota is retried since it may appear later, and API errors
    /// such as throttling or a missing permission can clear up on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Validation { .. } => false,
            Error::Kube { .. }
            | Error::NotFound { .. }
            | Error::Conflict { .. }
            | Error::DeletionBlocked { .. }
            | Error::DeadlineExceeded { .. }
            | Error::Internal { .. } => true,
        }
    }
}
