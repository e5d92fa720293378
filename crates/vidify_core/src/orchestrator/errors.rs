//! Error types for the orchestrator.
//!
//! Submission errors are synchronous and never create a job. Stage errors
//! happen at runtime and feed the retry policy:
//! Job → Stage → Attempt → Detail

use std::time::Duration;

use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::models::{DefinitionError, HookPoint};
use crate::orchestrator::registry::RegistryError;
use crate::resolver::ResolveError;

/// Rejected submission. No job is created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Unknown variant '{0}'")]
    UnknownVariant(String),

    #[error("Variant '{variant}' overrides unknown stage '{stage}'")]
    UnknownStage { variant: String, stage: String },

    #[error("Enabled stage '{stage}' depends on disabled stage '{dependency}'")]
    DependencyViolation { stage: String, dependency: String },

    /// The resolved configuration names a stage the registry does not know.
    #[error("Stage '{0}' is not registered")]
    UnregisteredStage(String),

    #[error("Hook '{hook}' references unregistered handler '{handler}'")]
    UnknownHookHandler { hook: HookPoint, handler: String },

    #[error("Submission not authorized: {0}")]
    Unauthorized(String),

    #[error("Submission requires a running Tokio runtime")]
    NoRuntime,
}

impl From<ResolveError> for SubmitError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnknownVariant(name) => Self::UnknownVariant(name),
            ResolveError::UnknownStage { variant, stage } => Self::UnknownStage { variant, stage },
        }
    }
}

impl From<RegistryError> for SubmitError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DependencyViolation { stage, dependency } => {
                Self::DependencyViolation { stage, dependency }
            }
            RegistryError::UnknownStage(stage) => Self::UnregisteredStage(stage),
        }
    }
}

/// Errors building an orchestrator.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Invalid pipeline definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Variant '{variant}' cannot be resolved: {source}")]
    Variant {
        variant: String,
        #[source]
        source: ResolveError,
    },

    #[error("No stage compute backend configured")]
    MissingCompute,
}

/// Failure of one stage attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// The external computation reported an error.
    #[error("{message}")]
    Failure { message: String, retryable: bool },

    /// The invocation exceeded its timeout.
    #[error("Stage timed out after {}s", .after.as_secs_f64())]
    Timeout { after: Duration },

    /// The hook following the stage failed.
    #[error("Hook '{hook}' failed: {source}")]
    Hook {
        hook: HookPoint,
        #[source]
        source: HookError,
    },

    /// The dispatch layer refused the invocation.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),
}

impl StageError {
    /// Create a retryable failure.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a timeout error.
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout { after }
    }

    /// Create a hook error.
    pub fn hook(hook: HookPoint, source: HookError) -> Self {
        Self::Hook { hook, source }
    }

    /// Mark the failure as permanent so it is never retried.
    pub fn permanent(self) -> Self {
        match self {
            Self::Failure { message, .. } => Self::Failure {
                message,
                retryable: false,
            },
            other => other,
        }
    }

    /// Whether the retry policy may re-dispatch after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Failure { retryable, .. } => *retryable,
            Self::Timeout { .. } | Self::Hook { .. } => true,
            Self::Dispatch(_) => false,
        }
    }
}

impl From<DispatchError> for StageError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Timeout { after } => Self::Timeout { after },
            DispatchError::Closed => Self::Dispatch(err.to_string()),
        }
    }
}

/// Failure raised by a lifecycle hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),

    #[error("Rejected: {0}")]
    Rejected(String),
}

impl HookError {
    /// Create a generic hook failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Create a rejection (e.g. an approval gate saying no).
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// Result type for stage computations.
pub type ComputeResult<T> = Result<T, StageError>;

/// Result type for submissions.
pub type SubmitResult<T> = Result<T, SubmitError>;

/// Result type for hooks.
pub type HookResult<T> = Result<T, HookError>;
