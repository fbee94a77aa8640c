//! Queue error taxonomy

use crate::job::JobState;

/// Result alias used throughout the crate
pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Unknown job type, or a task position the registry does not know about.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A task or hook identifier has no registered handler.
    #[error("Resolution error: no handler registered for '{0}'")]
    Resolution(String),

    /// Transient lock or deadlock while claiming.
    #[error("Claim contention: {0}")]
    ClaimContention(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Task '{task}' failed: {message}")]
    Task { task: String, message: String },

    #[error("{role} hook '{hook}' failed: {message}")]
    Hook {
        role: &'static str,
        hook: String,
        message: String,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    pub(crate) fn task(task: &str, err: anyhow::Error) -> Self {
        Self::Task {
            task: task.to_string(),
            message: format!("{err:#}"),
        }
    }

    pub(crate) fn hook(role: &'static str, hook: &str, err: anyhow::Error) -> Self {
        Self::Hook {
            role,
            hook: hook.to_string(),
            message: format!("{err:#}"),
        }
    }

    /// Errors the worker loop must not swallow: the job's state could not be
    /// recorded, or the claim could not be made after retrying.
    pub fn is_fatal_to_worker(&self) -> bool {
        matches!(
            self,
            QueueError::Persistence(_) | QueueError::ClaimContention(_)
        )
    }
}
