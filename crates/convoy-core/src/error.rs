//! Named error kinds surfaced to the CLI/REST layer.
//!
//! External tooling matches on the kind names and the fixed messages, so
//! both are part of the public contract and must not drift.

use thiserror::Error;

/// Fixed message for [`ApiError::DoNothingPlan`].
pub const MSG_DO_NOTHING: &str = "Create plan failed: no tasks were generated";

/// An error surfaced by a Plan Controller command.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The command is not legal in the plan's current state, or its
    /// arguments are malformed. Retrying yields the same error.
    #[error("{0}")]
    InvalidRequest(String),

    /// The compiled plan would contain zero tasks.
    #[error("{MSG_DO_NOTHING}")]
    DoNothingPlan,

    /// The dependency graph contains a cycle; no plan was created.
    #[error("Create plan failed: A circular dependency has been detected: {0}")]
    CircularDependency(String),

    /// The addressed model path does not exist.
    #[error("{0}")]
    InvalidLocation(String),

    /// Unexpected internal failure (storage, runtime).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// The literal kind name printed ahead of the message, matched by
    /// external tooling.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "InvalidRequestError",
            Self::DoNothingPlan => "DoNothingPlanError",
            Self::CircularDependency(_) => "CircularDependencyError",
            Self::InvalidLocation(_) => "InvalidLocationError",
            Self::Internal(_) => "InternalServerError",
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn not_found() -> Self {
        Self::InvalidLocation("Not found".to_owned())
    }
}
