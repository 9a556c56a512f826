use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// State of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Initial,
    Running,
    Stopping,
    Stopped,
    Failed,
    Successful,
    Invalid,
}

impl PlanState {
    /// True for states in which no task can still make forward progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::Failed | Self::Successful | Self::Invalid
        )
    }

    /// True while the scheduler owns the plan.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Successful => "successful",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanState {
    type Err = PlanStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            "successful" => Ok(Self::Successful),
            "invalid" => Ok(Self::Invalid),
            other => Err(PlanStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanState`] string.
#[derive(Debug, Clone)]
pub struct PlanStateParseError(pub String);

impl fmt::Display for PlanStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan state: {:?}", self.0)
    }
}

impl std::error::Error for PlanStateParseError {}

// ---------------------------------------------------------------------------

/// State of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Initial,
    Running,
    Success,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskState {
    type Err = TaskStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(TaskStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskState`] string.
#[derive(Debug, Clone)]
pub struct TaskStateParseError(pub String);

impl fmt::Display for TaskStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task state: {:?}", self.0)
    }
}

impl std::error::Error for TaskStateParseError {}

// ---------------------------------------------------------------------------

/// Kind of a task -- determines how the scheduler executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Convergence-polled configuration task applied via the manifest layer.
    Config,
    /// Runs a plugin handler directly in-process.
    Callback,
    /// Artificial dependency edge within an ordered chain; no-op at runtime.
    OrderedListLink,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Callback => "callback",
            Self::OrderedListLink => "ordered_list_link",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskKind {
    type Err = TaskKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "config" => Ok(Self::Config),
            "callback" => Ok(Self::Callback),
            "ordered_list_link" => Ok(Self::OrderedListLink),
            other => Err(TaskKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskKind`] string.
#[derive(Debug, Clone)]
pub struct TaskKindParseError(pub String);

impl fmt::Display for TaskKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task kind: {:?}", self.0)
    }
}

impl std::error::Error for TaskKindParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// The persisted plan snapshot. At most one current plan row exists.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanRecord {
    pub id: Uuid,
    /// Monotonically increasing plan-generation counter; bumped on every
    /// recreate so stale in-flight operations can be detected.
    pub generation: i64,
    pub state: PlanState,
    /// The model generation this plan was compiled from.
    pub model_generation: i64,
    pub created_at: DateTime<Utc>,
}

/// A persisted task within the plan snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskRecord {
    pub id: Uuid,
    pub plan_id: Uuid,
    /// Stable human-readable description, unique within the plan. Tasks are
    /// matched across plan recreations by this string.
    pub description: String,
    pub item_path: String,
    pub node: String,
    /// Execution subtree (cluster path or the management-server root).
    pub subtree: String,
    pub phase: i64,
    pub kind: TaskKind,
    /// When false, success is never recorded in the ledger and the task
    /// reappears in every recreated plan.
    pub persisted: bool,
    pub state: TaskState,
}

/// A durable record of a previously successful, persisted task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub description: String,
    pub item_path: String,
    pub node: String,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
