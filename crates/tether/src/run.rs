//! The run model: one attempted execution record for a given parameter set.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a run.
///
/// Stored as TEXT (`"PENDING"`, `"RUNNING"`, ...) for migration portability.
/// `Cancelled` is a terminal label reserved for future use; nothing in the
/// control plane transitions into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// The wire/database spelling of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }

    /// Terminal states admit no further lease-based transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Active runs participate in implicit deduplication.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status string is not one of the five known states.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown run status {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for RunStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCEEDED" => Ok(RunStatus::Succeeded),
            "FAILED" => Ok(RunStatus::Failed),
            "CANCELLED" => Ok(RunStatus::Cancelled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A durable run row, as read from the store.
///
/// This is a local snapshot: authority for any state change is the store via
/// conditional updates, never mutation of this value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub status: RunStatus,

    // Immutable inputs
    pub parameters: serde_json::Value,
    pub payload_hash: String,

    // Lifecycle timestamps
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    // Execution and leasing
    pub attempt_count: i32,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    // Outputs
    pub result_ref: Option<String>,
    pub last_error: Option<String>,
}

impl Run {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Whether the lease on this run has expired as of `now`.
    ///
    /// Only meaningful for `Running` rows; `Pending` and terminal rows carry
    /// no live lease.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lease_expires_at, Some(expires) if expires < now)
    }
}
