use serde::{Deserialize, Serialize};
use std::fmt;

/// How a terminal shard finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    /// Every child was written
    Success,
    /// At least one child failed to write
    PartialFailure,
}

impl TerminalOutcome {
    pub fn from_failures(failed_children: usize) -> Self {
        if failed_children == 0 {
            Self::Success
        } else {
            Self::PartialFailure
        }
    }
}

impl fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialFailure => write!(f, "partial_failure"),
        }
    }
}

/// Shard lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "outcome")]
pub enum ShardState {
    /// Synthesized by the dispatcher, not yet acknowledged by the queue
    Created,
    /// Acknowledged by the queue
    Dispatched,
    /// A worker is writing the shard's children
    InProgress,
    /// Every child has been attempted exactly once
    Terminal(TerminalOutcome),
}

impl ShardState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    /// Check if this is an active state (shard is being processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProgress)
    }

    pub fn outcome(&self) -> Option<TerminalOutcome> {
        match self {
            Self::Terminal(outcome) => Some(*outcome),
            _ => None,
        }
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Terminal(TerminalOutcome::Success) => write!(f, "success"),
            Self::Terminal(TerminalOutcome::PartialFailure) => write!(f, "partial_failure"),
        }
    }
}

impl std::str::FromStr for ShardState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "dispatched" => Ok(Self::Dispatched),
            "in_progress" => Ok(Self::InProgress),
            "success" => Ok(Self::Terminal(TerminalOutcome::Success)),
            "partial_failure" => Ok(Self::Terminal(TerminalOutcome::PartialFailure)),
            _ => Err(format!("Invalid shard state: {s}")),
        }
    }
}
