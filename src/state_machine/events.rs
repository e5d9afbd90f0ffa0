use serde::{Deserialize, Serialize};

/// Events that can trigger shard state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ShardEvent {
    /// The queue acknowledged the shard's task
    Dispatch,
    /// A worker picked the shard up
    Start,
    /// Every child was attempted; carries the number of failed children
    Finish { failed_children: usize },
}

impl ShardEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Start => "start",
            Self::Finish { .. } => "finish",
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }
}
