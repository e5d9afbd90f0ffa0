use super::events::ShardEvent;
use super::states::{ShardState, TerminalOutcome};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateTransitionError {
    #[error("Invalid shard transition from {from} on event '{event}'")]
    InvalidTransition { from: ShardState, event: &'static str },

    #[error("Shard {shard_id} is already terminal ({state})")]
    AlreadyTerminal { shard_id: String, state: ShardState },
}

/// Determine the target state based on current state and event
pub fn determine_target_state(
    current_state: ShardState,
    event: &ShardEvent,
) -> Result<ShardState, StateTransitionError> {
    let target = match (current_state, event) {
        // Dispatch transitions
        (ShardState::Created, ShardEvent::Dispatch) => ShardState::Dispatched,

        // Start transitions
        (ShardState::Dispatched, ShardEvent::Start) => ShardState::InProgress,

        // Terminal transitions
        (ShardState::InProgress, ShardEvent::Finish { failed_children }) => {
            ShardState::Terminal(TerminalOutcome::from_failures(*failed_children))
        }

        // Invalid transitions
        (from, event) => {
            return Err(StateTransitionError::InvalidTransition {
                from,
                event: event.event_type(),
            })
        }
    };

    Ok(target)
}
