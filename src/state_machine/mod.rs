// State machine module for shard lifecycle tracking
//
// A shard moves Created -> Dispatched -> InProgress -> Terminal(Success | PartialFailure).
// Only terminal shards are eligible for reconciliation.

pub mod events;
pub mod shard_state_machine;
pub mod states;

// Re-export main types for convenient access
pub use events::ShardEvent;
pub use shard_state_machine::{determine_target_state, StateTransitionError};
pub use states::{ShardState, TerminalOutcome};
