pub mod disburse_row;
pub mod entity;
pub mod payload;
pub mod process_request;
pub mod recon;
pub mod shard;

// Re-export core models for easy access
pub use disburse_row::DisburseRow;
pub use entity::{checked_total, DisbursementEntity, EntityKey, KeyedEntity};
pub use payload::{EntityPayload, PayloadType};
pub use process_request::{EntityChunk, ProcessRequest};
pub use recon::Recon;
pub use shard::{Shard, ShardId, ShardResult};
