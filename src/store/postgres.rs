//! PostgreSQL entity store and shard ledger.
//!
//! Entities are upserted by `(kind, name)`, so a replayed write overwrites the
//! row it wrote before. The ledger keeps one row per shard whose state only
//! advances and whose terminal result is written once.

use super::{
    ensure_within_write_limit, state_rank, EntityStore, ShardLedger, StoreError, StoreResult,
    WriteOutcome,
};
use crate::models::{KeyedEntity, ShardId, ShardResult};
use crate::state_machine::ShardState;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS disbursement_entities (
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (kind, name)
    )",
    "CREATE TABLE IF NOT EXISTS disbursement_shards (
        shard_id TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        state_rank SMALLINT NOT NULL,
        result JSONB,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
];

/// Create the entity and ledger tables when missing
pub async fn ensure_schema(pool: &PgPool) -> StoreResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn write_many(&self, entities: &[KeyedEntity]) -> StoreResult<Vec<WriteOutcome>> {
        ensure_within_write_limit(entities.len())?;

        let mut outcomes = Vec::with_capacity(entities.len());
        for entity in entities {
            let payload = serde_json::to_value(&entity.payload)?;
            let written = sqlx::query(
                "INSERT INTO disbursement_entities (kind, name, payload)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (kind, name)
                 DO UPDATE SET payload = EXCLUDED.payload, updated_at = now()",
            )
            .bind(&entity.key.kind)
            .bind(&entity.key.name)
            .bind(&payload)
            .execute(&self.pool)
            .await;

            match written {
                Ok(_) => outcomes.push(WriteOutcome::written(entity.key.clone())),
                Err(e) => {
                    warn!(key = %entity.key, error = %e, "Entity upsert failed");
                    outcomes.push(WriteOutcome::failed(entity.key.clone(), e.to_string()));
                }
            }
        }

        debug!(entities = entities.len(), "Entity batch written");
        Ok(outcomes)
    }
}

#[derive(Debug, Clone)]
pub struct PgShardLedger {
    pool: PgPool,
}

impl PgShardLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShardLedger for PgShardLedger {
    async fn mark_state(&self, shard_id: &ShardId, state: ShardState) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO disbursement_shards (shard_id, state, state_rank)
             VALUES ($1, $2, $3)
             ON CONFLICT (shard_id)
             DO UPDATE SET state = EXCLUDED.state, state_rank = EXCLUDED.state_rank, updated_at = now()
             WHERE disbursement_shards.state_rank < EXCLUDED.state_rank",
        )
        .bind(shard_id.as_str())
        .bind(state.to_string())
        .bind(i16::from(state_rank(state)))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn state(&self, shard_id: &ShardId) -> StoreResult<Option<ShardState>> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM disbursement_shards WHERE shard_id = $1")
                .bind(shard_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        state
            .map(|s| s.parse::<ShardState>().map_err(|e| StoreError::database("state", e)))
            .transpose()
    }

    async fn terminal_result(&self, shard_id: &ShardId) -> StoreResult<Option<ShardResult>> {
        let result: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT result FROM disbursement_shards WHERE shard_id = $1 AND result IS NOT NULL",
        )
        .bind(shard_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(result.map(serde_json::from_value).transpose()?)
    }

    async fn record_terminal(&self, result: ShardResult) -> StoreResult<ShardResult> {
        let state = ShardState::Terminal(result.outcome);
        let payload = serde_json::to_value(&result)?;

        sqlx::query(
            "INSERT INTO disbursement_shards (shard_id, state, state_rank, result)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (shard_id)
             DO UPDATE SET state = EXCLUDED.state, state_rank = EXCLUDED.state_rank,
                           result = EXCLUDED.result, updated_at = now()
             WHERE disbursement_shards.result IS NULL",
        )
        .bind(result.shard_id.as_str())
        .bind(state.to_string())
        .bind(i16::from(state_rank(state)))
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        self.terminal_result(&result.shard_id)
            .await?
            .ok_or_else(|| StoreError::database("record_terminal", "terminal result missing after insert"))
    }
}
