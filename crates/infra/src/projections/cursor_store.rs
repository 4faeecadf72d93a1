//! Postgres persistence for projection cursors (checkpoints).
//!
//! Persisted cursors let a projection resume after a restart instead of being
//! rebuilt, and keep replays idempotent (`sequence <= cursor` is skipped).

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tracing::warn;

use proofing_core::AggregateId;
use proofing_events::CursorStore;

use crate::db;

/// Postgres-backed projection cursor store (`projection_offsets` table).
///
/// The `CursorStore` contract is infallible: a failed read is treated as "no
/// cursor" and a failed write is logged. Both only cause re-application of
/// events, which projections absorb because their upserts are idempotent.
#[derive(Debug, Clone)]
pub struct PostgresCursorStore {
    pool: Arc<PgPool>,
}

impl PostgresCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn fetch_cursor(&self, projection_name: &str, aggregate_id: AggregateId) -> Result<Option<u64>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT last_sequence_number
            FROM projection_offsets
            WHERE projection_name = $1 AND aggregate_id = $2
            "#,
        )
        .bind(projection_name)
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await?;

        row.map(|r| r.try_get::<i64, _>("last_sequence_number").map(|seq| seq as u64))
            .transpose()
    }

    pub async fn store_cursor(
        &self,
        projection_name: &str,
        aggregate_id: AggregateId,
        sequence_number: u64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO projection_offsets (
                projection_name,
                aggregate_id,
                last_sequence_number
            )
            VALUES ($1, $2, $3)
            ON CONFLICT (projection_name, aggregate_id)
            DO UPDATE SET
                last_sequence_number = EXCLUDED.last_sequence_number,
                updated_at = NOW()
            "#,
        )
        .bind(projection_name)
        .bind(aggregate_id.as_uuid())
        .bind(sequence_number as i64)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_cursors(&self, projection_name: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM projection_offsets WHERE projection_name = $1")
            .bind(projection_name)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }
}

impl CursorStore for PostgresCursorStore {
    fn get_cursor(&self, projection_name: &str, aggregate_id: AggregateId) -> Option<u64> {
        match db::block_on("PostgresCursorStore::get_cursor", self.fetch_cursor(projection_name, aggregate_id)) {
            Ok(Ok(cursor)) => cursor,
            Ok(Err(err)) => {
                warn!(projection = projection_name, %aggregate_id, error = %err, "failed to read projection cursor");
                None
            }
            Err(err) => {
                warn!(projection = projection_name, %aggregate_id, error = %err, "failed to read projection cursor");
                None
            }
        }
    }

    fn update_cursor(&self, projection_name: &str, aggregate_id: AggregateId, sequence_number: u64) {
        let result = db::block_on(
            "PostgresCursorStore::update_cursor",
            self.store_cursor(projection_name, aggregate_id, sequence_number),
        )
        .and_then(|r| r.map_err(|e| e.to_string()));
        if let Err(err) = result {
            warn!(projection = projection_name, %aggregate_id, sequence_number, error = %err, "failed to persist projection cursor");
        }
    }

    fn clear_cursors(&self, projection_name: &str) {
        let result = db::block_on("PostgresCursorStore::clear_cursors", self.delete_cursors(projection_name))
            .and_then(|r| r.map_err(|e| e.to_string()));
        if let Err(err) = result {
            warn!(projection = projection_name, error = %err, "failed to clear projection cursors");
        }
    }
}
