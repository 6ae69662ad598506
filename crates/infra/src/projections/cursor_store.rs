//! Projection cursor/offset persistence.
//!
//! Cursors checkpoint the last processed sequence_number per
//! (parish, aggregate) stream, which gives projections idempotency under
//! at-least-once delivery, resume-after-crash, and deterministic rebuilds
//! (clear offsets, replay from scratch).

use std::sync::Arc;

use sqlx::{PgPool, Row};

use koinonia_core::{AggregateId, ParishId};

/// Projection cursor store for persisting offsets.
pub trait ProjectionCursorStore: Send + Sync {
    /// Get the last processed sequence_number for a (parish, aggregate, projection) stream.
    fn get_cursor(
        &self,
        parish_id: ParishId,
        aggregate_id: AggregateId,
        projection_name: &str,
    ) -> Option<u64>;

    /// Update the cursor to a new sequence_number.
    fn update_cursor(
        &self,
        parish_id: ParishId,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    );

    /// Clear all cursors for a parish + projection (for rebuilds).
    fn clear_cursors(&self, parish_id: ParishId, projection_name: &str);
}

/// In-memory cursor store (no persistence).
///
/// Projections fall back to their own in-process cursor map when this is
/// used; it exists so the persistent-cursor plumbing has a null object.
pub struct InMemoryCursorStore;

impl ProjectionCursorStore for InMemoryCursorStore {
    fn get_cursor(
        &self,
        _parish_id: ParishId,
        _aggregate_id: AggregateId,
        _projection_name: &str,
    ) -> Option<u64> {
        None
    }

    fn update_cursor(
        &self,
        _parish_id: ParishId,
        _aggregate_id: AggregateId,
        _projection_name: &str,
        _sequence_number: u64,
    ) {
        // no-op
    }

    fn clear_cursors(&self, _parish_id: ParishId, _projection_name: &str) {
        // no-op
    }
}

/// Postgres-backed projection cursor store.
///
/// Expected schema:
///
/// ```sql
/// CREATE TABLE projection_offsets (
///     parish_id            UUID NOT NULL,
///     aggregate_id         UUID NOT NULL,
///     projection_name      TEXT NOT NULL,
///     last_sequence_number BIGINT NOT NULL,
///     updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     PRIMARY KEY (parish_id, aggregate_id, projection_name)
/// );
/// ```
pub struct PostgresCursorStore {
    pool: Arc<PgPool>,
}

impl PostgresCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

impl ProjectionCursorStore for PostgresCursorStore {
    fn get_cursor(
        &self,
        parish_id: ParishId,
        aggregate_id: AggregateId,
        projection_name: &str,
    ) -> Option<u64> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let pool = self.pool.clone();
        let parish_uuid = *parish_id.as_uuid();
        let aggregate_uuid = *aggregate_id.as_uuid();
        let projection_name = projection_name.to_string();

        handle.block_on(async {
            match sqlx::query(
                r#"
                SELECT last_sequence_number
                FROM projection_offsets
                WHERE parish_id = $1 AND aggregate_id = $2 AND projection_name = $3
                "#,
            )
            .bind(parish_uuid)
            .bind(aggregate_uuid)
            .bind(&projection_name)
            .fetch_optional(&*pool)
            .await
            {
                Ok(Some(row)) => row
                    .try_get::<i64, _>("last_sequence_number")
                    .ok()
                    .map(|seq| seq as u64),
                _ => None,
            }
        })
    }

    fn update_cursor(
        &self,
        parish_id: ParishId,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    ) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => return,
        };

        let pool = self.pool.clone();
        let parish_uuid = *parish_id.as_uuid();
        let aggregate_uuid = *aggregate_id.as_uuid();
        let projection_name = projection_name.to_string();

        handle.block_on(async {
            let _ = sqlx::query(
                r#"
                INSERT INTO projection_offsets (
                    parish_id,
                    aggregate_id,
                    projection_name,
                    last_sequence_number
                )
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (parish_id, aggregate_id, projection_name)
                DO UPDATE SET
                    last_sequence_number = EXCLUDED.last_sequence_number,
                    updated_at = NOW()
                "#,
            )
            .bind(parish_uuid)
            .bind(aggregate_uuid)
            .bind(&projection_name)
            .bind(sequence_number as i64)
            .execute(&*pool)
            .await;
        });
    }

    fn clear_cursors(&self, parish_id: ParishId, projection_name: &str) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => return,
        };

        let pool = self.pool.clone();
        let parish_uuid = *parish_id.as_uuid();
        let projection_name = projection_name.to_string();

        handle.block_on(async {
            let _ = sqlx::query(
                "DELETE FROM projection_offsets WHERE parish_id = $1 AND projection_name = $2",
            )
            .bind(parish_uuid)
            .bind(&projection_name)
            .execute(&*pool)
            .await;
        });
    }
}
