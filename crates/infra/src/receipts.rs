//! Receipt sequence allocation.
//!
//! The counter lives in the shared store and is incremented atomically —
//! never in caller-local state. For a fixed `(parish, day)` successive
//! allocations return 1, 2, 3, ... with no duplicates even under concurrent
//! callers; two payments taken in the same millisecond must never share a
//! receipt number. Counters for past days are kept forever (receipts must
//! remain unique and resolvable) and are simply never allocated against
//! again once the day has passed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::instrument;

use koinonia_contributions::DayKey;
use koinonia_core::ParishId;

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("receipt allocation failed: {0}")]
    Allocation(String),
}

/// Allocates the next receipt sequence number for a `(parish, day)` scope.
pub trait ReceiptSequencer: Send + Sync {
    /// Allocate the next sequence number (starting at 1) for `day_key`.
    ///
    /// Implementations must be atomic across concurrent callers: no two
    /// calls for the same scope may ever return the same value.
    fn allocate(&self, parish_id: ParishId, day_key: DayKey) -> Result<u32, ReceiptError>;
}

impl<S> ReceiptSequencer for Arc<S>
where
    S: ReceiptSequencer + ?Sized,
{
    fn allocate(&self, parish_id: ParishId, day_key: DayKey) -> Result<u32, ReceiptError> {
        (**self).allocate(parish_id, day_key)
    }
}

/// In-memory sequencer for tests/dev.
///
/// The mutex makes read-increment-write one critical section; that is the
/// entire atomicity story for the in-memory variant.
#[derive(Debug, Default)]
pub struct InMemoryReceiptSequencer {
    counters: Mutex<HashMap<(ParishId, DayKey), u32>>,
}

impl InMemoryReceiptSequencer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceiptSequencer for InMemoryReceiptSequencer {
    fn allocate(&self, parish_id: ParishId, day_key: DayKey) -> Result<u32, ReceiptError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| ReceiptError::Allocation("lock poisoned".to_string()))?;

        let counter = counters.entry((parish_id, day_key)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

/// Postgres-backed sequencer.
///
/// A single upsert-returning statement does the read-increment-write on the
/// server, so concurrent allocations serialize on the row lock and each
/// caller gets a distinct number:
///
/// ```sql
/// CREATE TABLE receipt_counters (
///     parish_id     UUID NOT NULL,
///     day_key       DATE NOT NULL,
///     next_sequence INT  NOT NULL,
///     updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     PRIMARY KEY (parish_id, day_key)
/// );
/// ```
pub struct PostgresReceiptSequencer {
    pool: Arc<PgPool>,
}

impl PostgresReceiptSequencer {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self), fields(parish_id = %parish_id.as_uuid(), day_key = %day_key), err)]
    async fn allocate_async(
        &self,
        parish_id: ParishId,
        day_key: DayKey,
    ) -> Result<u32, ReceiptError> {
        let row = sqlx::query(
            r#"
            INSERT INTO receipt_counters (parish_id, day_key, next_sequence)
            VALUES ($1, $2, 1)
            ON CONFLICT (parish_id, day_key)
            DO UPDATE SET
                next_sequence = receipt_counters.next_sequence + 1,
                updated_at = NOW()
            RETURNING next_sequence
            "#,
        )
        .bind(parish_id.as_uuid())
        .bind(day_key.date())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| ReceiptError::Allocation(e.to_string()))?;

        let sequence: i32 = row
            .try_get("next_sequence")
            .map_err(|e| ReceiptError::Allocation(e.to_string()))?;

        Ok(sequence as u32)
    }
}

impl ReceiptSequencer for PostgresReceiptSequencer {
    fn allocate(&self, parish_id: ParishId, day_key: DayKey) -> Result<u32, ReceiptError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            ReceiptError::Allocation("PostgresReceiptSequencer requires a tokio runtime context".to_string())
        })?;

        handle.block_on(self.allocate_async(parish_id, day_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> DayKey {
        DayKey::from_date(NaiveDate::from_ymd_opt(2024, 6, d).unwrap())
    }

    #[test]
    fn sequences_start_at_one_and_increase_without_gaps() {
        let seq = InMemoryReceiptSequencer::new();
        let parish_id = ParishId::new();

        for expected in 1..=5 {
            assert_eq!(seq.allocate(parish_id, day(1)).unwrap(), expected);
        }
    }

    #[test]
    fn scopes_are_independent_per_day_and_parish() {
        let seq = InMemoryReceiptSequencer::new();
        let parish_a = ParishId::new();
        let parish_b = ParishId::new();

        assert_eq!(seq.allocate(parish_a, day(1)).unwrap(), 1);
        assert_eq!(seq.allocate(parish_a, day(1)).unwrap(), 2);
        // A new day starts over; another parish never shares a counter.
        assert_eq!(seq.allocate(parish_a, day(2)).unwrap(), 1);
        assert_eq!(seq.allocate(parish_b, day(1)).unwrap(), 1);
    }

    #[test]
    fn concurrent_allocations_yield_exactly_one_of_each_number() {
        let seq = Arc::new(InMemoryReceiptSequencer::new());
        let parish_id = ParishId::new();
        const CALLERS: usize = 32;

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let seq = seq.clone();
                std::thread::spawn(move || seq.allocate(parish_id, day(1)).unwrap())
            })
            .collect();

        let mut issued: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        issued.sort_unstable();

        let expected: Vec<u32> = (1..=CALLERS as u32).collect();
        assert_eq!(issued, expected);
    }
}
