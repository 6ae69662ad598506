//! Activity directory projection.
//!
//! The registry view the ledgers resolve activity ids against: required
//! contribution, window, and whether the activity still accepts records.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use koinonia_core::{AggregateId, Money, ParishId};
use koinonia_events::EventEnvelope;
use koinonia_registry::{ActivityEvent, ActivityId, ActivityStatus};

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::ParishStore;

/// Read model: one activity as the rest of the system sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityReadModel {
    pub activity_id: ActivityId,
    pub name: String,
    pub required_contribution: Option<Money>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: ActivityStatus,
}

/// Parish+aggregate cursor for idempotent projection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    parish_id: ParishId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum ActivityProjectionError {
    #[error("failed to deserialize activity event: {0}")]
    Deserialize(String),

    #[error("parish isolation violation: {0}")]
    ParishIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Projection: registry activity events → activity directory.
#[derive(Debug)]
pub struct ActivityDirectoryProjection<S, C = InMemoryCursorStore>
where
    S: ParishStore<ActivityId, ActivityReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S> ActivityDirectoryProjection<S>
where
    S: ParishStore<ActivityId, ActivityReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "registry.activities".to_string(),
        }
    }

    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> ActivityDirectoryProjection<S, C> {
        ActivityDirectoryProjection {
            store: self.store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, C> ActivityDirectoryProjection<S, C>
where
    S: ParishStore<ActivityId, ActivityReadModel>,
    C: ProjectionCursorStore + 'static,
{
    fn get_cursor(&self, parish_id: ParishId, aggregate_id: AggregateId) -> u64 {
        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store
                .get_cursor(parish_id, aggregate_id, &self.projection_name)
                .unwrap_or(0)
        } else {
            match self.cursors.read() {
                Ok(cursors) => *cursors
                    .get(&CursorKey { parish_id, aggregate_id })
                    .unwrap_or(&0),
                Err(_) => 0,
            }
        }
    }

    fn update_cursor(&self, parish_id: ParishId, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(CursorKey { parish_id, aggregate_id }, sequence_number);
        }

        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store.update_cursor(
                parish_id,
                aggregate_id,
                &self.projection_name,
                sequence_number,
            );
        }
    }

    fn clear_cursors(&self, parish_id: ParishId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.parish_id != parish_id);
        }

        if let Some(ref cursor_store) = self.cursor_store {
            cursor_store.clear_cursors(parish_id, &self.projection_name);
        }
    }

    /// Get one activity.
    pub fn get(&self, parish_id: ParishId, activity_id: &ActivityId) -> Option<ActivityReadModel> {
        self.store.get(parish_id, activity_id)
    }

    /// List all activities for a parish.
    pub fn list(&self, parish_id: ParishId) -> Vec<ActivityReadModel> {
        self.store.list(parish_id)
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ActivityProjectionError> {
        if envelope.aggregate_type() != "registry.activity" {
            return Ok(());
        }

        let parish_id = envelope.parish_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(parish_id, aggregate_id);

        if seq == 0 {
            return Err(ActivityProjectionError::NonMonotonicSequence { last, found: seq });
        }

        if seq <= last {
            return Ok(());
        }

        if seq != last + 1 && last != 0 {
            return Err(ActivityProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: ActivityEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ActivityProjectionError::Deserialize(e.to_string()))?;

        let event_parish = match &ev {
            ActivityEvent::ActivityScheduled(e) => e.parish_id,
            ActivityEvent::ActivityCancelled(e) => e.parish_id,
        };

        if event_parish != parish_id {
            return Err(ActivityProjectionError::ParishIsolation(
                "event parish_id does not match envelope parish_id".to_string(),
            ));
        }

        match ev {
            ActivityEvent::ActivityScheduled(e) => {
                self.store.upsert(
                    parish_id,
                    e.activity_id,
                    ActivityReadModel {
                        activity_id: e.activity_id,
                        name: e.name,
                        required_contribution: e.required_contribution,
                        starts_at: e.starts_at,
                        ends_at: e.ends_at,
                        status: ActivityStatus::Scheduled,
                    },
                );
            }
            ActivityEvent::ActivityCancelled(e) => {
                if let Some(mut rm) = self.store.get(parish_id, &e.activity_id) {
                    rm.status = ActivityStatus::Cancelled;
                    self.store.upsert(parish_id, e.activity_id, rm);
                }
            }
        }

        self.update_cursor(parish_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ActivityProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut parishes = envs.iter().map(|e| e.parish_id()).collect::<Vec<_>>();
            parishes.sort_by_key(|p| *p.as_uuid().as_bytes());
            parishes.dedup();
            for p in parishes {
                self.store.clear_parish(p);
                self.clear_cursors(p);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.parish_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryParishStore;
    use chrono::Duration;
    use koinonia_core::{Currency, RecorderId};
    use koinonia_registry::{ActivityCancelled, ActivityScheduled};

    fn make_envelope(
        parish_id: ParishId,
        aggregate_id: AggregateId,
        seq: u64,
        event: ActivityEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            parish_id,
            aggregate_id,
            "registry.activity".to_string(),
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    fn scheduled(parish_id: ParishId, activity_id: ActivityId) -> ActivityEvent {
        let start = Utc::now();
        ActivityEvent::ActivityScheduled(ActivityScheduled {
            parish_id,
            activity_id,
            name: "Choir retreat".to_string(),
            required_contribution: Some(Money::new(5_000, Currency::Cdf)),
            starts_at: start,
            ends_at: start + Duration::hours(8),
            recorded_by: RecorderId::new(),
            occurred_at: start,
        })
    }

    #[test]
    fn scheduled_activity_appears_in_directory() {
        let store = Arc::new(InMemoryParishStore::<ActivityId, ActivityReadModel>::new());
        let proj = ActivityDirectoryProjection::new(store);

        let parish_id = ParishId::new();
        let activity_id = ActivityId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(
            parish_id,
            activity_id.0,
            1,
            scheduled(parish_id, activity_id),
        ))
        .unwrap();

        let rm = proj.get(parish_id, &activity_id).unwrap();
        assert_eq!(rm.name, "Choir retreat");
        assert_eq!(
            rm.required_contribution,
            Some(Money::new(5_000, Currency::Cdf))
        );
        assert_eq!(rm.status, ActivityStatus::Scheduled);
    }

    #[test]
    fn cancellation_flips_status_and_replays_are_ignored() {
        let store = Arc::new(InMemoryParishStore::<ActivityId, ActivityReadModel>::new());
        let proj = ActivityDirectoryProjection::new(store);

        let parish_id = ParishId::new();
        let activity_id = ActivityId::new(AggregateId::new());

        let env1 = make_envelope(parish_id, activity_id.0, 1, scheduled(parish_id, activity_id));
        proj.apply_envelope(&env1).unwrap();

        let env2 = make_envelope(
            parish_id,
            activity_id.0,
            2,
            ActivityEvent::ActivityCancelled(ActivityCancelled {
                parish_id,
                activity_id,
                reason: None,
                recorded_by: RecorderId::new(),
                occurred_at: Utc::now(),
            }),
        );
        proj.apply_envelope(&env2).unwrap();
        // At-least-once delivery: the duplicate is a no-op.
        proj.apply_envelope(&env2).unwrap();

        let rm = proj.get(parish_id, &activity_id).unwrap();
        assert_eq!(rm.status, ActivityStatus::Cancelled);
    }
}
