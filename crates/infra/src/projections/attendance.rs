//! Attendance sheet projection.
//!
//! Keyed by (activity, participant): the read-side mirror of the sheet's
//! one-record-per-pair invariant. Re-recorded attendance overwrites in
//! place, so the projection never accumulates duplicates either.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use koinonia_attendance::{AttendanceEvent, AttendanceSource, AttendanceStatus};
use koinonia_core::{AggregateId, ParishId, RecorderId};
use koinonia_events::EventEnvelope;
use koinonia_registry::{ActivityId, ParticipantId};

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::ParishStore;

/// Read model: the attendance fact for one (activity, participant) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceReadModel {
    pub activity_id: ActivityId,
    pub participant_id: ParticipantId,
    pub status: AttendanceStatus,
    pub source: AttendanceSource,
    pub arrived_at: Option<DateTime<Utc>>,
    pub recorded_by: RecorderId,
    pub recorded_at: DateTime<Utc>,
}

/// Parish+aggregate cursor for idempotent projection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    parish_id: ParishId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum AttendanceProjectionError {
    #[error("failed to deserialize attendance event: {0}")]
    Deserialize(String),

    #[error("parish isolation violation: {0}")]
    ParishIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Projection: attendance events → per-pair attendance records.
#[derive(Debug)]
pub struct AttendanceSheetProjection<S, C = InMemoryCursorStore>
where
    S: ParishStore<(ActivityId, ParticipantId), AttendanceReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S> AttendanceSheetProjection<S>
where
    S: ParishStore<(ActivityId, ParticipantId), AttendanceReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "attendance.sheets".to_string(),
        }
    }

    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> AttendanceSheetProjection<S, C> {
        AttendanceSheetProjection {
            store: self.store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, C> AttendanceSheetProjection<S, C>
where
    S: ParishStore<(ActivityId, ParticipantId), AttendanceReadModel>,
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

    /// The attendance record for one pair, if any.
    pub fn get(
        &self,
        parish_id: ParishId,
        activity_id: ActivityId,
        participant_id: ParticipantId,
    ) -> Option<AttendanceReadModel> {
        self.store.get(parish_id, &(activity_id, participant_id))
    }

    /// All records for one activity.
    pub fn list_for_activity(
        &self,
        parish_id: ParishId,
        activity_id: ActivityId,
    ) -> Vec<AttendanceReadModel> {
        self.store
            .list(parish_id)
            .into_iter()
            .filter(|rm| rm.activity_id == activity_id)
            .collect()
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), AttendanceProjectionError> {
        if envelope.aggregate_type() != "attendance.sheet" {
            return Ok(());
        }

        let parish_id = envelope.parish_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(parish_id, aggregate_id);

        if seq == 0 {
            return Err(AttendanceProjectionError::NonMonotonicSequence { last, found: seq });
        }

        if seq <= last {
            return Ok(());
        }

        if seq != last + 1 && last != 0 {
            return Err(AttendanceProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: AttendanceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| AttendanceProjectionError::Deserialize(e.to_string()))?;

        let AttendanceEvent::AttendanceRecorded(e) = ev;

        if e.parish_id != parish_id {
            return Err(AttendanceProjectionError::ParishIsolation(
                "event parish_id does not match envelope parish_id".to_string(),
            ));
        }

        self.store.upsert(
            parish_id,
            (e.activity_id, e.participant_id),
            AttendanceReadModel {
                activity_id: e.activity_id,
                participant_id: e.participant_id,
                status: e.status,
                source: e.source,
                arrived_at: e.arrived_at,
                recorded_by: e.recorded_by,
                recorded_at: e.occurred_at,
            },
        );

        self.update_cursor(parish_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), AttendanceProjectionError> {
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
    use koinonia_attendance::AttendanceRecorded;

    type Store = InMemoryParishStore<(ActivityId, ParticipantId), AttendanceReadModel>;

    fn make_envelope(
        parish_id: ParishId,
        aggregate_id: AggregateId,
        seq: u64,
        event: AttendanceEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            parish_id,
            aggregate_id,
            "attendance.sheet".to_string(),
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    fn recorded(
        parish_id: ParishId,
        activity_id: ActivityId,
        participant_id: ParticipantId,
        status: AttendanceStatus,
        source: AttendanceSource,
    ) -> AttendanceEvent {
        let now = Utc::now();
        AttendanceEvent::AttendanceRecorded(AttendanceRecorded {
            parish_id,
            activity_id,
            participant_id,
            status,
            source,
            arrived_at: Some(now),
            recorded_by: RecorderId::new(),
            occurred_at: now,
        })
    }

    #[test]
    fn corrections_overwrite_instead_of_duplicating() {
        let store = Arc::new(Store::new());
        let proj = AttendanceSheetProjection::new(store);

        let parish_id = ParishId::new();
        let activity_id = ActivityId::new(AggregateId::new());
        let participant_id = ParticipantId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(
            parish_id,
            activity_id.0,
            1,
            recorded(
                parish_id,
                activity_id,
                participant_id,
                AttendanceStatus::Present,
                AttendanceSource::QrScan,
            ),
        ))
        .unwrap();

        proj.apply_envelope(&make_envelope(
            parish_id,
            activity_id.0,
            2,
            recorded(
                parish_id,
                activity_id,
                participant_id,
                AttendanceStatus::Late,
                AttendanceSource::Manual,
            ),
        ))
        .unwrap();

        let listed = proj.list_for_activity(parish_id, activity_id);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, AttendanceStatus::Late);
        assert_eq!(listed[0].source, AttendanceSource::Manual);
    }

    #[test]
    fn listing_is_scoped_to_the_activity() {
        let store = Arc::new(Store::new());
        let proj = AttendanceSheetProjection::new(store);

        let parish_id = ParishId::new();
        let activity_a = ActivityId::new(AggregateId::new());
        let activity_b = ActivityId::new(AggregateId::new());
        let participant_id = ParticipantId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(
            parish_id,
            activity_a.0,
            1,
            recorded(
                parish_id,
                activity_a,
                participant_id,
                AttendanceStatus::Present,
                AttendanceSource::Manual,
            ),
        ))
        .unwrap();

        assert_eq!(proj.list_for_activity(parish_id, activity_a).len(), 1);
        assert!(proj.list_for_activity(parish_id, activity_b).is_empty());
    }
}
