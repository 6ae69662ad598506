//! Participant directory projection.
//!
//! Doubles as the scan roster: the check-in path answers "does this badge
//! belong to an enrolled participant" from this read model.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use thiserror::Error;

use koinonia_core::{AggregateId, ParishId};
use koinonia_events::EventEnvelope;
use koinonia_registry::{ParticipantEvent, ParticipantId, ParticipantKind, ParticipantStatus};

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::ParishStore;

/// Read model: one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantReadModel {
    pub participant_id: ParticipantId,
    pub kind: ParticipantKind,
    pub display_name: String,
    pub status: ParticipantStatus,
}

/// Parish+aggregate cursor for idempotent projection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    parish_id: ParishId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum ParticipantProjectionError {
    #[error("failed to deserialize participant event: {0}")]
    Deserialize(String),

    #[error("parish isolation violation: {0}")]
    ParishIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Projection: registry participant events → participant directory.
#[derive(Debug)]
pub struct ParticipantDirectoryProjection<S, C = InMemoryCursorStore>
where
    S: ParishStore<ParticipantId, ParticipantReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S> ParticipantDirectoryProjection<S>
where
    S: ParishStore<ParticipantId, ParticipantReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "registry.participants".to_string(),
        }
    }

    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> ParticipantDirectoryProjection<S, C> {
        ParticipantDirectoryProjection {
            store: self.store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, C> ParticipantDirectoryProjection<S, C>
where
    S: ParishStore<ParticipantId, ParticipantReadModel>,
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

    /// Get one participant.
    pub fn get(
        &self,
        parish_id: ParishId,
        participant_id: &ParticipantId,
    ) -> Option<ParticipantReadModel> {
        self.store.get(parish_id, participant_id)
    }

    /// List all participants for a parish.
    pub fn list(&self, parish_id: ParishId) -> Vec<ParticipantReadModel> {
        self.store.list(parish_id)
    }

    /// Roster check used by the QR path.
    pub fn is_enrolled(&self, parish_id: ParishId, participant_id: ParticipantId) -> bool {
        self.store.get(parish_id, &participant_id).is_some()
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ParticipantProjectionError> {
        if envelope.aggregate_type() != "registry.participant" {
            return Ok(());
        }

        let parish_id = envelope.parish_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(parish_id, aggregate_id);

        if seq == 0 {
            return Err(ParticipantProjectionError::NonMonotonicSequence { last, found: seq });
        }

        if seq <= last {
            return Ok(());
        }

        if seq != last + 1 && last != 0 {
            return Err(ParticipantProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: ParticipantEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ParticipantProjectionError::Deserialize(e.to_string()))?;

        let event_parish = match &ev {
            ParticipantEvent::ParticipantEnrolled(e) => e.parish_id,
            ParticipantEvent::ParticipantRenamed(e) => e.parish_id,
        };

        if event_parish != parish_id {
            return Err(ParticipantProjectionError::ParishIsolation(
                "event parish_id does not match envelope parish_id".to_string(),
            ));
        }

        match ev {
            ParticipantEvent::ParticipantEnrolled(e) => {
                self.store.upsert(
                    parish_id,
                    e.participant_id,
                    ParticipantReadModel {
                        participant_id: e.participant_id,
                        kind: e.kind,
                        display_name: e.display_name,
                        status: ParticipantStatus::Active,
                    },
                );
            }
            ParticipantEvent::ParticipantRenamed(e) => {
                if let Some(mut rm) = self.store.get(parish_id, &e.participant_id) {
                    rm.display_name = e.display_name;
                    self.store.upsert(parish_id, e.participant_id, rm);
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
    ) -> Result<(), ParticipantProjectionError> {
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
    use chrono::Utc;
    use koinonia_core::RecorderId;
    use koinonia_registry::{ParticipantEnrolled, ParticipantRenamed};

    fn make_envelope(
        parish_id: ParishId,
        aggregate_id: AggregateId,
        seq: u64,
        event: ParticipantEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            uuid::Uuid::now_v7(),
            parish_id,
            aggregate_id,
            "registry.participant".to_string(),
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    #[test]
    fn enrollment_then_rename_updates_the_directory() {
        let store = Arc::new(InMemoryParishStore::<ParticipantId, ParticipantReadModel>::new());
        let proj = ParticipantDirectoryProjection::new(store);

        let parish_id = ParishId::new();
        let participant_id = ParticipantId::new(AggregateId::new());

        proj.apply_envelope(&make_envelope(
            parish_id,
            participant_id.0,
            1,
            ParticipantEvent::ParticipantEnrolled(ParticipantEnrolled {
                parish_id,
                participant_id,
                kind: ParticipantKind::Monitor,
                display_name: "Fr. Joseph".to_string(),
                recorded_by: RecorderId::new(),
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        assert!(proj.is_enrolled(parish_id, participant_id));

        proj.apply_envelope(&make_envelope(
            parish_id,
            participant_id.0,
            2,
            ParticipantEvent::ParticipantRenamed(ParticipantRenamed {
                parish_id,
                participant_id,
                display_name: "Fr. Joseph M.".to_string(),
                recorded_by: RecorderId::new(),
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        let rm = proj.get(parish_id, &participant_id).unwrap();
        assert_eq!(rm.display_name, "Fr. Joseph M.");
        assert_eq!(rm.kind, ParticipantKind::Monitor);
    }

    #[test]
    fn unenrolled_participants_are_not_on_the_roster() {
        let store = Arc::new(InMemoryParishStore::<ParticipantId, ParticipantReadModel>::new());
        let proj = ParticipantDirectoryProjection::new(store);

        assert!(!proj.is_enrolled(ParishId::new(), ParticipantId::new(AggregateId::new())));
    }
}
