//! Contribution ledger projection.
//!
//! Keyed by receipt id (payments are append-only, so every event is a new
//! row) with per-pair listing and totalling on top.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use koinonia_contributions::{ContributionEvent, PaymentMethod, ReceiptId};
use koinonia_core::{AggregateId, Currency, DomainError, Money, ParishId, RecorderId};
use koinonia_events::EventEnvelope;
use koinonia_registry::{ActivityId, ParticipantId};

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::ParishStore;

/// Read model: one payment transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReadModel {
    pub payment_id: Uuid,
    pub activity_id: ActivityId,
    pub participant_id: ParticipantId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub receipt_id: ReceiptId,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

/// Parish+aggregate cursor for idempotent projection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    parish_id: ParishId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum ContributionProjectionError {
    #[error("failed to deserialize contribution event: {0}")]
    Deserialize(String),

    #[error("parish isolation violation: {0}")]
    ParishIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Projection: contribution events → payment ledger read model.
#[derive(Debug)]
pub struct ContributionLedgerProjection<S, C = InMemoryCursorStore>
where
    S: ParishStore<ReceiptId, PaymentReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S> ContributionLedgerProjection<S>
where
    S: ParishStore<ReceiptId, PaymentReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "contributions.ledger".to_string(),
        }
    }

    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> ContributionLedgerProjection<S, C> {
        ContributionLedgerProjection {
            store: self.store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, C> ContributionLedgerProjection<S, C>
where
    S: ParishStore<ReceiptId, PaymentReadModel>,
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

    /// Look a payment up by its receipt.
    pub fn get_by_receipt(
        &self,
        parish_id: ParishId,
        receipt_id: &ReceiptId,
    ) -> Option<PaymentReadModel> {
        self.store.get(parish_id, receipt_id)
    }

    /// All payments for one (activity, participant) pair, oldest first.
    pub fn list_for_pair(
        &self,
        parish_id: ParishId,
        activity_id: ActivityId,
        participant_id: ParticipantId,
    ) -> Vec<PaymentReadModel> {
        let mut payments: Vec<_> = self
            .store
            .list(parish_id)
            .into_iter()
            .filter(|rm| rm.activity_id == activity_id && rm.participant_id == participant_id)
            .collect();
        payments.sort_by_key(|rm| rm.occurred_at);
        payments
    }

    /// Sum of a pair's payments in the activity's currency.
    ///
    /// Fails with `CurrencyMismatch` when a record is denominated in a
    /// different currency — surfaced, never coerced.
    pub fn total_paid(
        &self,
        parish_id: ParishId,
        activity_id: ActivityId,
        participant_id: ParticipantId,
        currency: Currency,
    ) -> Result<Money, DomainError> {
        let mut total = Money::zero(currency);
        for payment in self.list_for_pair(parish_id, activity_id, participant_id) {
            total = total.checked_add(&payment.amount)?;
        }
        Ok(total)
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ContributionProjectionError> {
        if envelope.aggregate_type() != "contributions.sheet" {
            return Ok(());
        }

        let parish_id = envelope.parish_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(parish_id, aggregate_id);

        if seq == 0 {
            return Err(ContributionProjectionError::NonMonotonicSequence { last, found: seq });
        }

        if seq <= last {
            return Ok(());
        }

        if seq != last + 1 && last != 0 {
            return Err(ContributionProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: ContributionEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ContributionProjectionError::Deserialize(e.to_string()))?;

        let ContributionEvent::ContributionRecorded(e) = ev;

        if e.parish_id != parish_id {
            return Err(ContributionProjectionError::ParishIsolation(
                "event parish_id does not match envelope parish_id".to_string(),
            ));
        }

        self.store.upsert(
            parish_id,
            e.receipt_id,
            PaymentReadModel {
                payment_id: e.payment_id,
                activity_id: e.activity_id,
                participant_id: e.participant_id,
                amount: e.amount,
                method: e.method,
                receipt_id: e.receipt_id,
                recorded_by: e.recorded_by,
                occurred_at: e.occurred_at,
            },
        );

        self.update_cursor(parish_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ContributionProjectionError> {
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
