//! Treasury balances projection (the balance sheet).
//!
//! Consumes two event streams: contribution payments (income side,
//! "cotisations") and cash-book expenses. Each event becomes one dated
//! ledger entry; `balance` folds entries in a date window into per-currency
//! income/expense/balance figures. Reads are over whatever has reached the
//! projection — eventually consistent by design, no snapshot isolation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use koinonia_contributions::ContributionEvent;
use koinonia_core::{AggregateId, Currency, Money, ParishId};
use koinonia_events::EventEnvelope;
use koinonia_treasury::{CurrencyBalance, TreasuryEvent};

use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::ParishStore;

/// Which side of the balance an entry lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Income,
    Expense,
}

/// Read model: one dated ledger entry (income or expense).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreasuryEntryReadModel {
    pub entry_id: Uuid,
    pub kind: EntryKind,
    pub entry_date: NaiveDate,
    pub amount: Money,
    pub category: String,
    pub counterparty: String,
}

/// Parish+aggregate cursor for idempotent projection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    parish_id: ParishId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum TreasuryProjectionError {
    #[error("failed to deserialize ledger event: {0}")]
    Deserialize(String),

    #[error("parish isolation violation: {0}")]
    ParishIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Projection: payment + expense events → per-currency period balances.
#[derive(Debug)]
pub struct TreasuryBalancesProjection<S, C = InMemoryCursorStore>
where
    S: ParishStore<Uuid, TreasuryEntryReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
    cursor_store: Option<Arc<C>>,
    projection_name: String,
}

impl<S> TreasuryBalancesProjection<S>
where
    S: ParishStore<Uuid, TreasuryEntryReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: None,
            projection_name: "treasury.balances".to_string(),
        }
    }

    pub fn with_persistent_cursors<C: ProjectionCursorStore + 'static>(
        self,
        cursor_store: Arc<C>,
        projection_name: impl Into<String>,
    ) -> TreasuryBalancesProjection<S, C> {
        TreasuryBalancesProjection {
            store: self.store,
            cursors: RwLock::new(HashMap::new()),
            cursor_store: Some(cursor_store),
            projection_name: projection_name.into(),
        }
    }
}

impl<S, C> TreasuryBalancesProjection<S, C>
where
    S: ParishStore<Uuid, TreasuryEntryReadModel>,
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

    /// All ledger entries in a date window (inclusive bounds), oldest first.
    pub fn entries(
        &self,
        parish_id: ParishId,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Vec<TreasuryEntryReadModel> {
        let mut entries: Vec<_> = self
            .store
            .list(parish_id)
            .into_iter()
            .filter(|e| e.entry_date >= period_start && e.entry_date <= period_end)
            .collect();
        entries.sort_by_key(|e| (e.entry_date, e.entry_id));
        entries
    }

    /// Per-currency balance over `[period_start, period_end]`.
    ///
    /// A currency with entries on only one side reports zero on the other
    /// side rather than disappearing; currencies are never netted against
    /// each other.
    pub fn balance(
        &self,
        parish_id: ParishId,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> BTreeMap<Currency, CurrencyBalance> {
        let mut balances: BTreeMap<Currency, CurrencyBalance> = BTreeMap::new();

        for entry in self.entries(parish_id, period_start, period_end) {
            let slot = balances.entry(entry.amount.currency()).or_default();
            match entry.kind {
                EntryKind::Income => slot.add_income(entry.amount.amount_minor()),
                EntryKind::Expense => slot.add_expense(entry.amount.amount_minor()),
            }
        }

        balances
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), TreasuryProjectionError> {
        let entry = match envelope.aggregate_type() {
            "contributions.sheet" => {
                let ev: ContributionEvent = serde_json::from_value(envelope.payload().clone())
                    .map_err(|e| TreasuryProjectionError::Deserialize(e.to_string()))?;
                let ContributionEvent::ContributionRecorded(e) = ev;

                if e.parish_id != envelope.parish_id() {
                    return Err(TreasuryProjectionError::ParishIsolation(
                        "event parish_id does not match envelope parish_id".to_string(),
                    ));
                }

                TreasuryEntryReadModel {
                    entry_id: e.payment_id,
                    kind: EntryKind::Income,
                    entry_date: e.occurred_at.date_naive(),
                    amount: e.amount,
                    category: "cotisation".to_string(),
                    counterparty: e.participant_id.to_string(),
                }
            }
            "treasury.book" => {
                let ev: TreasuryEvent = serde_json::from_value(envelope.payload().clone())
                    .map_err(|e| TreasuryProjectionError::Deserialize(e.to_string()))?;
                let TreasuryEvent::ExpenseRecorded(e) = ev;

                if e.parish_id != envelope.parish_id() {
                    return Err(TreasuryProjectionError::ParishIsolation(
                        "event parish_id does not match envelope parish_id".to_string(),
                    ));
                }

                TreasuryEntryReadModel {
                    entry_id: e.entry_id,
                    kind: EntryKind::Expense,
                    entry_date: e.entry_date,
                    amount: e.amount,
                    category: e.category,
                    counterparty: e.counterparty,
                }
            }
            _ => return Ok(()),
        };

        let parish_id = envelope.parish_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(parish_id, aggregate_id);

        if seq == 0 {
            return Err(TreasuryProjectionError::NonMonotonicSequence { last, found: seq });
        }

        if seq <= last {
            return Ok(());
        }

        if seq != last + 1 && last != 0 {
            return Err(TreasuryProjectionError::NonMonotonicSequence { last, found: seq });
        }

        self.store.upsert(parish_id, entry.entry_id, entry);
        self.update_cursor(parish_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), TreasuryProjectionError> {
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
    use chrono::{TimeZone, Utc};
    use koinonia_contributions::{ContributionRecorded, DayKey, PaymentMethod, ReceiptId};
    use koinonia_core::RecorderId;
    use koinonia_registry::{ActivityId, ParticipantId};
    use koinonia_treasury::{CashBookId, ExpenseRecorded};

    type Store = InMemoryParishStore<Uuid, TreasuryEntryReadModel>;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn income_envelope(
        parish_id: ParishId,
        sheet_id: AggregateId,
        seq: u64,
        day: u32,
        amount: Money,
    ) -> EventEnvelope<JsonValue> {
        let occurred_at = Utc.with_ymd_and_hms(2024, 6, day, 10, 0, 0).unwrap();
        let event = ContributionEvent::ContributionRecorded(ContributionRecorded {
            parish_id,
            activity_id: ActivityId::new(sheet_id),
            participant_id: ParticipantId::new(AggregateId::new()),
            payment_id: Uuid::now_v7(),
            amount,
            method: PaymentMethod::Cash,
            receipt_id: ReceiptId::new(DayKey::from_date(date(day)), seq as u32),
            recorded_by: RecorderId::new(),
            occurred_at,
        });
        EventEnvelope::new(
            Uuid::now_v7(),
            parish_id,
            sheet_id,
            "contributions.sheet".to_string(),
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    fn expense_envelope(
        parish_id: ParishId,
        book_id: AggregateId,
        seq: u64,
        day: u32,
        amount: Money,
    ) -> EventEnvelope<JsonValue> {
        let event = TreasuryEvent::ExpenseRecorded(ExpenseRecorded {
            parish_id,
            book_id: CashBookId::new(book_id),
            entry_id: Uuid::now_v7(),
            entry_date: date(day),
            amount,
            category: "transport".to_string(),
            counterparty: "Bus hire".to_string(),
            recorded_by: RecorderId::new(),
            occurred_at: Utc.with_ymd_and_hms(2024, 6, day, 18, 0, 0).unwrap(),
        });
        EventEnvelope::new(
            Uuid::now_v7(),
            parish_id,
            book_id,
            "treasury.book".to_string(),
            seq,
            serde_json::to_value(&event).unwrap(),
        )
    }

    #[test]
    fn balances_report_both_sides_per_currency_without_netting() {
        let store = Arc::new(Store::new());
        let proj = TreasuryBalancesProjection::new(store);

        let parish_id = ParishId::new();
        let sheet_id = AggregateId::new();
        let book_id = AggregateId::new();

        // Income: 10_000 CDF + 50 USD. Expense: 4_000 CDF. No USD expense.
        proj.apply_envelope(&income_envelope(
            parish_id,
            sheet_id,
            1,
            5,
            Money::new(10_000, Currency::Cdf),
        ))
        .unwrap();
        proj.apply_envelope(&income_envelope(
            parish_id,
            sheet_id,
            2,
            6,
            Money::new(50, Currency::Usd),
        ))
        .unwrap();
        proj.apply_envelope(&expense_envelope(
            parish_id,
            book_id,
            1,
            7,
            Money::new(4_000, Currency::Cdf),
        ))
        .unwrap();

        let balances = proj.balance(parish_id, date(1), date(30));

        let cdf = balances.get(&Currency::Cdf).unwrap();
        assert_eq!(cdf.income_minor, 10_000);
        assert_eq!(cdf.expense_minor, 4_000);
        assert_eq!(cdf.balance_minor(), 6_000);

        // USD is present with an explicit zero expense, not omitted.
        let usd = balances.get(&Currency::Usd).unwrap();
        assert_eq!(usd.income_minor, 50);
        assert_eq!(usd.expense_minor, 0);
        assert_eq!(usd.balance_minor(), 50);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let store = Arc::new(Store::new());
        let proj = TreasuryBalancesProjection::new(store);

        let parish_id = ParishId::new();
        let sheet_id = AggregateId::new();

        proj.apply_envelope(&income_envelope(
            parish_id,
            sheet_id,
            1,
            5,
            Money::new(1_000, Currency::Cdf),
        ))
        .unwrap();
        proj.apply_envelope(&income_envelope(
            parish_id,
            sheet_id,
            2,
            10,
            Money::new(2_000, Currency::Cdf),
        ))
        .unwrap();

        // Both boundary days are included.
        let balances = proj.balance(parish_id, date(5), date(10));
        assert_eq!(balances.get(&Currency::Cdf).unwrap().income_minor, 3_000);

        // Outside the window: nothing.
        let balances = proj.balance(parish_id, date(11), date(20));
        assert!(balances.is_empty());
    }

    #[test]
    fn negative_balances_are_reported_per_currency() {
        let store = Arc::new(Store::new());
        let proj = TreasuryBalancesProjection::new(store);

        let parish_id = ParishId::new();
        let book_id = AggregateId::new();
        let sheet_id = AggregateId::new();

        proj.apply_envelope(&expense_envelope(
            parish_id,
            book_id,
            1,
            5,
            Money::new(70, Currency::Usd),
        ))
        .unwrap();
        proj.apply_envelope(&income_envelope(
            parish_id,
            sheet_id,
            1,
            5,
            Money::new(9_000, Currency::Cdf),
        ))
        .unwrap();

        let balances = proj.balance(parish_id, date(1), date(30));
        // A negative USD balance and a positive CDF balance stand alone.
        assert_eq!(balances.get(&Currency::Usd).unwrap().balance_minor(), -70);
        assert_eq!(balances.get(&Currency::Cdf).unwrap().balance_minor(), 9_000);
    }

    #[test]
    fn duplicate_envelopes_do_not_double_count() {
        let store = Arc::new(Store::new());
        let proj = TreasuryBalancesProjection::new(store);

        let parish_id = ParishId::new();
        let sheet_id = AggregateId::new();

        let env = income_envelope(parish_id, sheet_id, 1, 5, Money::new(1_000, Currency::Cdf));
        proj.apply_envelope(&env).unwrap();
        proj.apply_envelope(&env).unwrap();

        let balances = proj.balance(parish_id, date(1), date(30));
        assert_eq!(balances.get(&Currency::Cdf).unwrap().income_minor, 1_000);
    }
}
