use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use koinonia_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Money, ParishId, RecorderId,
};
use koinonia_events::Event;

/// Cash book identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CashBookId(pub AggregateId);

impl CashBookId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CashBookId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: CashBook (one per parish).
///
/// Note: the book does NOT hold balances; it only tracks identity + parish.
/// Balances are derived from projections over `ExpenseRecorded` (and the
/// contribution ledger's income events).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashBook {
    id: CashBookId,
    parish_id: Option<ParishId>,
    version: u64,
    created: bool,
}

impl CashBook {
    /// Empty aggregate for rehydration.
    pub fn empty(id: CashBookId) -> Self {
        Self {
            id,
            parish_id: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CashBookId {
        self.id
    }

    pub fn parish_id(&self) -> Option<ParishId> {
        self.parish_id
    }
}

impl AggregateRoot for CashBook {
    type Id = CashBookId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordExpense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordExpense {
    pub parish_id: ParishId,
    pub book_id: CashBookId,
    pub entry_id: Uuid,
    /// The day the money left the till (business date, not write time).
    pub entry_date: NaiveDate,
    pub amount: Money,
    pub category: String,
    pub counterparty: String,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreasuryCommand {
    RecordExpense(RecordExpense),
}

/// Event: ExpenseRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRecorded {
    pub parish_id: ParishId,
    pub book_id: CashBookId,
    pub entry_id: Uuid,
    pub entry_date: NaiveDate,
    pub amount: Money,
    pub category: String,
    pub counterparty: String,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreasuryEvent {
    ExpenseRecorded(ExpenseRecorded),
}

impl Event for TreasuryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TreasuryEvent::ExpenseRecorded(_) => "treasury.book.expense_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TreasuryEvent::ExpenseRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CashBook {
    type Command = TreasuryCommand;
    type Event = TreasuryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TreasuryEvent::ExpenseRecorded(e) => {
                self.id = e.book_id;
                if self.parish_id.is_none() {
                    self.parish_id = Some(e.parish_id);
                    self.created = true;
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TreasuryCommand::RecordExpense(cmd) => self.handle_expense(cmd),
        }
    }
}

impl CashBook {
    fn ensure_parish(&self, parish_id: ParishId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.parish_id != Some(parish_id) {
            return Err(DomainError::invariant("parish mismatch"));
        }
        Ok(())
    }

    fn handle_expense(&self, cmd: &RecordExpense) -> Result<Vec<TreasuryEvent>, DomainError> {
        self.ensure_parish(cmd.parish_id)?;

        if cmd.amount.amount_minor() <= 0 {
            return Err(DomainError::validation("expense amount must be positive"));
        }
        if cmd.category.trim().is_empty() {
            return Err(DomainError::validation("expense category must not be empty"));
        }

        Ok(vec![TreasuryEvent::ExpenseRecorded(ExpenseRecorded {
            parish_id: cmd.parish_id,
            book_id: cmd.book_id,
            entry_id: cmd.entry_id,
            entry_date: cmd.entry_date,
            amount: cmd.amount,
            category: cmd.category.clone(),
            counterparty: cmd.counterparty.clone(),
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koinonia_core::Currency;

    fn test_book_id() -> CashBookId {
        CashBookId::new(AggregateId::new())
    }

    fn expense_cmd(parish_id: ParishId, book_id: CashBookId, amount: i64) -> RecordExpense {
        RecordExpense {
            parish_id,
            book_id,
            entry_id: Uuid::now_v7(),
            entry_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            amount: Money::new(amount, Currency::Cdf),
            category: "transport".to_string(),
            counterparty: "Bus hire".to_string(),
            recorded_by: RecorderId::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn expense_emits_event_with_business_date() {
        let book = CashBook::empty(test_book_id());
        let parish_id = ParishId::new();
        let book_id = test_book_id();

        let events = book
            .handle(&TreasuryCommand::RecordExpense(expense_cmd(
                parish_id, book_id, 4_000,
            )))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            TreasuryEvent::ExpenseRecorded(e) => {
                assert_eq!(e.parish_id, parish_id);
                assert_eq!(e.amount, Money::new(4_000, Currency::Cdf));
                assert_eq!(e.entry_date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
            }
        }
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let book = CashBook::empty(test_book_id());
        for amount in [0, -500] {
            let err = book
                .handle(&TreasuryCommand::RecordExpense(expense_cmd(
                    ParishId::new(),
                    test_book_id(),
                    amount,
                )))
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    #[test]
    fn blank_category_is_rejected() {
        let book = CashBook::empty(test_book_id());
        let mut cmd = expense_cmd(ParishId::new(), test_book_id(), 1_000);
        cmd.category = " ".to_string();
        let err = book
            .handle(&TreasuryCommand::RecordExpense(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
