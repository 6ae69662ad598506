use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use koinonia_core::{
    Aggregate, AggregateRoot, Currency, DomainError, Money, ParishId, RecorderId,
};
use koinonia_events::Event;
use koinonia_registry::{ActivityId, ParticipantId};

use crate::receipt::ReceiptId;

/// Accepted payment methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    BankTransfer,
}

/// One immutable payment transaction.
///
/// Records are never mutated or merged; a participant's standing is the sum
/// of their records, not a field on any of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub payment_id: Uuid,
    pub participant_id: ParticipantId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub receipt_id: ReceiptId,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregate root: ContributionSheet (one stream per activity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributionSheet {
    id: ActivityId,
    parish_id: Option<ParishId>,
    records: Vec<ContributionRecord>,
    version: u64,
}

impl ContributionSheet {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: ActivityId) -> Self {
        Self {
            id,
            parish_id: None,
            records: Vec::new(),
            version: 0,
        }
    }

    pub fn id_typed(&self) -> ActivityId {
        self.id
    }

    pub fn parish_id(&self) -> Option<ParishId> {
        self.parish_id
    }

    pub fn records(&self) -> &[ContributionRecord] {
        &self.records
    }

    pub fn records_for(
        &self,
        participant_id: &ParticipantId,
    ) -> impl Iterator<Item = &ContributionRecord> {
        let participant_id = *participant_id;
        self.records
            .iter()
            .filter(move |r| r.participant_id == participant_id)
    }

    /// Sum of a participant's payments in the activity's currency.
    ///
    /// A record in any other currency fails with `CurrencyMismatch`: that is
    /// an upstream data problem and must be surfaced, never coerced.
    pub fn total_paid(
        &self,
        participant_id: &ParticipantId,
        currency: Currency,
    ) -> Result<Money, DomainError> {
        let mut total = Money::zero(currency);
        for record in self.records_for(participant_id) {
            total = total.checked_add(&record.amount)?;
        }
        Ok(total)
    }

    fn receipt_already_issued(&self, receipt_id: &ReceiptId) -> bool {
        self.records.iter().any(|r| r.receipt_id == *receipt_id)
    }
}

impl AggregateRoot for ContributionSheet {
    type Id = ActivityId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordContribution.
///
/// The receipt id is allocated by the sequencer immediately before dispatch;
/// allocation and the append below form the write's unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordContribution {
    pub parish_id: ParishId,
    pub activity_id: ActivityId,
    pub participant_id: ParticipantId,
    pub payment_id: Uuid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub receipt_id: ReceiptId,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContributionCommand {
    RecordContribution(RecordContribution),
}

/// Event: ContributionRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRecorded {
    pub parish_id: ParishId,
    pub activity_id: ActivityId,
    pub participant_id: ParticipantId,
    pub payment_id: Uuid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub receipt_id: ReceiptId,
    pub recorded_by: RecorderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContributionEvent {
    ContributionRecorded(ContributionRecorded),
}

impl Event for ContributionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ContributionEvent::ContributionRecorded(_) => "contributions.sheet.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ContributionEvent::ContributionRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ContributionSheet {
    type Command = ContributionCommand;
    type Event = ContributionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ContributionEvent::ContributionRecorded(e) => {
                self.id = e.activity_id;
                if self.parish_id.is_none() {
                    self.parish_id = Some(e.parish_id);
                }
                // Append-only: no merging with prior records.
                self.records.push(ContributionRecord {
                    payment_id: e.payment_id,
                    participant_id: e.participant_id,
                    amount: e.amount,
                    method: e.method,
                    receipt_id: e.receipt_id,
                    recorded_by: e.recorded_by,
                    occurred_at: e.occurred_at,
                });
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ContributionCommand::RecordContribution(cmd) => self.handle_record(cmd),
        }
    }
}

impl ContributionSheet {
    fn ensure_parish(&self, parish_id: ParishId) -> Result<(), DomainError> {
        match self.parish_id {
            Some(existing) if existing != parish_id => {
                Err(DomainError::invariant("parish mismatch"))
            }
            _ => Ok(()),
        }
    }

    fn handle_record(
        &self,
        cmd: &RecordContribution,
    ) -> Result<Vec<ContributionEvent>, DomainError> {
        self.ensure_parish(cmd.parish_id)?;

        if cmd.activity_id != self.id {
            return Err(DomainError::invariant("activity_id mismatch"));
        }

        // Overpayment is fine and accumulates; negative amounts are not a
        // payment. Zero is accepted (it changes no total).
        if cmd.amount.is_negative() {
            return Err(DomainError::validation(
                "contribution amount must not be negative",
            ));
        }

        // A duplicate here means the sequencer's atomicity was violated
        // upstream; treat as fatal rather than silently renumbering.
        if self.receipt_already_issued(&cmd.receipt_id) {
            return Err(DomainError::conflict(format!(
                "receipt {} already issued on this sheet",
                cmd.receipt_id
            )));
        }

        Ok(vec![ContributionEvent::ContributionRecorded(
            ContributionRecorded {
                parish_id: cmd.parish_id,
                activity_id: cmd.activity_id,
                participant_id: cmd.participant_id,
                payment_id: cmd.payment_id,
                amount: cmd.amount,
                method: cmd.method,
                receipt_id: cmd.receipt_id,
                recorded_by: cmd.recorded_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}
