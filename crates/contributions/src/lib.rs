//! Contribution ledger: append-only payment records per activity, receipt
//! numbering value objects, per-participant totals.

pub mod receipt;
pub mod sheet;

pub use receipt::{DayKey, ReceiptId};
pub use sheet::{
    ContributionCommand, ContributionEvent, ContributionRecord, ContributionRecorded,
    ContributionSheet, PaymentMethod, RecordContribution,
};
