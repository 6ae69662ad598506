//! Receipt numbering value objects.
//!
//! Receipts are numbered per calendar day: `RC-{day}-{sequence:04}`. The
//! sequence itself is allocated by the infrastructure sequencer; this module
//! only carries the identifier around and keeps its formatting stable —
//! receipts must stay resolvable forever.

use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use koinonia_core::{DomainError, ValueObject};

/// Calendar-day scope for receipt numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// The day key for an instant, in UTC.
    pub fn from_instant(at: DateTime<Utc>) -> Self {
        Self(at.date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl core::fmt::Display for DayKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}

/// Receipt identifier: day key + per-day sequence, printed `RC-{day}-{seq:04}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptId {
    day_key: DayKey,
    sequence: u32,
}

impl ValueObject for ReceiptId {}

impl ReceiptId {
    pub fn new(day_key: DayKey, sequence: u32) -> Self {
        Self { day_key, sequence }
    }

    pub fn day_key(&self) -> DayKey {
        self.day_key
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl core::fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Four digits covers a day's traffic; wider sequences print in full
        // rather than truncating.
        write!(f, "RC-{}-{:04}", self.day_key, self.sequence)
    }
}

impl FromStr for ReceiptId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::invalid_id(format!("ReceiptId: {s}"));

        let rest = s.strip_prefix("RC-").ok_or_else(invalid)?;
        let (day, seq) = rest.split_once('-').ok_or_else(invalid)?;

        let date = NaiveDate::parse_from_str(day, "%Y%m%d").map_err(|_| invalid())?;
        let sequence: u32 = seq.parse().map_err(|_| invalid())?;
        if sequence == 0 {
            return Err(invalid());
        }

        Ok(Self::new(DayKey::from_date(date), sequence))
    }
}
