//! Per-currency period balance.

use serde::{Deserialize, Serialize};

/// Income/expense totals for one currency over a period.
///
/// Both sides are minor-unit totals in the same currency; a currency with
/// entries on only one side carries an explicit zero on the other, so it is
/// reported rather than omitted. There is no cross-currency netting
/// anywhere: each currency's balance stands alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyBalance {
    pub income_minor: i64,
    pub expense_minor: i64,
}

impl CurrencyBalance {
    pub fn balance_minor(&self) -> i64 {
        self.income_minor - self.expense_minor
    }

    pub fn add_income(&mut self, amount_minor: i64) {
        self.income_minor += amount_minor;
    }

    pub fn add_expense(&mut self, amount_minor: i64) {
        self.expense_minor += amount_minor;
    }
}
