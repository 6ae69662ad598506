//! Treasury: expense capture and per-currency balance arithmetic.
//!
//! Income is not captured here — cotisations flow in from the contribution
//! ledger's events; the balance projection in infra joins the two sides.

pub mod balance;
pub mod book;

pub use balance::CurrencyBalance;
pub use book::{
    CashBook, CashBookId, ExpenseRecorded, RecordExpense, TreasuryCommand, TreasuryEvent,
};
