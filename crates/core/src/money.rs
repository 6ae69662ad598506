//! Monetary amounts in minor units, tagged with a currency.
//!
//! The parish operates in two non-convertible currencies. Amounts are stored
//! as integer counts of the smallest denomination (no floating point), and
//! arithmetic across currencies is a hard error — the balance sheet must
//! never silently sum francs into dollars.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Closed set of currencies handled by the ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Congolese franc.
    Cdf,
    /// US dollar.
    Usd,
}

impl Currency {
    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Cdf => "CDF",
            Currency::Usd => "USD",
        }
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CDF" => Ok(Currency::Cdf),
            "USD" => Ok(Currency::Usd),
            other => Err(DomainError::validation(format!(
                "unknown currency code: {other}"
            ))),
        }
    }
}

/// A monetary value: minor units + currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the smallest denomination of `currency`.
    amount_minor: i64,
    currency: Currency,
}

impl ValueObject for Money {}

impl Money {
    pub fn new(amount_minor: i64, currency: Currency) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    pub fn amount_minor(&self) -> i64 {
        self.amount_minor
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount_minor == 0
    }

    pub fn is_negative(&self) -> bool {
        self.amount_minor < 0
    }

    /// Ensure `other` is denominated in the same currency as `self`.
    pub fn ensure_same_currency(&self, other: &Money) -> DomainResult<()> {
        if self.currency != other.currency {
            return Err(DomainError::currency_mismatch(self.currency, other.currency));
        }
        Ok(())
    }

    /// Add two amounts of the same currency.
    ///
    /// Fails with `CurrencyMismatch` across currencies and with an invariant
    /// error on integer overflow.
    pub fn checked_add(&self, other: &Money) -> DomainResult<Money> {
        self.ensure_same_currency(other)?;
        let amount = self
            .amount_minor
            .checked_add(other.amount_minor)
            .ok_or_else(|| DomainError::invariant("monetary amount overflow"))?;
        Ok(Money::new(amount, self.currency))
    }

}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Display is for logs/debugging; user-facing formatting is a
        // presentation concern and lives outside this crate.
        write!(f, "{} {}", self.amount_minor, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn adds_same_currency_amounts() {
        let a = Money::new(2_000, Currency::Cdf);
        let b = Money::new(3_000, Currency::Cdf);
        assert_eq!(a.checked_add(&b).unwrap(), Money::new(5_000, Currency::Cdf));
    }

    #[test]
    fn cross_currency_addition_is_rejected() {
        let a = Money::new(2_000, Currency::Cdf);
        let b = Money::new(50, Currency::Usd);
        let err = a.checked_add(&b).unwrap_err();
        assert_eq!(
            err,
            DomainError::CurrencyMismatch {
                expected: Currency::Cdf,
                found: Currency::Usd,
            }
        );
    }

    #[test]
    fn zero_is_zero() {
        assert!(Money::zero(Currency::Usd).is_zero());
        assert!(!Money::new(1, Currency::Usd).is_zero());
    }

    #[test]
    fn overflow_is_an_invariant_error() {
        let a = Money::new(i64::MAX, Currency::Usd);
        let b = Money::new(1, Currency::Usd);
        assert!(matches!(
            a.checked_add(&b).unwrap_err(),
            DomainError::InvariantViolation(_)
        ));
    }

    #[test]
    fn currency_codes_round_trip() {
        for c in [Currency::Cdf, Currency::Usd] {
            assert_eq!(c.code().parse::<Currency>().unwrap(), c);
        }
        assert!("EUR".parse::<Currency>().is_err());
    }

    proptest! {
        /// Property: adding zero never changes an amount.
        #[test]
        fn adding_zero_is_identity(amount in i64::MIN / 2..i64::MAX / 2) {
            let m = Money::new(amount, Currency::Cdf);
            prop_assert_eq!(m.checked_add(&Money::zero(Currency::Cdf)).unwrap(), m);
        }

        /// Property: addition commutes within a currency.
        #[test]
        fn addition_commutes(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
            let x = Money::new(a, Currency::Usd);
            let y = Money::new(b, Currency::Usd);
            prop_assert_eq!(x.checked_add(&y).unwrap(), y.checked_add(&x).unwrap());
        }
    }
}
