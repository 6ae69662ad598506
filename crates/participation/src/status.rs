//! Read-time status resolution.
//!
//! The attendance sheet and the contribution sheet evolve independently;
//! this module combines their facts into one tagged value per participant.
//! A single enum pair (instead of loose booleans scattered across call
//! sites) keeps every combination nameable and exhaustively matchable.
//!
//! `resolve` is pure and is recomputed on every read — there is no cache to
//! go stale between ledger writes.

use serde::{Deserialize, Serialize};

use koinonia_attendance::AttendanceStatus;
use koinonia_core::{DomainError, DomainResult, Money};

/// Collapsed attendance view.
///
/// `Late` arrivals count as present; `Excused` absences count as absent. The
/// raw recorded status stays visible on the attendance read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Presence {
    Present,
    Absent,
    NotYetRecorded,
}

impl From<AttendanceStatus> for Presence {
    fn from(status: AttendanceStatus) -> Self {
        match status {
            AttendanceStatus::Present | AttendanceStatus::Late => Presence::Present,
            AttendanceStatus::Absent | AttendanceStatus::Excused => Presence::Absent,
        }
    }
}

/// Progress toward an activity's required contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContributionProgress {
    /// The activity requires nothing (no required amount, or zero).
    NotApplicable,
    /// Required amount set, nothing paid yet.
    Pending,
    /// Some paid, less than required.
    Partial,
    /// Paid in full (overpayment included).
    Paid,
}

/// The combined, derived status for one (activity, participant) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantStatus {
    pub presence: Presence,
    pub contribution: ContributionProgress,
}

/// Combine the latest attendance fact and cumulative payments into one status.
///
/// `attendance` is the recorded status, if any. `required` is the activity's
/// required contribution (`None` = free activity). `total_paid` is the sum
/// of the pair's payment records in the activity's currency; pass `None`
/// when no payment records exist.
///
/// Fails with `CurrencyMismatch` if the paid total is denominated in a
/// different currency than the requirement — an upstream data problem that
/// must surface rather than be coerced.
pub fn resolve(
    attendance: Option<AttendanceStatus>,
    required: Option<Money>,
    total_paid: Option<Money>,
) -> DomainResult<ParticipantStatus> {
    let presence = match attendance {
        Some(status) => Presence::from(status),
        None => Presence::NotYetRecorded,
    };

    let contribution = match required {
        None => ContributionProgress::NotApplicable,
        Some(required) if required.is_zero() => ContributionProgress::NotApplicable,
        Some(required) => {
            let paid = match total_paid {
                Some(paid) => {
                    required.ensure_same_currency(&paid)?;
                    paid
                }
                None => Money::zero(required.currency()),
            };

            if paid.is_zero() {
                ContributionProgress::Pending
            } else if paid.amount_minor() < required.amount_minor() {
                ContributionProgress::Partial
            } else {
                ContributionProgress::Paid
            }
        }
    };

    Ok(ParticipantStatus {
        presence,
        contribution,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use koinonia_core::Currency;
    use proptest::prelude::*;

    fn cdf(amount: i64) -> Money {
        Money::new(amount, Currency::Cdf)
    }

    #[test]
    fn present_and_fully_paid() {
        let status = resolve(
            Some(AttendanceStatus::Present),
            Some(cdf(5_000)),
            Some(cdf(5_000)),
        )
        .unwrap();
        assert_eq!(status.presence, Presence::Present);
        assert_eq!(status.contribution, ContributionProgress::Paid);
    }

    #[test]
    fn present_and_partially_paid() {
        let status = resolve(
            Some(AttendanceStatus::Present),
            Some(cdf(5_000)),
            Some(cdf(2_000)),
        )
        .unwrap();
        assert_eq!(status.presence, Presence::Present);
        assert_eq!(status.contribution, ContributionProgress::Partial);
    }

    #[test]
    fn unrecorded_and_unpaid() {
        let status = resolve(None, Some(cdf(5_000)), None).unwrap();
        assert_eq!(status.presence, Presence::NotYetRecorded);
        assert_eq!(status.contribution, ContributionProgress::Pending);
    }

    #[test]
    fn free_activity_is_not_applicable_regardless_of_payments() {
        let status = resolve(Some(AttendanceStatus::Absent), None, Some(cdf(1_000))).unwrap();
        assert_eq!(status.presence, Presence::Absent);
        assert_eq!(status.contribution, ContributionProgress::NotApplicable);

        let status = resolve(None, Some(cdf(0)), None).unwrap();
        assert_eq!(status.contribution, ContributionProgress::NotApplicable);
    }

    #[test]
    fn overpayment_counts_as_paid() {
        let status = resolve(None, Some(cdf(5_000)), Some(cdf(9_000))).unwrap();
        assert_eq!(status.contribution, ContributionProgress::Paid);
    }

    #[test]
    fn late_collapses_to_present_and_excused_to_absent() {
        let late = resolve(Some(AttendanceStatus::Late), None, None).unwrap();
        assert_eq!(late.presence, Presence::Present);

        let excused = resolve(Some(AttendanceStatus::Excused), None, None).unwrap();
        assert_eq!(excused.presence, Presence::Absent);
    }

    #[test]
    fn mixed_currencies_surface_a_mismatch() {
        let err = resolve(
            None,
            Some(cdf(5_000)),
            Some(Money::new(50, Currency::Usd)),
        )
        .unwrap_err();
        assert_eq!(
            err,
            DomainError::CurrencyMismatch {
                expected: Currency::Cdf,
                found: Currency::Usd,
            }
        );
    }

    proptest! {
        /// Property: for any non-negative required/paid pair in one
        /// currency, exactly one progress value is derived and it agrees
        /// with the defining inequalities.
        #[test]
        fn progress_partitions_the_amount_space(required in 0i64..1_000_000, paid in 0i64..2_000_000) {
            let status = resolve(None, Some(cdf(required)), Some(cdf(paid))).unwrap();
            let expected = if required == 0 {
                ContributionProgress::NotApplicable
            } else if paid == 0 {
                ContributionProgress::Pending
            } else if paid < required {
                ContributionProgress::Partial
            } else {
                ContributionProgress::Paid
            };
            prop_assert_eq!(status.contribution, expected);
        }
    }
}
