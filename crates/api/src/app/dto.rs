use serde::Deserialize;

use koinonia_attendance::{AttendanceSource, AttendanceStatus};
use koinonia_contributions::PaymentMethod;
use koinonia_infra::projections::{
    activities::ActivityReadModel,
    attendance::AttendanceReadModel,
    contributions::PaymentReadModel,
    participants::ParticipantReadModel,
    treasury::{EntryKind, TreasuryEntryReadModel},
};
use koinonia_participation::{ContributionProgress, ParticipantStatus, Presence};
use koinonia_registry::{ActivityStatus, ParticipantKind};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ScheduleActivityRequest {
    pub name: String,
    /// Required contribution in minor units; omit for a free activity.
    pub required_amount_minor: Option<i64>,
    /// Required when `required_amount_minor` is set.
    pub currency: Option<String>,
    pub starts_at: String, // RFC3339
    pub ends_at: String,   // RFC3339
}

#[derive(Debug, Deserialize)]
pub struct EnrollParticipantRequest {
    pub display_name: String,
    pub kind: String, // child | monitor
}

#[derive(Debug, Deserialize)]
pub struct RenameParticipantRequest {
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordAttendanceRequest {
    pub participant_id: String,
    pub status: String, // present | late | absent | excused
    /// Defaults to "manual": the QR path goes through /scan.
    pub source: Option<String>,
    pub arrived_at: Option<String>, // RFC3339
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordContributionRequest {
    pub participant_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub method: String, // cash | mobile-money | bank-transfer
}

#[derive(Debug, Deserialize)]
pub struct RecordExpenseRequest {
    pub entry_date: String, // ISO date
    pub amount_minor: i64,
    pub currency: String,
    pub category: String,
    pub counterparty: String,
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub period_start: String, // ISO date
    pub period_end: String,   // ISO date
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn activity_to_json(rm: ActivityReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.activity_id.0.to_string(),
        "name": rm.name,
        "required_contribution": rm.required_contribution.map(|m| serde_json::json!({
            "amount_minor": m.amount_minor(),
            "currency": m.currency().code(),
        })),
        "starts_at": rm.starts_at.to_rfc3339(),
        "ends_at": rm.ends_at.to_rfc3339(),
        "status": match rm.status {
            ActivityStatus::Scheduled => "scheduled",
            ActivityStatus::Cancelled => "cancelled",
        },
    })
}

pub fn participant_to_json(rm: ParticipantReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.participant_id.0.to_string(),
        "display_name": rm.display_name,
        "kind": match rm.kind {
            ParticipantKind::Child => "child",
            ParticipantKind::Monitor => "monitor",
        },
        "status": format!("{:?}", rm.status).to_lowercase(),
    })
}

pub fn attendance_to_json(rm: AttendanceReadModel) -> serde_json::Value {
    serde_json::json!({
        "activity_id": rm.activity_id.0.to_string(),
        "participant_id": rm.participant_id.0.to_string(),
        "status": attendance_status_str(rm.status),
        "source": match rm.source {
            AttendanceSource::Manual => "manual",
            AttendanceSource::QrScan => "qr-scan",
        },
        "arrived_at": rm.arrived_at.map(|t| t.to_rfc3339()),
        "recorded_by": rm.recorded_by.to_string(),
        "recorded_at": rm.recorded_at.to_rfc3339(),
    })
}

pub fn payment_to_json(rm: PaymentReadModel) -> serde_json::Value {
    serde_json::json!({
        "payment_id": rm.payment_id.to_string(),
        "activity_id": rm.activity_id.0.to_string(),
        "participant_id": rm.participant_id.0.to_string(),
        "amount_minor": rm.amount.amount_minor(),
        "currency": rm.amount.currency().code(),
        "method": match rm.method {
            PaymentMethod::Cash => "cash",
            PaymentMethod::MobileMoney => "mobile-money",
            PaymentMethod::BankTransfer => "bank-transfer",
        },
        "receipt_id": rm.receipt_id.to_string(),
        "recorded_by": rm.recorded_by.to_string(),
        "occurred_at": rm.occurred_at.to_rfc3339(),
    })
}

pub fn status_to_json(status: ParticipantStatus) -> serde_json::Value {
    serde_json::json!({
        "presence": match status.presence {
            Presence::Present => "present",
            Presence::Absent => "absent",
            Presence::NotYetRecorded => "not-yet-recorded",
        },
        "contribution": match status.contribution {
            ContributionProgress::NotApplicable => "not-applicable",
            ContributionProgress::Pending => "pending",
            ContributionProgress::Partial => "partial",
            ContributionProgress::Paid => "paid",
        },
    })
}

pub fn treasury_entry_to_json(rm: TreasuryEntryReadModel) -> serde_json::Value {
    serde_json::json!({
        "entry_id": rm.entry_id.to_string(),
        "kind": match rm.kind {
            EntryKind::Income => "income",
            EntryKind::Expense => "expense",
        },
        "entry_date": rm.entry_date.to_string(),
        "amount_minor": rm.amount.amount_minor(),
        "currency": rm.amount.currency().code(),
        "category": rm.category,
        "counterparty": rm.counterparty,
    })
}

pub fn attendance_status_str(status: AttendanceStatus) -> &'static str {
    match status {
        AttendanceStatus::Present => "present",
        AttendanceStatus::Late => "late",
        AttendanceStatus::Absent => "absent",
        AttendanceStatus::Excused => "excused",
    }
}
