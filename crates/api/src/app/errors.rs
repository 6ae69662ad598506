use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use koinonia_attendance::{AttendanceSource, AttendanceStatus};
use koinonia_contributions::PaymentMethod;
use koinonia_core::Currency;
use koinonia_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::CurrencyMismatch(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "currency_mismatch", msg)
        }
        DispatchError::Unauthorized => json_error(StatusCode::FORBIDDEN, "unauthorized", "unauthorized"),
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
        DispatchError::ParishIsolation(msg) => json_error(StatusCode::FORBIDDEN, "parish_isolation", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_attendance_status(s: &str) -> Result<AttendanceStatus, axum::response::Response> {
    match s.to_lowercase().as_str() {
        "present" => Ok(AttendanceStatus::Present),
        "late" => Ok(AttendanceStatus::Late),
        "absent" => Ok(AttendanceStatus::Absent),
        "excused" => Ok(AttendanceStatus::Excused),
        _ => Err(json_error(
            StatusCode::BAD_REQUEST,
            "invalid_attendance_status",
            "status must be one of: present, late, absent, excused",
        )),
    }
}

pub fn parse_attendance_source(s: &str) -> Result<AttendanceSource, axum::response::Response> {
    match s.to_lowercase().as_str() {
        "manual" => Ok(AttendanceSource::Manual),
        "qr-scan" => Ok(AttendanceSource::QrScan),
        _ => Err(json_error(
            StatusCode::BAD_REQUEST,
            "invalid_attendance_source",
            "source must be one of: manual, qr-scan",
        )),
    }
}

pub fn parse_currency(s: &str) -> Result<Currency, axum::response::Response> {
    s.parse::<Currency>().map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "invalid_currency",
            "currency must be one of: CDF, USD",
        )
    })
}

pub fn parse_payment_method(s: &str) -> Result<PaymentMethod, axum::response::Response> {
    match s.to_lowercase().as_str() {
        "cash" => Ok(PaymentMethod::Cash),
        "mobile-money" => Ok(PaymentMethod::MobileMoney),
        "bank-transfer" => Ok(PaymentMethod::BankTransfer),
        _ => Err(json_error(
            StatusCode::BAD_REQUEST,
            "invalid_payment_method",
            "method must be one of: cash, mobile-money, bank-transfer",
        )),
    }
}
