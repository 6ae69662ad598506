//! QR check-in station endpoints.
//!
//! `POST /:activity_id/scan` feeds one scanned frame through the station's
//! protocol session; an accepted frame performs exactly one attendance write
//! with source `qr-scan`. Rejections (malformed code, unknown badge, the
//! debounce window) are 200 responses with `accepted: false` — the operator
//! is invited to rescan, nothing is written. `DELETE` releases the station
//! (device torn down), which likewise writes nothing.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;

use koinonia_attendance::{
    AttendanceCommand, AttendanceSheet, AttendanceSource, AttendanceStatus, RecordAttendance,
};
use koinonia_checkin::{ScanOutcome, ScanRejection};
use koinonia_registry::ActivityId;

use crate::app::routes::activities;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/:activity_id/scan", post(scan).delete(release))
}

pub async fn scan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Extension(recorder): Extension<crate::context::RecorderContext>,
    Path(activity_id): Path<String>,
    Json(body): Json<dto::ScanRequest>,
) -> axum::response::Response {
    let parish_id = parish.parish_id();

    let activity_id = match activities::parse_activity_id(&activity_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    if let Err(resp) = activities::require_open_activity(&services, parish_id, &activity_id) {
        return resp;
    }

    let now = Utc::now();
    match services.scan_observe(parish_id, activity_id, &body.code, now) {
        ScanOutcome::Accepted { participant_id } => {
            let cmd = AttendanceCommand::RecordAttendance(RecordAttendance {
                parish_id,
                activity_id,
                participant_id,
                status: AttendanceStatus::Present,
                source: AttendanceSource::QrScan,
                arrived_at: Some(now),
                recorded_by: recorder.recorder_id(),
                occurred_at: now,
            });

            if let Err(e) = services.dispatch::<AttendanceSheet>(
                parish_id,
                activity_id.0,
                "attendance.sheet",
                cmd,
                |_p, aggregate_id| AttendanceSheet::empty(ActivityId::new(aggregate_id)),
            ) {
                return errors::dispatch_error_to_response(e);
            }

            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "accepted": true,
                    "attendance": {
                        "activity_id": activity_id.to_string(),
                        "participant_id": participant_id.to_string(),
                        "status": dto::attendance_status_str(AttendanceStatus::Present),
                        "source": "qr-scan",
                        "arrived_at": now.to_rfc3339(),
                    },
                })),
            )
                .into_response()
        }
        ScanOutcome::Rejected(reason) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "accepted": false,
                "reason": match reason {
                    ScanRejection::MalformedCode => "malformed-code",
                    ScanRejection::UnknownParticipant => "unknown-participant",
                    ScanRejection::Duplicate => "duplicate",
                },
            })),
        )
            .into_response(),
    }
}

pub async fn release(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Path(activity_id): Path<String>,
) -> axum::response::Response {
    let activity_id = match activities::parse_activity_id(&activity_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    services.scan_release(parish.parish_id(), activity_id);
    StatusCode::NO_CONTENT.into_response()
}
