use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;

use koinonia_attendance::{AttendanceCommand, AttendanceSheet, AttendanceSource, RecordAttendance};
use koinonia_registry::ActivityId;

use crate::app::routes::{activities, participants};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route(
        "/:activity_id/attendance",
        post(record_attendance).get(list_attendance),
    )
}

pub async fn list_attendance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Path(activity_id): Path<String>,
) -> axum::response::Response {
    let activity_id = match activities::parse_activity_id(&activity_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    if services.activities_get(parish.parish_id(), &activity_id).is_none() {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "activity not found");
    }

    let items = services
        .attendance_list(parish.parish_id(), activity_id)
        .into_iter()
        .map(dto::attendance_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn record_attendance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Extension(recorder): Extension<crate::context::RecorderContext>,
    Path(activity_id): Path<String>,
    Json(body): Json<dto::RecordAttendanceRequest>,
) -> axum::response::Response {
    let parish_id = parish.parish_id();

    let activity_id = match activities::parse_activity_id(&activity_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let participant_id = match participants::parse_participant_id(&body.participant_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    // Both ids must resolve against the registry before the ledger is touched.
    if let Err(resp) = activities::require_open_activity(&services, parish_id, &activity_id) {
        return resp;
    }
    if services.participants_get(parish_id, &participant_id).is_none() {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "participant not found");
    }

    let status = match errors::parse_attendance_status(&body.status) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let source = match body.source.as_deref() {
        Some(raw) => match errors::parse_attendance_source(raw) {
            Ok(s) => s,
            Err(resp) => return resp,
        },
        None => AttendanceSource::Manual,
    };
    let arrived_at = match body.arrived_at.as_deref() {
        Some(raw) => match activities::parse_rfc3339(raw, "arrived_at") {
            Ok(t) => Some(t),
            Err(resp) => return resp,
        },
        None => None,
    };

    let now = Utc::now();
    let cmd = AttendanceCommand::RecordAttendance(RecordAttendance {
        parish_id,
        activity_id,
        participant_id,
        status,
        source,
        arrived_at,
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

    // Echo the committed fact without waiting on the projection pump.
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "activity_id": activity_id.to_string(),
            "participant_id": participant_id.to_string(),
            "status": dto::attendance_status_str(status),
            "source": match source {
                AttendanceSource::Manual => "manual",
                AttendanceSource::QrScan => "qr-scan",
            },
            "arrived_at": arrived_at.map(|t| t.to_rfc3339()),
            "recorded_by": recorder.recorder_id().to_string(),
            "recorded_at": now.to_rfc3339(),
        })),
    )
        .into_response()
}
