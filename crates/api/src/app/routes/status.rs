use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use koinonia_participation::resolve;

use crate::app::routes::{activities, participants};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route(
        "/:activity_id/participants/:participant_id/status",
        get(participant_status),
    )
}

/// Derived, never persisted: recomputed from both ledgers on every read so
/// it reflects the latest attendance and payment writes.
pub async fn participant_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Path((activity_id, participant_id)): Path<(String, String)>,
) -> axum::response::Response {
    let parish_id = parish.parish_id();

    let activity_id = match activities::parse_activity_id(&activity_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let participant_id = match participants::parse_participant_id(&participant_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let activity = match services.activities_get(parish_id, &activity_id) {
        Some(rm) => rm,
        None => {
            return errors::json_error(StatusCode::NOT_FOUND, "not_found", "activity not found");
        }
    };
    if services.participants_get(parish_id, &participant_id).is_none() {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "participant not found");
    }

    let attendance = services.attendance_get(parish_id, activity_id, participant_id);

    let total_paid = match activity.required_contribution {
        Some(required) => {
            match services.contributions_total_paid(
                parish_id,
                activity_id,
                participant_id,
                required.currency(),
            ) {
                Ok(total) => Some(total),
                Err(e) => {
                    return errors::json_error(
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "currency_mismatch",
                        e.to_string(),
                    );
                }
            }
        }
        None => None,
    };

    let status = match resolve(
        attendance.as_ref().map(|rm| rm.status),
        activity.required_contribution,
        total_paid,
    ) {
        Ok(s) => s,
        Err(e) => {
            return errors::json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "currency_mismatch",
                e.to_string(),
            );
        }
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "activity_id": activity_id.to_string(),
            "participant_id": participant_id.to_string(),
            "status": dto::status_to_json(status),
            "required_amount_minor": activity.required_contribution.map(|m| m.amount_minor()),
            "total_paid_minor": total_paid.map(|m| m.amount_minor()),
            "attendance": attendance.map(dto::attendance_to_json),
        })),
    )
        .into_response()
}
