use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};

use koinonia_core::{AggregateId, Money};
use koinonia_registry::{
    Activity, ActivityCommand, ActivityId, ActivityStatus, CancelActivity, ScheduleActivity,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(schedule_activity).get(list_activities))
        .route("/:activity_id", get(get_activity).delete(cancel_activity))
}

pub async fn list_activities(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
) -> axum::response::Response {
    let items = services
        .activities_list(parish.parish_id())
        .into_iter()
        .map(dto::activity_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_activity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Path(activity_id): Path<String>,
) -> axum::response::Response {
    let activity_id = match parse_activity_id(&activity_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.activities_get(parish.parish_id(), &activity_id) {
        Some(rm) => (StatusCode::OK, Json(dto::activity_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "activity not found"),
    }
}

pub async fn schedule_activity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Extension(recorder): Extension<crate::context::RecorderContext>,
    Json(body): Json<dto::ScheduleActivityRequest>,
) -> axum::response::Response {
    let starts_at = match parse_rfc3339(&body.starts_at, "starts_at") {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let ends_at = match parse_rfc3339(&body.ends_at, "ends_at") {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let required_contribution = match (body.required_amount_minor, body.currency.as_deref()) {
        (None, _) => None,
        (Some(amount), Some(currency)) => {
            let currency = match errors::parse_currency(currency) {
                Ok(c) => c,
                Err(resp) => return resp,
            };
            Some(Money::new(amount, currency))
        }
        (Some(_), None) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "currency is required when required_amount_minor is set",
            );
        }
    };

    let activity_agg = AggregateId::new();
    let activity_id = ActivityId::new(activity_agg);

    let cmd = ActivityCommand::ScheduleActivity(ScheduleActivity {
        parish_id: parish.parish_id(),
        activity_id,
        name: body.name,
        required_contribution,
        starts_at,
        ends_at,
        recorded_by: recorder.recorder_id(),
        occurred_at: Utc::now(),
    });

    if let Err(e) = services.dispatch::<Activity>(
        parish.parish_id(),
        activity_agg,
        "registry.activity",
        cmd,
        |_p, aggregate_id| Activity::empty(ActivityId::new(aggregate_id)),
    ) {
        return errors::dispatch_error_to_response(e);
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": activity_id.to_string() })),
    )
        .into_response()
}

pub async fn cancel_activity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Extension(recorder): Extension<crate::context::RecorderContext>,
    Path(activity_id): Path<String>,
) -> axum::response::Response {
    let activity_id = match parse_activity_id(&activity_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let cmd = ActivityCommand::CancelActivity(CancelActivity {
        parish_id: parish.parish_id(),
        activity_id,
        reason: None,
        recorded_by: recorder.recorder_id(),
        occurred_at: Utc::now(),
    });

    if let Err(e) = services.dispatch::<Activity>(
        parish.parish_id(),
        activity_id.0,
        "registry.activity",
        cmd,
        |_p, aggregate_id| Activity::empty(ActivityId::new(aggregate_id)),
    ) {
        return errors::dispatch_error_to_response(e);
    }

    StatusCode::NO_CONTENT.into_response()
}

/// Resolve an activity that must still accept ledger writes.
pub fn require_open_activity(
    services: &AppServices,
    parish_id: koinonia_core::ParishId,
    activity_id: &ActivityId,
) -> Result<koinonia_infra::projections::activities::ActivityReadModel, axum::response::Response> {
    let activity = services
        .activities_get(parish_id, activity_id)
        .ok_or_else(|| {
            errors::json_error(StatusCode::NOT_FOUND, "not_found", "activity not found")
        })?;

    if activity.status == ActivityStatus::Cancelled {
        return Err(errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invariant_violation",
            "activity is cancelled",
        ));
    }

    Ok(activity)
}

pub fn parse_activity_id(raw: &str) -> Result<ActivityId, axum::response::Response> {
    raw.parse::<AggregateId>()
        .map(ActivityId::new)
        .map_err(|_| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "malformed activity id")
        })
}

pub fn parse_rfc3339(raw: &str, field: &str) -> Result<DateTime<Utc>, axum::response::Response> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("{field} must be an RFC3339 timestamp"),
            )
        })
}
