use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use uuid::Uuid;

use koinonia_contributions::{
    ContributionCommand, ContributionSheet, DayKey, ReceiptId, RecordContribution,
};
use koinonia_core::Money;
use koinonia_registry::ActivityId;

use crate::app::routes::{activities, participants};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:activity_id/contributions", post(record_contribution))
        .route(
            "/:activity_id/contributions/:participant_id",
            get(list_contributions),
        )
}

pub async fn record_contribution(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Extension(recorder): Extension<crate::context::RecorderContext>,
    Path(activity_id): Path<String>,
    Json(body): Json<dto::RecordContributionRequest>,
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

    if let Err(resp) = activities::require_open_activity(&services, parish_id, &activity_id) {
        return resp;
    }
    if services.participants_get(parish_id, &participant_id).is_none() {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "participant not found");
    }

    let currency = match errors::parse_currency(&body.currency) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let method = match errors::parse_payment_method(&body.method) {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    let now = Utc::now();
    let day_key = DayKey::from_instant(now);

    // Allocate the receipt number and persist the payment as one unit of
    // work: if the append below fails, the caller sees the error and no
    // payment carrying this number is ever observable.
    let sequence = match services.allocate_receipt(parish_id, day_key) {
        Ok(seq) => seq,
        Err(e) => {
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "receipt_allocation_failed",
                e.to_string(),
            );
        }
    };
    let receipt_id = ReceiptId::new(day_key, sequence);
    let payment_id = Uuid::now_v7();

    let cmd = ContributionCommand::RecordContribution(RecordContribution {
        parish_id,
        activity_id,
        participant_id,
        payment_id,
        amount: Money::new(body.amount_minor, currency),
        method,
        receipt_id,
        recorded_by: recorder.recorder_id(),
        occurred_at: now,
    });

    if let Err(e) = services.dispatch::<ContributionSheet>(
        parish_id,
        activity_id.0,
        "contributions.sheet",
        cmd,
        |_p, aggregate_id| ContributionSheet::empty(ActivityId::new(aggregate_id)),
    ) {
        return errors::dispatch_error_to_response(e);
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "payment_id": payment_id.to_string(),
            "activity_id": activity_id.to_string(),
            "participant_id": participant_id.to_string(),
            "amount_minor": body.amount_minor,
            "currency": currency.code(),
            "receipt_id": receipt_id.to_string(),
            "occurred_at": now.to_rfc3339(),
        })),
    )
        .into_response()
}

/// Resolve a printed receipt identifier back to its payment.
///
/// Receipts stay resolvable indefinitely, so this accepts identifiers from
/// any past day.
pub async fn get_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Path(receipt_id): Path<String>,
) -> axum::response::Response {
    let receipt_id = match receipt_id.parse::<ReceiptId>() {
        Ok(id) => id,
        Err(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_id",
                "malformed receipt id",
            );
        }
    };

    match services.contributions_get_by_receipt(parish.parish_id(), &receipt_id) {
        Some(rm) => (StatusCode::OK, Json(dto::payment_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "receipt not found"),
    }
}

pub async fn list_contributions(
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

    let items = services
        .contributions_list(parish_id, activity_id, participant_id)
        .into_iter()
        .map(dto::payment_to_json)
        .collect::<Vec<_>>();

    // The total is only meaningful in the activity's own currency; a free
    // activity has no requirement to total against.
    let total = match activity.required_contribution {
        Some(required) => {
            match services.contributions_total_paid(
                parish_id,
                activity_id,
                participant_id,
                required.currency(),
            ) {
                Ok(total) => Some(serde_json::json!({
                    "amount_minor": total.amount_minor(),
                    "currency": total.currency().code(),
                })),
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

    (
        StatusCode::OK,
        Json(serde_json::json!({ "items": items, "total_paid": total })),
    )
        .into_response()
}
