use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;

use koinonia_core::AggregateId;
use koinonia_registry::{
    EnrollParticipant, Participant, ParticipantCommand, ParticipantId, ParticipantKind,
    RenameParticipant,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(enroll_participant).get(list_participants))
        .route("/:participant_id", get(get_participant))
        .route("/:participant_id/name", put(rename_participant))
}

pub async fn list_participants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
) -> axum::response::Response {
    let items = services
        .participants_list(parish.parish_id())
        .into_iter()
        .map(dto::participant_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_participant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Path(participant_id): Path<String>,
) -> axum::response::Response {
    let participant_id = match parse_participant_id(&participant_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.participants_get(parish.parish_id(), &participant_id) {
        Some(rm) => (StatusCode::OK, Json(dto::participant_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "participant not found"),
    }
}

pub async fn enroll_participant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Extension(recorder): Extension<crate::context::RecorderContext>,
    Json(body): Json<dto::EnrollParticipantRequest>,
) -> axum::response::Response {
    let kind = match body.kind.to_lowercase().as_str() {
        "child" => ParticipantKind::Child,
        "monitor" => ParticipantKind::Monitor,
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_participant_kind",
                "kind must be one of: child, monitor",
            );
        }
    };

    let participant_agg = AggregateId::new();
    let participant_id = ParticipantId::new(participant_agg);

    let cmd = ParticipantCommand::EnrollParticipant(EnrollParticipant {
        parish_id: parish.parish_id(),
        participant_id,
        kind,
        display_name: body.display_name,
        recorded_by: recorder.recorder_id(),
        occurred_at: Utc::now(),
    });

    if let Err(e) = services.dispatch::<Participant>(
        parish.parish_id(),
        participant_agg,
        "registry.participant",
        cmd,
        |_p, aggregate_id| Participant::empty(ParticipantId::new(aggregate_id)),
    ) {
        return errors::dispatch_error_to_response(e);
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": participant_id.to_string() })),
    )
        .into_response()
}

pub async fn rename_participant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
    Extension(recorder): Extension<crate::context::RecorderContext>,
    Path(participant_id): Path<String>,
    Json(body): Json<dto::RenameParticipantRequest>,
) -> axum::response::Response {
    let participant_id = match parse_participant_id(&participant_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let cmd = ParticipantCommand::RenameParticipant(RenameParticipant {
        parish_id: parish.parish_id(),
        participant_id,
        display_name: body.display_name,
        recorded_by: recorder.recorder_id(),
        occurred_at: Utc::now(),
    });

    if let Err(e) = services.dispatch::<Participant>(
        parish.parish_id(),
        participant_id.0,
        "registry.participant",
        cmd,
        |_p, aggregate_id| Participant::empty(ParticipantId::new(aggregate_id)),
    ) {
        return errors::dispatch_error_to_response(e);
    }

    StatusCode::NO_CONTENT.into_response()
}

pub fn parse_participant_id(raw: &str) -> Result<ParticipantId, axum::response::Response> {
    raw.parse::<AggregateId>()
        .map(ParticipantId::new)
        .map_err(|_| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_id",
                "malformed participant id",
            )
        })
}
