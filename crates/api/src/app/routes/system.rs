use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, sse::Event as SseEvent},
    Json,
};

use crate::app::services::{self, AppServices};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(parish): Extension<crate::context::ParishContext>,
    Extension(recorder): Extension<crate::context::RecorderContext>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "parish_id": parish.parish_id().to_string(),
        "recorder_id": recorder.recorder_id().to_string(),
    }))
}

pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(parish): Extension<crate::context::ParishContext>,
) -> axum::response::Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>>
{
    services::parish_sse_stream(services, parish.parish_id())
}
