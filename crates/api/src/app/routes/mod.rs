use axum::{Router, routing::get};

pub mod activities;
pub mod attendance;
pub mod contributions;
pub mod participants;
pub mod scan;
pub mod status;
pub mod system;
pub mod treasury;

/// Router for all authenticated (parish-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest(
            "/activities",
            activities::router()
                .merge(attendance::router())
                .merge(scan::router())
                .merge(contributions::router())
                .merge(status::router()),
        )
        .nest("/participants", participants::router())
        .nest("/treasury", treasury::router())
        .route("/receipts/:receipt_id", get(contributions::get_receipt))
}
