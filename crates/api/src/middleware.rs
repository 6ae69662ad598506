//! Caller-context middleware.
//!
//! Authentication itself is an external collaborator: the fronting gateway
//! validates the session and injects `X-Parish-Id` and `X-Recorder-Id`
//! headers. This middleware only turns those headers into typed request
//! extensions; requests that arrive without them never reach a domain route.

use core::str::FromStr;

use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use koinonia_core::{ParishId, RecorderId};

use crate::context::{ParishContext, RecorderContext};

pub const PARISH_HEADER: &str = "x-parish-id";
pub const RECORDER_HEADER: &str = "x-recorder-id";

pub async fn caller_context_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let parish_id: ParishId = extract_header(req.headers(), PARISH_HEADER)?;
    let recorder_id: RecorderId = extract_header(req.headers(), RECORDER_HEADER)?;

    req.extensions_mut().insert(ParishContext::new(parish_id));
    req.extensions_mut()
        .insert(RecorderContext::new(recorder_id));

    Ok(next.run(req).await)
}

fn extract_header<T: FromStr>(headers: &HeaderMap, name: &str) -> Result<T, StatusCode> {
    let header = headers.get(name).ok_or(StatusCode::UNAUTHORIZED)?;
    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let value = header.trim();
    if value.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    value.parse::<T>().map_err(|_| StatusCode::UNAUTHORIZED)
}
