/// API routes and handlers
pub mod accounts;
pub mod activations;
pub mod health;
pub mod operator;

use crate::{context::AppContext, resolver::FetchOutcome};
use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Router,
};

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(operator::routes())
        .merge(accounts::routes())
        .merge(activations::routes())
}

/// `If-None-Match` request header, if present and readable
pub(crate) fn if_none_match(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
}

/// Turn a fetch outcome into a response with cache headers
pub(crate) fn fetch_response(outcome: FetchOutcome) -> Response {
    match outcome {
        FetchOutcome::Body {
            body,
            content_type,
            etag,
        } => (
            [
                (header::CONTENT_TYPE, content_type.to_string()),
                (header::CACHE_CONTROL, "no-cache".to_string()),
                (header::ETAG, etag),
            ],
            body,
        )
            .into_response(),
        FetchOutcome::NotModified { etag } => (
            StatusCode::NOT_MODIFIED,
            [
                (header::CACHE_CONTROL, "no-cache".to_string()),
                (header::ETAG, etag),
            ],
        )
            .into_response(),
    }
}
