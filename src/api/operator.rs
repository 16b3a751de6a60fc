/// Operator token and usage endpoints
use crate::{
    context::AppContext,
    error::{ResolverError, ResolverResult},
    resolver::{JWT_CONTENT_TYPE, TEXT_CONTENT_TYPE},
};
use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};

const HELP_TEXT: &str = "\
GET  /jwt/v1/help                 this text
GET  /jwt/v1/operator             the operator JWT, if configured
GET  /jwt/v1/accounts             stored account public keys
GET  /jwt/v1/accounts/<key>       account JWT; modifiers: check, text, decode, notify
POST /jwt/v1/accounts/<key>       store an account JWT signed by a trusted operator
POST /jwt/v1/activations          store an activation JWT under its hash
GET  /jwt/v1/activations/<hash>   activation JWT; modifiers: check, text, decode
GET  /healthz                     liveness
GET  /metrics                     Prometheus metrics
";

/// Build operator routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/jwt/v1/operator", get(get_operator))
        .route("/jwt/v1/help", get(help))
}

async fn get_operator(State(ctx): State<AppContext>) -> ResolverResult<impl IntoResponse> {
    let jwt = ctx
        .resolver
        .operator_jwt()
        .ok_or_else(|| ResolverError::NotFound("no operator JWT configured".to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, JWT_CONTENT_TYPE)],
        jwt.to_string(),
    ))
}

async fn help() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], HELP_TEXT)
}
