/// Account JWT endpoints
use crate::{
    api::{fetch_response, if_none_match},
    context::AppContext,
    error::ResolverResult,
    resolver::FetchOptions,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::collections::HashMap;

/// Build account routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/jwt/v1/accounts", get(list_accounts))
        .route("/jwt/v1/accounts/", get(list_accounts))
        .route(
            "/jwt/v1/accounts/:subject",
            get(get_account).post(upload_account),
        )
}

/// List stored account public keys as a JSON array
async fn list_accounts(State(ctx): State<AppContext>) -> Json<Vec<String>> {
    Json(ctx.resolver.list_accounts().await)
}

/// Fetch the stored JWT for an account
///
/// Supports `check`, `text`, `decode` and `notify` query modifiers and
/// conditional requests via `If-None-Match`.
async fn get_account(
    State(ctx): State<AppContext>,
    Path(subject): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> ResolverResult<Response> {
    let options = FetchOptions::from_query(&params);
    let outcome = ctx
        .resolver
        .fetch_account(&subject, options, if_none_match(&headers))
        .await?;
    Ok(fetch_response(outcome))
}

/// Store a new JWT for an account
///
/// The body is the raw token; it must be signed by a trusted operator and
/// name `subject` as its subject.
async fn upload_account(
    State(ctx): State<AppContext>,
    Path(subject): Path<String>,
    body: Bytes,
) -> ResolverResult<impl IntoResponse> {
    ctx.resolver.upload_account(&subject, &body).await?;
    Ok(StatusCode::OK)
}
