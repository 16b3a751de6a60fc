/// Activation token endpoints
use crate::{
    api::{fetch_response, if_none_match},
    context::AppContext,
    error::ResolverResult,
    resolver::FetchOptions,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Serialize)]
pub struct ActivationStored {
    pub hash: String,
}

/// Build activation routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/jwt/v1/activations", post(upload_activation))
        .route("/jwt/v1/activations/:hash", get(get_activation))
}

async fn upload_activation(
    State(ctx): State<AppContext>,
    body: Bytes,
) -> ResolverResult<Json<ActivationStored>> {
    let hash = ctx.resolver.upload_activation(&body).await?;
    Ok(Json(ActivationStored { hash }))
}

async fn get_activation(
    State(ctx): State<AppContext>,
    Path(hash): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> ResolverResult<Response> {
    let options = FetchOptions::from_query(&params);
    let outcome = ctx
        .resolver
        .fetch_activation(&hash, options, if_none_match(&headers))
        .await?;
    Ok(fetch_response(outcome))
}
