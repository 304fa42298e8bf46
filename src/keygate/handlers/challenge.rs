use crate::auth::AuthenticationService;
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct ChallengeResponse {
    /// SHA-256 of `message`, hex encoded. Suitable for display as a QR code.
    pub token: String,
    /// Text the wallet must sign.
    pub message: String,
}

#[utoipa::path(
    get,
    path= "/generate-challenge",
    responses (
        (status = 200, description = "Fresh single-use challenge", body = ChallengeResponse, content_type = "application/json"),
    ),
    tag = "keygate",
)]
#[instrument(skip(service))]
pub async fn generate_challenge(
    service: Extension<Arc<AuthenticationService>>,
) -> impl IntoResponse {
    let issued = service.generate_challenge().await;

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    (
        headers,
        Json(ChallengeResponse {
            token: issued.token,
            message: issued.message,
        }),
    )
}
