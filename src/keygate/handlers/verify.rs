use crate::{
    auth::{AuthenticationService, Denial, VerificationRequest, VerificationResult},
    keygate::GrantAction,
};
use axum::{
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct VerifyRequest {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub message: String,
    /// Base64 encoded 65-byte compact signature.
    #[serde(default)]
    pub signature: String,
    /// Token returned by `/generate-challenge`. Derived from `message` when omitted.
    #[serde(default, alias = "challenge")]
    pub token: Option<String>,
}

impl VerifyRequest {
    /// Reject requests with a missing field before they reach the service.
    ///
    /// # Errors
    /// Returns `Denial::MalformedRequest` naming the first empty field.
    pub fn into_verification(self) -> Result<VerificationRequest, Denial> {
        if self.address.trim().is_empty() {
            return Err(Denial::MalformedRequest("address"));
        }
        if self.message.is_empty() {
            return Err(Denial::MalformedRequest("message"));
        }
        if self.signature.trim().is_empty() {
            return Err(Denial::MalformedRequest("signature"));
        }

        Ok(VerificationRequest {
            address: self.address,
            message: self.message,
            signature: self.signature,
            token: self.token,
        })
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Granted {
    pub status: String,
    pub address: String,
    pub action: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Denied {
    pub status: String,
    pub error: String,
}

impl Default for Denied {
    fn default() -> Self {
        Self {
            status: "denied".to_string(),
            error: "access denied".to_string(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct InvalidRequest {
    pub error: String,
}

impl Default for InvalidRequest {
    fn default() -> Self {
        Self {
            error: "invalid request".to_string(),
        }
    }
}

#[utoipa::path(
    post,
    path= "/verify-signature",
    request_body = VerifyRequest,
    responses (
        (status = 200, description = "Signature valid, access granted", body = Granted, content_type = "application/json"),
        (status = 400, description = "Missing or malformed request body", body = InvalidRequest, content_type = "application/json"),
        (status = 403, description = "Access denied", body = Denied, content_type = "application/json"),
    ),
    tag = "keygate",
)]
#[instrument(skip(service, action, payload))]
pub async fn verify_signature(
    service: Extension<Arc<AuthenticationService>>,
    action: Extension<GrantAction>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(
                category = "malformed_request",
                "Rejected verification request: {}", rejection
            );
            return invalid_request();
        }
    };

    let request = match request.into_verification() {
        Ok(request) => request,
        Err(denial) => {
            warn!(
                category = denial.category(),
                "Rejected verification request: {}", denial
            );
            return invalid_request();
        }
    };

    match service.verify(request).await {
        VerificationResult::Granted(address) => (
            StatusCode::OK,
            Json(Granted {
                status: "granted".to_string(),
                address,
                action: action.0.0.clone(),
            }),
        )
            .into_response(),

        // The reason is in the logs; the caller learns nothing about it.
        VerificationResult::Denied(_) => {
            (StatusCode::FORBIDDEN, Json(Denied::default())).into_response()
        }
    }
}

fn invalid_request() -> Response {
    (StatusCode::BAD_REQUEST, Json(InvalidRequest::default())).into_response()
}
