#![allow(clippy::needless_for_each)]

#[allow(unused_imports)]
use crate::{
    auth::AuthenticationService,
    keygate::handlers::{
        challenge, challenge::__path_generate_challenge, health, health::__path_health, verify,
        verify::__path_verify_signature,
    },
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, debug_span, info};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;

#[derive(OpenApi)]
#[openapi(
    paths(generate_challenge, verify_signature, health),
    components(
        schemas(
            challenge::ChallengeResponse,
            verify::VerifyRequest,
            verify::Granted,
            verify::Denied,
            verify::InvalidRequest,
            health::Health
        )
    ),
    tags(
        (name = "keygate", description = "Challenge-response wallet signature authentication"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Name of the action reported back to the client on a grant.
#[derive(Clone, Debug)]
pub struct GrantAction(pub String);

/// Runtime settings for `new`.
#[derive(Debug)]
pub struct Settings {
    pub port: u16,
    pub action: String,
    pub sweep_interval: Duration,
    pub allow_list_path: PathBuf,
    /// `None` disables hot reload.
    pub allow_list_reload_interval: Option<Duration>,
}

/// Build the application router around an already wired service.
pub fn router(service: Arc<AuthenticationService>, action: impl Into<String>) -> Router {
    let cors = CorsLayer::new()
        // allow `GET` and `POST` when accessing the resource
        .allow_methods([Method::GET, Method::POST])
        // allow requests from any origin
        .allow_origin(Any);

    Router::new()
        .route("/generate-challenge", get(handlers::generate_challenge))
        .route("/verify-signature", post(handlers::verify_signature))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors),
        )
        .route("/health", get(handlers::health).options(handlers::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(Extension(service))
        .layer(Extension(GrantAction(action.into())))
}

/// Serve until Ctrl-C or SIGTERM.
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails
pub async fn new(service: Arc<AuthenticationService>, settings: Settings) -> Result<()> {
    let sweeper = service.spawn_sweeper(settings.sweep_interval);

    let watcher = settings.allow_list_reload_interval.map(|interval| {
        service
            .allow_list()
            .spawn_watcher(settings.allow_list_path.clone(), interval)
    });

    let app = router(service, settings.action);

    let listener = TcpListener::bind(format!("::0:{}", settings.port))
        .await
        .with_context(|| format!("Failed to bind port {}", settings.port))?;

    info!("Listening on [::]:{}", settings.port);

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    if let Some(watcher) = watcher {
        watcher.abort();
    }

    served.context("Server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, request_id)
}
