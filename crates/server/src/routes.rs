//! Route configuration.

use crate::handlers;
use crate::ratelimit::rate_limit_middleware;
use crate::state::AppState;
use axum::Router;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post, put};
use satoshisend_core::config::ServerConfig;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        // Upload protocol
        .route("/api/upload/init", post(handlers::init_upload))
        .route("/api/upload/{id}", put(handlers::put_blob))
        .route("/api/upload/complete", post(handlers::complete_upload))
        // Retrieval (GET also serves HEAD)
        .route("/api/file/{id}", get(handlers::download))
        .route("/api/file/{id}/status", get(handlers::file_status))
        .route("/api/file/{id}/invoice", get(handlers::file_invoice))
        // Settlement webhook
        .route("/api/webhook/alby", post(handlers::alby_webhook));

    let rate_limit_state = state.rate_limit.clone();
    let cors = cors_layer(&state.config.server);

    // Middleware layers are applied in reverse order (outermost first).
    // Order of execution: TraceLayer -> rate limit -> CORS -> handler.
    router
        .layer(cors)
        .layer(middleware::from_fn_with_state(
            rate_limit_state,
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the CORS layer. Dev mode or an empty origin list allows all
/// origins; otherwise access is restricted to the configured origins.
fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE]);

    if server.dev_mode || server.cors_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.trim().parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "skipping invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
