//! Route configuration

use crate::error::panic_response;
use crate::handlers;
use crate::state::AppState;
use axum::{extract::DefaultBodyLimit, routing::get, routing::post, Router};
use phonon_core::Config;
use phonon_infra::request_id_middleware;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Multipart framing and form fields on top of the file itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Router {
    let audio_routes = Router::new()
        .route(
            "/audio/user/{user_id}/phrase/{phrase_id}",
            post(handlers::audio_upload::upload_audio),
        )
        .route(
            "/audio/user/{user_id}/phrase/{phrase_id}/{audio_format}",
            get(handlers::audio_download::download_audio),
        )
        .route(
            "/audio/user/{user_id}/phrase/{phrase_id}/{audio_format}/link",
            get(handlers::audio_download::audio_link),
        )
        .route(
            "/files/{*key}",
            get(handlers::served_file::get_served_file),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(
            config.max_upload_size_bytes + MULTIPART_OVERHEAD_BYTES,
        ));

    let router = Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(audio_routes);

    with_common_layers(router).with_state(state)
}

/// Panic recovery, tracing and request ids, outermost last
pub fn with_common_layers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
}
