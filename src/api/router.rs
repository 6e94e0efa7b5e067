//! HTTP router.
//!
//! Returns a composable `Router` with every endpoint under `/api/`.
//! Path params use `:param` syntax (axum 0.7).

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;
use crate::pipeline::Scheduler;

/// Room for several files plus multipart framing in one upload request.
const UPLOAD_BODY_FACTOR: usize = 8;

/// Build the API router for a scheduler.
pub fn api_router(scheduler: Scheduler) -> Router {
    let body_limit = usize::try_from(scheduler.config().max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_mul(UPLOAD_BODY_FACTOR);
    build_router(ApiContext::new(scheduler), body_limit)
}

fn build_router(ctx: ApiContext, body_limit: usize) -> Router {
    let api = Router::new()
        .route("/upload", post(endpoints::upload::upload))
        .route("/session/:id", delete(endpoints::upload::delete_session))
        .route("/generate", post(endpoints::tasks::generate))
        .route("/modify", post(endpoints::tasks::modify))
        .route(
            "/task/:id",
            get(endpoints::tasks::poll).delete(endpoints::tasks::delete),
        )
        .route("/task/:id/cancel", post(endpoints::tasks::cancel))
        .route("/update-source", post(endpoints::tasks::update_source))
        .route("/history", get(endpoints::history::list))
        .route("/history/search", get(endpoints::history::search))
        .route("/history/stats", get(endpoints::history::stats))
        .route(
            "/history/:id",
            get(endpoints::history::detail).delete(endpoints::history::delete),
        )
        .route("/files/:id/document", get(endpoints::history::document))
        .route("/files/:id/source", get(endpoints::history::source))
        .route("/health/compiler", get(endpoints::health::compiler))
        .route("/health/endpoint", post(endpoints::health::endpoint))
        .with_state(ctx);

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
