use axum::extract::{DefaultBodyLimit, Request, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tower_http::validate_request::ValidateRequestHeaderLayer;
use tracing::info_span;

use auth::StaticValidate;

use crate::config::Config;

pub mod admin;
pub mod chunk;
pub mod internal;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
}

pub fn route(app_state: AppState) -> Router {
    let cfg = app_state.config.clone();
    let admin_layer =
        ValidateRequestHeaderLayer::custom(StaticValidate::new(cfg.auth.admin_token.clone()));
    let internal_layer =
        ValidateRequestHeaderLayer::custom(StaticValidate::new(cfg.auth.internal_token.clone()));
    // Slack on top of the payload bound covers multipart framing and metadata
    // fields; the handler enforces the exact limit on the file itself.
    let body_limit = cfg.storage.max_upload_size_bytes + 64 * 1024;

    Router::new()
        .merge(chunk::route())
        .merge(admin::route().layer(admin_layer))
        .merge(internal::route().layer(internal_layer))
        .route(api::path::HEALTH, get(health))
        .with_state(app_state)
        .layer(if cfg.http.cors {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        })
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(http_log::print_request_response))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                info_span!(
                    "http_request",
                    uri = ?request.uri(),
                    method = ?request.method(),
                )
            }),
        )
}

async fn health(State(state): State<AppState>) -> Json<api::response::HealthResponse> {
    let db = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let storage_writable = storage::check_writable(&state.config.storage.audio_dir).await;
    Json(api::response::HealthResponse {
        status: if db && storage_writable { "ok" } else { "degraded" }.to_string(),
        db,
        storage_writable,
        time: Utc::now(),
    })
}
