#![allow(dead_code)]

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use services::AppState;

use services::daily_quiz_service::DailyQuizService;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config.cors_allowed_origins);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        // Everything under /api/v1 requires a bearer token; auth runs before rate limiting
        .nest(
            "/api/v1",
            api_routes(app_state.clone())
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::rate_limit::rate_limit_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::auth::auth_middleware,
                )),
        )
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(origins))
}

fn api_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(quiz_routes())
        .merge(incident_routes())
        .merge(user_routes())
        .merge(achievement_routes())
        .merge(generation_routes(app_state))
        .nest("/admin", admin_routes())
}

fn quiz_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/quiz/active", get(handlers::quiz::get_active_quizzes))
        .route("/quiz/history", get(handlers::quiz::get_quiz_history))
        .route("/quiz/{quiz_id}/submit", post(handlers::quiz::submit_quiz))
}

fn incident_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/incidents", get(handlers::incidents::list_incidents))
        .route(
            "/incidents/{id}",
            get(handlers::incidents::get_incident)
                .patch(handlers::incidents::update_incident)
                .delete(handlers::incidents::delete_incident),
        )
        .route(
            "/incidents/{id}/quiz",
            post(handlers::incidents::submit_incident_quiz),
        )
}

/// Routes that call the content generator get an extra, stricter limit.
fn generation_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/quiz/generate", post(handlers::quiz::generate_quiz))
        .route(
            "/incidents/analyze",
            post(handlers::incidents::analyze_incident),
        )
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::rate_limit::generation_rate_limit_middleware,
        ))
}

fn user_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/profile", post(handlers::users::create_profile))
        .route("/users/me", get(handlers::users::get_me))
        .route(
            "/users/me/resolved-incidents",
            patch(handlers::users::update_resolved_incidents),
        )
        .route(
            "/users/me/experience",
            patch(handlers::users::update_experience),
        )
}

fn achievement_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/achievements",
            post(handlers::achievements::grant_achievement),
        )
        .route(
            "/achievements/recent",
            get(handlers::achievements::recent_achievements),
        )
}

fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/daily-quiz/regenerate",
            post(handlers::admin::regenerate_daily_quiz),
        )
        .route_layer(middleware::from_fn(
            middlewares::auth::admin_guard_middleware,
        ))
}

/// Runs the daily quiz scheduler inside the API process.
pub fn spawn_daily_quiz_scheduler(app_state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let service = DailyQuizService::new(
            app_state.store.clone(),
            app_state.generator.clone(),
            &app_state.config,
        );
        if let Err(e) = service.run().await {
            tracing::error!("Daily quiz scheduler stopped: {}", e);
        }
    })
}
