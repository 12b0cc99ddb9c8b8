use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::ApiState;

pub fn create_router(state: Arc<ApiState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            state.config.request_timeout_secs,
        )));

    Router::new()
        .route(
            "/api/plans",
            get(handlers::list_plans).post(handlers::upsert_plan),
        )
        .route("/api/plans/:plan_id", delete(handlers::delete_plan))
        .route(
            "/api/tenants",
            get(handlers::list_tenants).post(handlers::create_tenant),
        )
        .route("/api/tenants/:tenant_id", get(handlers::get_tenant))
        .route("/api/tenants/:tenant_id/usage", get(handlers::get_usage))
        .route("/api/tenants/:tenant_id/status", put(handlers::update_status))
        .route("/api/tenants/:tenant_id/plan", put(handlers::update_plan))
        .route(
            "/api/tenants/:tenant_id/quota/check",
            post(handlers::check_quota),
        )
        .route(
            "/api/tenants/:tenant_id/storage/track",
            post(handlers::track_storage),
        )
        .route("/api/tenants/:tenant_id/staff", post(handlers::create_staff))
        .route(
            "/api/tenants/:tenant_id/clients",
            post(handlers::create_client),
        )
        .route(
            "/api/tenants/:tenant_id/attachments",
            post(handlers::create_attachment),
        )
        .route(
            "/api/tenants/:tenant_id/id-patterns/:kind",
            get(handlers::get_pattern).put(handlers::set_pattern),
        )
        .route(
            "/api/tenants/:tenant_id/identifiers/:kind",
            post(handlers::next_identifier),
        )
        .route(
            "/api/identifiers/preview",
            post(handlers::preview_identifier),
        )
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(middleware)
}
