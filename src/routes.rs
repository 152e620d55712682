use crate::handlers;
use crate::state::AppState;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::COOKIE,
            axum::http::HeaderName::from_static(handlers::ADMIN_HEADER),
            axum::http::HeaderName::from_static("x-request-id"),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/subjects", get(handlers::list_subjects))
        .route("/api/v1/session", post(handlers::create_session).get(handlers::get_session))
        .route("/api/v1/session/form", put(handlers::update_form_field))
        .route("/api/v1/session/registration", post(handlers::complete_registration))
        .route("/api/v1/session/subjects/:subject/toggle", post(handlers::toggle_subject))
        .route("/api/v1/session/test/start", post(handlers::start_test))
        .route("/api/v1/session/test/answers", put(handlers::submit_answer))
        .route("/api/v1/session/test/complete", post(handlers::complete_test))
        .route("/ws/session/timer", get(handlers::ws_timer))
        .route("/api/v1/admin/login", post(handlers::admin_login))
        .route(
            "/api/v1/admin/questions/:subject",
            get(handlers::admin_list_questions).post(handlers::admin_add_question),
        )
        .route(
            "/api/v1/admin/questions/:subject/:index",
            put(handlers::admin_update_question).delete(handlers::admin_delete_question),
        )
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
