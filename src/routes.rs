// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{auth, exam, proctor},
    state::AppState,
    utils::jwt::{auth_middleware, proctor_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, exams, proctor).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (Database Pool, Config, Session Hub).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    let exam_routes = Router::new()
        .route("/{exam_id}/enter", post(exam::enter_exam))
        .route("/{exam_id}/questions", get(exam::fetch_questions))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let proctor_routes = Router::new()
        .route("/sessions", get(proctor::list_sessions))
        .route(
            "/exams/{exam_id}/students/{student_id}/force-submit",
            post(proctor::force_submit),
        )
        .route(
            "/exams/{exam_id}/students/{student_id}/result",
            get(proctor::session_result),
        )
        // Double middleware protection: Auth first, then Proctor check
        .layer(middleware::from_fn(proctor_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/exams", exam_routes)
        .nest("/api/proctor", proctor_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
