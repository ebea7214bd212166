mod api;
mod pages;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/users", post(api::create_user))
        .route("/users/:id", get(api::get_user))
        .route(
            "/submissions",
            get(api::list_submissions).post(api::create_submission),
        )
        .route("/submissions/:id", get(api::get_submission))
        .route(
            "/submissions/:id/participants",
            get(api::list_participants).post(api::add_participant),
        )
        .route(
            "/submissions/:id/files",
            get(api::list_files).post(api::upload_file),
        )
        .route("/submissions/:id/review-rounds", get(api::list_review_rounds))
        .route(
            "/submissions/:id/decisions",
            get(api::decision_history).post(api::take_decision),
        )
        .route(
            "/submissions/:id/decisions/available",
            get(api::available_decisions),
        )
        .route(
            "/submissions/:id/decisions/:decision/steps",
            get(api::decision_steps),
        )
        .route("/submissions/:id/log", get(api::event_log))
        .route("/review-rounds/:id/assignments", post(api::assign_reviewer))
        .route("/review-assignments/:id/confirm", post(api::confirm_review))
        .route("/review-assignments/:id/decline", post(api::decline_review))
        .route("/review-assignments/:id/complete", post(api::complete_review))
        .route("/review-assignments/:id/consider", post(api::consider_review))
        .route(
            "/review-assignments/:id/acknowledge",
            post(api::acknowledge_review),
        )
        .route("/review-assignments/:id/cancel", post(api::cancel_review));

    Router::new()
        .route("/", get(pages::index))
        .route("/submissions/:id", get(pages::submission))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
