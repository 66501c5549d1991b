//! Internship records: submission, review, verification and reporting.

use axum::{
    Router,
    routing::{get, put},
};

use crate::web::AppState;

pub mod handlers;
pub mod model;
pub mod stats;
pub mod store;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/internships",
            get(handlers::list_internships).post(handlers::create_internship),
        )
        .route("/internships/stats/dashboard", get(handlers::dashboard_stats))
        .route(
            "/internships/:id",
            get(handlers::get_internship)
                .put(handlers::update_internship)
                .delete(handlers::delete_internship),
        )
        .route("/internships/:id/verify", put(handlers::verify_internship))
}
