use axum::{
    Router,
    http::{HeaderValue, Method, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{accounts, documents, internships, web::AppState};

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(accounts::router())
        .merge(internships::router())
        .merge(documents::router(state.upload_settings().max_bytes));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api)
        .layer(cors_layer(state.config().cors_allowed_origin.as_deref()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    match allowed_origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => layer.allow_origin(origin),
        Some(Err(err)) => {
            warn!(%err, "ignoring invalid CORS_ALLOWED_ORIGIN, allowing any origin");
            layer.allow_origin(Any)
        }
        None => layer.allow_origin(Any),
    }
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
