mod detect_human;

use crate::{model_service::ModelService, state::SharedState};
use axum::{extract::DefaultBodyLimit, routing::post, Router};

pub use detect_human::detect_human;

pub fn api_routes<M: ModelService>(max_body_bytes: usize) -> Router<SharedState<M>> {
    Router::new()
        .route("/detectHuman", post(detect_human::<M>))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}
