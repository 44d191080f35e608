use crate::{
    detection_service::DetectionResponse, error::DetectHumanError, model_service::ModelService,
    state::SharedState,
};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    Json,
};
use tracing::instrument;

/// Body read failures, such as exceeding the size limit, are answered with `{error}` as well.
#[instrument(skip(state, image_data), fields(body_len = tracing::field::Empty))]
pub async fn detect_human<M: ModelService>(
    State(state): State<SharedState<M>>,
    image_data: Result<Bytes, BytesRejection>,
) -> Result<Json<DetectionResponse>, DetectHumanError> {
    let image_data = image_data?;
    tracing::Span::current().record("body_len", image_data.len());
    let response = state.detection_service.detect(image_data).await?;
    Ok(Json(response))
}
