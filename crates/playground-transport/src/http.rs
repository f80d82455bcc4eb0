//! HTTP API.

use axum::{
    Json, Router,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use playground_core::{
    Architecture, Dataset, DatasetKind, DatasetStore, ModelId, ModelMetadata, ModelWeights, SessionId,
    TrainRequest, ValidationError, dataset::DatasetError, traits::StoreError,
};
use playground_session::ModelError;
use serde::Deserialize;
use serde_json::json;

use crate::{state::AppState, websocket::ws_handler};

/// Error returned by an API handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("Invalid dataset: {0}")]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("Training session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("Invalid request body: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    /// HTTP status and a stable machine-readable kind.
    #[must_use]
    pub const fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            Self::Dataset(_) => (StatusCode::BAD_REQUEST, "invalid_dataset"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::SessionNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Model(e) => match e {
                ModelError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                ModelError::ShapeMismatch { .. } => (StatusCode::BAD_REQUEST, "shape_mismatch"),
                ModelError::Invalid(_) => (StatusCode::BAD_REQUEST, "invalid_model"),
                ModelError::Reconstruction(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "reconstruction")
                }
                ModelError::Inference(_) => (StatusCode::INTERNAL_SERVER_ERROR, "inference"),
                ModelError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence"),
            },
            Self::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        if status.is_server_error() {
            tracing::error!(kind, "Request failed: {self}");
        } else {
            tracing::debug!(kind, "Request rejected: {self}");
        }
        (status, Json(json!({ "error": self.to_string(), "kind": kind }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Build the API router, including the `/ws` progress feed.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/datasets", get(list_datasets).post(create_dataset))
        .route("/api/train", post(start_training))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/predict", post(predict))
        .route("/api/models", get(list_models).post(save_model))
        .route("/api/models/{id}", get(get_model).delete(delete_model))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "activeSessions": state.orchestrator.registry().len(),
        "timestamp": Utc::now(),
    }))
}

async fn list_datasets(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.datasets.list().await?))
}

#[derive(Debug, Deserialize)]
struct NewDataset {
    name: String,
    #[serde(rename = "type")]
    kind: DatasetKind,
    data: Dataset,
}

async fn create_dataset(
    State(state): State<AppState>,
    payload: Result<Json<NewDataset>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(NewDataset { name, kind, data }) = payload?;
    if name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    data.check_shape()?;
    let metadata = data.metadata();

    let id = state.datasets.insert(name.clone(), kind, data).await?;
    tracing::info!(dataset = %id, samples = metadata.samples, "Dataset stored");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": id,
            "name": name,
            "type": kind,
            "metadata": metadata,
        })),
    ))
}

async fn start_training(
    State(state): State<AppState>,
    payload: Result<Json<TrainRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let session_id = state.orchestrator.start_training(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "sessionId": session_id, "message": "Training started" })),
    ))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.active_sessions())
}

async fn get_session(
    State(state): State<AppState>,
    path: Result<Path<SessionId>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    state
        .orchestrator
        .session(id)
        .map(Json)
        .ok_or(ApiError::SessionNotFound(id))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictRequest {
    model_id: ModelId,
    input_data: Vec<f64>,
}

async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let prediction = state
        .models
        .predict(request.model_id, &request.input_data)
        .await?;
    Ok(Json(prediction))
}

async fn list_models(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.models.list().await?))
}

async fn get_model(
    State(state): State<AppState>,
    path: Result<Path<ModelId>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    Ok(Json(state.models.get(id).await?))
}

#[derive(Debug, Deserialize)]
struct SaveModelRequest {
    name: String,
    architecture: Architecture,
    weights: ModelWeights,
    #[serde(default)]
    metadata: ModelMetadata,
}

async fn save_model(
    State(state): State<AppState>,
    payload: Result<Json<SaveModelRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(SaveModelRequest {
        name,
        architecture,
        weights,
        metadata,
    }) = payload?;
    let id = state
        .models
        .save(name, architecture, weights, metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn delete_model(
    State(state): State<AppState>,
    path: Result<Path<ModelId>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    Ok(Json(state.models.delete(id).await?))
}
