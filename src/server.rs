use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::Html,
    routing::{get, post},
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{
    config::AppConfig,
    error::ServiceError,
    genre::{Genre, GenrePreset},
    model::{ModelRegistry, ModelStatus, StoryRequest, StoryResponse},
    sampling::SamplingBounds,
    ui,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
}

#[derive(Serialize)]
struct GenresResponse {
    presets: Vec<GenrePreset>,
    default_genre: &'static str,
    sampling: SamplingBounds,
}

#[derive(Serialize)]
struct MetadataResponse {
    model: ModelStatus,
    candidates: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearedOutput {
    pub story: String,
}

pub fn build_router(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> Router {
    let state = AppState { registry, config };

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/genres", get(genres))
        .route("/metadata", get(metadata))
        .route("/generate", post(generate))
        .route("/clear", post(clear))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn index() -> Html<&'static str> {
    Html(ui::INDEX_HTML)
}

async fn health() -> &'static str {
    "ok"
}

async fn genres(State(state): State<AppState>) -> Json<GenresResponse> {
    Json(GenresResponse {
        presets: Genre::PRESETS.iter().map(|genre| genre.preset()).collect(),
        default_genre: Genre::DEFAULT_SELECTION.label(),
        sampling: SamplingBounds::new(state.registry.defaults()),
    })
}

async fn metadata(State(state): State<AppState>) -> Json<MetadataResponse> {
    Json(MetadataResponse {
        model: state.registry.status(),
        candidates: state.config.model_candidates.clone(),
    })
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<StoryRequest>,
) -> Result<Json<StoryResponse>, ServiceError> {
    let response = state.registry.generate_story(request).await?;
    Ok(Json(response))
}

async fn clear() -> Json<ClearedOutput> {
    Json(clear_output())
}

/// The output field after a clear: always empty.
pub fn clear_output() -> ClearedOutput {
    ClearedOutput {
        story: String::new(),
    }
}
