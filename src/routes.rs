use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    error::AppError,
    model::Classifier,
    nutrition::{NutritionLookup, NutritionRecord},
    storage::{decode_image_payload, ImageStore},
};

pub struct AppState {
    pub store: ImageStore,
    pub classifier: Arc<dyn Classifier>,
    pub nutrition: Arc<dyn NutritionLookup>,
}

#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    food_name: String,
    nutrition_info: NutritionRecord,
}

pub fn router(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/api/capture", post(capture_handler))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(state)
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
}

/// Save the uploaded photo, classify it and attach nutrition data for the
/// predicted food. Each stage ends the request on failure.
async fn capture_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CaptureRequest>, JsonRejection>,
) -> Result<Json<CaptureResponse>, AppError> {
    info!("received image capture request");

    let image = match payload {
        Ok(Json(CaptureRequest { image: Some(image) })) if !image.trim().is_empty() => image,
        Ok(_) => return Err(AppError::MissingImage),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return Err(AppError::PayloadTooLarge)
        }
        Err(rejection) => {
            warn!(error = %rejection, "unreadable capture body");
            return Err(AppError::MissingImage);
        }
    };

    let bytes = decode_image_payload(&image)?;
    let stored = state.store.save(&bytes).await?;
    info!(path = %stored.path().display(), "image saved");

    let classifier = Arc::clone(&state.classifier);
    let image_path = stored.path().to_path_buf();
    let prediction = tokio::task::spawn_blocking(move || classifier.predict(&image_path)).await??;
    stored.remove().await;
    info!(
        food = %prediction.label,
        probability = prediction.probability,
        "predicted food item"
    );

    let nutrition_info = state.nutrition.lookup(&prediction.label).await?;

    Ok(Json(CaptureResponse {
        food_name: prediction.label,
        nutrition_info,
    }))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "OK" }))
}
