//! HTTP surface: a single generation route.

use crate::config::{Hyperparameters, DEFAULT_MAX_LENGTH, DEFAULT_PROMPT, WEIGHTS_FILE};
use crate::device::Device;
use crate::error::{StoneError, StoneResult};
use crate::generation::{generate_text_with, GenerationConfig};
use crate::model::load_model_with;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const GENERATE_ROUTE: &str = "/api/python";

/// On-disk locations of the model assets.
#[derive(Clone, Debug)]
pub struct AssetPaths {
    pub weights: PathBuf,
    pub tokenizer_dir: PathBuf,
}

impl AssetPaths {
    /// Weights and tokenizer both live in one public directory.
    pub fn from_public_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            weights: dir.join(WEIGHTS_FILE),
            tokenizer_dir: dir.to_path_buf(),
        }
    }
}

/// Everything a request needs to load and run the model.
#[derive(Clone, Debug)]
pub struct AppState {
    pub assets: AssetPaths,
    pub hyperparameters: Hyperparameters,
    pub device: Device,
    pub max_length: usize,
    pub seed: Option<u64>,
}

impl AppState {
    pub fn new(assets: AssetPaths) -> Self {
        Self {
            assets,
            hyperparameters: Hyperparameters::default(),
            device: Device::Cpu,
            max_length: DEFAULT_MAX_LENGTH,
            seed: None,
        }
    }

    /// Load the model from disk and sample one continuation.
    ///
    /// Nothing is cached: every call reads the assets again.
    pub fn load_and_generate(&self, prompt: &str) -> StoneResult<String> {
        let (model, tokenizer) = load_model_with(
            &self.assets.weights,
            self.device,
            &self.assets.tokenizer_dir,
            self.hyperparameters,
        )?;

        let config = GenerationConfig {
            seed: self.seed,
            ..GenerationConfig::for_tokenizer(&tokenizer, self.max_length)
        };
        generate_text_with(&model, &tokenizer, prompt, &config, self.device)
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub message: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(GENERATE_ROUTE, get(generate))
        .with_state(state)
}

async fn generate(
    State(state): State<AppState>,
    Query(query): Query<GenerateQuery>,
) -> Result<Json<GenerateResponse>, ApiError> {
    info!("Generating for prompt of {} bytes", query.prompt.len());

    // Loading and sampling block; keep them off the async workers.
    let message = tokio::task::spawn_blocking(move || state.load_and_generate(&query.prompt))
        .await
        .map_err(|e| StoneError::Inference(e.into()))??;

    Ok(Json(GenerateResponse { message }))
}

/// Any failure surfaces as a bare 500; details go to the log only.
#[derive(Debug)]
pub struct ApiError(StoneError);

impl From<StoneError> for ApiError {
    fn from(err: StoneError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Request failed: {}", error_chain(&self.0));
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
    }
}

/// Render an error with all of its causes, outermost first.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // Transparent wrappers repeat their inner message.
        if !message.ends_with(&text) {
            message = format!("{message}: {text}");
        }
        source = cause.source();
    }
    message
}
