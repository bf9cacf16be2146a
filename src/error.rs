//! Error types for loading and serving.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading a model or generating text.
#[derive(Debug, Error)]
pub enum StoneError {
    /// A weight or tokenizer asset could not be read or parsed.
    #[error("Failed to load asset '{}': {source}", .path.display())]
    AssetLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Tokenizer construction, encoding or decoding failed.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Hyperparameters that cannot describe a model.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested compute target is not available in this build.
    #[error("Unsupported device '{0}'. Only 'cpu' is available")]
    UnsupportedDevice(String),

    /// Generation was asked to run on a device the model does not live on.
    #[error("Model lives on {model} but generation was requested on {requested}")]
    DeviceMismatch { model: String, requested: String },

    /// A tensor the architecture needs is absent from the weight file.
    #[error("Tensor '{0}' not found in weight file")]
    MissingTensor(String),

    /// A stored tensor does not match the shape the configuration implies.
    #[error("Tensor '{tensor}' has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        tensor: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The prompt does not fit in the model's context window.
    #[error("Prompt has {tokens} tokens but the context window is {context}")]
    PromptTooLong { tokens: usize, context: usize },

    /// The forward pass or sampling failed.
    #[error("Inference failed: {0}")]
    Inference(#[from] anyhow::Error),
}

/// Result type for stonegpt operations.
pub type StoneResult<T> = Result<T, StoneError>;
